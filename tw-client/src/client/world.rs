//! Client-side world representation.
//!
//! The client never simulates anything. Its world is a passive mirror of the server's, filled in
//! chunk by chunk as the view reveals them and patched by the deltas the server broadcasts.

use glam::IVec2;
use log::{debug, warn};
use tw_core::{
    protocol::{C2SMessage, S2CMessage},
    world::{
        World,
        chunk::{CHUNK_SIZE, ChunkState},
    },
};

/// Default number of chunk requests that may be in flight at once.
pub const REQUEST_LIMIT: usize = 5;

/// The rectangle of the world currently on screen, in blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct View {
    pub center: IVec2,
    pub size: IVec2,
}

impl View {
    pub fn new(center: IVec2, size: IVec2) -> Self {
        Self { center, size }
    }

    /// Inclusive chunk range covering the view plus a margin of one chunk, clamped to the world.
    fn chunk_range(&self, world: &World) -> (IVec2, IVec2) {
        let chunk = IVec2::splat(CHUNK_SIZE as i32);
        let min = (self.center - self.size / 2).div_euclid(chunk) - IVec2::ONE;
        let max = (self.center + self.size / 2).div_euclid(chunk) + IVec2::ONE;
        let last = IVec2::new(
            world.chunk_width() as i32 - 1,
            world.chunk_height() as i32 - 1,
        );
        (min.clamp(IVec2::ZERO, last), max.clamp(IVec2::ZERO, last))
    }
}

/// Client-side world representation.
///
/// Holds the mirror grid, once the server has described it, and the chunk request state machine:
/// a chunk goes from unloaded to pending when it is requested and to loaded when its data
/// arrives. There is no timeout, a pending chunk stays pending until its response is applied.
pub struct ClientWorld {
    world: Option<World>,
    /// Requests sent and not answered yet.
    pending: usize,
    request_limit: usize,
}

impl ClientWorld {
    /// Creates an empty client world that keeps at most `request_limit` requests in flight.
    pub fn new(request_limit: usize) -> Self {
        Self {
            world: None,
            pending: 0,
            request_limit,
        }
    }

    /// The mirror grid, once the server has sent its dimensions.
    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Unloaded chunks covering the view, in row-major order.
    pub fn needs_chunks(&self, view: View) -> Vec<(u16, u16)> {
        let Some(world) = &self.world else {
            return Vec::new();
        };
        let (min, max) = view.chunk_range(world);
        let mut chunks = Vec::new();
        for chunk_y in min.y..=max.y {
            for chunk_x in min.x..=max.x {
                let (chunk_x, chunk_y) = (chunk_x as u16, chunk_y as u16);
                if world.get_chunk(chunk_x, chunk_y).state == ChunkState::Unloaded {
                    chunks.push((chunk_x, chunk_y));
                }
            }
        }
        chunks
    }

    /// Marks as many needed chunks as pending as the request limit allows and returns the
    /// requests to send. The rest is left for later frames.
    pub fn request_chunks(&mut self, view: View) -> Vec<C2SMessage> {
        let budget = self.request_limit.saturating_sub(self.pending);
        let needed = self.needs_chunks(view);
        let Some(world) = &mut self.world else {
            return Vec::new();
        };
        let requests: Vec<_> = needed
            .into_iter()
            .take(budget)
            .map(|(chunk_x, chunk_y)| {
                world.set_chunk_state(chunk_x, chunk_y, ChunkState::PendingLoad);
                C2SMessage::ChunkRequest { chunk_x, chunk_y }
            })
            .collect();
        self.pending += requests.len();
        requests
    }

    fn in_bounds(world: &World, x: u16, y: u16) -> bool {
        if x < world.width() && y < world.height() {
            return true;
        }
        warn!("server sent a change for ({x}, {y}), outside the world");
        false
    }

    /// Applies one message from the server to the mirror.
    pub fn apply(&mut self, message: S2CMessage) {
        if let S2CMessage::Welcome { width, height } = message {
            let chunk = CHUNK_SIZE as u16;
            if width == 0 || height == 0 || width % chunk != 0 || height % chunk != 0 {
                warn!("server announced an invalid {width}x{height} world");
                return;
            }
            debug!("joined a {width}x{height} world");
            self.world = Some(World::new_mirror(width, height));
            self.pending = 0;
            return;
        }
        let Some(world) = &mut self.world else {
            warn!("ignoring world data received before the welcome message");
            return;
        };

        match message {
            S2CMessage::Welcome { .. } => {}
            S2CMessage::Chunk {
                chunk_x,
                chunk_y,
                blocks,
            } => {
                if chunk_x >= world.chunk_width() || chunk_y >= world.chunk_height() {
                    warn!("server sent chunk ({chunk_x}, {chunk_y}), outside the world");
                    return;
                }
                if world.get_chunk(chunk_x, chunk_y).state == ChunkState::PendingLoad {
                    self.pending = self.pending.saturating_sub(1);
                }
                world.apply_chunk(chunk_x, chunk_y, &blocks);
            }
            S2CMessage::BlockChange { x, y, block_type } => {
                if Self::in_bounds(world, x, y) {
                    let liquid_type = world.get_block(x, y).liquid_type;
                    world.set_type(x, y, block_type, liquid_type);
                }
            }
            S2CMessage::LightChange { x, y, level } => {
                if Self::in_bounds(world, x, y) {
                    world.set_light_level(x, y, level);
                }
            }
            S2CMessage::LiquidChange {
                x,
                y,
                liquid_type,
                level,
            } => {
                if Self::in_bounds(world, x, y) {
                    world.set_liquid(x, y, liquid_type, level);
                }
            }
            S2CMessage::BlockProgressChange { x, y, stage } => {
                if Self::in_bounds(world, x, y) {
                    world.set_break_stage(x, y, stage);
                }
            }
        }
    }

    /// Recomputes the orientation of every dirty block in loaded, dirty chunks and returns the
    /// chunks whose textures have to be rebuilt.
    pub fn prepare_render(&mut self) -> Vec<(u16, u16)> {
        let Some(world) = &mut self.world else {
            return Vec::new();
        };
        let mut rebuilt = Vec::new();
        for chunk_y in 0..world.chunk_height() {
            for chunk_x in 0..world.chunk_width() {
                if world.get_chunk(chunk_x, chunk_y).is_loaded()
                    && world.rebuild_chunk(chunk_x, chunk_y)
                {
                    rebuilt.push((chunk_x, chunk_y));
                }
            }
        }
        rebuilt
    }
}
