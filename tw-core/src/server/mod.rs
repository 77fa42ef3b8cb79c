//! Server code for handling client connections and requests.
//!
//! Note that this does not include networking, for that please check tw-server. This module only
//! holds the server-side game logic: sessions, chunk requests, block breaking and placing, and
//! turning the changes of the world into deltas for every client.

use fxhash::FxHashMap;
use log::{debug, info, warn};

use crate::{
    block::{BlockType, LiquidType},
    protocol::*,
    world::{BlockChange, World, light::LightEngine, liquid::LiquidEngine},
};

/// Represents a connected client on the server.
pub struct PlayerSession {
    pub connection_id: u64,
    /// The block this player is currently breaking.
    pub breaking: Option<(u16, u16)>,
    pub pending_messages: Vec<S2CMessage>,
}

/// The main server struct that manages player sessions and world state.
pub struct Server {
    pub sessions: FxHashMap<u64, PlayerSession>,
    world: World,
    light: LightEngine,
    liquid: LiquidEngine,
}

impl Server {
    /// Creates a server around a generated or loaded world. Light is computed from scratch and
    /// every liquid block is queued for the simulation.
    pub fn new(mut world: World, seed: u64) -> Self {
        let mut light = LightEngine::new();
        light.init(&mut world);
        let mut liquid = LiquidEngine::new(seed);
        liquid.schedule_all(&world);
        world.take_changes();
        info!(
            "server ready with a {}x{} world, {} active liquid blocks",
            world.width(),
            world.height(),
            liquid.active()
        );
        Self {
            sessions: FxHashMap::default(),
            world,
            light,
            liquid,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Registers a new connection. Its first message is the world description.
    pub fn connect(&mut self, connection_id: u64) {
        debug!("connection {connection_id} joined");
        self.sessions.insert(
            connection_id,
            PlayerSession {
                connection_id,
                breaking: None,
                pending_messages: vec![S2CMessage::Welcome {
                    width: self.world.width(),
                    height: self.world.height(),
                }],
            },
        );
    }

    /// Drops a connection and anything it was doing.
    pub fn disconnect(&mut self, connection_id: u64) {
        if let Some(session) = self.sessions.remove(&connection_id) {
            debug!("connection {connection_id} left");
            if let Some((x, y)) = session.breaking {
                self.reset_progress(x, y);
                self.broadcast_changes();
            }
        }
    }

    /// Takes the messages queued for one connection.
    pub fn take_messages(&mut self, connection_id: u64) -> Vec<S2CMessage> {
        self.sessions
            .get_mut(&connection_id)
            .map(|session| std::mem::take(&mut session.pending_messages))
            .unwrap_or_default()
    }

    fn in_bounds(&self, x: u16, y: u16) -> bool {
        x < self.world.width() && y < self.world.height()
    }

    /// Resets the break progress of a block unless another player is still breaking it.
    fn reset_progress(&mut self, x: u16, y: u16) {
        let still_broken = self
            .sessions
            .values()
            .any(|session| session.breaking == Some((x, y)));
        if !still_broken {
            self.world.set_break_progress(x, y, 0);
        }
    }

    /// Handles one message received from a client, and prepares responses. Each message is a
    /// complete mutation: its deltas are queued only after light has settled. Note that this does
    /// not tick the server, that must be done separately.
    pub fn handle_message(&mut self, connection_id: u64, message: C2SMessage) {
        if !self.sessions.contains_key(&connection_id) {
            warn!("message from unknown connection {connection_id}");
            return;
        }

        match message {
            C2SMessage::ChunkRequest { chunk_x, chunk_y } => {
                if chunk_x >= self.world.chunk_width() || chunk_y >= self.world.chunk_height() {
                    warn!(
                        "connection {connection_id} requested missing chunk ({chunk_x}, {chunk_y})"
                    );
                    return;
                }
                let blocks = self.world.chunk_records(chunk_x, chunk_y);
                if let Some(session) = self.sessions.get_mut(&connection_id) {
                    session.pending_messages.push(S2CMessage::Chunk {
                        chunk_x,
                        chunk_y,
                        blocks,
                    });
                }
            }
            C2SMessage::StartedBreaking { x, y } => {
                if !self.in_bounds(x, y) {
                    return;
                }
                let previous = self
                    .sessions
                    .get_mut(&connection_id)
                    .and_then(|session| session.breaking.replace((x, y)));
                if let Some((px, py)) = previous
                    && (px, py) != (x, y)
                {
                    self.reset_progress(px, py);
                }
            }
            C2SMessage::StoppedBreaking => {
                let previous = self
                    .sessions
                    .get_mut(&connection_id)
                    .and_then(|session| session.breaking.take());
                if let Some((x, y)) = previous {
                    self.reset_progress(x, y);
                }
            }
            C2SMessage::PlaceBlock { x, y, block_type } => {
                if !self.in_bounds(x, y) || self.world.get_block(x, y).block_type != BlockType::Air
                {
                    return;
                }
                let liquid_type = if block_type.is_ghost() {
                    self.world.get_block(x, y).liquid_type
                } else {
                    LiquidType::Empty
                };
                self.light
                    .set_block(&mut self.world, x, y, block_type, liquid_type);
                self.liquid.schedule_around(&self.world, x, y);
            }
        }
        self.broadcast_changes();
    }

    /// Ticks the server: advances block breaking by `frame_ms`, steps the liquids that are due at
    /// `now_ms` and relaxes any pending light, then queues the resulting deltas.
    pub fn tick(&mut self, now_ms: u64, frame_ms: u16) {
        let targets: Vec<_> = self
            .sessions
            .values()
            .filter_map(|session| session.breaking.map(|pos| (session.connection_id, pos)))
            .collect();
        for (connection_id, (x, y)) in targets {
            let block = self.world.get_block(x, y);
            let Some(break_time) = block.block_type.info().break_time else {
                continue;
            };
            let progress = block.break_progress.saturating_add(frame_ms);
            if progress >= break_time {
                debug!("({x}, {y}) broken by connection {connection_id}");
                self.light.break_block(&mut self.world, x, y);
                self.liquid.schedule_around(&self.world, x, y);
                for session in self.sessions.values_mut() {
                    if session.breaking == Some((x, y)) {
                        session.breaking = None;
                    }
                }
            } else {
                self.world.set_break_progress(x, y, progress);
            }
        }

        self.liquid.update(&mut self.world, now_ms);
        self.light.run(&mut self.world);
        self.broadcast_changes();
    }

    /// Converts the world's change set into deltas queued for every session.
    fn broadcast_changes(&mut self) {
        for (x, y, change) in self.world.take_changes() {
            let block = self.world.get_block(x, y);
            let message = match change {
                BlockChange::Type => S2CMessage::BlockChange {
                    x,
                    y,
                    block_type: block.block_type,
                },
                BlockChange::Light => S2CMessage::LightChange {
                    x,
                    y,
                    level: block.light_level,
                },
                BlockChange::Liquid => S2CMessage::LiquidChange {
                    x,
                    y,
                    liquid_type: block.liquid_type,
                    level: block.liquid_level,
                },
                BlockChange::BreakStage => S2CMessage::BlockProgressChange {
                    x,
                    y,
                    stage: block.break_stage,
                },
            };
            for session in self.sessions.values_mut() {
                session.pending_messages.push(message.clone());
            }
        }
    }
}
