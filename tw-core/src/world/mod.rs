//! The world grid.
//!
//! The [`World`] owns one flat, row-major buffer of `width * height` blocks and one buffer of
//! chunk metadata. Its dimensions are fixed multiples of [`CHUNK_SIZE`] and never change after
//! creation. All block mutation goes through the entry points on this type, which keep render
//! dirtiness and the change set consistent; the light and liquid engines borrow the world for
//! the duration of a single call.

pub mod chunk;
pub mod light;
pub mod liquid;
pub mod save;

use glam::IVec2;
use indexmap::IndexSet;

use crate::{
    block::{Block, BlockRecord, BlockType, LiquidType, MAX_BREAK_STAGE, MAX_LIGHT, RecordError},
    world::chunk::{CHUNK_AREA, CHUNK_SIZE, Chunk, ChunkState, chunk_positions},
};

/// The four cardinal neighbours in orientation bit order: up, right, down, left.
pub const NEIGHBOURS: [IVec2; 4] = [
    IVec2::new(0, -1),
    IVec2::new(1, 0),
    IVec2::new(0, 1),
    IVec2::new(-1, 0),
];

/// The kind of state change recorded for a block, used to derive network deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockChange {
    Type,
    Light,
    Liquid,
    BreakStage,
}

/// A rectangular 2D tile grid of blocks.
pub struct World {
    width: u16,
    height: u16,
    blocks: Vec<Block>,
    chunks: Vec<Chunk>,
    /// Ordered, de-duplicated changes since the last [`World::take_changes`]. `None` on mirrors.
    changes: Option<IndexSet<(usize, BlockChange)>>,
}

impl World {
    /// Creates an authoritative world filled with air.
    ///
    /// # Panics
    /// If either dimension is not a positive multiple of [`CHUNK_SIZE`].
    pub fn new(width: u16, height: u16) -> Self {
        let mut world = Self::new_mirror(width, height);
        world.changes = Some(IndexSet::new());
        world
    }

    /// Creates a passive world that mirrors a remote one and does not record changes.
    ///
    /// # Panics
    /// If either dimension is not a positive multiple of [`CHUNK_SIZE`].
    pub fn new_mirror(width: u16, height: u16) -> Self {
        assert!(
            width > 0
                && height > 0
                && width as usize % CHUNK_SIZE == 0
                && height as usize % CHUNK_SIZE == 0,
            "world dimensions {width}x{height} must be positive multiples of {CHUNK_SIZE}"
        );
        let chunk_count = (width as usize / CHUNK_SIZE) * (height as usize / CHUNK_SIZE);
        Self {
            width,
            height,
            blocks: vec![Block::default(); width as usize * height as usize],
            chunks: vec![Chunk::default(); chunk_count],
            changes: None,
        }
    }

    /// Creates an authoritative world from a packed buffer of block records (row-major, four
    /// bytes per block), as produced by a world generator or read from a save file.
    pub fn from_records(width: u16, height: u16, data: &[u8]) -> Result<Self, RecordError> {
        let mut world = Self::new(width, height);
        let expected = world.blocks.len() * BlockRecord::SIZE;
        if data.len() != expected {
            return Err(RecordError::SizeMismatch {
                expected,
                found: data.len(),
            });
        }
        for (block, bytes) in world
            .blocks
            .iter_mut()
            .zip(data.chunks_exact(BlockRecord::SIZE))
        {
            let record = BlockRecord::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])?;
            block.block_type = record.block_type;
            block.liquid_type = record.liquid_type;
            block.liquid_level = record.liquid_level;
            block.light_level = record.light_level;
            let emission = record.block_type.info().light_emission;
            block.light_source = (emission > 0).then_some(emission);
        }
        Ok(world)
    }

    /// Packs every block into its 4-byte record, row-major.
    pub fn to_records(&self) -> Vec<u8> {
        self.blocks
            .iter()
            .flat_map(|block| block.record().to_bytes())
            .collect()
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Width of the world in chunks.
    pub fn chunk_width(&self) -> u16 {
        self.width / CHUNK_SIZE as u16
    }

    /// Height of the world in chunks.
    pub fn chunk_height(&self) -> u16 {
        self.height / CHUNK_SIZE as u16
    }

    /// Whether signed coordinates lie inside the world.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width as i32 && y < self.height as i32
    }

    /// Index of a block in the flat buffer.
    ///
    /// # Panics
    /// If the coordinates are out of bounds.
    pub fn index(&self, x: u16, y: u16) -> usize {
        assert!(
            x < self.width && y < self.height,
            "requested block ({x}, {y}) is out of bounds"
        );
        y as usize * self.width as usize + x as usize
    }

    /// Coordinates of a flat buffer index.
    pub fn position(&self, index: usize) -> (u16, u16) {
        (
            (index % self.width as usize) as u16,
            (index / self.width as usize) as u16,
        )
    }

    /// Gets the block at the given position.
    ///
    /// # Panics
    /// If the coordinates are out of bounds.
    pub fn get_block(&self, x: u16, y: u16) -> &Block {
        &self.blocks[self.index(x, y)]
    }

    pub(crate) fn block_mut(&mut self, x: u16, y: u16) -> &mut Block {
        let index = self.index(x, y);
        &mut self.blocks[index]
    }

    /// Gets the chunk metadata at the given chunk position.
    ///
    /// # Panics
    /// If the chunk coordinates are out of bounds.
    pub fn get_chunk(&self, chunk_x: u16, chunk_y: u16) -> &Chunk {
        &self.chunks[self.chunk_index(chunk_x, chunk_y)]
    }

    pub fn set_chunk_state(&mut self, chunk_x: u16, chunk_y: u16, state: ChunkState) {
        let index = self.chunk_index(chunk_x, chunk_y);
        self.chunks[index].state = state;
    }

    fn chunk_index(&self, chunk_x: u16, chunk_y: u16) -> usize {
        assert!(
            chunk_x < self.chunk_width() && chunk_y < self.chunk_height(),
            "requested chunk ({chunk_x}, {chunk_y}) is out of bounds"
        );
        chunk_y as usize * self.chunk_width() as usize + chunk_x as usize
    }

    /// In-bounds 4-neighbours of a block, in orientation bit order.
    pub fn neighbours(&self, x: u16, y: u16) -> impl Iterator<Item = (u16, u16)> + use<> {
        let (width, height) = (self.width as i32, self.height as i32);
        NEIGHBOURS.into_iter().filter_map(move |offset| {
            let pos = IVec2::new(x as i32, y as i32) + offset;
            (pos.x >= 0 && pos.y >= 0 && pos.x < width && pos.y < height)
                .then_some((pos.x as u16, pos.y as u16))
        })
    }

    /// Row of the first opaque block in column `x`, or the world height if the column is open.
    pub fn surface(&self, x: u16) -> u16 {
        (0..self.height)
            .find(|&y| !self.get_block(x, y).block_type.is_transparent())
            .unwrap_or(self.height)
    }

    fn record_change(&mut self, x: u16, y: u16, change: BlockChange) {
        let index = self.index(x, y);
        if let Some(changes) = &mut self.changes {
            changes.insert((index, change));
        }
    }

    /// Drains the changes recorded since the last call, oldest first.
    pub fn take_changes(&mut self) -> Vec<(u16, u16, BlockChange)> {
        let Some(changes) = &mut self.changes else {
            return Vec::new();
        };
        let drained: Vec<_> = changes.drain(..).collect();
        drained
            .into_iter()
            .map(|(index, change)| {
                let (x, y) = self.position(index);
                (x, y, change)
            })
            .collect()
    }

    fn mark_render_dirty(&mut self, x: u16, y: u16) {
        self.block_mut(x, y).dirty_render = true;
        let index = self.chunk_index(x / CHUNK_SIZE as u16, y / CHUNK_SIZE as u16);
        self.chunks[index].dirty_render = true;
    }

    /// Marks a block and its neighbours for an orientation recompute, along with every chunk they
    /// belong to. Orientation depends on neighbouring types, so a type change is visible in up
    /// to five blocks and up to three chunks.
    fn update_propagation(&mut self, x: u16, y: u16) {
        self.mark_render_dirty(x, y);
        for (nx, ny) in self.neighbours(x, y) {
            self.mark_render_dirty(nx, ny);
        }
    }

    /// Sets the block and liquid type of a block and propagates the update to its neighbours.
    ///
    /// The light source of the block follows the new type's emission. This is the primitive grid
    /// mutation; use [`light::LightEngine::set_block`] on authoritative worlds so light follows.
    pub fn set_type(&mut self, x: u16, y: u16, block_type: BlockType, liquid_type: LiquidType) {
        let block = self.block_mut(x, y);
        let type_changed = block.block_type != block_type;
        let liquid_changed = block.liquid_type != liquid_type;
        block.block_type = block_type;
        block.liquid_type = liquid_type;
        if liquid_type == LiquidType::Empty {
            block.liquid_level = 0;
        }
        let emission = block_type.info().light_emission;
        block.light_source = (emission > 0).then_some(emission);

        if type_changed {
            self.record_change(x, y, BlockChange::Type);
        }
        if liquid_changed {
            self.record_change(x, y, BlockChange::Liquid);
        }
        self.update_propagation(x, y);
    }

    /// Sets the accumulated break progress of a block and recomputes its break stage. Returns
    /// whether the stage actually changed; only such transitions are recorded.
    pub fn set_break_progress(&mut self, x: u16, y: u16, ms: u16) -> bool {
        let block = self.block_mut(x, y);
        block.break_progress = ms;
        let stage = match block.block_type.info().break_time {
            Some(total) if total > 0 => {
                ((ms as f32 / total as f32) * MAX_BREAK_STAGE as f32).floor() as u8
            }
            _ => 0,
        }
        .min(MAX_BREAK_STAGE);
        self.set_break_stage(x, y, stage)
    }

    /// Sets the rendered break stage directly. Returns whether it changed.
    pub fn set_break_stage(&mut self, x: u16, y: u16, stage: u8) -> bool {
        let stage = stage.min(MAX_BREAK_STAGE);
        let block = self.block_mut(x, y);
        if block.break_stage == stage {
            return false;
        }
        block.break_stage = stage;
        self.record_change(x, y, BlockChange::BreakStage);
        self.mark_render_dirty(x, y);
        true
    }

    /// Replaces a block with air, keeping its liquid, and resets its break progress.
    pub fn break_block(&mut self, x: u16, y: u16) {
        let liquid_type = self.get_block(x, y).liquid_type;
        self.set_type(x, y, BlockType::Air, liquid_type);
        self.set_break_progress(x, y, 0);
    }

    /// Sets the light level of a block, clamped to [`MAX_LIGHT`]. Returns whether it changed.
    pub fn set_light_level(&mut self, x: u16, y: u16, level: u8) -> bool {
        let level = level.min(MAX_LIGHT);
        let block = self.block_mut(x, y);
        if block.light_level == level {
            return false;
        }
        block.light_level = level;
        self.record_change(x, y, BlockChange::Light);
        self.mark_render_dirty(x, y);
        true
    }

    /// Reports a light level that was written directly by the light engine.
    pub(crate) fn touch_light(&mut self, x: u16, y: u16) {
        self.record_change(x, y, BlockChange::Light);
        self.mark_render_dirty(x, y);
    }

    pub(crate) fn set_light_source(&mut self, x: u16, y: u16, power: Option<u8>) {
        self.block_mut(x, y).light_source = power.map(|power| power.min(MAX_LIGHT));
    }

    /// Sets the liquid of a block. An empty liquid always has level 0. Returns whether anything
    /// changed.
    pub fn set_liquid(&mut self, x: u16, y: u16, liquid_type: LiquidType, level: u8) -> bool {
        let level = if liquid_type == LiquidType::Empty {
            0
        } else {
            level
        };
        let block = self.block_mut(x, y);
        if block.liquid_type == liquid_type && block.liquid_level == level {
            return false;
        }
        block.liquid_type = liquid_type;
        block.liquid_level = level;
        self.record_change(x, y, BlockChange::Liquid);
        self.mark_render_dirty(x, y);
        true
    }

    /// Writes a decoded record into a mirror block, as received from the authoritative side.
    pub fn apply_record(&mut self, x: u16, y: u16, record: BlockRecord) {
        if self.get_block(x, y).block_type != record.block_type
            || self.get_block(x, y).liquid_type != record.liquid_type
        {
            self.set_type(x, y, record.block_type, record.liquid_type);
        }
        self.set_liquid(x, y, record.liquid_type, record.liquid_level);
        self.set_light_level(x, y, record.light_level);
    }

    /// Packs the 256 records of a chunk in wire raster order.
    pub fn chunk_records(&self, chunk_x: u16, chunk_y: u16) -> Box<[BlockRecord; CHUNK_AREA]> {
        self.chunk_index(chunk_x, chunk_y);
        let (origin_x, origin_y) = (chunk_x * CHUNK_SIZE as u16, chunk_y * CHUNK_SIZE as u16);
        Box::new(std::array::from_fn(|i| {
            let (x, y) = (i % CHUNK_SIZE, i / CHUNK_SIZE);
            self.get_block(origin_x + x as u16, origin_y + y as u16)
                .record()
        }))
    }

    /// Writes the 256 records of a chunk received in wire raster order into a mirror, marks the
    /// chunk loaded and schedules it for a texture rebuild.
    pub fn apply_chunk(&mut self, chunk_x: u16, chunk_y: u16, records: &[BlockRecord; CHUNK_AREA]) {
        self.chunk_index(chunk_x, chunk_y);
        for ((x, y), record) in chunk_positions(chunk_x, chunk_y).zip(records.iter()) {
            self.apply_record(x, y, *record);
        }
        let index = self.chunk_index(chunk_x, chunk_y);
        self.chunks[index].state = ChunkState::Loaded;
        self.chunks[index].dirty_render = true;
    }

    /// Recomputes the texture variant of a block from its neighbours and clears its render flag.
    /// Out-of-bounds sides count as connected.
    pub fn update_orientation(&mut self, x: u16, y: u16) {
        let block_type = self.get_block(x, y).block_type;
        let mut orientation = 0;
        for (bit, offset) in NEIGHBOURS.iter().enumerate() {
            let (nx, ny) = (x as i32 + offset.x, y as i32 + offset.y);
            if !self.contains(nx, ny)
                || block_type.connects_to(self.get_block(nx as u16, ny as u16).block_type)
            {
                orientation |= 1 << bit;
            }
        }
        let block = self.block_mut(x, y);
        block.orientation = orientation;
        block.dirty_render = false;
    }

    /// Recomputes the orientation of every dirty block in a chunk and clears the chunk's render
    /// flag. Returns whether anything was dirty.
    pub fn rebuild_chunk(&mut self, chunk_x: u16, chunk_y: u16) -> bool {
        let index = self.chunk_index(chunk_x, chunk_y);
        if !self.chunks[index].dirty_render {
            return false;
        }
        for (x, y) in chunk_positions(chunk_x, chunk_y) {
            if self.get_block(x, y).dirty_render {
                self.update_orientation(x, y);
            }
        }
        self.chunks[index].dirty_render = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_world_is_air() {
        let world = World::new(32, 48);
        assert_eq!(world.chunk_width(), 2);
        assert_eq!(world.chunk_height(), 3);
        let block = world.get_block(31, 47);
        assert_eq!(block.block_type, BlockType::Air);
        assert_eq!(block.liquid_type, LiquidType::Empty);
        assert_eq!(block.liquid_level, 0);
        assert_eq!(block.light_level, 0);
        assert_eq!(world.get_chunk(1, 2).state, ChunkState::Unloaded);
        assert!(world.get_chunk(1, 2).dirty_render);
    }

    #[test]
    #[should_panic]
    fn dimensions_must_be_chunk_multiples() {
        World::new(20, 32);
    }

    #[test]
    #[should_panic]
    fn zero_dimension_is_rejected() {
        World::new(0, 16);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_block_panics() {
        World::new(16, 16).get_block(16, 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_chunk_panics() {
        World::new(16, 16).get_chunk(0, 1);
    }

    #[test]
    fn set_type_is_read_back_everywhere() {
        let mut world = World::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                let block_type = BlockType::ALL[(x + y) as usize % BlockType::ALL.len()];
                let liquid_type = LiquidType::ALL[(x * y) as usize % 2];
                world.set_type(x, y, block_type, liquid_type);
                let block = world.get_block(x, y);
                assert_eq!(block.block_type, block_type);
                assert_eq!(block.liquid_type, liquid_type);
            }
        }
    }

    #[test]
    fn set_type_marks_neighbours_and_chunks() {
        let mut world = World::new(32, 32);
        for cy in 0..2 {
            for cx in 0..2 {
                world.rebuild_chunk(cx, cy);
            }
        }
        world.set_type(15, 3, BlockType::Dirt, LiquidType::Empty);
        assert!(world.get_block(15, 3).dirty_render);
        assert!(world.get_block(16, 3).dirty_render);
        assert!(world.get_block(14, 3).dirty_render);
        assert!(world.get_block(15, 2).dirty_render);
        assert!(world.get_block(15, 4).dirty_render);
        assert!(!world.get_block(17, 3).dirty_render);
        assert!(world.get_chunk(0, 0).dirty_render);
        assert!(world.get_chunk(1, 0).dirty_render);
        assert!(!world.get_chunk(0, 1).dirty_render);
    }

    #[test]
    fn emptying_liquid_clears_level() {
        let mut world = World::new(16, 16);
        world.set_liquid(3, 3, LiquidType::Water, 200);
        world.set_type(3, 3, BlockType::Air, LiquidType::Empty);
        assert_eq!(world.get_block(3, 3).liquid_level, 0);
        world.set_liquid(4, 4, LiquidType::Empty, 80);
        assert_eq!(world.get_block(4, 4).liquid_level, 0);
    }

    #[test]
    fn break_stage_is_debounced() {
        let mut world = World::new(16, 16);
        world.set_type(1, 1, BlockType::Dirt, LiquidType::Empty);
        world.take_changes();
        // Dirt takes 1000 ms, so stages move every ~111 ms.
        assert!(!world.set_break_progress(1, 1, 50));
        assert!(world.set_break_progress(1, 1, 120));
        assert_eq!(world.get_block(1, 1).break_stage, 1);
        assert!(!world.set_break_progress(1, 1, 200));
        assert!(world.set_break_progress(1, 1, 999));
        assert_eq!(world.get_block(1, 1).break_stage, 8);
        assert!(world.set_break_progress(1, 1, 5000));
        assert_eq!(world.get_block(1, 1).break_stage, MAX_BREAK_STAGE);
        let changes = world.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0], (1, 1, BlockChange::BreakStage));
    }

    #[test]
    fn unbreakable_blocks_stay_at_stage_zero() {
        let mut world = World::new(16, 16);
        world.set_type(2, 2, BlockType::Leaves, LiquidType::Empty);
        assert!(!world.set_break_progress(2, 2, 60000));
        assert_eq!(world.get_block(2, 2).break_stage, 0);
    }

    #[test]
    fn break_block_keeps_liquid() {
        let mut world = World::new(16, 16);
        world.set_type(5, 5, BlockType::Wood, LiquidType::Water);
        world.set_break_progress(5, 5, 700);
        world.break_block(5, 5);
        let block = world.get_block(5, 5);
        assert_eq!(block.block_type, BlockType::Air);
        assert_eq!(block.liquid_type, LiquidType::Water);
        assert_eq!(block.break_progress, 0);
        assert_eq!(block.break_stage, 0);
    }

    #[test]
    fn changes_are_ordered_and_deduplicated() {
        let mut world = World::new(16, 16);
        world.set_light_level(1, 0, 10);
        world.set_type(0, 0, BlockType::Dirt, LiquidType::Empty);
        world.set_light_level(1, 0, 20);
        assert_eq!(
            world.take_changes(),
            vec![(1, 0, BlockChange::Light), (0, 0, BlockChange::Type)]
        );
        assert!(world.take_changes().is_empty());
    }

    #[test]
    fn mirrors_do_not_record_changes() {
        let mut world = World::new_mirror(16, 16);
        world.set_type(0, 0, BlockType::Dirt, LiquidType::Empty);
        assert!(world.take_changes().is_empty());
    }

    #[test]
    fn records_round_trip() {
        let mut world = World::new(16, 32);
        world.set_type(3, 20, BlockType::IronOre, LiquidType::Empty);
        world.set_liquid(4, 20, LiquidType::Water, 77);
        world.set_light_level(5, 20, 42);
        let data = world.to_records();
        assert_eq!(data.len(), 16 * 32 * 4);
        let loaded = World::from_records(16, 32, &data).unwrap();
        assert_eq!(loaded.to_records(), data);
        assert_eq!(loaded.get_block(4, 20).liquid_level, 77);
    }

    #[test]
    fn from_records_rejects_wrong_size() {
        assert_eq!(
            World::from_records(16, 16, &[0; 12]).err(),
            Some(RecordError::SizeMismatch {
                expected: 1024,
                found: 12
            })
        );
    }

    #[test]
    fn from_records_marks_emitting_types_as_sources() {
        let mut data = vec![0; 16 * 16 * 4];
        data[0] = BlockType::Torch as u8;
        let world = World::from_records(16, 16, &data).unwrap();
        assert_eq!(world.get_block(0, 0).light_source, Some(MAX_LIGHT));
    }

    #[test]
    fn orientation_connects_to_same_type_and_edges() {
        let mut world = World::new(16, 16);
        world.set_type(5, 5, BlockType::Dirt, LiquidType::Empty);
        world.set_type(6, 5, BlockType::Dirt, LiquidType::Empty);
        world.set_type(5, 6, BlockType::GrassBlock, LiquidType::Empty);
        world.update_orientation(5, 5);
        // right (same type) + down (dirt connects to grass)
        assert_eq!(world.get_block(5, 5).orientation, 0b0110);
        world.update_orientation(0, 0);
        // air at the corner: up and left are out of bounds, right and down are air
        assert_eq!(world.get_block(0, 0).orientation, 0b1111);
        assert!(!world.get_block(0, 0).dirty_render);
    }

    #[test]
    fn surface_finds_first_opaque_block() {
        let mut world = World::new(16, 16);
        assert_eq!(world.surface(3), 16);
        world.set_type(3, 9, BlockType::Torch, LiquidType::Empty);
        world.set_type(3, 11, BlockType::Dirt, LiquidType::Empty);
        assert_eq!(world.surface(3), 11);
    }
}
