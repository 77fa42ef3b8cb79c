//! Light propagation.
//!
//! Light comes from two places: natural light, which fills every column from the sky edge down
//! to its first opaque block, and point sources such as torches. Both are reconciled by a single
//! relaxation rule: a block's candidate level is the brightest neighbour minus the light step of
//! the block itself (3 for transparent blocks, 15 for opaque ones). A source holds at least its
//! emission power.
//!
//! The relaxation only ever raises levels, so it terminates once nothing can be raised any more.
//! Anything that can make light shrink (removing a source, placing an opaque block, cutting a
//! column off the sky) instead clears a rectangle around the change and relaxes it again from
//! the remaining sources, the sky and the untouched blocks around it.

use std::collections::VecDeque;

use fxhash::FxHashMap;
use log::debug;

use crate::{
    block::{BlockType, LiquidType, MAX_LIGHT, TRANSPARENT_LIGHT_STEP},
    world::World,
};

/// Furthest distance, in blocks, that any light can travel.
pub const LIGHT_RANGE: u16 = (MAX_LIGHT as u16).div_ceil(TRANSPARENT_LIGHT_STEP as u16);

/// Incremental light solver with an explicit work queue.
///
/// Levels are written straight into the world while the engine works and only reported to the
/// world's change set by [`LightEngine::run`], so a block that ends where it started produces no
/// change at all.
pub struct LightEngine {
    queue: VecDeque<usize>,
    /// Level of every block touched since the last commit, as it was before the first touch.
    original: FxHashMap<usize, u8>,
    track_changes: bool,
}

impl Default for LightEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LightEngine {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            original: FxHashMap::default(),
            track_changes: true,
        }
    }

    /// Number of blocks waiting for a recompute.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Schedules a block for a light recompute. Already scheduled blocks are not queued twice.
    pub fn schedule(&mut self, world: &mut World, x: u16, y: u16) {
        let index = world.index(x, y);
        let block = world.block_mut(x, y);
        if !block.dirty_light {
            block.dirty_light = true;
            self.queue.push_back(index);
        }
    }

    fn schedule_neighbours(&mut self, world: &mut World, x: u16, y: u16) {
        for (nx, ny) in world.neighbours(x, y) {
            self.schedule(world, nx, ny);
        }
    }

    fn write_level(&mut self, world: &mut World, x: u16, y: u16, level: u8) {
        let index = world.index(x, y);
        let block = world.block_mut(x, y);
        if self.track_changes {
            self.original.entry(index).or_insert(block.light_level);
        }
        block.light_level = level.min(MAX_LIGHT);
    }

    /// The level a block would receive from its neighbours.
    fn candidate(world: &World, x: u16, y: u16) -> u8 {
        let step = world.get_block(x, y).block_type.light_step();
        world
            .neighbours(x, y)
            .map(|(nx, ny)| world.get_block(nx, ny).light_level.saturating_sub(step))
            .max()
            .unwrap_or(0)
    }

    /// Recomputes one block. Returns whether its level was raised.
    fn update_block(&mut self, world: &mut World, x: u16, y: u16) -> bool {
        let block = world.get_block(x, y);
        let target = Self::candidate(world, x, y)
            .max(block.light_source.unwrap_or(0))
            .min(MAX_LIGHT);
        if target <= block.light_level {
            return false;
        }
        self.write_level(world, x, y, target);
        self.schedule_neighbours(world, x, y);
        true
    }

    /// Relaxes every scheduled block until nothing can be raised, then commits the net level
    /// changes to the world. Returns the number of level raises performed.
    pub fn run(&mut self, world: &mut World) -> usize {
        let mut updates = 0;
        while let Some(index) = self.queue.pop_front() {
            let (x, y) = world.position(index);
            world.block_mut(x, y).dirty_light = false;
            if self.update_block(world, x, y) {
                updates += 1;
            }
        }
        self.commit(world);
        updates
    }

    fn commit(&mut self, world: &mut World) {
        for (index, before) in self.original.drain() {
            let (x, y) = world.position(index);
            if world.get_block(x, y).light_level != before {
                world.touch_light(x, y);
            }
        }
    }

    /// Fills column `x` with full light from the sky edge down to its first opaque block, which
    /// is scheduled so propagation continues into the shadowed region below.
    pub fn set_natural_light(&mut self, world: &mut World, x: u16) {
        for y in 0..world.height() {
            if !world.get_block(x, y).block_type.is_transparent() {
                self.schedule(world, x, y);
                break;
            }
            self.write_level(world, x, y, MAX_LIGHT);
            self.schedule_neighbours(world, x, y);
        }
    }

    /// Drops the sunlit part of column `x` to darkness (sources keep their own emission). Used
    /// before the opacity of a block in the column changes so no stale sunlight is left behind.
    pub fn remove_natural_light(&mut self, world: &mut World, x: u16) {
        for y in 0..world.height() {
            let block = world.get_block(x, y);
            if !block.block_type.is_transparent() {
                break;
            }
            let floor = block.light_source.unwrap_or(0);
            self.write_level(world, x, y, floor);
        }
    }

    /// Computes all light of a freshly generated or loaded world from scratch. Stored levels are
    /// discarded and nothing is reported to the change set.
    pub fn init(&mut self, world: &mut World) -> usize {
        self.track_changes = false;
        for y in 0..world.height() {
            for x in 0..world.width() {
                world.block_mut(x, y).light_level = 0;
            }
        }
        for x in 0..world.width() {
            self.set_natural_light(world, x);
        }
        for y in 0..world.height() {
            for x in 0..world.width() {
                if world.get_block(x, y).is_light_source() {
                    self.schedule(world, x, y);
                }
            }
        }
        let updates = self.run(world);
        self.track_changes = true;
        debug!(
            "initialised light for a {}x{} world ({updates} updates)",
            world.width(),
            world.height()
        );
        updates
    }

    /// Schedules every block of the world. Useful to verify convergence.
    pub fn schedule_all(&mut self, world: &mut World) {
        for y in 0..world.height() {
            for x in 0..world.width() {
                self.schedule(world, x, y);
            }
        }
    }

    /// Clears and re-seeds the light of the inclusive rectangle `(min_x, min_y)..=(max_x, max_y)`.
    ///
    /// Every level inside is reset, sources and natural light are restored and the whole
    /// rectangle is scheduled, so it relaxes again from its own sources, the sky and the
    /// unchanged blocks bordering it.
    pub fn relight(&mut self, world: &mut World, min: (u16, u16), max: (u16, u16)) {
        let max_x = max.0.min(world.width() - 1);
        let max_y = max.1.min(world.height() - 1);
        for y in min.1..=max_y {
            for x in min.0..=max_x {
                self.write_level(world, x, y, 0);
            }
        }
        for x in min.0..=max_x {
            self.set_natural_light(world, x);
        }
        for y in min.1..=max_y {
            for x in min.0..=max_x {
                self.schedule(world, x, y);
            }
        }
    }

    /// Relights everything that a change at `(x, y)` could have lit, where `lowest` is the lowest
    /// row of column `x` whose natural light may have changed.
    fn relight_around(&mut self, world: &mut World, x: u16, y: u16, lowest: u16) {
        let min = (x.saturating_sub(LIGHT_RANGE), 0);
        let max = (
            x.saturating_add(LIGHT_RANGE),
            y.max(lowest).saturating_add(LIGHT_RANGE),
        );
        debug!("relighting ({}, {})..({}, {})", min.0, min.1, max.0, max.1);
        self.relight(world, min, max);
    }

    /// Changes the type of a block and brings the light of the world up to date: the column's
    /// natural light is removed, the type is set, and light is restored (relit from scratch
    /// around the block if it can have shrunk).
    pub fn set_block(
        &mut self,
        world: &mut World,
        x: u16,
        y: u16,
        block_type: BlockType,
        liquid_type: LiquidType,
    ) {
        let old_surface = world.surface(x);
        let old_block = *world.get_block(x, y);

        self.remove_natural_light(world, x);
        world.set_type(x, y, block_type, liquid_type);
        let new_surface = world.surface(x);

        let new_block = world.get_block(x, y);
        let shrinks = old_block.light_source.unwrap_or(0) > new_block.light_source.unwrap_or(0)
            || old_block.block_type.light_step() < new_block.block_type.light_step()
            || new_surface < old_surface;
        if shrinks {
            self.relight_around(world, x, y, old_surface.max(new_surface));
        } else {
            self.set_natural_light(world, x);
            self.schedule(world, x, y);
        }
        self.run(world);
    }

    /// Breaks a block (see [`World::break_block`]) and updates the light.
    pub fn break_block(&mut self, world: &mut World, x: u16, y: u16) {
        let liquid_type = world.get_block(x, y).liquid_type;
        self.set_block(world, x, y, BlockType::Air, liquid_type);
        world.set_break_progress(x, y, 0);
    }

    /// Turns a block into a light source of the given power and updates the light.
    pub fn set_light_source(&mut self, world: &mut World, x: u16, y: u16, power: u8) {
        let old = world.get_block(x, y).light_source.unwrap_or(0);
        world.set_light_source(x, y, Some(power));
        if old > power {
            self.relight_around(world, x, y, y);
        } else {
            self.schedule(world, x, y);
        }
        self.run(world);
    }

    /// Stops a block from emitting light and removes the light it produced.
    pub fn remove_light_source(&mut self, world: &mut World, x: u16, y: u16) {
        if !world.get_block(x, y).is_light_source() {
            return;
        }
        world.set_light_source(x, y, None);
        self.relight_around(world, x, y, y);
        self.run(world);
    }
}
