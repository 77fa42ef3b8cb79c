//! Liquid flow.
//!
//! Liquid falls straight down while the block below has room and otherwise spreads sideways into
//! the lower of its two side neighbours, losing a little on every sideways step. Each block only
//! steps again once its cooldown has elapsed, which makes water visibly run instead of settling
//! in a single tick.

use std::collections::BTreeSet;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    block::{FlowDirection, LiquidType, MAX_LIQUID_LEVEL},
    world::World,
};

/// Liquid lost on every sideways transfer.
pub const LIQUID_SPREAD_LOSS: u8 = 1;

/// Throttled liquid simulation over the blocks that may still move.
pub struct LiquidEngine {
    /// Flat indices of the blocks that may flow, in row-major order.
    active: BTreeSet<usize>,
    rng: StdRng,
}

impl LiquidEngine {
    /// Creates an engine whose tie-breaks are driven by `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            active: BTreeSet::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Number of blocks that may still flow.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn schedule(&mut self, world: &World, x: u16, y: u16) {
        self.active.insert(world.index(x, y));
    }

    /// Schedules a block and its neighbours. Called whenever a block changes, since a removed wall
    /// or a new liquid can set the liquid around it in motion.
    pub fn schedule_around(&mut self, world: &World, x: u16, y: u16) {
        self.schedule(world, x, y);
        for (nx, ny) in world.neighbours(x, y) {
            self.schedule(world, nx, ny);
        }
    }

    /// Schedules every block that holds liquid, e.g. after a world was generated or loaded.
    pub fn schedule_all(&mut self, world: &World) {
        for y in 0..world.height() {
            for x in 0..world.width() {
                if world.get_block(x, y).liquid_type != LiquidType::Empty {
                    self.schedule(world, x, y);
                }
            }
        }
    }

    /// Steps every active block whose cooldown has elapsed at `now_ms`. Blocks activated during
    /// this call are only looked at by the next one. Returns the number of transfers.
    pub fn update(&mut self, world: &mut World, now_ms: u64) -> usize {
        let candidates: Vec<usize> = self.active.iter().copied().collect();
        let mut transfers = 0;
        for index in candidates {
            let (x, y) = world.position(index);
            let block = world.get_block(x, y);
            if block.when_to_update_liquid > now_ms {
                continue;
            }
            self.active.remove(&index);
            if block.liquid_type == LiquidType::Empty {
                continue;
            }
            if block.liquid_level == 0 {
                world.set_liquid(x, y, LiquidType::Empty, 0);
                continue;
            }
            if self.step(world, x, y, now_ms) {
                transfers += 1;
            }
        }
        transfers
    }

    fn step(&mut self, world: &mut World, x: u16, y: u16, now_ms: u64) -> bool {
        let block = *world.get_block(x, y);
        let liquid = block.liquid_type;

        if y + 1 < world.height() {
            let below = world.get_block(x, y + 1);
            if below.accepts_liquid(liquid) {
                let amount = block.liquid_level.min(MAX_LIQUID_LEVEL - below.liquid_level);
                self.transfer(world, (x, y), (x, y + 1), amount, amount, now_ms);
                world.block_mut(x, y + 1).flow_direction = FlowDirection::None;
                return true;
            }
        }

        let mut sides = Vec::with_capacity(2);
        if x > 0 {
            sides.push((x - 1, FlowDirection::Right));
        }
        if x + 1 < world.width() {
            sides.push((x + 1, FlowDirection::Left));
        }
        sides.retain(|&(nx, _)| {
            let side = world.get_block(nx, y);
            side.accepts_liquid(liquid) && side.liquid_level.saturating_add(2) <= block.liquid_level
        });
        let target = match sides.as_slice() {
            [] => return false,
            [only] => *only,
            [a, b] => {
                let level_a = world.get_block(a.0, y).liquid_level;
                let level_b = world.get_block(b.0, y).liquid_level;
                if level_a < level_b || (level_a == level_b && self.rng.random_bool(0.5)) {
                    *a
                } else {
                    *b
                }
            }
            _ => unreachable!(),
        };

        let (nx, direction) = target;
        let amount = (block.liquid_level - world.get_block(nx, y).liquid_level) / 2;
        self.transfer(
            world,
            (x, y),
            (nx, y),
            amount,
            amount - LIQUID_SPREAD_LOSS,
            now_ms,
        );
        world.block_mut(nx, y).flow_direction = direction;
        true
    }

    /// Moves `taken` units out of `from` and `given` units into `to`, then restarts the cooldown
    /// of both blocks and wakes up everything around them.
    fn transfer(
        &mut self,
        world: &mut World,
        from: (u16, u16),
        to: (u16, u16),
        taken: u8,
        given: u8,
        now_ms: u64,
    ) {
        let source = *world.get_block(from.0, from.1);
        let liquid = source.liquid_type;
        let remaining = source.liquid_level - taken;
        if remaining == 0 {
            world.set_liquid(from.0, from.1, LiquidType::Empty, 0);
        } else {
            world.set_liquid(from.0, from.1, liquid, remaining);
        }

        let receiver = world.get_block(to.0, to.1).liquid_level;
        if given > 0 {
            world.set_liquid(to.0, to.1, liquid, receiver + given);
        }

        let cooldown = now_ms + liquid.info().flow_time;
        world.block_mut(from.0, from.1).when_to_update_liquid = cooldown;
        world.block_mut(to.0, to.1).when_to_update_liquid = cooldown;
        self.schedule_around(world, from.0, from.1);
        self.schedule_around(world, to.0, to.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;

    fn total(world: &World) -> u32 {
        (0..world.height())
            .flat_map(|y| (0..world.width()).map(move |x| (x, y)))
            .map(|(x, y)| world.get_block(x, y).liquid_level as u32)
            .sum()
    }

    fn floor(world: &mut World, y: u16) {
        for x in 0..world.width() {
            world.set_type(x, y, BlockType::StoneBlock, LiquidType::Empty);
        }
    }

    #[test]
    fn water_falls_first() {
        let mut world = World::new(16, 16);
        world.set_liquid(5, 5, LiquidType::Water, 200);
        let mut engine = LiquidEngine::new(1);
        engine.schedule(&world, 5, 5);
        assert_eq!(engine.update(&mut world, 0), 1);
        assert_eq!(world.get_block(5, 5).liquid_type, LiquidType::Empty);
        assert_eq!(world.get_block(5, 5).liquid_level, 0);
        assert_eq!(world.get_block(5, 6).liquid_level, 200);
        assert_eq!(world.get_block(5, 6).liquid_type, LiquidType::Water);
    }

    #[test]
    fn cooldown_throttles_flow() {
        let mut world = World::new(16, 16);
        world.set_liquid(5, 5, LiquidType::Water, 200);
        let mut engine = LiquidEngine::new(1);
        engine.schedule(&world, 5, 5);
        engine.update(&mut world, 0);
        assert_eq!(engine.update(&mut world, 50), 0);
        assert_eq!(world.get_block(5, 6).liquid_level, 200);
        assert_eq!(engine.update(&mut world, 100), 1);
        assert_eq!(world.get_block(5, 7).liquid_level, 200);
    }

    #[test]
    fn falling_water_fills_up_to_capacity() {
        let mut world = World::new(16, 16);
        world.set_liquid(5, 5, LiquidType::Water, 200);
        world.set_liquid(5, 6, LiquidType::Water, 100);
        floor(&mut world, 7);
        let mut engine = LiquidEngine::new(1);
        engine.schedule(&world, 5, 5);
        engine.update(&mut world, 0);
        assert_eq!(world.get_block(5, 6).liquid_level, MAX_LIQUID_LEVEL);
        assert_eq!(world.get_block(5, 5).liquid_level, 45);
    }

    #[test]
    fn water_spreads_sideways_with_loss() {
        let mut world = World::new(16, 16);
        floor(&mut world, 15);
        world.set_liquid(5, 14, LiquidType::Water, 100);
        let mut engine = LiquidEngine::new(1);
        engine.schedule(&world, 5, 14);
        engine.update(&mut world, 0);
        let left = world.get_block(4, 14);
        let right = world.get_block(6, 14);
        assert_eq!(world.get_block(5, 14).liquid_level, 50);
        assert_eq!(left.liquid_level + right.liquid_level, 49);
        let receiver = if left.liquid_level > 0 { left } else { right };
        assert_eq!(receiver.liquid_type, LiquidType::Water);
        assert_ne!(receiver.flow_direction, FlowDirection::None);
    }

    #[test]
    fn water_prefers_the_lower_side() {
        let mut world = World::new(16, 16);
        floor(&mut world, 15);
        world.set_liquid(5, 14, LiquidType::Water, 100);
        world.set_liquid(6, 14, LiquidType::Water, 40);
        world.set_liquid(4, 14, LiquidType::Water, 10);
        let mut engine = LiquidEngine::new(1);
        engine.schedule(&world, 5, 14);
        engine.update(&mut world, 0);
        assert_eq!(world.get_block(4, 14).liquid_level, 10 + 45 - LIQUID_SPREAD_LOSS);
        assert_eq!(world.get_block(4, 14).flow_direction, FlowDirection::Right);
        assert_eq!(world.get_block(6, 14).liquid_level, 40);
    }

    #[test]
    fn solid_blocks_hold_water() {
        let mut world = World::new(16, 16);
        floor(&mut world, 6);
        world.set_type(4, 5, BlockType::Dirt, LiquidType::Empty);
        world.set_type(6, 5, BlockType::Dirt, LiquidType::Empty);
        world.set_liquid(5, 5, LiquidType::Water, 100);
        let mut engine = LiquidEngine::new(1);
        engine.schedule(&world, 5, 5);
        assert_eq!(engine.update(&mut world, 0), 0);
        assert_eq!(engine.active(), 0);
        assert_eq!(world.get_block(5, 5).liquid_level, 100);
    }

    #[test]
    fn drained_water_becomes_empty() {
        let mut world = World::new(16, 16);
        floor(&mut world, 4);
        world.set_liquid(3, 3, LiquidType::Water, 0);
        assert_eq!(world.get_block(3, 3).liquid_type, LiquidType::Water);
        let mut engine = LiquidEngine::new(1);
        engine.schedule(&world, 3, 3);
        engine.update(&mut world, 0);
        assert_eq!(world.get_block(3, 3).liquid_type, LiquidType::Empty);
    }

    #[test]
    fn pool_settles_within_bounds() {
        let mut world = World::new(32, 32);
        floor(&mut world, 31);
        for x in 10..14 {
            world.set_liquid(x, 2, LiquidType::Water, MAX_LIQUID_LEVEL);
        }
        let mut engine = LiquidEngine::new(42);
        engine.schedule_all(&world);

        let mut last_total = total(&world);
        let mut now = 0;
        while engine.active() > 0 {
            assert!(now < 1_000_000, "liquid never settled");
            engine.update(&mut world, now);
            let current = total(&world);
            assert!(current <= last_total);
            last_total = current;
            for y in 0..32 {
                for x in 0..32 {
                    let block = world.get_block(x, y);
                    if block.liquid_type == LiquidType::Empty {
                        assert_eq!(block.liquid_level, 0);
                    } else {
                        assert!(block.liquid_level > 0);
                    }
                }
            }
            now += 50;
        }
        assert!(last_total > 0);
        assert!((0..31).all(|y| (0..32).all(|x| {
            let block = world.get_block(x, y);
            y == 30 || block.liquid_type == LiquidType::Empty
        })));
    }

    #[test]
    fn same_seed_same_flow() {
        let run = |seed| {
            let mut world = World::new(32, 16);
            floor(&mut world, 15);
            world.set_liquid(16, 10, LiquidType::Water, 255);
            let mut engine = LiquidEngine::new(seed);
            engine.schedule_all(&world);
            for step in 0..100 {
                engine.update(&mut world, step * 100);
            }
            world.to_records()
        };
        assert_eq!(run(9), run(9));
    }
}
