//! World generation.
//!
//! Generators hand the server one packed buffer of block records for the whole world. The
//! [`FlatGenerator`] is a small seeded terrain so a server can run without any external data.

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::block::{BlockRecord, BlockType, LiquidType, MAX_LIQUID_LEVEL};

/// Produces the initial contents of a world.
pub trait WorldGenerator {
    /// Returns exactly `width * height` packed records, row-major.
    fn generate(&mut self, width: u16, height: u16) -> Vec<u8>;
}

/// Rolling grass hills over dirt and stone, with ores, trees, torches and one water pool.
pub struct FlatGenerator {
    rng: StdRng,
}

const POOL_WIDTH: u16 = 8;
const POOL_DEPTH: u16 = 3;
const DIRT_DEPTH: u16 = 4;

impl FlatGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A random walk of surface rows, one per column.
    fn surface(&mut self, width: u16, height: u16) -> Vec<u16> {
        let (low, high) = (height / 4, height / 2);
        let mut row = height / 3;
        (0..width)
            .map(|_| {
                if self.rng.random_bool(0.3) {
                    row = if self.rng.random_bool(0.5) { row + 1 } else { row.saturating_sub(1) };
                    row = row.clamp(low, high);
                }
                row
            })
            .collect()
    }
}

impl WorldGenerator for FlatGenerator {
    fn generate(&mut self, width: u16, height: u16) -> Vec<u8> {
        let mut surface = self.surface(width, height);
        let mut records = vec![BlockRecord::default(); width as usize * height as usize];
        let index = |x: u16, y: u16| y as usize * width as usize + x as usize;

        // Level the ground around the pool so it has walls on both sides.
        let pool_x = self.rng.random_range(1..width - POOL_WIDTH - 1);
        let pool_row = surface[pool_x as usize];
        for x in pool_x - 1..=pool_x + POOL_WIDTH {
            surface[x as usize] = pool_row;
        }

        for x in 0..width {
            let top = surface[x as usize];
            for y in top..height {
                let block_type = if y == top {
                    if top < height / 3 {
                        BlockType::SnowyGrassBlock
                    } else {
                        BlockType::GrassBlock
                    }
                } else if y <= top + DIRT_DEPTH {
                    BlockType::Dirt
                } else if self.rng.random_bool(0.02) {
                    BlockType::IronOre
                } else if self.rng.random_bool(0.01) {
                    BlockType::CopperOre
                } else {
                    BlockType::StoneBlock
                };
                records[index(x, y)].block_type = block_type;
            }

            let in_pool = (pool_x..pool_x + POOL_WIDTH).contains(&x);
            if !in_pool && top >= 6 && self.rng.random_bool(0.05) {
                for y in top - 4..top {
                    records[index(x, y)].block_type = BlockType::Wood;
                }
                records[index(x, top - 5)].block_type = BlockType::Leaves;
            } else if !in_pool && top >= 1 && self.rng.random_bool(0.03) {
                records[index(x, top - 1)].block_type = BlockType::Torch;
            }
        }

        for x in pool_x..pool_x + POOL_WIDTH {
            for y in pool_row..pool_row + POOL_DEPTH {
                let record = &mut records[index(x, y)];
                record.block_type = BlockType::Air;
                record.liquid_type = LiquidType::Water;
                record.liquid_level = MAX_LIQUID_LEVEL;
            }
            records[index(x, pool_row + POOL_DEPTH)].block_type = BlockType::Sand;
        }

        records.into_iter().flat_map(BlockRecord::to_bytes).collect()
    }
}
