//! Blocks and liquids of the tile world.
//!
//! Block and liquid types are closed enums with a static property table each. A [`Block`] is the
//! full state of one grid cell; a [`BlockRecord`] is the 4-byte packed subset of it that travels
//! over the wire and into save files.

use thiserror::Error;

/// Brightest light level a block can hold.
pub const MAX_LIGHT: u8 = 100;
/// Largest amount of liquid a single block can hold.
pub const MAX_LIQUID_LEVEL: u8 = 255;
/// Highest break stage. Stage 0 means "not cracked".
pub const MAX_BREAK_STAGE: u8 = 9;
/// Light lost when entering a transparent block.
pub const TRANSPARENT_LIGHT_STEP: u8 = 3;
/// Light lost when entering an opaque block.
pub const OPAQUE_LIGHT_STEP: u8 = 15;

/// Static properties shared by every block of one type.
#[derive(Debug)]
pub struct BlockInfo {
    pub name: &'static str,
    /// Entities and liquids pass through ghost blocks.
    pub ghost: bool,
    /// Light and sunlight pass through transparent blocks.
    pub transparent: bool,
    /// Milliseconds needed to break the block, `None` if unbreakable.
    pub break_time: Option<u16>,
    /// Other types this block visually connects to.
    pub connects_to: &'static [BlockType],
    /// Emitted light, 0 if the block is not a light source.
    pub light_emission: u8,
}

/// Every kind of block in the world. The discriminant is the wire and save id.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlockType {
    #[default]
    Air = 0,
    Dirt,
    StoneBlock,
    GrassBlock,
    Stone,
    Wood,
    Leaves,
    Sand,
    SnowyGrassBlock,
    SnowBlock,
    IceBlock,
    IronOre,
    CopperOre,
    Torch,
}

const fn block(
    name: &'static str,
    ghost: bool,
    transparent: bool,
    break_time: Option<u16>,
    connects_to: &'static [BlockType],
) -> BlockInfo {
    BlockInfo {
        name,
        ghost,
        transparent,
        break_time,
        connects_to,
        light_emission: 0,
    }
}

static AIR: BlockInfo = block("air", true, true, None, &[]);
static DIRT: BlockInfo = block(
    "dirt",
    false,
    false,
    Some(1000),
    &[BlockType::GrassBlock, BlockType::SnowyGrassBlock],
);
static STONE_BLOCK: BlockInfo = block(
    "stone_block",
    false,
    false,
    Some(1000),
    &[BlockType::SnowyGrassBlock],
);
static GRASS_BLOCK: BlockInfo = block(
    "grass_block",
    false,
    false,
    Some(1000),
    &[BlockType::Dirt, BlockType::SnowyGrassBlock],
);
static STONE: BlockInfo = block("stone", true, true, Some(1500), &[]);
static WOOD: BlockInfo = block(
    "wood",
    true,
    false,
    Some(1000),
    &[BlockType::GrassBlock, BlockType::Leaves],
);
static LEAVES: BlockInfo = block("leaves", true, false, None, &[]);
static SAND: BlockInfo = block(
    "sand",
    false,
    false,
    Some(500),
    &[BlockType::Dirt, BlockType::GrassBlock, BlockType::StoneBlock],
);
static SNOWY_GRASS_BLOCK: BlockInfo = block(
    "snowy_grass_block",
    false,
    false,
    Some(1000),
    &[BlockType::Dirt, BlockType::GrassBlock, BlockType::StoneBlock],
);
static SNOW_BLOCK: BlockInfo = block(
    "snow_block",
    false,
    false,
    Some(500),
    &[BlockType::SnowyGrassBlock, BlockType::IceBlock],
);
static ICE_BLOCK: BlockInfo = block("ice_block", false, false, Some(500), &[BlockType::SnowBlock]);
static IRON_ORE: BlockInfo = block("iron_ore", false, false, Some(1500), &[]);
static COPPER_ORE: BlockInfo = block("copper_ore", false, false, Some(1500), &[]);
static TORCH: BlockInfo = BlockInfo {
    light_emission: MAX_LIGHT,
    ..block("torch", true, true, Some(100), &[])
};

impl BlockType {
    pub const ALL: [BlockType; 14] = [
        BlockType::Air,
        BlockType::Dirt,
        BlockType::StoneBlock,
        BlockType::GrassBlock,
        BlockType::Stone,
        BlockType::Wood,
        BlockType::Leaves,
        BlockType::Sand,
        BlockType::SnowyGrassBlock,
        BlockType::SnowBlock,
        BlockType::IceBlock,
        BlockType::IronOre,
        BlockType::CopperOre,
        BlockType::Torch,
    ];

    /// Returns the static properties of this block type.
    pub fn info(self) -> &'static BlockInfo {
        match self {
            BlockType::Air => &AIR,
            BlockType::Dirt => &DIRT,
            BlockType::StoneBlock => &STONE_BLOCK,
            BlockType::GrassBlock => &GRASS_BLOCK,
            BlockType::Stone => &STONE,
            BlockType::Wood => &WOOD,
            BlockType::Leaves => &LEAVES,
            BlockType::Sand => &SAND,
            BlockType::SnowyGrassBlock => &SNOWY_GRASS_BLOCK,
            BlockType::SnowBlock => &SNOW_BLOCK,
            BlockType::IceBlock => &ICE_BLOCK,
            BlockType::IronOre => &IRON_ORE,
            BlockType::CopperOre => &COPPER_ORE,
            BlockType::Torch => &TORCH,
        }
    }

    pub fn is_transparent(self) -> bool {
        self.info().transparent
    }

    pub fn is_ghost(self) -> bool {
        self.info().ghost
    }

    /// Light lost by light entering a block of this type.
    pub fn light_step(self) -> u8 {
        if self.is_transparent() {
            TRANSPARENT_LIGHT_STEP
        } else {
            OPAQUE_LIGHT_STEP
        }
    }

    /// Whether this type is drawn connected to a neighbour of type `other`.
    pub fn connects_to(self, other: BlockType) -> bool {
        self == other || self.info().connects_to.contains(&other)
    }
}

impl TryFrom<u8> for BlockType {
    type Error = RecordError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(RecordError::UnknownBlockType(id))
    }
}

/// Static properties shared by every liquid of one type.
#[derive(Debug)]
pub struct LiquidInfo {
    pub name: &'static str,
    /// Cooldown between two flow steps of the same block, in milliseconds.
    pub flow_time: u64,
    /// Movement speed multiplier for entities inside the liquid.
    pub speed_multiplier: f32,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LiquidType {
    #[default]
    Empty = 0,
    Water,
}

static EMPTY: LiquidInfo = LiquidInfo {
    name: "empty",
    flow_time: 0,
    speed_multiplier: 1.0,
};
static WATER: LiquidInfo = LiquidInfo {
    name: "water",
    flow_time: 100,
    speed_multiplier: 0.5,
};

impl LiquidType {
    pub const ALL: [LiquidType; 2] = [LiquidType::Empty, LiquidType::Water];

    pub fn info(self) -> &'static LiquidInfo {
        match self {
            LiquidType::Empty => &EMPTY,
            LiquidType::Water => &WATER,
        }
    }
}

impl TryFrom<u8> for LiquidType {
    type Error = RecordError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(RecordError::UnknownLiquidType(id))
    }
}

/// The side a block last received liquid from. Only used to stabilise rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlowDirection {
    #[default]
    None,
    Left,
    Right,
}

/// Full state of a single grid cell.
///
/// Blocks are only ever read through shared references outside the crate; every mutation goes
/// through [`crate::world::World`] so the liquid and light invariants are enforced in one place.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Block {
    pub block_type: BlockType,
    pub liquid_type: LiquidType,
    pub liquid_level: u8,
    pub light_level: u8,
    /// Emission power if the block is a light source.
    pub light_source: Option<u8>,
    /// Accumulated breaking time in milliseconds.
    pub break_progress: u16,
    pub break_stage: u8,
    /// Texture variant bitmask: up, right, down, left.
    pub orientation: u8,
    pub flow_direction: FlowDirection,
    /// Timestamp (ms) after which the liquid simulation may step this block again.
    pub when_to_update_liquid: u64,
    pub dirty_render: bool,
    /// Set while the block sits in the light engine's work queue.
    pub dirty_light: bool,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            block_type: BlockType::Air,
            liquid_type: LiquidType::Empty,
            liquid_level: 0,
            light_level: 0,
            light_source: None,
            break_progress: 0,
            break_stage: 0,
            orientation: 0,
            flow_direction: FlowDirection::None,
            when_to_update_liquid: 0,
            dirty_render: true,
            dirty_light: false,
        }
    }
}

impl Block {
    pub fn is_light_source(&self) -> bool {
        self.light_source.is_some()
    }

    /// Whether liquid of type `liquid` may flow into this block.
    pub fn accepts_liquid(&self, liquid: LiquidType) -> bool {
        self.block_type.is_ghost()
            && (self.liquid_type == LiquidType::Empty || self.liquid_type == liquid)
            && self.liquid_level < MAX_LIQUID_LEVEL
    }

    pub fn record(&self) -> BlockRecord {
        BlockRecord {
            block_type: self.block_type,
            liquid_type: self.liquid_type,
            liquid_level: self.liquid_level,
            light_level: self.light_level,
        }
    }
}

/// Errors produced while decoding packed block records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown block type id {0}")]
    UnknownBlockType(u8),
    #[error("unknown liquid type id {0}")]
    UnknownLiquidType(u8),
    #[error("expected {expected} bytes of block records, found {found}")]
    SizeMismatch { expected: usize, found: usize },
}

/// The packed 4-byte form of a block: type, liquid type, liquid level, light level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockRecord {
    pub block_type: BlockType,
    pub liquid_type: LiquidType,
    pub liquid_level: u8,
    pub light_level: u8,
}

impl BlockRecord {
    pub const SIZE: usize = 4;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        [
            self.block_type as u8,
            self.liquid_type as u8,
            self.liquid_level,
            self.light_level,
        ]
    }

    /// Decodes a record. The levels are clamped so a decoded record always satisfies the block
    /// invariants: no level without liquid, no light above [`MAX_LIGHT`].
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, RecordError> {
        let liquid_type = LiquidType::try_from(bytes[1])?;
        Ok(Self {
            block_type: BlockType::try_from(bytes[0])?,
            liquid_type,
            liquid_level: if liquid_type == LiquidType::Empty {
                0
            } else {
                bytes[2]
            },
            light_level: bytes[3].min(MAX_LIGHT),
        })
    }
}
