//! Saving and loading worlds.
//!
//! A save file is the raw block buffer of the world: four bytes per block, row-major, no header.
//! The dimensions are not stored and must be known by the loader.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{info, warn};
use thiserror::Error;

use crate::{block::RecordError, generator::WorldGenerator, world::World};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("could not access save file: {0}")]
    Io(#[from] io::Error),
    #[error("save file is corrupt: {0}")]
    Corrupt(#[from] RecordError),
}

/// Writes the world to `path`, creating parent directories as needed.
pub fn save_world(world: &World, path: &Path) -> Result<(), SaveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, world.to_records())?;
    info!("saved world to {}", path.display());
    Ok(())
}

/// Reads a world of the given dimensions from `path`.
pub fn load_world(path: &Path, width: u16, height: u16) -> Result<World, SaveError> {
    let data = fs::read(path)?;
    Ok(World::from_records(width, height, &data)?)
}

/// Where an unreadable save is moved before a fresh world replaces it: `world.bin` becomes
/// `world.bin.bak`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Loads the world at `path`, or generates a fresh one if the file is missing or unreadable.
/// An unreadable file is renamed to its [`backup_path`] first, so saving the new world never
/// destroys it. Returns the world and whether it was freshly generated. Only a generator
/// producing invalid records is an error.
pub fn load_or_generate(
    path: &Path,
    width: u16,
    height: u16,
    generator: &mut dyn WorldGenerator,
) -> Result<(World, bool), RecordError> {
    match load_world(path, width, height) {
        Ok(world) => {
            info!("loaded world from {}", path.display());
            return Ok((world, false));
        }
        Err(SaveError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            info!("no world at {}, generating a new one", path.display());
        }
        Err(err) => {
            let backup = backup_path(path);
            warn!(
                "{err} ({}), moving it to {} and generating a new world",
                path.display(),
                backup.display()
            );
            if let Err(err) = fs::rename(path, &backup) {
                warn!("could not move {}: {err}", path.display());
            }
        }
    }
    let data = generator.generate(width, height);
    Ok((World::from_records(width, height, &data)?, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, LiquidType};
    use crate::generator::FlatGenerator;

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worlds").join("world.bin");
        let mut world = World::new(32, 16);
        world.set_type(7, 3, BlockType::CopperOre, LiquidType::Empty);
        world.set_liquid(8, 3, LiquidType::Water, 12);
        save_world(&world, &path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 32 * 16 * 4);

        let loaded = load_world(&path, 32, 16).unwrap();
        assert_eq!(loaded.get_block(7, 3).block_type, BlockType::CopperOre);
        assert_eq!(loaded.get_block(8, 3).liquid_level, 12);
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.bin");
        fs::write(&path, [0u8; 100]).unwrap();
        assert!(matches!(
            load_world(&path, 16, 16),
            Err(SaveError::Corrupt(RecordError::SizeMismatch { .. }))
        ));
    }

    #[test]
    fn falls_back_to_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = FlatGenerator::new(3);

        let (_, generated) =
            load_or_generate(&dir.path().join("missing.bin"), 32, 32, &mut generator).unwrap();
        assert!(generated);

        let path = dir.path().join("garbage.bin");
        fs::write(&path, vec![0xff; 32 * 32 * 4]).unwrap();
        let (world, generated) = load_or_generate(&path, 32, 32, &mut generator).unwrap();
        assert!(generated);
        assert_eq!(world.width(), 32);
        assert!(!path.exists());
        assert_eq!(fs::read(backup_path(&path)).unwrap(), vec![0xff; 32 * 32 * 4]);

        save_world(&world, &path).unwrap();
        let (loaded, generated) = load_or_generate(&path, 32, 32, &mut generator).unwrap();
        assert!(!generated);
        assert_eq!(loaded.to_records(), world.to_records());
    }

    #[test]
    fn resized_world_keeps_the_old_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.bin");
        let mut old = World::new(32, 32);
        old.set_type(5, 5, BlockType::IronOre, LiquidType::Empty);
        save_world(&old, &path).unwrap();

        let mut generator = FlatGenerator::new(1);
        let (world, generated) = load_or_generate(&path, 64, 64, &mut generator).unwrap();
        assert!(generated);
        save_world(&world, &path).unwrap();

        let backup = backup_path(&path);
        assert_eq!(backup.file_name().unwrap(), "world.bin.bak");
        let kept = load_world(&backup, 32, 32).unwrap();
        assert_eq!(kept.get_block(5, 5).block_type, BlockType::IronOre);
        assert_eq!(load_world(&path, 64, 64).unwrap().width(), 64);
    }
}
