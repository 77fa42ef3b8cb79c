//! Chunk metadata for a 16x16 tile of blocks.

/// Width and height of a chunk in blocks.
pub const CHUNK_SIZE: usize = 16;
/// Number of blocks in one chunk.
pub const CHUNK_AREA: usize = CHUNK_SIZE * CHUNK_SIZE;

/// Streaming state of a chunk on the client. Server chunks are never streamed and keep the
/// default state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChunkState {
    #[default]
    Unloaded,
    PendingLoad,
    Loaded,
}

/// Per-chunk metadata. Block storage lives in the owning world's flat buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub state: ChunkState,
    /// Whether any contained block changed since the last texture rebuild.
    pub dirty_render: bool,
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            state: ChunkState::Unloaded,
            dirty_render: true,
        }
    }
}

impl Chunk {
    pub fn is_loaded(&self) -> bool {
        self.state == ChunkState::Loaded
    }
}

/// Iterates the world coordinates of a chunk in wire raster order (row-major from the origin,
/// `index = local_y * 16 + local_x`).
pub fn chunk_positions(chunk_x: u16, chunk_y: u16) -> impl Iterator<Item = (u16, u16)> {
    let origin_x = chunk_x as usize * CHUNK_SIZE;
    let origin_y = chunk_y as usize * CHUNK_SIZE;
    (0..CHUNK_AREA).map(move |i| {
        (
            (origin_x + i % CHUNK_SIZE) as u16,
            (origin_y + i / CHUNK_SIZE) as u16,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_order_is_row_major() {
        let positions: Vec<_> = chunk_positions(1, 2).collect();
        assert_eq!(positions.len(), CHUNK_AREA);
        assert_eq!(positions[0], (16, 32));
        assert_eq!(positions[1], (17, 32));
        assert_eq!(positions[16], (16, 33));
        assert_eq!(positions[255], (31, 47));
    }
}
