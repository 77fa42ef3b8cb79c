//! Contains the messages exchanged between the client and the server and their binary encoding.
//!
//! Every message travels in a frame: a big-endian `u32` body length followed by the body, which
//! is a one byte packet tag and the packet's payload. All integers are big-endian. The same
//! encoding is used over TCP and by the in-process singleplayer connection.

use thiserror::Error;

use crate::{
    block::{BlockRecord, BlockType, LiquidType, RecordError},
    world::chunk::CHUNK_AREA,
};

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
/// Size of the length prefix of a frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Errors produced while decoding frames and messages. Any of them means the peer is broken and
/// the connection has to be closed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected end of packet")]
    UnexpectedEnd,
    #[error("empty frame")]
    EmptyFrame,
    #[error("unknown packet tag {0}")]
    UnknownTag(u8),
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Messages sent from the client to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum C2SMessage {
    /// Request for the contents of one chunk.
    ChunkRequest { chunk_x: u16, chunk_y: u16 },
    /// The player started breaking a block.
    StartedBreaking { x: u16, y: u16 },
    /// The player stopped breaking.
    StoppedBreaking,
    /// Request to place a block into an empty cell.
    PlaceBlock { x: u16, y: u16, block_type: BlockType },
}

/// Messages sent from the server to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum S2CMessage {
    /// First message of every connection, describing the world.
    Welcome { width: u16, height: u16 },
    /// Delivery of a whole chunk, in row-major raster order from the chunk origin.
    Chunk {
        chunk_x: u16,
        chunk_y: u16,
        blocks: Box<[BlockRecord; CHUNK_AREA]>,
    },
    BlockChange { x: u16, y: u16, block_type: BlockType },
    LightChange { x: u16, y: u16, level: u8 },
    LiquidChange {
        x: u16,
        y: u16,
        liquid_type: LiquidType,
        level: u8,
    },
    BlockProgressChange { x: u16, y: u16, stage: u8 },
}

/// A message that can be written into and read from a frame body.
pub trait Packet: Sized {
    /// Encodes the packet tag and payload.
    fn encode(&self) -> Vec<u8>;
    /// Decodes a whole frame body. Trailing bytes are an error.
    fn decode(body: &[u8]) -> Result<Self, ProtocolError>;
}

#[inline(always)]
fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8, ProtocolError> {
    let v = *data.get(*offset).ok_or(ProtocolError::UnexpectedEnd)?;
    *offset += 1;
    Ok(v)
}

#[inline(always)]
fn read_u16(data: &[u8], offset: &mut usize) -> Result<u16, ProtocolError> {
    if *offset + 2 > data.len() {
        return Err(ProtocolError::UnexpectedEnd);
    }
    let v = u16::from_be_bytes([data[*offset], data[*offset + 1]]);
    *offset += 2;
    Ok(v)
}

#[inline(always)]
fn read_record(data: &[u8], offset: &mut usize) -> Result<BlockRecord, ProtocolError> {
    if *offset + BlockRecord::SIZE > data.len() {
        return Err(ProtocolError::UnexpectedEnd);
    }
    let bytes = [
        data[*offset],
        data[*offset + 1],
        data[*offset + 2],
        data[*offset + 3],
    ];
    *offset += BlockRecord::SIZE;
    Ok(BlockRecord::from_bytes(bytes)?)
}

fn finish<T>(data: &[u8], offset: usize, value: T) -> Result<T, ProtocolError> {
    if offset != data.len() {
        return Err(ProtocolError::TrailingBytes(data.len() - offset));
    }
    Ok(value)
}

impl Packet for C2SMessage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        match self {
            C2SMessage::ChunkRequest { chunk_x, chunk_y } => {
                out.push(0);
                out.extend(chunk_x.to_be_bytes());
                out.extend(chunk_y.to_be_bytes());
            }
            C2SMessage::StartedBreaking { x, y } => {
                out.push(1);
                out.extend(x.to_be_bytes());
                out.extend(y.to_be_bytes());
            }
            C2SMessage::StoppedBreaking => out.push(2),
            C2SMessage::PlaceBlock { x, y, block_type } => {
                out.push(3);
                out.extend(x.to_be_bytes());
                out.extend(y.to_be_bytes());
                out.push(*block_type as u8);
            }
        }
        out
    }

    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut offset = 0;
        let tag = read_u8(body, &mut offset).map_err(|_| ProtocolError::EmptyFrame)?;
        let message = match tag {
            0 => C2SMessage::ChunkRequest {
                chunk_x: read_u16(body, &mut offset)?,
                chunk_y: read_u16(body, &mut offset)?,
            },
            1 => C2SMessage::StartedBreaking {
                x: read_u16(body, &mut offset)?,
                y: read_u16(body, &mut offset)?,
            },
            2 => C2SMessage::StoppedBreaking,
            3 => C2SMessage::PlaceBlock {
                x: read_u16(body, &mut offset)?,
                y: read_u16(body, &mut offset)?,
                block_type: BlockType::try_from(read_u8(body, &mut offset)?)?,
            },
            tag => return Err(ProtocolError::UnknownTag(tag)),
        };
        finish(body, offset, message)
    }
}

impl Packet for S2CMessage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            S2CMessage::Welcome { width, height } => {
                out.push(0);
                out.extend(width.to_be_bytes());
                out.extend(height.to_be_bytes());
            }
            S2CMessage::Chunk {
                chunk_x,
                chunk_y,
                blocks,
            } => {
                out.reserve(5 + CHUNK_AREA * BlockRecord::SIZE);
                out.push(1);
                // The chunk response carries y before x.
                out.extend(chunk_y.to_be_bytes());
                out.extend(chunk_x.to_be_bytes());
                for record in blocks.iter() {
                    out.extend(record.to_bytes());
                }
            }
            S2CMessage::BlockChange { x, y, block_type } => {
                out.push(2);
                out.extend(x.to_be_bytes());
                out.extend(y.to_be_bytes());
                out.push(*block_type as u8);
            }
            S2CMessage::LightChange { x, y, level } => {
                out.push(3);
                out.extend(x.to_be_bytes());
                out.extend(y.to_be_bytes());
                out.push(*level);
            }
            S2CMessage::LiquidChange {
                x,
                y,
                liquid_type,
                level,
            } => {
                out.push(4);
                out.extend(x.to_be_bytes());
                out.extend(y.to_be_bytes());
                out.push(*liquid_type as u8);
                out.push(*level);
            }
            S2CMessage::BlockProgressChange { x, y, stage } => {
                out.push(5);
                out.extend(x.to_be_bytes());
                out.extend(y.to_be_bytes());
                out.push(*stage);
            }
        }
        out
    }

    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut offset = 0;
        let tag = read_u8(body, &mut offset).map_err(|_| ProtocolError::EmptyFrame)?;
        let message = match tag {
            0 => S2CMessage::Welcome {
                width: read_u16(body, &mut offset)?,
                height: read_u16(body, &mut offset)?,
            },
            1 => {
                let chunk_y = read_u16(body, &mut offset)?;
                let chunk_x = read_u16(body, &mut offset)?;
                let mut blocks = Box::new([BlockRecord::default(); CHUNK_AREA]);
                for record in blocks.iter_mut() {
                    *record = read_record(body, &mut offset)?;
                }
                S2CMessage::Chunk {
                    chunk_x,
                    chunk_y,
                    blocks,
                }
            }
            2 => S2CMessage::BlockChange {
                x: read_u16(body, &mut offset)?,
                y: read_u16(body, &mut offset)?,
                block_type: BlockType::try_from(read_u8(body, &mut offset)?)?,
            },
            3 => S2CMessage::LightChange {
                x: read_u16(body, &mut offset)?,
                y: read_u16(body, &mut offset)?,
                level: read_u8(body, &mut offset)?,
            },
            4 => S2CMessage::LiquidChange {
                x: read_u16(body, &mut offset)?,
                y: read_u16(body, &mut offset)?,
                liquid_type: LiquidType::try_from(read_u8(body, &mut offset)?)?,
                level: read_u8(body, &mut offset)?,
            },
            5 => S2CMessage::BlockProgressChange {
                x: read_u16(body, &mut offset)?,
                y: read_u16(body, &mut offset)?,
                stage: read_u8(body, &mut offset)?,
            },
            tag => return Err(ProtocolError::UnknownTag(tag)),
        };
        finish(body, offset, message)
    }
}

/// Wraps an encoded body into a length-prefixed frame.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend((body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Encodes a message straight into a frame.
pub fn encode_frame<P: Packet>(packet: &P) -> Vec<u8> {
    frame(&packet.encode())
}

/// Looks for a complete frame at the start of `buffer`. Returns the body range and the total
/// number of bytes the frame occupies, or `None` if more bytes are needed.
pub fn split_frame(
    buffer: &[u8],
) -> Result<Option<(std::ops::Range<usize>, usize)>, ProtocolError> {
    if buffer.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let end = FRAME_HEADER_LEN + len;
    if buffer.len() < end {
        return Ok(None);
    }
    Ok(Some((FRAME_HEADER_LEN..end, end)))
}

/// Decodes every complete frame at the front of `buffer` and removes them from it. A trailing
/// partial frame is left in place.
pub fn drain_frames<P: Packet>(buffer: &mut Vec<u8>) -> Result<Vec<P>, ProtocolError> {
    let mut messages = Vec::new();
    let mut consumed = 0;
    while let Some((body, len)) = split_frame(&buffer[consumed..])? {
        messages.push(P::decode(&buffer[consumed + body.start..consumed + body.end])?);
        consumed += len;
    }
    buffer.drain(..consumed);
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_request_layout() {
        let bytes = C2SMessage::ChunkRequest {
            chunk_x: 3,
            chunk_y: 0x0102,
        }
        .encode();
        assert_eq!(bytes, vec![0, 0, 3, 1, 2]);
    }

    #[test]
    fn chunk_round_trip() {
        let mut blocks = Box::new([BlockRecord::default(); CHUNK_AREA]);
        for (i, record) in blocks.iter_mut().enumerate() {
            *record = BlockRecord {
                block_type: BlockType::ALL[i % BlockType::ALL.len()],
                liquid_type: LiquidType::ALL[i % 2],
                liquid_level: if i % 2 == 1 { i as u8 } else { 0 },
                light_level: (i % 101) as u8,
            };
        }
        let message = S2CMessage::Chunk {
            chunk_x: 2,
            chunk_y: 7,
            blocks,
        };
        let bytes = message.encode();
        assert_eq!(bytes.len(), 5 + CHUNK_AREA * 4);
        assert_eq!(&bytes[1..5], &[0, 7, 0, 2]);
        assert_eq!(S2CMessage::decode(&bytes), Ok(message));
    }

    #[test]
    fn deltas_round_trip() {
        let messages = [
            S2CMessage::Welcome {
                width: 4400,
                height: 1200,
            },
            S2CMessage::BlockChange {
                x: 1,
                y: 2,
                block_type: BlockType::Torch,
            },
            S2CMessage::LightChange {
                x: 300,
                y: 4,
                level: 97,
            },
            S2CMessage::LiquidChange {
                x: 5,
                y: 6,
                liquid_type: LiquidType::Water,
                level: 255,
            },
            S2CMessage::BlockProgressChange { x: 7, y: 8, stage: 9 },
        ];
        for message in messages {
            assert_eq!(S2CMessage::decode(&message.encode()), Ok(message));
        }
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        assert_eq!(C2SMessage::decode(&[]), Err(ProtocolError::EmptyFrame));
        assert_eq!(C2SMessage::decode(&[9]), Err(ProtocolError::UnknownTag(9)));
        assert_eq!(
            C2SMessage::decode(&[0, 0, 1]),
            Err(ProtocolError::UnexpectedEnd)
        );
        assert_eq!(
            C2SMessage::decode(&[2, 0]),
            Err(ProtocolError::TrailingBytes(1))
        );
        assert_eq!(
            C2SMessage::decode(&[3, 0, 0, 0, 0, 200]),
            Err(ProtocolError::Record(RecordError::UnknownBlockType(200)))
        );
        assert_eq!(
            S2CMessage::decode(&[1, 0, 0, 0, 0, 1, 0, 0]),
            Err(ProtocolError::UnexpectedEnd)
        );
    }

    #[test]
    fn frames_are_split_incrementally() {
        let mut buffer = encode_frame(&C2SMessage::StoppedBreaking);
        buffer.extend(encode_frame(&C2SMessage::StartedBreaking { x: 1, y: 2 }));
        let partial = encode_frame(&C2SMessage::ChunkRequest {
            chunk_x: 1,
            chunk_y: 1,
        });
        buffer.extend_from_slice(&partial[..3]);

        let messages: Vec<C2SMessage> = drain_frames(&mut buffer).unwrap();
        assert_eq!(
            messages,
            vec![
                C2SMessage::StoppedBreaking,
                C2SMessage::StartedBreaking { x: 1, y: 2 }
            ]
        );
        assert_eq!(buffer, &partial[..3]);

        buffer.extend_from_slice(&partial[3..]);
        let messages: Vec<C2SMessage> = drain_frames(&mut buffer).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut buffer = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        assert_eq!(
            drain_frames::<C2SMessage>(&mut buffer),
            Err(ProtocolError::FrameTooLarge(MAX_FRAME_LEN + 1))
        );
    }
}
