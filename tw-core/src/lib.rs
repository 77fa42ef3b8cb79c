//! The core of the tile world engine. This crate contains the essential functionality shared by
//! the server and the client: the block catalogue, the world grid with its light and liquid
//! engines, the wire protocol and its transport, persistence and the server-side game logic.

pub mod block;
pub mod config;
pub mod generator;
pub mod net;
pub mod protocol;
pub mod server;
pub mod world;
