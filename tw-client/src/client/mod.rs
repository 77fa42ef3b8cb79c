//! Client to interact with a local or remote server.
//!
//! This module provides a `Connection` trait with two implementations: a `LocalConnection` that
//! owns a server and directly calls its message handling functions (singleplayer), and a
//! `RemoteConnection` that talks to a server over TCP. Both go through the same binary encoding so
//! singleplayer exercises exactly what multiplayer does.

pub mod world;

use log::debug;
use tw_core::{
    block::BlockType,
    net::{FramedStream, NetError},
    protocol::{C2SMessage, Packet, S2CMessage},
    server::Server,
};

use crate::client::world::{ClientWorld, View};

/// The [`Connection`] trait defines the interface for client-server communication.
pub trait Connection {
    /// Sends a message to the server.
    fn send(&mut self, message: C2SMessage) -> Result<(), NetError>;

    /// Ticks the connection to update its state.
    fn tick(&mut self, _now_ms: u64, _frame_ms: u16) -> Result<(), NetError> {
        Ok(())
    }

    /// Receives every message available right now. Never blocks.
    fn receive(&mut self) -> Result<Vec<S2CMessage>, NetError>;
}

/// A local connection that directly interacts with a server instance.
///
/// The [`LocalConnection`] owns the server instance instead of borrowing it. It uses a connection
/// ID of `0` for all interactions since it is the only connection.
pub struct LocalConnection {
    server: Server,
}

impl LocalConnection {
    /// Creates a new `LocalConnection` and joins the given server.
    pub fn new(mut server: Server) -> Self {
        server.connect(0);
        Self { server }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Gives the server back, e.g. to save its world.
    pub fn into_server(mut self) -> Server {
        self.server.disconnect(0);
        self.server
    }
}

impl Connection for LocalConnection {
    fn send(&mut self, message: C2SMessage) -> Result<(), NetError> {
        let message = C2SMessage::decode(&message.encode())?;
        self.server.handle_message(0, message);
        Ok(())
    }

    fn tick(&mut self, now_ms: u64, frame_ms: u16) -> Result<(), NetError> {
        self.server.tick(now_ms, frame_ms);
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<S2CMessage>, NetError> {
        self.server
            .take_messages(0)
            .iter()
            .map(|message| Ok(S2CMessage::decode(&message.encode())?))
            .collect()
    }
}

/// A connection to a server over TCP.
pub struct RemoteConnection {
    stream: FramedStream<C2SMessage, S2CMessage>,
}

impl RemoteConnection {
    pub fn connect(address: &str) -> Result<Self, NetError> {
        let stream = FramedStream::connect(address)?;
        debug!("connected to {}", stream.peer());
        Ok(Self { stream })
    }
}

impl Connection for RemoteConnection {
    fn send(&mut self, message: C2SMessage) -> Result<(), NetError> {
        self.stream.send(&message)
    }

    fn tick(&mut self, _now_ms: u64, _frame_ms: u16) -> Result<(), NetError> {
        self.stream.flush()
    }

    fn receive(&mut self) -> Result<Vec<S2CMessage>, NetError> {
        self.stream.poll()
    }
}

/// The client struct that uses a connection to communicate with the server.
pub struct Client<C: Connection> {
    pub connection: C,
    pub world: ClientWorld,
}

impl<C: Connection> Client<C> {
    /// Creates a new `Client` with the given connection.
    pub fn new(connection: C, request_limit: usize) -> Self {
        Self {
            connection,
            world: ClientWorld::new(request_limit),
        }
    }

    /// Updates any state on the client side from all received messages from the server, then
    /// requests the chunks the view still lacks.
    pub fn receive_state(&mut self, view: View) -> Result<(), NetError> {
        for message in self.connection.receive()? {
            self.world.apply(message);
        }
        for request in self.world.request_chunks(view) {
            self.connection.send(request)?;
        }
        Ok(())
    }

    /// Runs one frame: ticks the connection, syncs the world and prepares the render pass.
    /// Returns the chunks that had to be rebuilt.
    pub fn frame(
        &mut self,
        now_ms: u64,
        frame_ms: u16,
        view: View,
    ) -> Result<Vec<(u16, u16)>, NetError> {
        self.connection.tick(now_ms, frame_ms)?;
        self.receive_state(view)?;
        Ok(self.world.prepare_render())
    }

    pub fn start_breaking(&mut self, x: u16, y: u16) -> Result<(), NetError> {
        self.connection.send(C2SMessage::StartedBreaking { x, y })
    }

    pub fn stop_breaking(&mut self) -> Result<(), NetError> {
        self.connection.send(C2SMessage::StoppedBreaking)
    }

    pub fn place_block(&mut self, x: u16, y: u16, block_type: BlockType) -> Result<(), NetError> {
        self.connection.send(C2SMessage::PlaceBlock { x, y, block_type })
    }
}

#[cfg(test)]
mod tests {
    use glam::IVec2;
    use tw_core::{
        generator::{FlatGenerator, WorldGenerator},
        world::{World, chunk::ChunkState},
    };

    use super::*;
    use crate::client::world::REQUEST_LIMIT;

    fn singleplayer() -> Client<LocalConnection> {
        let data = FlatGenerator::new(8).generate(64, 64);
        let world = World::from_records(64, 64, &data).unwrap();
        Client::new(LocalConnection::new(Server::new(world, 8)), REQUEST_LIMIT)
    }

    fn assert_mirrors(client: &Client<LocalConnection>) {
        let server = client.connection.server().world();
        let mirror = client.world.world().unwrap();
        for y in 0..64 {
            for x in 0..64 {
                assert_eq!(
                    mirror.get_block(x, y).record(),
                    server.get_block(x, y).record(),
                    "({x}, {y})"
                );
            }
        }
    }

    fn world_loaded(client: &Client<LocalConnection>) -> bool {
        client
            .world
            .world()
            .is_some_and(|world| world.get_chunk(0, 0).is_loaded())
    }

    #[test]
    fn streams_the_whole_world_within_the_limit() {
        let mut client = singleplayer();
        let view = View::new(IVec2::splat(32), IVec2::splat(64));
        let mut frames = 0;
        loop {
            client.frame(frames * 50, 50, view).unwrap();
            assert!(client.world.pending() <= REQUEST_LIMIT);
            frames += 1;
            if client.world.world().is_some()
                && client.world.needs_chunks(view).is_empty()
                && client.world.pending() == 0
            {
                break;
            }
            assert!(frames < 100, "world never finished loading");
        }
        // One frame for the welcome, then 16 chunks at five per frame.
        assert_eq!(frames, 5);
        let mirror = client.world.world().unwrap();
        for chunk_y in 0..4 {
            for chunk_x in 0..4 {
                assert_eq!(mirror.get_chunk(chunk_x, chunk_y).state, ChunkState::Loaded);
            }
        }
        assert_mirrors(&client);
    }

    #[test]
    fn edits_reach_the_mirror() {
        let mut client = singleplayer();
        let view = View::new(IVec2::splat(32), IVec2::splat(64));
        for frame in 0..10 {
            client.frame(frame * 50, 50, view).unwrap();
        }
        assert!(world_loaded(&client));

        client.place_block(10, 1, BlockType::Torch).unwrap();
        let surface = client.connection.server().world().surface(20);
        client.start_breaking(20, surface).unwrap();
        for frame in 10..100 {
            client.frame(frame * 50, 50, view).unwrap();
        }
        client.stop_breaking().unwrap();
        client.frame(100 * 50, 50, view).unwrap();
        assert_eq!(
            client.world.world().unwrap().get_block(10, 1).block_type,
            BlockType::Torch
        );
        assert_eq!(client.world.world().unwrap().get_block(10, 1).light_level, 100);
        assert_mirrors(&client);
    }
}
