//! Framed, non-blocking TCP transport.
//!
//! Neither side of the game ever blocks on the network: both run a fixed-period loop and poll
//! their sockets once per iteration. A read that would block simply yields no messages.

use std::{
    io::{self, Read, Write},
    marker::PhantomData,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
};

use log::debug;
use thiserror::Error;

use crate::protocol::{Packet, ProtocolError, drain_frames, encode_frame};

/// Outbound bytes a peer may leave unread before it is considered gone.
pub const MAX_OUTBOUND_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed packet: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection closed by peer")]
    Closed,
    #[error("peer is not reading, {0} bytes backed up")]
    Backlog(usize),
}

/// A TCP connection that sends messages of type `S` and receives messages of type `R`.
pub struct FramedStream<S, R> {
    stream: TcpStream,
    peer: SocketAddr,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    closed: bool,
    _marker: PhantomData<fn(S) -> R>,
}

impl<S: Packet, R: Packet> FramedStream<S, R> {
    /// Wraps an already connected stream and switches it to non-blocking mode.
    pub fn new(stream: TcpStream) -> Result<Self, NetError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            inbound: Vec::new(),
            outbound: Vec::new(),
            closed: false,
            _marker: PhantomData,
        })
    }

    /// Connects to a remote address. The connect itself blocks, everything after it does not.
    pub fn connect(address: impl ToSocketAddrs) -> Result<Self, NetError> {
        Self::new(TcpStream::connect(address)?)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a message and writes as much of the outbound buffer as the socket accepts. Fails
    /// once more than [`MAX_OUTBOUND_LEN`] bytes are waiting.
    pub fn send(&mut self, message: &S) -> Result<(), NetError> {
        self.outbound.extend(encode_frame(message));
        self.flush()?;
        if self.outbound.len() > MAX_OUTBOUND_LEN {
            return Err(NetError::Backlog(self.outbound.len()));
        }
        Ok(())
    }

    /// Writes buffered outbound bytes until the socket would block.
    pub fn flush(&mut self) -> Result<(), NetError> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(NetError::Closed),
                Ok(written) => {
                    self.outbound.drain(..written);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Reads everything available and returns the complete messages in arrival order. Never
    /// blocks. Fails once the peer has closed the connection and nothing is left to deliver, or
    /// as soon as a malformed frame arrives.
    pub fn poll(&mut self) -> Result<Vec<R>, NetError> {
        let mut buffer = [0u8; 4096];
        while !self.closed {
            match self.stream.read(&mut buffer) {
                Ok(0) => {
                    debug!("{} closed the connection", self.peer);
                    self.closed = true;
                }
                Ok(read) => self.inbound.extend_from_slice(&buffer[..read]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        let messages = drain_frames(&mut self.inbound)?;
        if messages.is_empty() && self.closed {
            return Err(NetError::Closed);
        }
        Ok(messages)
    }
}

/// Non-blocking listener handing out framed server-side connections.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    pub fn bind(address: impl ToSocketAddrs) -> Result<Self, NetError> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts every pending connection.
    pub fn accept<S: Packet, R: Packet>(&self) -> Result<Vec<FramedStream<S, R>>, NetError> {
        let mut streams = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => streams.push(FramedStream::new(stream)?),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(streams)
    }
}
