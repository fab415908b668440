//! Frame transports for application connections.
//!
//! # Responsibilities
//! - Turn a protocol-resolved stream into a sequence of frames
//! - WebSocket: one binary message per frame
//! - Raw TCP: 4-byte big-endian length prefix per frame
//!
//! # Design Decisions
//! - `recv` is cancel-safe in both transports: the processing loop races it
//!   against the outbox and the inactivity deadline
//! - Oversized inbound frames are protocol errors

use std::future::Future;
use std::io;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// A bidirectional frame stream owned by one connection.
pub trait Transport: Send + 'static {
    /// Next inbound frame, or `None` once the peer closed the stream.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;

    /// Write one frame.
    fn send(&mut self, frame: Vec<u8>) -> impl Future<Output = io::Result<()>> + Send;

    /// Close the stream. Errors are ignored; the peer may already be gone.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Length-delimited frames over a raw byte stream.
#[derive(Debug)]
pub struct FramedTransport<S> {
    framed: Framed<S, LengthDelimitedCodec>,
}

impl<S: AsyncRead + AsyncWrite> FramedTransport<S> {
    pub fn new(io: S, max_frame_bytes: usize) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .max_frame_length(max_frame_bytes)
            .new_codec();
        Self {
            framed: Framed::new(io, codec),
        }
    }
}

impl<S> Transport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.framed.next().await {
            Some(frame) => Ok(Some(frame?.to_vec())),
            None => Ok(None),
        }
    }

    async fn send(&mut self, frame: Vec<u8>) -> io::Result<()> {
        self.framed.send(Bytes::from(frame)).await
    }

    async fn close(&mut self) {
        let _ = SinkExt::<Bytes>::close(&mut self.framed).await;
    }
}

/// Binary WebSocket messages.
pub struct WsTransport {
    socket: WebSocket,
    max_frame_bytes: usize,
}

impl WsTransport {
    pub fn new(socket: WebSocket, max_frame_bytes: usize) -> Self {
        Self {
            socket,
            max_frame_bytes,
        }
    }
}

impl Transport for WsTransport {
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let frame = match self.socket.recv().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(e)) => return Err(io::Error::other(e)),
                Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                // Pings are answered by the socket itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            };

            if frame.len() > self.max_frame_bytes {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {} bytes exceeds limit of {}", frame.len(), self.max_frame_bytes),
                ));
            }
            return Ok(Some(frame));
        }
    }

    async fn send(&mut self, frame: Vec<u8>) -> io::Result<()> {
        self.socket
            .send(Message::Binary(frame.into()))
            .await
            .map_err(io::Error::other)
    }

    async fn close(&mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
    }
}
