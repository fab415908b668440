//! Per-protocol listeners fed by the mux.
//!
//! A [`ProtocolListener`] looks like an ordinary listener to the protocol
//! server sitting on top of it: `accept()` hands out connections that the mux
//! already classified, with any sniffed bytes still readable.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::net::error::MuxError;
use crate::net::listener::MuxHandle;
use crate::net::sniff::SniffBuffer;

/// A classified connection. Reads replay the sniffed prefix first.
#[derive(Debug)]
pub struct MuxConn {
    inner: SniffBuffer<TcpStream>,
    peer_addr: SocketAddr,
}

impl MuxConn {
    pub(crate) fn new(inner: SniffBuffer<TcpStream>, peer_addr: SocketAddr) -> Self {
        Self { inner, peer_addr }
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl AsyncRead for MuxConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MuxConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Listener for one protocol registered on a [`MuxListener`](crate::net::listener::MuxListener).
#[derive(Debug)]
pub struct ProtocolListener {
    protocol: &'static str,
    connections: mpsc::Receiver<MuxConn>,
    local_addr: SocketAddr,
    mux: MuxHandle,
}

impl ProtocolListener {
    pub(crate) fn new(
        protocol: &'static str,
        connections: mpsc::Receiver<MuxConn>,
        local_addr: SocketAddr,
        mux: MuxHandle,
    ) -> Self {
        Self {
            protocol,
            connections,
            local_addr,
            mux,
        }
    }

    /// Wait for the next connection routed to this protocol.
    ///
    /// Returns [`MuxError::ListenerClosed`] once the mux has been closed.
    /// Connections still queued at that point are closed, not handed out.
    pub async fn accept(&mut self) -> Result<MuxConn, MuxError> {
        match self.connections.recv().await {
            Some(conn) if !self.mux.is_closed() => Ok(conn),
            leftover => {
                drop(leftover);
                self.discard_backlog();
                Err(MuxError::ListenerClosed)
            }
        }
    }

    fn discard_backlog(&mut self) {
        self.connections.close();
        let mut discarded = 0usize;
        while let Ok(conn) = self.connections.try_recv() {
            drop(conn);
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(protocol = self.protocol, discarded, "Closed connections queued at shutdown");
        }
    }

    /// Address of the shared root socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Protocol label of the matcher feeding this listener.
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Close the root listener. Protocol listeners do not own the socket, so
    /// this shuts down the whole mux.
    pub fn close(&self) {
        self.mux.close();
    }
}

impl axum::serve::Listener for ProtocolListener {
    type Io = MuxConn;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match ProtocolListener::accept(self).await {
            Ok(conn) => {
                let addr = conn.peer_addr();
                (conn, addr)
            }
            Err(_) => {
                // axum has no way to be told the listener is gone; its
                // graceful shutdown ends the serve loop instead.
                tracing::debug!(protocol = self.protocol, "Protocol listener closed");
                std::future::pending().await
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}
