//! Read-through buffer that records the first bytes of a connection.
//!
//! # Responsibilities
//! - Record every byte handed out while sniffing is active
//! - Replay the record to the next reader before touching the socket again
//! - Hand the recorded prefix to the winning protocol handler exactly once
//!
//! # Design Decisions
//! - Each sniff pass rewinds to the first byte, so a matcher that declines
//!   leaves the stream untouched for the next one
//! - The record is released as soon as the handler has replayed it
//! - A source error seen while sniffing is kept and re-surfaced once replay
//!   is exhausted, instead of reading a broken socket again

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A byte stream wrapper that can peek incoming bytes and rewind.
#[derive(Debug)]
pub struct SniffBuffer<S> {
    source: S,
    record: Vec<u8>,
    cursor: usize,
    replay_end: usize,
    sniffing: bool,
    last_err: Option<io::ErrorKind>,
}

impl<S> SniffBuffer<S> {
    /// Wrap `source` with an empty record.
    pub fn new(source: S) -> Self {
        Self {
            source,
            record: Vec::new(),
            cursor: 0,
            replay_end: 0,
            sniffing: false,
            last_err: None,
        }
    }

    /// Begin a sniff pass. Reads replay the record from its first byte and
    /// anything fetched past it is appended to the record.
    pub fn start_sniffing(&mut self) -> &mut Self {
        self.rewind(true);
        self
    }

    /// End sniffing. The record is replayed once to the next reader and then
    /// dropped.
    pub fn done_sniffing(&mut self) {
        self.rewind(false);
    }

    /// Whether a sniff pass is in progress.
    pub fn is_sniffing(&self) -> bool {
        self.sniffing
    }

    /// Bytes recorded so far.
    pub fn recorded(&self) -> &[u8] {
        &self.record
    }

    fn rewind(&mut self, sniffing: bool) {
        self.sniffing = sniffing;
        self.cursor = 0;
        self.replay_end = self.record.len();
    }

    fn release_record(&mut self) {
        self.record = Vec::new();
        self.cursor = 0;
        self.replay_end = 0;
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for SniffBuffer<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.cursor < this.replay_end {
            let n = buf.remaining().min(this.replay_end - this.cursor);
            buf.put_slice(&this.record[this.cursor..this.cursor + n]);
            this.cursor += n;
            return Poll::Ready(Ok(()));
        }

        if let Some(kind) = this.last_err {
            if !this.sniffing {
                this.last_err = None;
            }
            return Poll::Ready(Err(io::Error::new(kind, "connection failed while sniffing")));
        }

        if !this.sniffing && this.record.capacity() != 0 {
            this.release_record();
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.source).poll_read(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                if this.sniffing {
                    this.last_err = Some(e.kind());
                }
                Poll::Ready(Err(e))
            }
            Poll::Ready(Ok(())) => {
                if this.sniffing {
                    this.record.extend_from_slice(&buf.filled()[before..]);
                }
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SniffBuffer<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().source).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().source).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.source.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().source).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().source).poll_shutdown(cx)
    }
}
