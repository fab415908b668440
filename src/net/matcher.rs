//! Protocol matchers.
//!
//! A matcher looks at the bytes sniffed so far and either claims the
//! connection, declines it, or asks for more input. Matchers never consume
//! input; the mux replays the same prefix to each one in turn.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::net::sniff::SniffBuffer;

/// Outcome of inspecting a sniffed prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The connection belongs to this protocol.
    Match,
    /// The connection does not belong to this protocol.
    NoMatch,
    /// Not enough bytes to decide yet.
    NeedMore,
}

type Predicate = dyn Fn(&[u8]) -> Decision + Send + Sync;

/// A named predicate over the first bytes of a connection.
#[derive(Clone)]
pub struct Matcher {
    protocol: &'static str,
    predicate: Arc<Predicate>,
}

impl Matcher {
    /// Create a matcher from a closure.
    pub fn new<F>(protocol: &'static str, predicate: F) -> Self
    where
        F: Fn(&[u8]) -> Decision + Send + Sync + 'static,
    {
        Self {
            protocol,
            predicate: Arc::new(predicate),
        }
    }

    /// Protocol label used in logs and metrics.
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Evaluate the predicate against the prefix.
    pub fn decide(&self, prefix: &[u8]) -> Decision {
        (self.predicate)(prefix)
    }

    /// Run one sniff pass over `conn`, reading at most `limit` bytes.
    ///
    /// Each read from the connection must complete by `deadline`. A matcher
    /// that still wants more input at the limit, at EOF, past the deadline or
    /// after a read error is treated as a non-match. Matchers that decide
    /// without reading are unaffected by an expired deadline.
    pub async fn sniff<S>(
        &self,
        conn: &mut SniffBuffer<S>,
        limit: usize,
        deadline: Option<Instant>,
    ) -> bool
    where
        S: AsyncRead + Unpin,
    {
        let reader = conn.start_sniffing();
        let mut seen = Vec::new();
        let mut chunk = [0u8; 512];

        loop {
            match self.decide(&seen) {
                Decision::Match => return true,
                Decision::NoMatch => return false,
                Decision::NeedMore => {}
            }

            if seen.len() >= limit {
                tracing::debug!(
                    protocol = self.protocol,
                    limit,
                    "Matcher needs more data than the sniff limit allows"
                );
                return false;
            }

            let want = (limit - seen.len()).min(chunk.len());
            let read = reader.read(&mut chunk[..want]);
            let read = match deadline {
                Some(at) => match tokio::time::timeout_at(at, read).await {
                    Ok(read) => read,
                    Err(_) => {
                        tracing::debug!(
                            protocol = self.protocol,
                            sniffed = seen.len(),
                            "Sniff deadline passed"
                        );
                        return false;
                    }
                },
                None => read.await,
            };

            match read {
                Ok(0) => return false,
                Ok(n) => seen.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::trace!(protocol = self.protocol, error = %e, "Read failed while sniffing");
                    return false;
                }
            }
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Claims every connection, without reading anything.
pub fn any(protocol: &'static str) -> Matcher {
    Matcher::new(protocol, |_| Decision::Match)
}

/// Claims connections starting with one of `prefixes`.
pub fn prefix<P: AsRef<[u8]>>(protocol: &'static str, prefixes: &[P]) -> Matcher {
    let prefixes: Vec<Vec<u8>> = prefixes.iter().map(|p| p.as_ref().to_vec()).collect();
    Matcher::new(protocol, move |seen| {
        let mut decision = Decision::NoMatch;
        for p in &prefixes {
            if seen.len() >= p.len() {
                if seen.starts_with(p) {
                    return Decision::Match;
                }
            } else if p.starts_with(seen) {
                decision = Decision::NeedMore;
            }
        }
        decision
    })
}

const HTTP_PREFIXES: &[&[u8]] = &[
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
    b"PATCH ",
    b"CONNECT ",
    b"TRACE ",
    b"PRI * HTTP/2.0",
];

/// Claims HTTP/1.x requests and HTTP/2 prior-knowledge connections.
pub fn http(protocol: &'static str) -> Matcher {
    prefix(protocol, HTTP_PREFIXES)
}
