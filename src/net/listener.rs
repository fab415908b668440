//! Protocol-sniffing TCP listener.
//!
//! # Responsibilities
//! - Bind the root socket and run its accept loop
//! - Sniff each connection on its own task and route it to the first
//!   matching protocol listener
//! - Report accept failures and unmatched connections to the error handler
//! - Drain in-flight dispatches and close protocol queues on shutdown

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::ListenerConfig;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::connection::ConnectionTracker;
use crate::net::error::MuxError;
use crate::net::matcher::Matcher;
use crate::net::protocol::{MuxConn, ProtocolListener};
use crate::net::sniff::SniffBuffer;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;

/// Decides whether the mux keeps serving after an error.
pub type ErrorHandler = Arc<dyn Fn(&MuxError) -> bool + Send + Sync>;

struct Route {
    matcher: Matcher,
    tx: mpsc::Sender<MuxConn>,
}

/// A TCP listener that multiplexes several protocols on one port.
///
/// Matchers are tried in registration order; the first one to claim a
/// connection receives it on its [`ProtocolListener`]. Registration happens
/// before [`MuxListener::serve`], which consumes the listener.
pub struct MuxListener {
    root: TcpListener,
    local_addr: SocketAddr,
    config: ListenerConfig,
    routes: Vec<Route>,
    error_handler: ErrorHandler,
    shutdown: Shutdown,
}

impl MuxListener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, MuxError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            MuxError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(MuxError::Bind)?;
        Self::from_listener(listener, config)
    }

    /// Wrap an already bound listener.
    pub fn from_listener(listener: TcpListener, config: &ListenerConfig) -> Result<Self, MuxError> {
        let local_addr = listener.local_addr().map_err(MuxError::Bind)?;

        tracing::info!(
            address = %local_addr,
            queue_capacity = config.queue_capacity,
            max_sniff_bytes = config.max_sniff_bytes,
            "Mux listener bound"
        );

        Ok(Self {
            root: listener,
            local_addr,
            config: config.clone(),
            routes: Vec::new(),
            error_handler: Arc::new(|err: &MuxError| {
                tracing::debug!(error = %err, "Mux listener error");
                true
            }),
            shutdown: Shutdown::new(),
        })
    }

    /// Register a matcher. Returns the listener its connections are delivered
    /// to.
    pub fn matcher(&mut self, matcher: Matcher) -> ProtocolListener {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let protocol = matcher.protocol();
        self.routes.push(Route { matcher, tx });
        ProtocolListener::new(protocol, rx, self.local_addr, self.handle())
    }

    /// Install the error handler. Returning `false` stops the mux.
    pub fn handle_error<F>(&mut self, handler: F)
    where
        F: Fn(&MuxError) -> bool + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
    }

    /// Handle that can close the mux from elsewhere.
    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Close the mux when `shutdown` triggers.
    pub fn close_on(&self, shutdown: &Shutdown) {
        let mut signal = shutdown.subscribe();
        let handle = self.handle();
        tokio::spawn(async move {
            signal.recv().await;
            handle.close();
        });
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop until closed or until an error is not allowed to
    /// continue.
    pub async fn serve(self) -> Result<(), MuxError> {
        let MuxListener {
            root,
            local_addr,
            config,
            routes,
            error_handler,
            shutdown,
        } = self;

        let protocols: Vec<&'static str> = routes.iter().map(|r| r.matcher.protocol()).collect();
        tracing::info!(address = %local_addr, protocols = ?protocols, "Mux listener serving");

        let dispatcher = Arc::new(Dispatcher {
            routes,
            read_timeout: config.read_timeout(),
            max_sniff_bytes: config.max_sniff_bytes,
            error_handler,
            shutdown: shutdown.clone(),
            fatal: Mutex::new(None),
        });
        let in_flight = ConnectionTracker::new();
        let mut closing = shutdown.subscribe();
        let mut backoff = Backoff::new(config.accept_backoff_base_ms, config.accept_backoff_max_ms);

        let result = loop {
            let accepted = tokio::select! {
                _ = closing.recv() => break Ok(()),
                accepted = root.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    backoff.reset();
                    metrics::record_accepted();
                    tracing::trace!(peer_addr = %peer_addr, "Connection accepted");

                    let guard = in_flight.track();
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move {
                        dispatcher.dispatch(stream, peer_addr).await;
                        // Queues close once the last dispatcher reference goes.
                        drop(dispatcher);
                        drop(guard);
                    });
                }
                Err(e) => {
                    if let Err(err) = dispatcher
                        .recover(MuxError::Accept(e), &mut backoff, &mut closing)
                        .await
                    {
                        break Err(err);
                    }
                }
            }
        };

        shutdown.trigger();
        drop(root);
        in_flight.wait_idle().await;

        let fatal = dispatcher.take_fatal();
        drop(dispatcher);
        tracing::info!(address = %local_addr, "Mux listener stopped");

        match fatal {
            Some(err) => Err(err),
            None => result,
        }
    }
}

/// Cloneable handle that closes a [`MuxListener`].
#[derive(Debug, Clone)]
pub struct MuxHandle {
    shutdown: Shutdown,
}

impl MuxHandle {
    /// Stop accepting, drain in-flight sniffing and close every protocol
    /// listener. Safe to call more than once.
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    /// Whether the mux has been asked to close.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

/// State shared by the per-connection dispatch tasks of one `serve` call.
struct Dispatcher {
    routes: Vec<Route>,
    read_timeout: Option<Duration>,
    max_sniff_bytes: usize,
    error_handler: ErrorHandler,
    shutdown: Shutdown,
    fatal: Mutex<Option<MuxError>>,
}

impl Dispatcher {
    fn should_continue(&self, err: &MuxError) -> bool {
        (self.error_handler)(err) && err.is_temporary()
    }

    /// Decide what to do after an accept error: give up, or wait out the
    /// backoff delay. Closing the mux cuts the wait short.
    async fn recover(
        &self,
        err: MuxError,
        backoff: &mut Backoff,
        closing: &mut ShutdownSignal,
    ) -> Result<(), MuxError> {
        if !self.should_continue(&err) {
            tracing::error!(error = %err, "Accept loop stopped");
            return Err(err);
        }

        let delay = backoff.next_delay();
        tracing::warn!(
            error = %err,
            attempt = backoff.attempts(),
            delay = ?delay,
            "Temporary accept error"
        );

        tokio::select! {
            _ = closing.recv() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(())
    }

    fn take_fatal(&self) -> Option<MuxError> {
        self.fatal.lock().ok().and_then(|mut slot| slot.take())
    }

    async fn dispatch(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let mut closing = self.shutdown.subscribe();
        let mut conn = SniffBuffer::new(stream);

        let classified = tokio::select! {
            biased;
            _ = closing.recv() => {
                tracing::trace!(peer_addr = %peer_addr, "Shutdown while sniffing");
                return;
            }
            route = self.classify(&mut conn) => route,
        };

        let Some(route) = classified else {
            drop(conn);
            metrics::record_unmatched();
            let err = MuxError::NotMatched { peer: peer_addr };
            if !self.should_continue(&err) {
                tracing::warn!(error = %err, "Closing mux listener after unmatched connection");
                if let Ok(mut slot) = self.fatal.lock() {
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
                self.shutdown.trigger();
            }
            return;
        };

        conn.done_sniffing();
        let protocol = route.matcher.protocol();
        let conn = MuxConn::new(conn, peer_addr);

        tokio::select! {
            biased;
            _ = closing.recv() => {
                tracing::debug!(peer_addr = %peer_addr, protocol, "Shutdown before handoff; closing connection");
            }
            sent = route.tx.send(conn) => match sent {
                Ok(()) => {
                    metrics::record_matched(protocol);
                    tracing::debug!(peer_addr = %peer_addr, protocol, "Connection routed");
                }
                Err(_) => {
                    tracing::debug!(peer_addr = %peer_addr, protocol, "Protocol listener dropped; closing connection");
                }
            },
        }
    }

    /// Try every matcher in order. The sniff deadline bounds each read, not
    /// the whole pass, so matchers that need no input still get their turn.
    async fn classify(&self, conn: &mut SniffBuffer<TcpStream>) -> Option<&Route> {
        let deadline = self.read_timeout.map(|limit| Instant::now() + limit);

        for route in &self.routes {
            if route.matcher.sniff(conn, self.max_sniff_bytes, deadline).await {
                return Some(route);
            }
        }
        None
    }
}
