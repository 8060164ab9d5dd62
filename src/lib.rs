//! Prime relay
//!
//! A TCP chat relay with a side job. Every client opens a connection
//! and sends lines of text. Each line is relayed to every other
//! connected client.
//!
//! A line of the shape
//!
//! ```raw
//! prime <integer>
//! ```
//!
//! is not relayed. The server checks the number for primality off the
//! relay path and, once done, sends every other client one of:
//!
//! ```raw
//! 17 is prime.
//! 10 is not prime.
//! ```
//!
//! If the operand is not an integer, only the requester gets:
//!
//! ```raw
//! Invalid number for prime check.
//! ```
//!
//! # Example session
//!
//! "-->" denotes lines from the server to Bob's client, "<--" lines
//! from Alice's client to the server.
//!
//! ```raw
//! <-- hello bob
//! --> hello bob
//! <-- prime 97
//! --> 97 is prime.
//! ```
//!
//! Recipients that fail a send are dropped, the others still get the
//! line.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Once;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use tracing::{info, instrument, warn};

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod primes;
pub mod registry;

use broadcast::Broadcaster;
use connection::Connection;
use dispatcher::Dispatcher;
use registry::Registry;

/// Upper bound of a single inbound message, longer lines are split.
pub const MAX_MESSAGE_LENGTH: usize = 1024;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct Config {
    /// Limit for a single send to a broadcast recipient or to a
    /// requester, `None` waits until the connection is closed.
    pub send_timeout: Option<Duration>,
    pub max_message_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            send_timeout: Some(DEFAULT_SEND_TIMEOUT),
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }
}

/// The shared server state: registry, broadcast and dispatch.
#[derive(Clone)]
pub struct Relay {
    config: Arc<Config>,
    broadcaster: Broadcaster,
    dispatcher: Dispatcher,
}

impl Relay {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let broadcaster = Broadcaster::new(Registry::new(), config.send_timeout);
        let dispatcher = Dispatcher::new(broadcaster.clone());

        Self {
            config: Arc::new(Config {
                // room for one whole UTF-8 character
                max_message_length: config.max_message_length.max(4),
                ..config
            }),
            broadcaster,
            dispatcher,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        self.broadcaster.registry()
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register a new connection made of `reader` and `writer` and
    /// start its handler.
    pub fn connect<R, W>(
        &self,
        reader: R,
        writer: W,
        peer: Option<SocketAddr>,
    ) -> (Arc<Connection>, JoinHandle<()>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let connection = Arc::new(Connection::new(writer, peer));
        let handler = handler::spawn(self, reader, connection.clone());
        (connection, handler)
    }

    /// Accept clients forever, accept errors are logged and the loop
    /// goes on.
    #[instrument(skip_all)]
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    let (read, write) = stream.into_split();
                    let (connection, _) = self.connect(read, write, Some(remote_addr));
                    info!("new connection {} from {remote_addr}", connection.id());
                }
                Err(err) => {
                    warn!("accept failed: {err}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Run the relay on `listener`.
///
/// # Errors
/// * Error when the listener has no local address.
pub async fn run(listener: TcpListener, config: Config) -> Result<(), anyhow::Error> {
    info!("listening on {:?}", listener.local_addr()?);

    Relay::new(config).serve(listener).await;

    Ok(())
}

pub fn init_tracing_subscriber() {
    static TRACING_SUBSCRIBER_INIT: Once = Once::new();
    TRACING_SUBSCRIBER_INIT.call_once(tracing_subscriber::fmt::init);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    pub(crate) use crate::init_tracing_subscriber;

    pub(crate) const TIMEOUT: Duration = Duration::from_millis(100);
}
