use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::connection::Id;
use crate::registry::Registry;

/// Fan-out of a message to every registered connection but one.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Registry,
    send_timeout: Option<Duration>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(registry: Registry, send_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Send `message` to every connection in a registry snapshot
    /// except `exclude`.
    ///
    /// A recipient that fails (closed, io error, timeout) is removed
    /// from the registry and closed, the others still get the
    /// message. Returns the number of successful deliveries.
    #[instrument(skip(self))]
    pub async fn broadcast(&self, message: &str, exclude: Option<Id>) -> usize {
        let mut delivered = 0;

        for connection in self.registry.snapshot() {
            if Some(connection.id()) == exclude {
                continue;
            }

            match connection.send_timeout(message, self.send_timeout).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!("dropping connection {}: {err}", connection.id());
                    self.registry.remove(connection.id());
                    connection.close().await;
                }
            }
        }

        debug!("delivered to {delivered}");

        delivered
    }
}
