use tokio::task::JoinHandle;

use tracing::{debug, error, instrument};

use crate::broadcast::Broadcaster;
use crate::connection::Id;
use crate::primes;

/// Reply sent to the requester only when the operand is not an integer.
pub const INVALID_NUMBER: &str = "Invalid number for prime check.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputationRequest {
    pub number: i64,
    pub sender: Id,
}

impl ComputationRequest {
    #[must_use]
    pub fn new(number: i64, sender: Id) -> Self {
        Self { number, sender }
    }
}

#[must_use]
pub fn format_result(number: i64, prime: bool) -> String {
    if prime {
        format!("{number} is prime.")
    } else {
        format!("{number} is not prime.")
    }
}

/// Runs primality checks off the relay path.
#[derive(Clone)]
pub struct Dispatcher {
    broadcaster: Broadcaster,
}

impl Dispatcher {
    #[must_use]
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }

    /// Fire and forget: the check runs on the blocking pool and the
    /// result is broadcast to everyone but the sender.
    ///
    /// The returned handle can be awaited, nothing requires it.
    #[instrument(skip(self))]
    pub fn submit(&self, request: ComputationRequest) -> JoinHandle<()> {
        let broadcaster = self.broadcaster.clone();

        tokio::spawn(async move {
            let ComputationRequest { number, sender } = request;

            let prime = match tokio::task::spawn_blocking(move || primes::is_prime(number)).await
            {
                Ok(prime) => prime,
                Err(err) => {
                    error!("prime check for {number} failed: {err}");
                    return;
                }
            };

            debug!("isPrime for {number}: {prime}");

            broadcaster
                .broadcast(&format_result(number, prime), Some(sender))
                .await;
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;

    use tokio::io::duplex;
    use tokio::time::timeout;
    use tokio_util::codec::{FramedRead, LinesCodec};

    use crate::connection::Connection;
    use crate::registry::Registry;
    use crate::tests::{init_tracing_subscriber, TIMEOUT};

    use super::*;

    #[test]
    fn test_format_result() {
        assert_eq!(format_result(17, true), "17 is prime.");
        assert_eq!(format_result(10, false), "10 is not prime.");
        assert_eq!(format_result(-3, false), "-3 is not prime.");
    }

    #[tokio::test]
    async fn test_result_is_broadcast_to_others() {
        init_tracing_subscriber();

        let registry = Registry::new();
        let dispatcher = Dispatcher::new(Broadcaster::new(registry.clone(), None));

        let (server_a, client_a) = duplex(1024);
        let a = Arc::new(Connection::new(server_a, None));
        registry.add(a.clone());
        let mut client_a = FramedRead::new(client_a, LinesCodec::new());

        let (server_b, client_b) = duplex(1024);
        registry.add(Arc::new(Connection::new(server_b, None)));
        let mut client_b = FramedRead::new(client_b, LinesCodec::new());

        timeout(TIMEOUT, dispatcher.submit(ComputationRequest::new(17, a.id())))
            .await
            .unwrap()
            .unwrap();
        timeout(TIMEOUT, dispatcher.submit(ComputationRequest::new(10, a.id())))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            timeout(TIMEOUT, client_b.next()).await.unwrap().unwrap().unwrap(),
            "17 is prime."
        );
        assert_eq!(
            timeout(TIMEOUT, client_b.next()).await.unwrap().unwrap().unwrap(),
            "10 is not prime."
        );
        assert!(timeout(TIMEOUT, client_a.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_requests_without_recipients() {
        init_tracing_subscriber();

        let registry = Registry::new();
        let dispatcher = Dispatcher::new(Broadcaster::new(registry, None));

        let big = dispatcher.submit(ComputationRequest::new(999_999_999_989, 0));
        let small = dispatcher.submit(ComputationRequest::new(4, 0));

        timeout(TIMEOUT, small).await.unwrap().unwrap();
        timeout(TIMEOUT * 10, big).await.unwrap().unwrap();
    }
}
