use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::SinkExt;

use thiserror::Error;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use tracing::debug;

pub type Id = u64;

type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LinesCodec>;

#[derive(Error, Debug)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<LinesCodecError> for SendError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(err) => Self::Io(err),
            LinesCodecError::MaxLineLengthExceeded => {
                Self::Io(io::Error::new(io::ErrorKind::InvalidData, err))
            }
        }
    }
}

/// One client session as seen by the server.
///
/// The handle owns the write side of the stream. The read side stays
/// with the connection handler. Closing is idempotent: the first call
/// shuts the writer down and wakes the handler, later calls do
/// nothing.
pub struct Connection {
    id: Id,
    peer: Option<SocketAddr>,
    writer: Mutex<Option<Writer>>,
    closed: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new<W>(writer: W, peer: Option<SocketAddr>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);

        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            writer: Mutex::new(Some(FramedWrite::new(writer, LinesCodec::new()))),
            closed: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Write `message` as a single line and flush it.
    ///
    /// A send still waiting for the peer is abandoned as soon as the
    /// connection is closed.
    ///
    /// # Errors
    /// * `SendError::Closed` when the connection is or gets closed.
    /// * `SendError::Io` when the underlying stream fails.
    pub async fn send(&self, message: &str) -> Result<(), SendError> {
        tokio::select! {
            biased;

            () = self.closed.cancelled() => Err(SendError::Closed),

            result = self.write_line(message) => result,
        }
    }

    async fn write_line(&self, message: &str) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(SendError::Closed);
        };

        writer.send(message).await?;

        Ok(())
    }

    /// Like [`Connection::send`], giving up after `limit` when set.
    ///
    /// # Errors
    /// * `SendError::Timeout` when the peer does not accept the line in time.
    /// * Any error of [`Connection::send`].
    pub async fn send_timeout(
        &self,
        message: &str,
        limit: Option<Duration>,
    ) -> Result<(), SendError> {
        match limit {
            Some(limit) => tokio::time::timeout(limit, self.send(message))
                .await
                .map_err(|_| SendError::Timeout(limit))?,
            None => self.send(message).await,
        }
    }

    /// Close the write side and signal the handler.
    ///
    /// Pending sends are interrupted first, so this never waits on a
    /// stalled peer.
    ///
    /// Returns `true` only for the call that actually closed the
    /// connection.
    pub async fn close(&self) -> bool {
        self.closed.cancel();

        let Some(writer) = self.writer.lock().await.take() else {
            return false;
        };

        // unflushed bytes are dropped
        if let Err(err) = writer.into_inner().shutdown().await {
            debug!("connection {}: shutdown failed: {err}", self.id);
        }

        true
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;

    use tokio::io::duplex;
    use tokio::time::timeout;
    use tokio_util::codec::{FramedRead, LinesCodec};

    use crate::tests::{init_tracing_subscriber, TIMEOUT};

    use super::*;

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (a, _a) = duplex(64);
        let (b, _b) = duplex(64);

        let a = Connection::new(a, None);
        let b = Connection::new(b, None);

        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_send_line() {
        init_tracing_subscriber();

        let (server, client) = duplex(1024);
        let connection = Connection::new(server, None);
        let mut client = FramedRead::new(client, LinesCodec::new());

        connection.send("hello").await.unwrap();
        connection.send("world").await.unwrap();

        assert_eq!(
            timeout(TIMEOUT, client.next()).await.unwrap().unwrap().unwrap(),
            "hello"
        );
        assert_eq!(
            timeout(TIMEOUT, client.next()).await.unwrap().unwrap().unwrap(),
            "world"
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        init_tracing_subscriber();

        let (server, client) = duplex(1024);
        let connection = Connection::new(server, None);
        let mut client = FramedRead::new(client, LinesCodec::new());

        assert!(!connection.is_closed());
        assert!(connection.close().await);
        assert!(!connection.close().await);
        assert!(connection.is_closed());

        timeout(TIMEOUT, connection.closed()).await.unwrap();

        assert!(matches!(
            connection.send("late").await,
            Err(SendError::Closed)
        ));
        assert!(timeout(TIMEOUT, client.next()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer() {
        init_tracing_subscriber();

        let (server, client) = duplex(1024);
        let connection = Connection::new(server, None);
        drop(client);

        assert!(matches!(
            connection.send("hello").await,
            Err(SendError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_send_timeout() {
        init_tracing_subscriber();

        let (server, _client) = duplex(4);
        let connection = Connection::new(server, None);

        let limit = Duration::from_millis(20);
        assert!(matches!(
            connection
                .send_timeout("a line that does not fit", Some(limit))
                .await,
            Err(SendError::Timeout(l)) if l == limit
        ));
    }

    #[tokio::test]
    async fn test_close_interrupts_stalled_send() {
        init_tracing_subscriber();

        let (server, _client) = duplex(4);
        let connection = Arc::new(Connection::new(server, None));

        let sending = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("a line that does not fit").await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(timeout(TIMEOUT, connection.close()).await.unwrap());
        assert!(matches!(
            timeout(TIMEOUT, sending).await.unwrap().unwrap(),
            Err(SendError::Closed)
        ));
    }
}
