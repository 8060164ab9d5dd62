use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;

use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::dispatcher::{ComputationRequest, INVALID_NUMBER};
use crate::Relay;

const PRIME_COMMAND: &str = "prime";

/// What an inbound message asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Prime(i64),
    InvalidPrime(&'a str),
    Message(&'a str),
}

/// Classify a trimmed inbound message.
///
/// Exactly two whitespace separated tokens starting with `prime` is a
/// computation request, everything else is relayed as is.
#[must_use]
pub fn classify(message: &str) -> Command<'_> {
    let mut parts = message.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(PRIME_COMMAND), Some(operand), None) => match operand.parse() {
            Ok(number) => Command::Prime(number),
            Err(_) => Command::InvalidPrime(operand),
        },
        _ => Command::Message(message),
    }
}

/// True for lines carrying a computation result, used by the client
/// to pick how a line is shown.
#[must_use]
pub fn is_computation_result(line: &str) -> bool {
    line.contains("is prime") || line.contains("is not prime")
}

#[derive(Debug)]
enum Disconnect {
    Clean,
    Closed,
    Error(io::Error),
}

/// Register `connection` and start its handler.
///
/// Registration happens before this returns, so the connection is
/// visible to broadcasts as soon as it is accepted.
pub fn spawn<R>(relay: &Relay, reader: R, connection: Arc<Connection>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    relay.registry().add(connection.clone());

    let relay = relay.clone();
    tokio::spawn(async move { handle_connection(relay, reader, connection).await })
}

#[instrument(skip(relay, reader, connection), fields(id = connection.id(), peer = ?connection.peer()))]
async fn handle_connection<R>(relay: Relay, reader: R, connection: Arc<Connection>)
where
    R: AsyncRead + Unpin,
{
    debug!("start");

    let limit = relay.config().max_message_length;
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::with_capacity(limit);

    let reason = loop {
        // a message is at most one line or `limit` bytes, the rest of
        // a longer line comes with the next reads. The bytes of a
        // character cut by the previous chunk are still in `buffer`.
        let mut chunk = (&mut reader).take((limit - buffer.len()) as u64);

        let read = tokio::select! {
            biased;

            () = connection.closed() => break Disconnect::Closed,

            read = chunk.read_until(b'\n', &mut buffer) => read,
        };

        match read {
            Ok(0) => {
                if !buffer.is_empty() {
                    process_bytes(&relay, &connection, &buffer).await;
                }
                break Disconnect::Clean;
            }
            Ok(_) => {
                let end = char_boundary(&buffer);
                process_bytes(&relay, &connection, &buffer[..end]).await;
                buffer.drain(..end);
            }
            Err(err) => break Disconnect::Error(err),
        }
    };

    match reason {
        Disconnect::Error(err) => warn!("disconnected: {err}"),
        reason => info!("disconnected: {reason:?}"),
    }

    relay.registry().remove(connection.id());
    connection.close().await;

    debug!("end");
}

/// Length of the longest prefix of `chunk` that does not end inside a
/// UTF-8 character.
fn char_boundary(chunk: &[u8]) -> usize {
    if chunk.last() == Some(&b'\n') {
        return chunk.len();
    }

    match std::str::from_utf8(chunk) {
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        _ => chunk.len(),
    }
}

async fn process_bytes(relay: &Relay, connection: &Connection, bytes: &[u8]) {
    let message = String::from_utf8_lossy(bytes);
    let message = message.trim();
    if !message.is_empty() {
        process(relay, connection, message).await;
    }
}

async fn process(relay: &Relay, connection: &Connection, message: &str) {
    match classify(message) {
        Command::Prime(number) => {
            debug!("prime request: {number}");
            relay
                .dispatcher()
                .submit(ComputationRequest::new(number, connection.id()));
        }
        Command::InvalidPrime(operand) => {
            debug!("invalid prime operand: {operand}");
            if let Err(err) = connection
                .send_timeout(INVALID_NUMBER, relay.config().send_timeout)
                .await
            {
                warn!("cannot reply: {err}");
                connection.close().await;
            }
        }
        Command::Message(message) => {
            relay
                .broadcaster()
                .broadcast(message, Some(connection.id()))
                .await;
        }
    }
}
