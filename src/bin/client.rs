//! Interactive client for the prime relay.
//!
//! Reads lines from stdin and sends them to the server, prints what
//! the server relays. `quit` ends the session.
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use tracing::debug;

use prime_relay::handler::is_computation_result;
use prime_relay::init_tracing_subscriber;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "localhost")]
    address: String,

    #[arg(long, default_value_t = 50000)]
    port: u16,
}

async fn receive(read: OwnedReadHalf) {
    let mut lines = FramedRead::new(read, LinesCodec::new());
    loop {
        match lines.next().await {
            Some(Ok(line)) if is_computation_result(&line) => {
                println!("Prime Computation Result: {line}");
            }
            Some(Ok(line)) => println!("Message: {line}"),
            Some(Err(err)) => {
                println!("Error receiving message: {err}");
                break;
            }
            None => {
                println!("Disconnected from server.");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_tracing_subscriber();

    let args = Args::parse();

    let stream = match TcpStream::connect((args.address.as_str(), args.port)).await {
        Ok(stream) => stream,
        Err(err) => {
            println!("Failed to connect to server: {err}");
            return Ok(());
        }
    };
    println!("Connected to server.");

    let (read, write) = stream.into_split();
    let receiver = tokio::spawn(receive(read));

    let mut server = FramedWrite::new(write, LinesCodec::new());
    let mut stdin = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    while let Some(line) = stdin.next().await {
        let line = line?;
        if line.trim().eq_ignore_ascii_case("quit") {
            println!("Disconnecting from the server.");
            break;
        }
        if let Err(err) = server.send(line).await {
            println!("Error sending message: {err}");
            break;
        }
    }

    SinkExt::<String>::close(&mut server).await.ok();
    receiver.abort();

    debug!("done");

    Ok(())
}
