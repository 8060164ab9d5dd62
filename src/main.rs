use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use tracing::info;

use prime_relay::{init_tracing_subscriber, run, Config, MAX_MESSAGE_LENGTH};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    #[arg(long, default_value_t = 50000)]
    port: u16,

    /// Per recipient send timeout, 0 disables it.
    #[arg(long, default_value_t = 5000)]
    send_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_tracing_subscriber();

    let args = Args::parse();

    info!("start");

    let listener = TcpListener::bind(&format!("{}:{}", args.address, args.port)).await?;

    let config = Config {
        send_timeout: (args.send_timeout_ms > 0)
            .then(|| Duration::from_millis(args.send_timeout_ms)),
        max_message_length: MAX_MESSAGE_LENGTH,
    };

    run(listener, config).await
}
