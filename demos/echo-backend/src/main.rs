//! Streaming echo backend.
//!
//! Speaks the Parley wire protocol without any model behind it: every message
//! is answered word by word with `token` frames and finished with `done`.
//! A message starting with `!fail` gets a partial reply and then an `error`.
//!
//! Run:
//!   cargo run -p parley-demo-echo-backend -- --port 8000 --delay-ms 60
//!   cargo run -p parley-demo-chat-cli -- --url ws://127.0.0.1:8000

mod protocol;
mod server;

use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("echo_backend=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = parse_arg(&args, "--port").unwrap_or(8000);
    let delay = Duration::from_millis(parse_arg(&args, "--delay-ms").unwrap_or(40));

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    tracing::info!("Starting echo backend on {}", addr);

    server::run(addr, delay).await
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
