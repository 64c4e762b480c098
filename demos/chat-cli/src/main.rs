//! Terminal chat client.
//!
//! Reads lines from stdin, streams replies to stdout as they arrive, and
//! prints connection changes to stderr.
//!
//! Commands:
//!   /reconnect  retry after automatic reconnection gave up
//!   /quit       close the connection and exit

use anyhow::Context;
use clap::Parser;
use parley_client::{ChatSession, ClientConfig, SendError};
use parley_core::{ConnectionStatus, ProtocolEvent};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parley-chat", about = "Terminal client for a Parley chat backend")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Backend WebSocket URL (overrides the config file).
    #[arg(long, env = "PARLEY_URL")]
    url: Option<String>,

    /// Conversation title sent as context.
    #[arg(long)]
    title: Option<String>,

    /// Conversation abstract sent as context.
    #[arg(long = "abstract")]
    abstract_text: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(url) = self.url {
            config.url = url;
        }
        if let Some(title) = self.title {
            config.context.title = title;
        }
        if let Some(abstract_text) = self.abstract_text {
            config.context.abstract_text = abstract_text;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("parley_chat=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config()?;
    tracing::info!("Connecting to {}", config.url);

    let mut session = ChatSession::connect(&config);
    let mut status = session.subscribe_status();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut replying = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/reconnect" => session.reconnect(),
                    text => match session.send(text) {
                        Ok(()) | Err(SendError::Empty) => {}
                        Err(e) => eprintln!("[not sent: {e}]"),
                    },
                }
            }
            event = session.next_event() => {
                let Some(event) = event else { break };
                render(&event, &mut replying, &session)?;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                report(&current);
            }
        }
    }

    session.close().await;
    Ok(())
}

fn render(event: &ProtocolEvent, replying: &mut bool, session: &ChatSession) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    match event {
        ProtocolEvent::Token(text) => {
            if !*replying {
                write!(stdout, "assistant> ")?;
                *replying = true;
            }
            write!(stdout, "{text}")?;
        }
        ProtocolEvent::Done => {
            if *replying {
                writeln!(stdout)?;
            }
            *replying = false;
        }
        ProtocolEvent::Error(_) => {
            if *replying {
                writeln!(stdout)?;
            }
            if let Some(turn) = session.transcript().last() {
                writeln!(stdout, "assistant> {}", turn.content)?;
            }
            *replying = false;
        }
    }
    stdout.flush()?;
    Ok(())
}

fn report(status: &ConnectionStatus) {
    if status.connected {
        eprintln!("[connected]");
    } else if status.connecting {
        eprintln!("[connecting...]");
    } else if let Some(error) = &status.last_error {
        eprintln!("[disconnected: {error}]");
    } else {
        eprintln!("[disconnected]");
    }
}
