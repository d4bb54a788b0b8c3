use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use frameline::{frame::MAX_PAYLOAD_LEN, Options, Server};
use serde_json::json;

/// Text-only WebSocket server.
///
/// Logs every text message it receives and answers each one with a JSON greeting.
///
/// Examples:
///   frameline --addr 0.0.0.0:3210 --protocol json --protocol chat
///   frameline --idle-timeout 30s --log-level debug
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3210")]
    addr: SocketAddr,

    /// Subprotocol to offer during the handshake. Repeat to offer several.
    #[arg(long = "protocol", value_name = "NAME", default_value = "json")]
    protocols: Vec<String>,

    /// Maximum payload accepted in a single frame, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = MAX_PAYLOAD_LEN)]
    max_payload: usize,

    /// Close connections that stay silent this long (e.g. "30s", "2m").
    #[arg(long, value_parser = humantime::parse_duration)]
    idle_timeout: Option<Duration>,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: log::Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    simple_logger::init_with_level(cli.log_level)?;

    let mut options = Options::default()
        .with_subprotocols(cli.protocols)
        .with_max_payload_read(cli.max_payload);
    if let Some(timeout) = cli.idle_timeout {
        options = options.with_idle_timeout(timeout);
    }

    let server = Server::bind(cli.addr, options).await?;
    log::info!("Listening on: ws://{}", server.local_addr()?);

    tokio::select! {
        res = server.run(|text: &str| {
            log::info!("Received: {}", text);
            Some(json!({ "message": "Hello from the server!" }))
        }) => res?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down"),
    }

    Ok(())
}
