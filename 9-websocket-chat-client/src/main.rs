use std::io::{self, BufReader, Stdin};

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use websocket_chat_client::{cli::ClientArgs, input::SessionName, pump::Pump};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the chat transcript, so logs go to stderr.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = ClientArgs::parse();
    let url = args.url()?;
    let (name, stdin) = read_session_name(args.name.clone()).await?;

    let (socket, response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    debug!(?response, "websocket handshake complete");
    info!("connected to {url}");

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("*** connected to {url} as {name}\n").as_bytes())
        .await?;
    stdout.flush().await?;

    let (outbound, inbound) = socket.split();
    let mut pump = Pump::new(outbound, inbound, name);
    if let Some(period) = args.heartbeat() {
        pump = pump.with_heartbeat(period);
    }

    pump.run_until_ctrl_c(stdin, stdout).await?;
    Ok(())
}

/// Resolves the session name before the connection opens, prompting on the
/// terminal when none was given. Returns stdin so that lines typed ahead of
/// the prompt stay buffered for the session.
async fn read_session_name(name: Option<String>) -> Result<(SessionName, BufReader<Stdin>)> {
    tokio::task::spawn_blocking(move || -> Result<(SessionName, BufReader<Stdin>)> {
        let mut stdin = BufReader::new(io::stdin());
        let name = match name {
            Some(name) => SessionName::new(name)?,
            None => SessionName::prompt(&mut stdin, &mut io::stdout())?,
        };
        Ok((name, stdin))
    })
    .await
    .context("name prompt task failed")?
}
