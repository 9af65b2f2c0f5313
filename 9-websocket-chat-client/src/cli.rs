use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

/// Connect to a websocket chat server and chat from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Host name of the chat server. A `host:port` value overrides `--port`.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port of the chat server.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Path of the websocket endpoint.
    #[arg(long, default_value = "/ws/")]
    pub path: String,

    /// Name shown in front of every message. Prompted for when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Seconds between keep-alive pings. Disabled when omitted or 0.
    #[arg(long, value_name = "SECS")]
    pub heartbeat: Option<u64>,
}

impl ClientArgs {
    pub fn url(&self) -> Result<String> {
        let (host, port) = match self.host.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("invalid port in host '{}'", self.host))?;
                (host, port)
            }
            None => (self.host.as_str(), self.port),
        };

        let path = self.path.trim_start_matches('/');
        Ok(format!("ws://{host}:{port}/{path}"))
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
