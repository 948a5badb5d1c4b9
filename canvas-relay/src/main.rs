//! canvas-relay — standalone relay process.
//!
//! Set `RUST_LOG` to adjust verbosity (defaults to `info`).

use clap::Parser;
use log::info;

use canvas_relay::{RelayServer, ServerConfig};

#[derive(Parser)]
#[command(name = "canvas-relay")]
#[command(about = "Real-time broadcast relay for shared drawing canvases", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, env = "CANVAS_RELAY_BIND")]
    bind: Option<String>,

    /// Path that accepts the WebSocket upgrade
    #[arg(short, long, env = "CANVAS_RELAY_PATH")]
    path: Option<String>,

    /// Do not assign client identities (no `init` / `cursor_remove`)
    #[arg(long, env = "CANVAS_RELAY_ANONYMOUS")]
    anonymous: bool,

    /// Do not echo events back to their sender
    #[arg(long, env = "CANVAS_RELAY_NO_ECHO")]
    no_echo: bool,
}

impl Cli {
    /// Overlay the flags on `ServerConfig::default()`.
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_addr: self.bind.unwrap_or(defaults.bind_addr),
            ws_path: self.path.unwrap_or(defaults.ws_path),
            track_identity: defaults.track_identity && !self.anonymous,
            echo_to_sender: defaults.echo_to_sender && !self.no_echo,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config();

    info!("Starting canvas relay...");
    let server = RelayServer::new(config);
    if let Err(e) = server.run().await {
        log::error!("Failed to start relay on {}: {e}", server.bind_addr());
        std::process::exit(1);
    }
}
