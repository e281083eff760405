//! ==============================================================================
//! main.rs - io board control panel entry point
//! ==============================================================================
//!
//! purpose:
//!     a control panel for the ESP8266 IO board. it keeps one websocket open to
//!     the board, polls it for status every 50ms and serves the result as a
//!     local dashboard. clicks, color picks and lcd text go back to the board
//!     as short text commands.
//!
//! responsibilities:
//!     - load configuration (panel.toml + command line overrides)
//!     - set up logging
//!     - start the connection manager (once)
//!     - run the snapshot poll timer
//!     - serve the dashboard
//!
//! relationships:
//!     - uses: config.rs (panel.toml)
//!     - uses: connection.rs (socket lifecycle, reconnect)
//!     - uses: sync.rs (polling, snapshot -> view, actions -> commands)
//!     - uses: dashboard.rs (axum routes + html)
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     panel (this process)                    │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ poll timer  │  │ dashboard   │  │ connection task     │  │
//!     │  │ (50ms)      │  │ (port 3000) │  │ (reconnect 2000ms)  │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │ "dat"          │ actions            │ snapshots   │
//!     │         └────────────────┼────────────────────┘             │
//!     │                    ┌─────┴─────┐                            │
//!     │                    │ view sync │ <- sync.rs                 │
//!     │                    └─────┬─────┘                            │
//!     └──────────────────────────┼──────────────────────────────────┘
//!                                │ ws://<board>/ws
//!                         ┌──────┴──────┐
//!                         │  ESP8266    │
//!                         │  firmware   │
//!                         └─────────────┘
//!
//! ==============================================================================

mod config;
mod connection;
mod dashboard;
mod protocol;
mod sync;
mod view;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing_subscriber::EnvFilter;

use config::PanelConfig;
use connection::{ConnectionManager, WsConnector};
use sync::ViewSync;
use view::PanelView;

#[derive(Debug, Parser)]
#[command(name = "io-board-panel", version, about = "Control panel for the ESP8266 IO board")]
struct Cli {
    /// path to panel.toml (default: search config/ and ../config/)
    #[arg(long)]
    config: Option<PathBuf>,
    /// board host, overrides [device] host
    #[arg(long)]
    device: Option<String>,
    /// dashboard bind address, overrides [server] bind
    #[arg(long)]
    bind: Option<String>,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  ESP8266 IO Board - Control Panel");
    println!("===========================================================");

    // step 1: load configuration
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => PanelConfig::load(path)?,
        None => PanelConfig::load_or_default(),
    };
    if let Some(host) = cli.device {
        config.device.host = host;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    config.print_summary();

    // step 2: logging
    init_logging(&config.logging.level);

    // step 3: connection manager + view sync
    let view = Arc::new(RwLock::new(PanelView::default()));
    let manager = ConnectionManager::new(
        config.device.gateway_url(),
        config.reconnect.delay(),
        Arc::new(WsConnector::new(config.reconnect.connect_timeout())),
    );
    let sync = Arc::new(ViewSync::new(manager.connection(), view, config.logging.show_snapshots));
    manager.start(sync.clone());

    // step 4: poll timer
    let poller = sync.clone();
    let period = config.polling.interval();
    tokio::spawn(async move { poller.run_poller(period).await });

    // step 5: dashboard (runs until the process is stopped)
    if let Err(e) = dashboard::run_server(&config.server.bind, sync).await {
        tracing::error!("[WEB] Fatal: dashboard server error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

/// RUST_LOG wins; otherwise the level from panel.toml
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
