//! ==============================================================================
//! main.rs - telemetry gateway entry point
//! ==============================================================================
//!
//! purpose:
//!     a thin relay between the browser dashboard and a ThingSpeak channel.
//!     the device pushes readings to the channel and polls field4 for commands;
//!     this process never talks to the device directly.
//!
//! responsibilities:
//!     - load configuration (gateway.toml + THINGSPEAK_* env overrides)
//!     - initialize tracing
//!     - serve the dashboard and the /api endpoints until ctrl-c
//!
//! relationships:
//!     - uses: config.rs (startup configuration)
//!     - uses: server.rs (router, handlers, serve loop)
//!     - server.rs uses: thingspeak.rs -> domain.rs -> coerce.rs
//!
//! architecture:
//!
//!     ┌───────────┐   /api/*    ┌──────────────────┐   feeds.json   ┌────────────┐
//!     │ dashboard │ ──────────▶ │  gateway (this)  │ ─────────────▶ │ thingspeak │
//!     │ (browser) │ ◀────────── │  one call / req  │ ◀───────────── │  channel   │
//!     └───────────┘    json     └──────────────────┘  update/last   └─────┬──────┘
//!                                                                        │
//!                                                          push / poll   │
//!                                                                  ┌─────┴──────┐
//!                                                                  │   device   │
//!                                                                  └────────────┘
//!
//! ==============================================================================

mod coerce;
mod config;
mod domain;
mod error;
mod server;
mod thingspeak;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Telemetry Gateway");
    println!("  dashboard <-> ThingSpeak relay");
    println!("===========================================================");

    // step 1: load configuration
    let config = config::GatewayConfig::resolve()?;

    // step 2: logging (RUST_LOG wins over logging.level)
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.print_summary();

    // step 3: build shared state and serve
    let state = server::AppState::new(config)?;
    info!("gateway v{} starting", env!("CARGO_PKG_VERSION"));

    server::run_server(state).await
}
