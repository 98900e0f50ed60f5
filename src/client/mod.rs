//! Binary front-end of the signal-session engine.
//!
//! This module wires the command-line configuration to a UDP transport and a
//! [`SessionHandle`](crate::session::SessionHandle). The binary stays a thin
//! wrapper that only needs to call [`run`].

pub mod runtime;

use anyhow::Result;
use clap::Parser;
pub use cli_defs::{Cli, ClientConfig, Commands, RequestArgs};
pub use runtime::{build_request, dispatch, run_command, run_daemon, settings_from_config};
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber. The filter comes from `RUST_LOG`
/// and defaults to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber installed by an embedding process wins.
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
    {
        tracing::debug!(error = %error, "tracing subscriber already installed");
    }
}

/// Parse CLI arguments and execute the requested command or daemon.
///
/// # Errors
///
/// Returns any error emitted while parsing configuration or running the
/// session.
pub async fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_with_cli(cli).await
}

/// Execute the client logic using an already parsed [`Cli`].
///
/// # Errors
///
/// Propagates any failure reported by [`runtime::dispatch`].
pub async fn run_with_cli(cli: Cli) -> Result<()> { runtime::dispatch(cli).await }
