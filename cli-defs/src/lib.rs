//! Shared CLI type definitions for the dots-client build and runtime.
//!
//! This crate provides CLI argument and configuration types used by both the
//! `build.rs` script (for man page generation) and the runtime binary.
//! Extracting these types into a separate crate keeps build-time and runtime
//! dependencies cleanly separated.

// FIXME: File-wide suppressions are unavoidable here. Clap and OrthoConfig derive macros
// inject generated code throughout the module, and there is no mechanism to narrow
// the scope without restructuring the crate.
#![expect(
    non_snake_case,
    reason = "Clap/OrthoConfig derive macros generate helper modules with uppercase names"
)]
#![expect(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]

use clap::{Args, Parser, Subcommand};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

/// Default server address.
pub const DEFAULT_SERVER: &str = "127.0.0.1:4646";
/// Default retransmission interval for confirmable requests, in seconds.
pub const DEFAULT_CONFIRMABLE_INTERVAL: u64 = 2;
/// Default retransmissions for confirmable requests.
pub const DEFAULT_CONFIRMABLE_RETRIES: u32 = 3;
/// Default deadline for confirmable requests, in seconds.
pub const DEFAULT_CONFIRMABLE_TIMEOUT: u64 = 20;
/// Default interval for non-confirmable requests, in seconds.
pub const DEFAULT_NON_CONFIRMABLE_INTERVAL: u64 = 2;
/// Default deadline for non-confirmable requests, in seconds.
pub const DEFAULT_NON_CONFIRMABLE_TIMEOUT: u64 = 10;
/// Default margin before Max-Age at which the session configuration is
/// refreshed, in seconds.
pub const DEFAULT_INTERVAL_BEFORE_MAX_AGE: u64 = 10;
/// Default heartbeat interval until the server advertises one, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 30;
/// Default missed heartbeats tolerated until the server advertises a value.
pub const DEFAULT_MISSING_HB_ALLOWED: u32 = 5;

/// Arguments for the `request` subcommand.
#[derive(Parser, OrthoConfig, Deserialize, Serialize, Default, Debug, Clone)]
#[ortho_config(prefix = "DOTS_CLIENT_")]
pub struct RequestArgs {
    /// Request kind: `mitigation_request` or `session_configuration`.
    #[arg(long)]
    pub kind: Option<String>,
    /// Method: GET, POST, PUT or DELETE.
    #[arg(long)]
    pub method: Option<String>,
    /// Comma-separated query parameters, e.g. `cuid=abc,mid=123`.
    #[arg(long)]
    pub query: Option<String>,
    /// Observe value: 0 registers, 1 deregisters.
    #[arg(long)]
    pub observe: Option<u32>,
    /// If-Match value for conditional updates (may be empty).
    #[arg(long)]
    pub if_match: Option<String>,
    /// Path to a JSON file holding the request body.
    #[arg(long)]
    pub body: Option<String>,
    /// Send as a non-confirmable message.
    #[arg(long)]
    pub non_confirmable: Option<bool>,
}

/// CLI subcommands exposed by `dots-client`.
#[derive(Subcommand, Deserialize, Serialize, Debug, Clone)]
pub enum Commands {
    /// Send one request and print the response.
    #[command(name = "request")]
    Request(RequestArgs),
}

/// Runtime configuration of the signal-channel client.
#[derive(Args, OrthoConfig, Serialize, Deserialize, Default, Debug, Clone)]
#[ortho_config(prefix = "DOTS_CLIENT_")]
pub struct ClientConfig {
    /// Signal-channel server address.
    #[ortho_config(default = DEFAULT_SERVER.to_owned())]
    #[arg(long, default_value_t = String::from(DEFAULT_SERVER))]
    pub server: String,
    /// Retransmission interval for confirmable requests, in seconds.
    #[ortho_config(default = DEFAULT_CONFIRMABLE_INTERVAL)]
    #[arg(long, default_value_t = DEFAULT_CONFIRMABLE_INTERVAL)]
    pub confirmable_interval: u64,
    /// Retransmissions for confirmable requests.
    #[ortho_config(default = DEFAULT_CONFIRMABLE_RETRIES)]
    #[arg(long, default_value_t = DEFAULT_CONFIRMABLE_RETRIES)]
    pub confirmable_retries: u32,
    /// Deadline for confirmable requests, in seconds.
    #[ortho_config(default = DEFAULT_CONFIRMABLE_TIMEOUT)]
    #[arg(long, default_value_t = DEFAULT_CONFIRMABLE_TIMEOUT)]
    pub confirmable_timeout: u64,
    /// Interval for non-confirmable requests, in seconds.
    #[ortho_config(default = DEFAULT_NON_CONFIRMABLE_INTERVAL)]
    #[arg(long, default_value_t = DEFAULT_NON_CONFIRMABLE_INTERVAL)]
    pub non_confirmable_interval: u64,
    /// Retries for non-confirmable requests (kept for parity; not resent).
    #[ortho_config(default = 0)]
    #[arg(long, default_value_t = 0)]
    pub non_confirmable_retries: u32,
    /// Deadline for non-confirmable requests, in seconds.
    #[ortho_config(default = DEFAULT_NON_CONFIRMABLE_TIMEOUT)]
    #[arg(long, default_value_t = DEFAULT_NON_CONFIRMABLE_TIMEOUT)]
    pub non_confirmable_timeout: u64,
    /// Seconds before Max-Age at which the session configuration is refreshed.
    #[ortho_config(default = DEFAULT_INTERVAL_BEFORE_MAX_AGE)]
    #[arg(long, default_value_t = DEFAULT_INTERVAL_BEFORE_MAX_AGE)]
    pub interval_before_max_age: u64,
    /// Block2 size exponent (0-6) for the first fragment of mitigation reads.
    #[arg(long)]
    pub initial_block_size: Option<u8>,
    /// Configuration half driving the heartbeat: `idle` or `mitigating`.
    #[ortho_config(default = "idle".to_owned())]
    #[arg(long, default_value_t = String::from("idle"))]
    pub session_config_mode: String,
    /// Heartbeat interval until the server advertises one, in seconds.
    #[ortho_config(default = DEFAULT_HEARTBEAT_INTERVAL)]
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL)]
    pub heartbeat_interval: u64,
    /// Missed heartbeats tolerated until the server advertises a value.
    #[ortho_config(default = DEFAULT_MISSING_HB_ALLOWED)]
    #[arg(long, default_value_t = DEFAULT_MISSING_HB_ALLOWED)]
    pub missing_hb_allowed: u32,
    /// Session-configuration id to read at start-up.
    #[arg(long)]
    pub sid: Option<u32>,
    /// Client identifier whose mitigations are observed at start-up.
    #[arg(long)]
    pub cuid: Option<String>,
}

/// Top-level CLI entry point consumed by the binary.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
#[command(name = "dots-client", version, about = "DOTS signal-channel client")]
pub struct Cli {
    /// Client configuration.
    #[command(flatten)]
    pub config: ClientConfig,
    /// Optional subcommand.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use figment::Jail;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn env_config_loading() {
        Jail::expect_with(|j| {
            j.set_env("DOTS_CLIENT_SERVER", "198.51.100.7:4646");
            j.set_env("DOTS_CLIENT_MISSING_HB_ALLOWED", "9");
            let cfg = ClientConfig::load_from_iter(["dots-client"]).expect("load");
            assert_eq!(cfg.server, "198.51.100.7:4646");
            assert_eq!(cfg.missing_hb_allowed, 9);
            Ok(())
        });
    }

    #[rstest]
    fn cli_overrides_env() {
        Jail::expect_with(|j| {
            j.set_env("DOTS_CLIENT_SERVER", "198.51.100.7:4646");
            let cfg = ClientConfig::load_from_iter(["dots-client", "--server", "[2001:db8::1]:4646"]).expect("load");
            assert_eq!(cfg.server, "[2001:db8::1]:4646");
            Ok(())
        });
    }

    #[rstest]
    fn loads_from_dotfile() {
        Jail::expect_with(|j| {
            j.create_file(".dots_client.toml", "interval_before_max_age = 20\nsession_config_mode = \"mitigating\"")?;
            let cfg = ClientConfig::load_from_iter(["dots-client"]).expect("load");
            assert_eq!(cfg.interval_before_max_age, 20);
            assert_eq!(cfg.session_config_mode, "mitigating");
            Ok(())
        });
    }

    #[rstest]
    fn defaults_apply_without_sources() {
        Jail::expect_with(|_j| {
            let cfg = ClientConfig::load_from_iter(["dots-client"]).expect("load");
            assert_eq!(cfg.confirmable_retries, DEFAULT_CONFIRMABLE_RETRIES);
            assert_eq!(cfg.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
            assert_eq!(cfg.initial_block_size, None);
            Ok(())
        });
    }
}
