//! Binary entrypoint for the DOTS signal-channel client.
//!
//! Delegates to [`dots_client::client::run`].

#[tokio::main]
async fn main() -> anyhow::Result<()> { dots_client::client::run().await }
