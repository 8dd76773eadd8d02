//! Mirror proxy server entry point
//!
//! Loads configuration, sets up logging, and runs the intercepting listener.
//!
//! ```bash
//! # Start with default config (mirror_proxy.yaml)
//! cargo run
//!
//! # Start with a custom config
//! cargo run -- /path/to/config.yaml
//! ```

use anyhow::Context;
use mirror_proxy::ProxyConfig;
use std::env;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let config_path = env::args().nth(1);
    let config = match &config_path {
        Some(path) => {
            info!(path = %path, "loading configuration");
            ProxyConfig::from_file(path)
                .with_context(|| format!("failed to load configuration from {}", path))?
        }
        None => {
            info!("no config file given, using defaults");
            ProxyConfig::default()
        }
    };

    info!(
        listen_port = config.listen_port,
        mirror_host = %config.mirror.host,
        mirror_port = config.mirror.port,
        "starting mirror proxy"
    );

    mirror_proxy::server::run(config)
        .await
        .context("proxy server exited")?;
    Ok(())
}
