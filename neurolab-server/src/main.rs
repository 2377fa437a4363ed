//! NeuroLab relay server.
//!
//! Reads its configuration from the environment (`PORT`, `NEUROLAB_HOST`,
//! `NEUROLAB_OUTBOUND_CAPACITY`, `NEUROLAB_JOIN_NOTICE`,
//! `NEUROLAB_REQUEST_REFRESH`) and serves until the listener fails.
//! Log verbosity follows `RUST_LOG`, defaulting to `info`.

use log::info;
use neurolab_collab::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env()?;
    info!(
        "Starting NeuroLab relay on {} (join notice: {}, refresh requests: {})",
        config.bind_addr, config.join_notice, config.request_state_refresh
    );

    RelayServer::new(config).run().await
}
