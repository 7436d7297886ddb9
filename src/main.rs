// =============================================================================
// Funding-rate arbitrage engine — entry point
// =============================================================================
//
// Starts Paused: an operator must flip `trading_mode` to `Live` in the
// config file before the worker will submit real orders.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aurora_funding_arb::config::EngineConfig;
use aurora_funding_arb::venue::paper::PaperVenue;
use aurora_funding_arb::worker::Worker;

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("funding-rate arbitrage engine starting");

    let config = match EngineConfig::load(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, path = CONFIG_PATH, "no usable config found, starting from defaults");
            EngineConfig::default()
        }
    };
    config.validate()?;

    // The concrete venue adapter (HMAC-signed REST client, websocket feed)
    // is out of scope for this crate; the paper venue is what every
    // component is built and tested against.
    let venue = Arc::new(PaperVenue::new());

    let worker = Worker::new(config.clone(), venue);
    worker.run().await;

    if let Err(e) = config.save(CONFIG_PATH) {
        warn!(error = %e, "failed to persist engine config on shutdown");
    }

    info!("funding-rate arbitrage engine stopped");
    Ok(())
}
