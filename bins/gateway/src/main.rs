use std::process::ExitCode;

use gateway_config::GatewayConfig;
use gateway_engine::Gateway;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn config_path() -> String {
    std::env::var("EXCHANGE_CONFIG").unwrap_or_else(|_| "config.xml".to_string())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // An optional positional port is accepted for operator convenience but
    // the XML configuration is authoritative.
    if let Some(port) = std::env::args().nth(1) {
        info!(port, "positional port argument is informational only");
    }

    let path = config_path();
    let config = match GatewayConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(path, error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(?config, "gateway starting");

    match Gateway::new("Gateway", config).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}
