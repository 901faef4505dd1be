use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sequencer_config::SequencerConfig;
use sequencer_engine::SequencerEngine;
use tracing::{error, info, warn};
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

    if let Some(port) = std::env::args().nth(1) {
        info!(port, "positional port argument is informational only");
    }

    let path = config_path();
    let config = match SequencerConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(path, error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(?config, "sequencer starting");

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&stop)) {
            error!(error = %e, "failed to register signal handler");
            return ExitCode::FAILURE;
        }
    }

    // Safety net: once a shutdown signal lands, leave within three seconds
    // even if the poll loop wedges.
    let stop_watch = Arc::clone(&stop);
    std::thread::spawn(move || {
        while !stop_watch.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(100));
        }
        std::thread::sleep(Duration::from_secs(3));
        warn!("forced exit after shutdown timeout");
        std::process::exit(0);
    });

    let mut engine = match SequencerEngine::connect(&config.sequencer_queue) {
        Ok(engine) => engine,
        Err(e) => {
            // Typical causes: the gateway has not started yet, or the
            // segment belongs to a crashed session (stale uuid).
            error!(queue = %config.sequencer_queue, error = %e, "failed to attach");
            return ExitCode::FAILURE;
        }
    };

    engine.run(&stop);
    info!("sequencer exiting");
    ExitCode::SUCCESS
}
