//! Gateway supervisor: component construction, worker wiring, and
//! signal-driven shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use basalt_ipc::{IpcError, Producer, DEFAULT_CAPACITY};
use basalt_sched::{BlockingQueue, Scheduler, SchedulerError};
use gateway_config::GatewayConfig;
use gateway_core::listener::{NetError, RawPacket, TcpIngress};
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatcher::FixDispatcher;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("failed to register signal handler")]
    Signals(#[source] std::io::Error),
}

/// Owns the two gateway workers and the network stop flag.
///
/// Worker names derive from the process name: `<name>_listener` runs the
/// epoll loop, `<name>_dispatcher` runs the FIX dispatcher.
pub struct GatewayScheduler {
    inner: Scheduler,
    listener_id: String,
    dispatcher_id: String,
    stop_network: Arc<AtomicBool>,
}

impl GatewayScheduler {
    pub fn new(prefix: &str) -> Result<Self, SchedulerError> {
        let inner = Scheduler::new();
        let listener_id = format!("{prefix}_listener");
        let dispatcher_id = format!("{prefix}_dispatcher");
        inner.create_worker(&listener_id)?;
        inner.create_worker(&dispatcher_id)?;
        Ok(Self {
            inner,
            listener_id,
            dispatcher_id,
            stop_network: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag the listener polls once per tick; setting it begins shutdown.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_network)
    }

    /// Start both workers and hand them their loops.
    pub fn start(
        &self,
        ingress: TcpIngress,
        dispatcher: FixDispatcher,
    ) -> Result<(), SchedulerError> {
        self.inner.start();

        let stop = Arc::clone(&self.stop_network);
        self.inner.submit_to(
            &self.listener_id,
            move |_token| ingress.run(&stop),
            "accept client sessions and queue raw packets",
        )?;

        self.inner.submit_to(
            &self.dispatcher_id,
            move |_token| dispatcher.run(),
            "parse FIX frames and forward orders to the sequencer",
        )?;

        info!("gateway loops submitted to workers");
        Ok(())
    }

    /// Stop the network loop, give both loops a drain window, then join the
    /// workers. The listener closes the hand-off queue on its way out, which
    /// in turn lets the dispatcher drain and exit.
    pub fn shutdown(&self, drain: Duration) {
        info!("initiating gateway shutdown");
        self.stop_network.store(true, Ordering::Release);
        std::thread::sleep(drain);
        self.inner.shutdown();
        info!("gateway shutdown complete");
    }
}

/// Top-level gateway process object.
pub struct Gateway {
    name: String,
    config: GatewayConfig,
    shutdown_requested: Arc<AtomicBool>,
}

impl Gateway {
    pub fn new(name: &str, config: GatewayConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Construct every component, run until a shutdown signal arrives, then
    /// tear down. Construction failures (bind, ring, locks) bubble up and
    /// are fatal.
    pub fn run(&self) -> Result<(), GatewayError> {
        info!(name = %self.name, "launching gateway");
        self.register_signal_handlers()?;

        let ingress_queue: Arc<BlockingQueue<RawPacket>> =
            Arc::new(BlockingQueue::new(self.config.blocking_queue_size));

        let sequencer = Producer::create(&self.config.sequencer_queue, DEFAULT_CAPACITY)?;
        let ingress = TcpIngress::new(
            self.config.port,
            self.config.backlog_size,
            self.config.max_event_size,
            Arc::clone(&ingress_queue),
        )?;
        let dispatcher = FixDispatcher::new(ingress_queue, sequencer);

        let scheduler = GatewayScheduler::new(&self.name)?;
        scheduler.start(ingress, dispatcher)?;

        info!("gateway is running");
        while !self.shutdown_requested.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(100));
        }

        // Safety net: if the graceful path wedges, leave anyway.
        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_secs(3));
            warn!("forced exit after shutdown timeout");
            std::process::exit(0);
        });

        scheduler.shutdown(Duration::from_secs(2));
        Ok(())
    }

    /// SIGINT / SIGTERM flip the shutdown flag; the main wait loop notices
    /// within its 100 ms poll.
    fn register_signal_handlers(&self) -> Result<(), GatewayError> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.shutdown_requested))
                .map_err(GatewayError::Signals)?;
        }
        info!("signal handlers registered (Ctrl+C to shutdown)");
        Ok(())
    }

    /// Programmatic shutdown, equivalent to receiving a signal.
    pub fn stop(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }
}
