//! `gateway-engine`: the FIX gateway process: dispatcher, supervisor, and
//! shutdown choreography.
//!
//! Data path: TCP clients → [`TcpIngress`](gateway_core::TcpIngress) →
//! hand-off queue → [`FixDispatcher`] → envelope → sequencer ring.

mod dispatcher;
mod gateway;

pub use dispatcher::FixDispatcher;
pub use gateway::{Gateway, GatewayError, GatewayScheduler};
