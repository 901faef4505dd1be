//! `sequencer-engine`: consumes order envelopes from the gateway's ring.
//!
//! Sequencing proper (stamping `seq_no`, forwarding to the matching engine
//! queue) belongs to the downstream stage; this engine owns the ring
//! attachment, the decode step, and the poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use basalt_ipc::{Consumer, IpcError, MAX_MSG_SIZE};
use basalt_msg::{FieldId, IpcMessage, MsgType};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error(transparent)]
    Ipc(#[from] IpcError),
}

pub struct SequencerEngine {
    gateway_queue: Consumer,
    buf: Vec<u8>,
}

impl SequencerEngine {
    /// Attach to the gateway's ring. Fails with a stale-session error when
    /// the segment belongs to a dead producer generation.
    pub fn connect(queue: &str) -> Result<Self, SequencerError> {
        let gateway_queue = Consumer::open(queue)?;
        info!(queue, session = %gateway_queue.session_uuid(), "sequencer attached to gateway queue");
        Ok(Self {
            gateway_queue,
            buf: vec![0u8; MAX_MSG_SIZE],
        })
    }

    /// Poll until `stop` is set, sleeping briefly whenever the ring is
    /// drained.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!("sequencer consumer loop started");
        while !stop.load(Ordering::Acquire) {
            if self.poll() == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        info!("sequencer consumer loop exiting");
    }

    /// Drain currently available envelopes; returns how many were handled.
    pub fn poll(&mut self) -> usize {
        let mut count = 0;
        loop {
            let n = self.gateway_queue.read(&mut self.buf);
            if n == 0 {
                return count;
            }
            match IpcMessage::decode(&self.buf[..n as usize]) {
                Some(msg) => self.on_message(&msg),
                None => warn!(len = n, "undecodable envelope, skipping"),
            }
            count += 1;
        }
    }

    fn on_message(&self, msg: &IpcMessage) {
        match msg.msg_type() {
            Some(MsgType::NewOrder) => {
                info!(
                    symbol = msg.get_str(FieldId::Symbol as u16).unwrap_or(""),
                    side = msg.get_u64(FieldId::Side as u16).unwrap_or_default(),
                    price = msg.get_i64(FieldId::Price as u16).unwrap_or_default(),
                    qty = msg.get_u64(FieldId::Qty as u16).unwrap_or_default(),
                    client_id = msg.get_u64(FieldId::ClientId as u16).unwrap_or_default(),
                    order_id = msg.get_u64(FieldId::OrderId as u16).unwrap_or_default(),
                    "order received"
                );
            }
            Some(other) => info!(msg_type = ?other, "message received"),
            None => warn!(raw_type = msg.header().msg_type, "unknown message type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_ipc::Producer;
    use basalt_msg::{MsgType, Side, Tif};

    fn unique_queue(tag: &str) -> String {
        format!("seq_engine_{tag}_{}", std::process::id())
    }

    fn order_wire(symbol: &str, qty: u64) -> Vec<u8> {
        let mut msg = IpcMessage::new(MsgType::NewOrder);
        msg.add_str(FieldId::Symbol as u16, symbol);
        msg.add_u64(FieldId::Side as u16, Side::Buy as u64);
        msg.add_i64(FieldId::Price as u16, 1_505_000);
        msg.add_u64(FieldId::Qty as u16, qty);
        msg.add_u64(FieldId::Tif as u16, Tif::Day as u64);
        msg.finalize().expect("finalize");
        let mut wire = Vec::new();
        msg.encode(&mut wire);
        wire
    }

    #[test]
    fn poll_drains_available_envelopes() {
        let queue = unique_queue("poll");
        let mut producer = Producer::create(&queue, 64).expect("producer");
        let mut engine = SequencerEngine::connect(&queue).expect("connect");

        assert_eq!(engine.poll(), 0);

        assert!(producer.write(&order_wire("AAPL", 100)));
        assert!(producer.write(&order_wire("MSFT", 200)));
        assert_eq!(engine.poll(), 2);
        assert_eq!(engine.poll(), 0);
    }

    #[test]
    fn poll_skips_undecodable_payload() {
        let queue = unique_queue("junk");
        let mut producer = Producer::create(&queue, 64).expect("producer");
        let mut engine = SequencerEngine::connect(&queue).expect("connect");

        assert!(producer.write(b"not an envelope"));
        assert!(producer.write(&order_wire("GOOG", 10)));
        // Both slots are consumed; only one decodes.
        assert_eq!(engine.poll(), 2);
    }

    #[test]
    fn connect_to_missing_queue_fails() {
        assert!(SequencerEngine::connect("seq_engine_never_created").is_err());
    }
}
