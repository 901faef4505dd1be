//! Consumer of the hand-off queue: reassembles FIX frames, parses them, and
//! forwards typed order envelopes to the sequencer ring.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use basalt_ipc::Producer;
use basalt_msg::{FieldId, IpcMessage, MsgType, Side, Tif};
use basalt_sched::BlockingQueue;
use gateway_core::fix::{parse_fix, FixFields, FrameAssembler};
use gateway_core::listener::RawPacket;
use tracing::{error, info, warn};

/// Price fields travel as fixed point with four decimal places.
const PRICE_SCALE: f64 = 10_000.0;

pub struct FixDispatcher {
    ingress: Arc<BlockingQueue<RawPacket>>,
    sequencer: Producer,
    /// Per-session reassembly buffers, keyed by client handle.
    sessions: HashMap<u64, FrameAssembler>,
    /// Clients that sent a Logon. No further session-layer handling yet.
    logged_on: HashSet<u64>,
    /// Monotonic order id; one dispatcher per process, so this is the
    /// process-wide counter.
    next_order_id: u64,
}

impl FixDispatcher {
    pub fn new(ingress: Arc<BlockingQueue<RawPacket>>, sequencer: Producer) -> Self {
        Self {
            ingress,
            sequencer,
            sessions: HashMap::new(),
            logged_on: HashSet::new(),
            next_order_id: 1,
        }
    }

    /// Main consumer loop: pop packets until the queue is closed and
    /// drained.
    pub fn run(mut self) {
        info!("fix dispatcher started");
        while let Some(packet) = self.ingress.pop() {
            self.on_packet(packet);
        }
        info!("ingress queue closed and drained, dispatcher exiting");
    }

    fn on_packet(&mut self, packet: RawPacket) {
        if packet.bytes.is_empty() {
            // Session-close marker from the listener.
            self.sessions.remove(&packet.client);
            self.logged_on.remove(&packet.client);
            return;
        }

        let frames = self
            .sessions
            .entry(packet.client)
            .or_default()
            .push(&packet.bytes);

        for frame in frames {
            self.dispatch(packet.client, &frame);
        }
    }

    fn dispatch(&mut self, client: u64, frame: &[u8]) {
        let text = String::from_utf8_lossy(frame);
        let fix = parse_fix(&text);

        if !fix.valid {
            warn!(client, "invalid or partial FIX message");
            return;
        }

        match fix.msg_type.as_str() {
            // New Order Single
            "D" => self.handle_new_order(client, &fix),
            // Logon
            "A" => {
                self.logged_on.insert(client);
                info!(client, "logon request");
            }
            other => warn!(client, msg_type = other, "unhandled FIX message type"),
        }
    }

    fn handle_new_order(&mut self, client: u64, fix: &FixFields) {
        let side = match fix.side.as_str() {
            "2" => Side::Sell,
            _ => Side::Buy,
        };
        let price = (fix.price * PRICE_SCALE) as i64;
        let order_id = self.next_order_id;
        self.next_order_id += 1;

        let mut msg = IpcMessage::new(MsgType::NewOrder);
        msg.add_str(FieldId::Symbol as u16, &fix.symbol);
        msg.add_u64(FieldId::Side as u16, side as u64);
        msg.add_i64(FieldId::Price as u16, price);
        msg.add_u64(FieldId::Qty as u16, fix.quantity as u64);
        // The TCP handle stands in for a client id; it is not stable across
        // disconnects. A real deployment maps SenderCompID (tag 49).
        msg.add_u64(FieldId::ClientId as u16, client);
        msg.add_u64(FieldId::OrderId as u16, order_id);
        msg.add_u64(FieldId::Tif as u16, Tif::Day as u64);

        if let Err(e) = msg.finalize() {
            error!(client, error = %e, "failed to finalize order envelope");
            return;
        }

        let mut wire = Vec::with_capacity(msg.encoded_len());
        msg.encode(&mut wire);

        if self.sequencer.write(&wire) {
            info!(
                client,
                order_id,
                symbol = %fix.symbol,
                side = side as u64,
                qty = fix.quantity,
                price,
                "order forwarded"
            );
        } else {
            // Dropped, not retried: back-pressure policy is the caller's
            // problem at a higher layer.
            error!(client, order_id, "sequencer ring full, dropping order");
        }
    }
}
