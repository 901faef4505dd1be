//! `basalt-msg`: the typed tag-length-value envelope carried over the ring.
//!
//! One message is a packed [`MsgHeader`] followed by a flat run of
//! `[FieldHeader][value bytes]` records:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ MsgHeader        (16 B)  │  msg_type, field_count, payload_len, seq_no
//! ├──────────────────────────┤
//! │ FieldHeader       (7 B)  │  field_id=SYMBOL, type=STR, value_len=4
//! │ "AAPL"                   │
//! ├──────────────────────────┤
//! │ FieldHeader       (7 B)  │  field_id=SIDE, type=U64, value_len=8
//! │ 0u64                     │
//! └──────────────────────────┘
//! ```
//!
//! Numeric values are host-endian: the envelope never leaves the machine, it
//! only crosses a process boundary through shared memory. A network-facing
//! variant would need byte-swapping at this layer.

mod envelope;

pub use envelope::{EnvelopeError, FieldValue, IpcMessage};

/// Message type discriminants carried in [`MsgHeader::msg_type`].
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    None = 0,
    /// A client is submitting a new order.
    NewOrder = 1,
    /// A client wants to cancel a resting order.
    Cancel = 2,
    /// A trade occurred.
    Trade = 3,
    /// Incremental change to the order book.
    BookDelta = 4,
}

impl MsgType {
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::NewOrder),
            2 => Some(Self::Cancel),
            3 => Some(Self::Trade),
            4 => Some(Self::BookDelta),
            _ => None,
        }
    }
}

/// Wire encoding of a field's value type.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    I64 = 1,
    U64 = 2,
    F64 = 3,
    Str = 4,
    Bytes = 5,
}

impl FieldType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::I64),
            2 => Some(Self::U64),
            3 => Some(Self::F64),
            4 => Some(Self::Str),
            5 => Some(Self::Bytes),
            _ => None,
        }
    }
}

/// Well-known field identifiers.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldId {
    Symbol = 1,
    /// 0 = buy, 1 = sell.
    Side = 2,
    /// Fixed point, four decimal places.
    Price = 3,
    Qty = 4,
    ClientId = 5,
    OrderId = 6,
    Tif = 7,
}

/// Order side as encoded in the SIDE field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

/// Time-in-force as encoded in the TIF field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tif {
    #[default]
    Day = 0,
    AllOrNone = 1,
    ImmediateOrCancel = 2,
    FillOrKill = 3,
    GoodTillCancel = 4,
}

/// Size of the packed message header on the wire.
pub const MSG_HEADER_SIZE: usize = 16;

/// Size of the packed per-field header on the wire.
pub const FIELD_HEADER_SIZE: usize = 7;

/// Packed message header.
///
/// `seq_no` is written as 0 by the gateway; the sequencer owns assignment
/// downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHeader {
    pub msg_type: u16,
    pub field_count: u16,
    pub payload_len: u32,
    pub seq_no: u64,
}

impl MsgHeader {
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.msg_type.to_ne_bytes());
        out.extend_from_slice(&self.field_count.to_ne_bytes());
        out.extend_from_slice(&self.payload_len.to_ne_bytes());
        out.extend_from_slice(&self.seq_no.to_ne_bytes());
    }

    pub(crate) fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < MSG_HEADER_SIZE {
            return None;
        }
        Some(Self {
            msg_type: u16::from_ne_bytes(data[0..2].try_into().ok()?),
            field_count: u16::from_ne_bytes(data[2..4].try_into().ok()?),
            payload_len: u32::from_ne_bytes(data[4..8].try_into().ok()?),
            seq_no: u64::from_ne_bytes(data[8..16].try_into().ok()?),
        })
    }
}
