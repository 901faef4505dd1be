//! Binary layout of the shared-memory ring.
//!
//! The segment is a header followed by a fixed array of slots:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ signature[32] │ session_uuid[37] │ pad                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ write_idx (u32, own cache line)                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │ read_idx  (u32, own cache line)                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │ capacity (u32) │ max_msg_size (u32)                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Slot[0] { len: u32, data: [u8; MAX_MSG_SIZE] }                │
//! │ Slot[1] ...                                                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! `write_idx` and `read_idx` are free-running 32-bit counters; the slot for
//! a given counter value is `counter % capacity`. Each index sits on its own
//! cache line so the producer and consumer never false-share. All multi-byte
//! values are host-endian; the segment is only ever shared within one
//! machine.

use std::mem::size_of;
use std::sync::atomic::AtomicU32;

use static_assertions::{const_assert, const_assert_eq};

/// Largest payload a single slot can carry, in bytes.
pub const MAX_MSG_SIZE: usize = 4096;

/// Slot count used when the caller does not specify one.
pub const DEFAULT_CAPACITY: u32 = 1024;

/// Length of a canonical hyphenated UUID string.
pub const UUID_LEN: usize = 36;

/// Magic stamped into every ring header, zero-padded to 32 bytes.
pub const SIGNATURE: [u8; 32] = signature_bytes(b"BASALT_IPC_RING_V1");

const fn signature_bytes(tag: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < tag.len() {
        out[i] = tag[i];
        i += 1;
    }
    out
}

/// Pads the wrapped value out to its own cache line.
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

/// Header at offset 0 of the segment.
///
/// `repr(C)` keeps field order; the aligned index wrappers land each counter
/// at the first 64-byte boundary past the preceding field, which is what the
/// published layout specifies (alignment-driven offsets, not byte packing).
#[repr(C)]
pub struct RingHeader {
    /// Must equal [`SIGNATURE`] for the segment to be considered a ring.
    pub signature: [u8; 32],
    /// NUL-terminated session UUID, rewritten on every producer start.
    pub session_uuid: [u8; 37],
    /// Count of slots published by the producer. Release-stored after the
    /// slot payload so a consumer's acquire-load observes the payload.
    pub write_idx: CacheAligned<AtomicU32>,
    /// Count of slots consumed. Release-stored by the consumer; the
    /// producer's acquire-load uses it for the fullness test.
    pub read_idx: CacheAligned<AtomicU32>,
    pub capacity: u32,
    pub max_msg_size: u32,
}

/// One fixed-size message cell.
#[repr(C)]
pub struct Slot {
    /// Bytes of `data` occupied by the current message.
    pub len: AtomicU32,
    pub data: [u8; MAX_MSG_SIZE],
}

/// Total segment size for a ring of `capacity` slots.
pub fn ring_bytes(capacity: u32) -> usize {
    size_of::<RingHeader>() + capacity as usize * size_of::<Slot>()
}

const_assert_eq!(size_of::<Slot>(), 4 + MAX_MSG_SIZE);
const_assert!(size_of::<RingHeader>() % 64 == 0);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of};

    #[test]
    fn header_field_offsets() {
        assert_eq!(offset_of!(RingHeader, signature), 0);
        assert_eq!(offset_of!(RingHeader, session_uuid), 32);
        // First cache-line boundary past the 69-byte prefix is 128; the
        // indices then occupy one line each.
        assert_eq!(offset_of!(RingHeader, write_idx), 128);
        assert_eq!(offset_of!(RingHeader, read_idx), 192);
        assert_eq!(offset_of!(RingHeader, write_idx) % 64, 0);
        assert_eq!(offset_of!(RingHeader, read_idx) % 64, 0);
        assert_eq!(align_of::<RingHeader>(), 64);
    }

    #[test]
    fn ring_bytes_scales_with_capacity() {
        let one = ring_bytes(1);
        let two = ring_bytes(2);
        assert_eq!(two - one, size_of::<Slot>());
        assert!(one > size_of::<RingHeader>());
    }

    #[test]
    fn signature_is_zero_padded() {
        assert!(SIGNATURE.starts_with(b"BASALT_IPC_RING_V1"));
        assert!(SIGNATURE[b"BASALT_IPC_RING_V1".len()..].iter().all(|&b| b == 0));
    }
}
