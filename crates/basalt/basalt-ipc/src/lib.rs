//! `basalt-ipc`: shared-memory SPSC ring buffer for cross-process messaging.
//!
//! One producer process creates a named POSIX segment laid out as a header
//! plus fixed-size slots, and one consumer process maps it. Role exclusivity
//! is enforced with advisory file locks, and a per-session UUID (stamped in
//! the header and mirrored to a `/tmp` side-channel file) lets a consumer
//! reject segments orphaned by a crashed producer.
//!
//! ```text
//! ┌──────────┐    named shm segment     ┌──────────┐
//! │ Producer │ ───────────────────────▶ │ Consumer │
//! │ (writes) │  [header][slot][slot]…   │ (reads)  │
//! └──────────┘                          └──────────┘
//!   /tmp/<q>.prod.lock                    /tmp/<q>.cons.lock
//!             └────── /tmp/<q>.uuid ──────┘
//! ```

mod layout;
mod lock;
mod spsc;

pub use layout::{
    ring_bytes, CacheAligned, RingHeader, Slot, DEFAULT_CAPACITY, MAX_MSG_SIZE, SIGNATURE,
};
pub use lock::{LockError, Role, RoleLock};
pub use spsc::{Consumer, IpcError, Producer};
