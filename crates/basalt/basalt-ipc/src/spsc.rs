//! Lock-free single-producer / single-consumer ring over a shared segment.
//!
//! The producer owns the segment lifecycle: creation replaces any stale
//! segment, stamps the signature and a fresh session UUID, and duplicates the
//! UUID into `/tmp/<queue>.uuid`. A consumer maps the existing segment and
//! refuses to attach when the header UUID and the side-channel file disagree,
//! which is how a reader discovers it is looking at the corpse of a crashed
//! session.
//!
//! # Index protocol
//!
//! The producer release-stores `write_idx + 1` after the slot payload and
//! length are in place; the consumer's acquire-load of `write_idx` therefore
//! observes the complete payload. The mirror holds for `read_idx`. Counters
//! are free-running u32s; the fullness test `write - read >= capacity` is
//! correct across wraparound because the subtraction wraps too, provided
//! capacity stays below 2^31.

use std::mem::size_of;
use std::ptr;
use std::sync::atomic::Ordering;

use basalt_shm::{ShmError, ShmSegment};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::layout::{ring_bytes, RingHeader, Slot, MAX_MSG_SIZE, SIGNATURE, UUID_LEN};
use crate::lock::{LockError, Role, RoleLock};

#[derive(Debug, Error)]
pub enum IpcError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Shm(#[from] ShmError),

    #[error("queue '{queue}' does not carry the ring signature")]
    BadSignature { queue: String },

    #[error("stale session on queue '{queue}': segment is {header_uuid}, expected {file_uuid}")]
    StaleSession {
        queue: String,
        header_uuid: String,
        file_uuid: String,
    },

    #[error("segment for queue '{queue}' is smaller than its declared layout")]
    Truncated { queue: String },

    #[error("cannot access session uuid file '{path}'")]
    UuidFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ring capacity {0} must be in 1..2^31")]
    InvalidCapacity(u32),
}

fn segment_name(queue: &str) -> String {
    format!("/{queue}")
}

fn uuid_path(queue: &str) -> String {
    format!("/tmp/{queue}.uuid")
}

fn header_uuid(header: &RingHeader) -> String {
    let raw = &header.session_uuid;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Writing side of the ring. At most one per queue name, enforced by the
/// producer role lock.
pub struct Producer {
    seg: ShmSegment,
    _lock: RoleLock,
    queue: String,
}

impl Producer {
    /// Create the ring segment for `queue`, discarding any previous segment
    /// of the same name.
    ///
    /// The role lock is taken before the old segment is unlinked so that a
    /// losing producer fails with [`IpcError::Lock`] without touching the
    /// live ring.
    pub fn create(queue: &str, capacity: u32) -> Result<Self, IpcError> {
        if capacity == 0 || capacity >= 1 << 31 {
            return Err(IpcError::InvalidCapacity(capacity));
        }

        let lock = RoleLock::acquire(queue, Role::Producer)?;
        let seg = ShmSegment::create(&segment_name(queue), ring_bytes(capacity))?;

        let session = Uuid::new_v4().to_string();
        debug_assert_eq!(session.len(), UUID_LEN);

        // SAFETY: the segment was just created at ring_bytes(capacity), so
        // the header region is valid and exclusively ours until the uuid
        // file below announces the session.
        unsafe {
            let base = seg.as_ptr();
            ptr::write_bytes(base, 0, size_of::<RingHeader>());
            let header = &mut *(base as *mut RingHeader);
            header.signature = SIGNATURE;
            header.session_uuid[..session.len()].copy_from_slice(session.as_bytes());
            header.capacity = capacity;
            header.max_msg_size = MAX_MSG_SIZE as u32;
        }

        let path = uuid_path(queue);
        std::fs::write(&path, &session).map_err(|source| IpcError::UuidFile { path, source })?;

        debug!(queue, session = %session, capacity, "ring producer created");

        Ok(Self {
            seg,
            _lock: lock,
            queue: queue.to_string(),
        })
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: create() validated the segment size and initialized the
        // header.
        unsafe { &*(self.seg.as_ptr() as *const RingHeader) }
    }

    #[inline]
    fn slot_ptr(&self, idx: u32) -> *mut Slot {
        // SAFETY: idx is always reduced modulo capacity by the caller.
        unsafe { (self.seg.as_ptr().add(size_of::<RingHeader>()) as *mut Slot).add(idx as usize) }
    }

    /// Publish one message. Returns `false` when the message exceeds the
    /// slot size or the ring is full; a full ring is ordinary back-pressure,
    /// not an error, so nothing is logged here.
    pub fn write(&mut self, data: &[u8]) -> bool {
        let header = self.header();
        if data.len() > header.max_msg_size as usize {
            return false;
        }

        let write = header.write_idx.0.load(Ordering::Relaxed);
        let read = header.read_idx.0.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= header.capacity {
            return false;
        }

        let slot = self.slot_ptr(write % header.capacity);
        // SAFETY: the fullness test above guarantees the consumer is not
        // reading this slot; data.len() was bounded by max_msg_size.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), (*slot).data.as_mut_ptr(), data.len());
            (*slot).len.store(data.len() as u32, Ordering::Relaxed);
        }

        // Commit: everything stored above becomes visible to the consumer's
        // acquire-load of write_idx.
        header
            .write_idx
            .0
            .store(write.wrapping_add(1), Ordering::Release);
        true
    }

    pub fn session_uuid(&self) -> String {
        header_uuid(self.header())
    }

    pub fn capacity(&self) -> u32 {
        self.header().capacity
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// Reading side of the ring. At most one per queue name, enforced by the
/// consumer role lock.
pub struct Consumer {
    seg: ShmSegment,
    _lock: RoleLock,
    queue: String,
}

impl Consumer {
    /// Attach to an existing ring, validating the signature and the session
    /// UUID against the producer's side-channel file.
    pub fn open(queue: &str) -> Result<Self, IpcError> {
        let lock = RoleLock::acquire(queue, Role::Consumer)?;
        let seg = ShmSegment::open(&segment_name(queue))?;

        if seg.len() < size_of::<RingHeader>() {
            return Err(IpcError::Truncated {
                queue: queue.to_string(),
            });
        }

        // SAFETY: length was checked to cover the header.
        let header = unsafe { &*(seg.as_ptr() as *const RingHeader) };

        if header.signature != SIGNATURE {
            return Err(IpcError::BadSignature {
                queue: queue.to_string(),
            });
        }
        if seg.len() < ring_bytes(header.capacity) {
            return Err(IpcError::Truncated {
                queue: queue.to_string(),
            });
        }

        let session = header_uuid(header);
        let path = uuid_path(queue);
        let expected = std::fs::read_to_string(&path)
            .map_err(|source| IpcError::UuidFile { path, source })?;
        let expected = expected.trim();

        if session != expected {
            return Err(IpcError::StaleSession {
                queue: queue.to_string(),
                header_uuid: session,
                file_uuid: expected.to_string(),
            });
        }

        debug!(queue, session = %session, "ring consumer attached");

        Ok(Self {
            seg,
            _lock: lock,
            queue: queue.to_string(),
        })
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: open() validated size and signature.
        unsafe { &*(self.seg.as_ptr() as *const RingHeader) }
    }

    #[inline]
    fn slot_ptr(&self, idx: u32) -> *const Slot {
        // SAFETY: idx is always reduced modulo capacity by the caller.
        unsafe { (self.seg.as_ptr().add(size_of::<RingHeader>()) as *const Slot).add(idx as usize) }
    }

    /// Pop the next message into `buf`, returning the number of bytes
    /// delivered, or 0 when the ring is empty.
    ///
    /// A message longer than `buf` is silently truncated to `buf.len()`; the
    /// caller is expected to size the buffer at [`MAX_MSG_SIZE`].
    pub fn read(&mut self, buf: &mut [u8]) -> u32 {
        let header = self.header();
        let read = header.read_idx.0.load(Ordering::Relaxed);
        let write = header.write_idx.0.load(Ordering::Acquire);
        // Equality means drained; the counters wrap, so an ordered
        // comparison would misfire past 2^32 messages.
        if read == write {
            return 0;
        }

        let slot = self.slot_ptr(read % header.capacity);
        // SAFETY: the index test above means the producer has published this
        // slot and will not touch it again until read_idx advances past it.
        let len = unsafe { (*slot).len.load(Ordering::Relaxed) };
        let n = len.min(header.max_msg_size).min(buf.len() as u32);
        unsafe {
            ptr::copy_nonoverlapping((*slot).data.as_ptr(), buf.as_mut_ptr(), n as usize);
        }

        header
            .read_idx
            .0
            .store(read.wrapping_add(1), Ordering::Release);
        n
    }

    pub fn session_uuid(&self) -> String {
        header_uuid(self.header())
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}
