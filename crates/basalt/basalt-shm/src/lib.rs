//! POSIX named shared-memory segments.
//!
//! Thin wrapper over `shm_open`/`ftruncate`/`mmap` used by the IPC ring
//! buffer. The creating side owns sizing; the opening side maps whatever
//! size the segment already has. Unmapping happens on drop; unlinking is an
//! explicit decision left to the caller, because a crashed producer's stale
//! segment must survive long enough for session detection to reject it.

use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, OwnedFd};
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd;
use thiserror::Error;

/// Errors raised while creating, opening, or mapping a segment.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shm_open('{name}') failed: {source}")]
    Open { name: String, source: Errno },

    #[error("ftruncate('{name}') to {len} bytes failed: {source}")]
    Size {
        name: String,
        len: usize,
        source: Errno,
    },

    #[error("fstat('{name}') failed: {source}")]
    Stat { name: String, source: Errno },

    #[error("mmap('{name}') failed: {source}")]
    Map { name: String, source: Errno },

    #[error("segment '{name}' has zero length")]
    Empty { name: String },
}

/// A mapped POSIX shared-memory object.
///
/// Holds the file descriptor and the mapping for its whole lifetime; the
/// mapping is released on drop. Segment names follow POSIX rules and must
/// start with `/`.
#[derive(Debug)]
pub struct ShmSegment {
    _fd: OwnedFd,
    ptr: NonNull<libc::c_void>,
    len: usize,
    name: String,
}

// SAFETY: the mapping is a plain region of shared memory; concurrent access
// discipline is the caller's contract (the ring layer uses atomics for all
// cross-process fields).
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    /// Create a fresh segment of `len` bytes, replacing any stale segment of
    /// the same name left behind by a previous run.
    pub fn create(name: &str, len: usize) -> Result<Self, ShmError> {
        // A leftover name from a crashed owner would otherwise be reused with
        // its old contents.
        let _ = mman::shm_unlink(name);

        let fd = mman::shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o666),
        )
        .map_err(|source| ShmError::Open {
            name: name.to_string(),
            source,
        })?;

        unistd::ftruncate(&fd, len as libc::off_t).map_err(|source| ShmError::Size {
            name: name.to_string(),
            len,
            source,
        })?;

        Self::map(fd, len, name)
    }

    /// Map an existing segment at its current size.
    pub fn open(name: &str) -> Result<Self, ShmError> {
        let fd = mman::shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|source| {
            ShmError::Open {
                name: name.to_string(),
                source,
            }
        })?;

        let stat = nix::sys::stat::fstat(fd.as_raw_fd()).map_err(|source| ShmError::Stat {
            name: name.to_string(),
            source,
        })?;

        Self::map(fd, stat.st_size as usize, name)
    }

    fn map(fd: OwnedFd, len: usize, name: &str) -> Result<Self, ShmError> {
        let size = NonZeroUsize::new(len).ok_or_else(|| ShmError::Empty {
            name: name.to_string(),
        })?;

        // SAFETY: the fd refers to a freshly sized (create) or fstat'ed
        // (open) shared-memory object, so the whole range is mappable.
        let ptr = unsafe {
            mman::mmap(
                None,
                size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(|source| ShmError::Map {
            name: name.to_string(),
            source,
        })?;

        Ok(Self {
            _fd: fd,
            ptr,
            len,
            name: name.to_string(),
        })
    }

    /// Base of the mapping. The region is shared; mutation through this
    /// pointer must follow the cross-process synchronization protocol of
    /// whatever lives in the segment.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr() as *mut u8
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove a segment name from the system. Existing mappings stay valid
    /// until unmapped.
    pub fn unlink(name: &str) {
        let _ = mman::shm_unlink(name);
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping established in map().
        unsafe {
            let _ = mman::munmap(self.ptr, self.len);
        }
    }
}
