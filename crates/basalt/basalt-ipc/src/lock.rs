//! Scoped advisory file locks enforcing one producer and one consumer per
//! queue name.
//!
//! Each role locks its own file (`/tmp/<queue>.prod.lock` or
//! `/tmp/<queue>.cons.lock`) with a non-blocking exclusive `flock`, so
//! producers only contend with producers and consumers with consumers. The
//! lock is released when the guard drops. The lock file itself is never
//! unlinked: another process may be racing to open the same path, and
//! unlinking would let both sides lock different inodes.

use std::fs::{File, OpenOptions};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;

/// Which side of the queue a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    fn suffix(self) -> &'static str {
        match self {
            Role::Producer => ".prod.lock",
            Role::Consumer => ".cons.lock",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{role} role already held for '{path}'")]
    AlreadyHeld { role: &'static str, path: String },

    #[error("failed to open lock file '{path}'")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("flock('{path}') failed: {source}")]
    Os { path: String, source: Errno },
}

/// Holds an exclusive role lock until dropped.
#[derive(Debug)]
pub struct RoleLock {
    _lock: Flock<File>,
    path: String,
}

impl RoleLock {
    /// Acquire the lock for `role` on `queue`, failing immediately if another
    /// process already holds it.
    pub fn acquire(queue: &str, role: Role) -> Result<Self, LockError> {
        let path = format!("/tmp/{queue}{}", role.suffix());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Self { _lock: lock, path }),
            Err((_, Errno::EWOULDBLOCK)) => Err(LockError::AlreadyHeld {
                role: role.label(),
                path,
            }),
            Err((_, source)) => Err(LockError::Os { path, source }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_queue(tag: &str) -> String {
        format!("basalt_lock_{tag}_{}", std::process::id())
    }

    #[test]
    fn same_role_is_exclusive() {
        let queue = unique_queue("excl");
        let held = RoleLock::acquire(&queue, Role::Producer).expect("first lock");
        let err = RoleLock::acquire(&queue, Role::Producer).unwrap_err();
        assert!(matches!(err, LockError::AlreadyHeld { role: "producer", .. }));
        drop(held);

        // Released on drop, so a fresh acquisition succeeds.
        RoleLock::acquire(&queue, Role::Producer).expect("relock after drop");
    }

    #[test]
    fn roles_do_not_contend() {
        let queue = unique_queue("roles");
        let _prod = RoleLock::acquire(&queue, Role::Producer).expect("producer");
        let _cons = RoleLock::acquire(&queue, Role::Consumer).expect("consumer");
    }
}
