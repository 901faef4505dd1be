//! Non-blocking TCP ingress over epoll.
//!
//! One thread, one epoll instance. The server socket is watched
//! level-triggered; accepted client sockets are switched to non-blocking and
//! watched edge-triggered, so every readiness event drains the socket to
//! `WouldBlock`. Raw segments go straight into the hand-off queue; framing
//! is the dispatcher's job, this layer never inspects bytes.
//!
//! The wait call ticks at one second so a stop flag flip is observed
//! promptly even on an idle port.

use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use basalt_sched::BlockingQueue;
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::socket::{
    bind, getsockname, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag,
    SockType, SockaddrIn,
};
use thiserror::Error;
use tracing::{info, warn};

/// One raw TCP segment from one client session.
///
/// `client` is the session handle (the accepted socket's fd), unique for the
/// session's lifetime. An empty `bytes` marks session close so the consumer
/// can drop per-session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub client: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("socket creation failed: {0}")]
    Socket(Errno),

    #[error("bind to port {port} failed: {source}")]
    Bind { port: u16, source: Errno },

    #[error("listen failed: {0}")]
    Listen(Errno),

    #[error("invalid backlog size {0}")]
    Backlog(usize),

    #[error("epoll setup failed: {0}")]
    Epoll(Errno),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Marker for the server socket in epoll event data.
const SERVER: u64 = u64::MAX;

/// Poll tick, so the stop flag is observed at least once a second.
const WAIT_TICK_MS: u16 = 1000;

const READ_BUF_SIZE: usize = 4096;

/// The accept/read loop feeding the hand-off queue.
pub struct TcpIngress {
    listener: TcpListener,
    epoll: Epoll,
    queue: Arc<BlockingQueue<RawPacket>>,
    clients: HashMap<u64, TcpStream>,
    max_events: usize,
    port: u16,
}

impl TcpIngress {
    /// Bind to `port` on all interfaces with the given accept backlog and
    /// register the server socket for readiness. Pass port 0 to let the OS
    /// choose; the bound port is available via [`port`](Self::port).
    ///
    /// Bind failure is fatal for the process and surfaces here.
    pub fn new(
        port: u16,
        backlog: usize,
        max_events: usize,
        queue: Arc<BlockingQueue<RawPacket>>,
    ) -> Result<Self, NetError> {
        let fd = socket(
            AddressFamily::Inet,
            SockType::Stream,
            SockFlag::empty(),
            None,
        )
        .map_err(NetError::Socket)?;

        // Skip TIME_WAIT on restart.
        setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(NetError::Socket)?;

        let addr = SockaddrIn::new(0, 0, 0, 0, port);
        bind(fd.as_raw_fd(), &addr).map_err(|source| NetError::Bind { port, source })?;

        let backlog_arg =
            Backlog::new(backlog as i32).map_err(|_| NetError::Backlog(backlog))?;
        listen(&fd, backlog_arg).map_err(NetError::Listen)?;

        let bound: SockaddrIn = getsockname(fd.as_raw_fd()).map_err(NetError::Socket)?;

        let listener = TcpListener::from(fd);
        listener.set_nonblocking(true)?;

        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(NetError::Epoll)?;
        epoll
            .add(&listener, EpollEvent::new(EpollFlags::EPOLLIN, SERVER))
            .map_err(NetError::Epoll)?;

        info!(port = bound.port(), backlog, "gateway listening");

        Ok(Self {
            listener,
            epoll,
            queue,
            clients: HashMap::new(),
            max_events: max_events.max(1),
            port: bound.port(),
        })
    }

    /// Actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Event loop. Returns once `stop` is observed set; on the way out the
    /// notification facility and all sockets are closed, then the hand-off
    /// queue is closed so the downstream consumer drains and exits.
    pub fn run(mut self, stop: &AtomicBool) {
        let mut events = vec![EpollEvent::empty(); self.max_events];

        while !stop.load(Ordering::Acquire) {
            let count = match self.epoll.wait(&mut events, EpollTimeout::from(WAIT_TICK_MS)) {
                Ok(count) => count,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!(error = %e, "epoll wait failed");
                    break;
                }
            };

            for event in &events[..count] {
                if event.data() == SERVER {
                    self.accept_ready();
                } else {
                    self.read_ready(event.data());
                }
            }
        }

        info!("listener loop exiting");
        drop(self.epoll);
        drop(self.listener);
        self.clients.clear();
        self.queue.close();
    }

    /// Accept until the backlog is drained. Level-triggered on the server
    /// socket, but draining here keeps accept latency flat under bursts.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let handle = stream.as_raw_fd() as u64;
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(client = handle, error = %e, "failed to set non-blocking");
                        continue;
                    }
                    if let Err(e) = self.epoll.add(
                        &stream,
                        EpollEvent::new(EpollFlags::EPOLLIN | EpollFlags::EPOLLET, handle),
                    ) {
                        warn!(client = handle, error = %e, "failed to watch client");
                        continue;
                    }
                    info!(client = handle, %peer, "client connected");
                    self.clients.insert(handle, stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Drain one client socket. Edge-triggered registration means we must
    /// read to `WouldBlock` or risk never being woken for these bytes again.
    fn read_ready(&mut self, handle: u64) {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            let result = match self.clients.get_mut(&handle) {
                Some(stream) => stream.read(&mut buf),
                None => return,
            };
            match result {
                Ok(0) => {
                    self.drop_client(handle, "client disconnected");
                    return;
                }
                Ok(n) => {
                    // Raw segment; may be a fragment or several coalesced
                    // frames. The dispatcher owns framing.
                    if self
                        .queue
                        .push(RawPacket {
                            client: handle,
                            bytes: buf[..n].to_vec(),
                        })
                        .is_err()
                    {
                        // Queue closed under us: shutdown is in progress.
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(client = handle, error = %e, "read failed");
                    self.drop_client(handle, "read error");
                    return;
                }
            }
        }
    }

    /// Per-client failure policy: close and deregister this session only;
    /// the loop keeps serving everyone else.
    fn drop_client(&mut self, handle: u64, reason: &str) {
        if let Some(stream) = self.clients.remove(&handle) {
            let _ = self.epoll.delete(&stream);
            info!(client = handle, reason, "session closed");
        }
        // Zero-length marker lets the dispatcher discard session state.
        let _ = self.queue.push(RawPacket {
            client: handle,
            bytes: Vec::new(),
        });
    }
}
