use crate::error::{ServerError, ServerResult};
use std::fmt;
use std::io::{self, ErrorKind};
use std::ops::BitOr;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Default size of the event buffer handed to `epoll_wait`.
pub const DEFAULT_MAX_EVENTS: usize = 512;

/// A set of readiness conditions to register for
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    /// Peer closed its write half
    pub const HANGUP: Interest = Interest(libc::EPOLLRDHUP as u32);
    /// Edge-triggered delivery
    pub const EDGE: Interest = Interest(libc::EPOLLET as u32);
    /// Disable the descriptor after one event until re-armed with `modify`
    pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);

    pub const fn empty() -> Interest {
        Interest(0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Interest::READABLE, "READABLE"),
            (Interest::WRITABLE, "WRITABLE"),
            (Interest::HANGUP, "HANGUP"),
            (Interest::EDGE, "EDGE"),
            (Interest::ONESHOT, "ONESHOT"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Interest({})", set.join(" | "))
    }
}

/// A readiness notification for one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub mask: u32,
}

impl Event {
    pub fn is_readable(&self) -> bool {
        self.mask & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.mask & libc::EPOLLOUT as u32 != 0
    }

    /// Peer hangup or socket error
    pub fn is_hangup(&self) -> bool {
        self.mask & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

struct Epoll {
    fd: RawFd,
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Handle for changing registrations.
///
/// `epoll_ctl` is synchronized by the kernel, so clones of the registry may
/// be used from worker threads to re-arm oneshot descriptors while the
/// reactor is blocked in [`Poller::poll`].
#[derive(Clone)]
pub struct Registry {
    epoll: Arc<Epoll>,
}

impl Registry {
    /// Start watching `fd`
    pub fn register(&self, fd: RawFd, interest: Interest) -> ServerResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    /// Replace the interest set of `fd`; this is how oneshot registrations are re-armed
    pub fn modify(&self, fd: RawFd, interest: Interest) -> ServerResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    /// Stop watching `fd`
    pub fn deregister(&self, fd: RawFd) -> ServerResult<()> {
        if fd < 0 {
            return Err(ServerError::EventLoop(format!("Invalid descriptor {}", fd)));
        }

        let ret = unsafe {
            libc::epoll_ctl(
                self.epoll.fd,
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };

        if ret < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }

        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> ServerResult<()> {
        if fd < 0 {
            return Err(ServerError::EventLoop(format!("Invalid descriptor {}", fd)));
        }

        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: fd as u64,
        };

        let ret = unsafe { libc::epoll_ctl(self.epoll.fd, op, fd, &mut event as *mut _) };

        if ret < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }

        Ok(())
    }
}

/// Owner of the epoll event buffer; lives on the reactor thread
pub struct Poller {
    epoll: Arc<Epoll>,
    events: Vec<libc::epoll_event>,
}

impl Poller {
    /// Create a new poller reporting at most `max_events` events per call
    pub fn new(max_events: usize) -> ServerResult<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }

        let events = vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)];

        Ok(Self {
            epoll: Arc::new(Epoll { fd }),
            events,
        })
    }

    pub fn registry(&self) -> Registry {
        Registry {
            epoll: self.epoll.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    /// Wait for readiness.
    ///
    /// A negative timeout blocks until something is ready, zero returns
    /// immediately. An interrupted wait yields no events.
    pub fn poll(&mut self, timeout_ms: i32) -> ServerResult<Vec<Event>> {
        let num_events = unsafe {
            libc::epoll_wait(
                self.epoll.fd,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };

        if num_events < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != ErrorKind::Interrupted {
                return Err(ServerError::Io(err));
            }
            return Ok(Vec::new());
        }

        let result = self.events[..num_events as usize]
            .iter()
            .map(|event| Event {
                fd: event.u64 as RawFd,
                mask: event.events,
            })
            .collect();

        Ok(result)
    }
}
