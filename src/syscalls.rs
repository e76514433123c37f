//! Thin safe wrappers over the Linux primitives the reactor is built on:
//! SO_REUSEPORT listeners, edge-triggered epoll, eventfd, timerfd and
//! signalfd. Everything returns `std::io::Error` mapped from errno.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::ptr;

use libc::{c_int, c_void, socklen_t};

pub type RawFd = c_int;

pub const READABLE: u32 = libc::EPOLLIN as u32;
pub const WRITABLE: u32 = libc::EPOLLOUT as u32;
pub const HANGUP: u32 = (libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) as u32;

pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

// ---- Listening socket ----

/// A non-blocking TCP listener bound with SO_REUSEADDR + SO_REUSEPORT so
/// every shard binds the same port and the kernel distributes accepts.
pub struct Listener {
    fd: RawFd,
}

impl Listener {
    pub fn bind(port: u16) -> io::Result<Self> {
        unsafe {
            let fd = libc::socket(
                libc::AF_INET,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            );
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            let one: c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const c_void,
                mem::size_of_val(&one) as socklen_t,
            );
            if libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &one as *const _ as *const c_void,
                mem::size_of_val(&one) as socklen_t,
            ) < 0
            {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            // TCP_NODELAY on the listener is inherited by accepted sockets.
            libc::setsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_NODELAY,
                &one as *const _ as *const c_void,
                mem::size_of_val(&one) as socklen_t,
            );

            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: port.to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(Ipv4Addr::UNSPECIFIED.octets()),
                },
                sin_zero: [0; 8],
            };
            if libc::bind(
                fd,
                &sin as *const _ as *const libc::sockaddr,
                mem::size_of_val(&sin) as socklen_t,
            ) < 0
            {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            if libc::listen(fd, 8192) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            Ok(Self { fd })
        }
    }

    pub fn raw(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        close_fd(self.fd);
    }
}

/// Accept one pending connection, non-blocking. `None` means the accept
/// queue is drained (EAGAIN).
pub fn accept_connection(listen_fd: RawFd) -> io::Result<Option<RawFd>> {
    unsafe {
        let fd = libc::accept4(
            listen_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        );
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err)
            }
        } else {
            Ok(Some(fd))
        }
    }
}

/// Peer IPv4 address of a connected socket, captured once at accept.
pub fn peer_ip(fd: RawFd) -> String {
    unsafe {
        let mut addr: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        if libc::getpeername(fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len) == 0
            && addr.ss_family == libc::AF_INET as libc::sa_family_t
        {
            let sin = &*(&addr as *const _ as *const libc::sockaddr_in);
            // s_addr is in network byte order; its memory bytes are the
            // address octets.
            return Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()).to_string();
        }
    }
    "unknown".to_string()
}

// ---- Non-blocking I/O ----

/// Read into `buf`. `None` means EAGAIN; `Some(0)` means the peer closed.
pub fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
    unsafe {
        let res = libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err)
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

/// Write from `buf` with MSG_NOSIGNAL so a dead peer yields EPIPE instead of
/// a process signal. `None` means EAGAIN.
pub fn write_nonblocking(fd: RawFd, buf: &[u8]) -> io::Result<Option<usize>> {
    unsafe {
        let res = libc::send(fd, buf.as_ptr() as *const c_void, buf.len(), libc::MSG_NOSIGNAL);
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err)
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

// ---- Epoll ----

pub struct Epoll {
    fd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        unsafe {
            let fd = libc::epoll_create1(libc::EPOLL_CLOEXEC);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { fd })
        }
    }

    /// Register interest. Edge triggered; the caller must drain fully.
    pub fn add(&self, fd: RawFd, interests: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interests)
    }

    pub fn modify(&self, fd: RawFd, interests: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interests)
    }

    /// Register or re-register: ADD, falling back to MOD when the fd is
    /// already present. Used when re-arming after a response is ready.
    pub fn arm(&self, fd: RawFd, interests: u32) -> io::Result<()> {
        match self.add(fd, interests) {
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => self.modify(fd, interests),
            other => other,
        }
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        unsafe {
            if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Wait for events. EINTR is reported as zero events.
    pub fn wait(&self, events: &mut [libc::epoll_event], timeout_ms: i32) -> io::Result<usize> {
        unsafe {
            let res = libc::epoll_wait(
                self.fd,
                events.as_mut_ptr(),
                events.len() as c_int,
                timeout_ms,
            );
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err);
            }
            Ok(res as usize)
        }
    }

    fn ctl(&self, op: c_int, fd: RawFd, interests: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interests | (libc::EPOLLET | libc::EPOLLRDHUP) as u32,
            u64: fd as u64,
        };
        unsafe {
            if libc::epoll_ctl(self.fd, op, fd, &mut event) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        close_fd(self.fd);
    }
}

// ---- Eventfd ----

/// Cross-thread wakeup descriptor: writing from any thread wakes exactly
/// the reactor that is waiting on it.
pub struct EventFd {
    fd: RawFd,
}

impl EventFd {
    pub fn new() -> io::Result<Self> {
        unsafe {
            let fd = libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { fd })
        }
    }

    pub fn raw(&self) -> RawFd {
        self.fd
    }

    /// Consume any pending wakeups so edge-triggered epoll re-arms.
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            while libc::read(self.fd, buf.as_mut_ptr() as *mut c_void, 8) == 8 {}
        }
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        close_fd(self.fd);
    }
}

/// Wake the reactor owning `fd`. Safe to call from any thread.
pub fn eventfd_notify(fd: RawFd) {
    let val: u64 = 1;
    unsafe {
        libc::write(fd, &val as *const u64 as *const c_void, 8);
    }
}

// ---- Timerfd ----

/// Monotonic periodic timer used for the 1 Hz idle-connection sweep.
pub struct TimerFd {
    fd: RawFd,
}

impl TimerFd {
    pub fn interval(seconds: u64) -> io::Result<Self> {
        unsafe {
            let fd = libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            );
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let spec = libc::itimerspec {
                it_interval: libc::timespec {
                    tv_sec: seconds as libc::time_t,
                    tv_nsec: 0,
                },
                it_value: libc::timespec {
                    tv_sec: seconds as libc::time_t,
                    tv_nsec: 0,
                },
            };
            if libc::timerfd_settime(fd, 0, &spec, ptr::null_mut()) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
            Ok(Self { fd })
        }
    }

    pub fn raw(&self) -> RawFd {
        self.fd
    }

    /// Consume the expiration count.
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            while libc::read(self.fd, buf.as_mut_ptr() as *mut c_void, 8) == 8 {}
        }
    }
}

impl Drop for TimerFd {
    fn drop(&mut self) {
        close_fd(self.fd);
    }
}

// ---- Signalfd ----

/// Blocks SIGINT/SIGTERM/SIGQUIT for the whole process and exposes them as
/// a blocking descriptor for the supervisor to wait on. SIGPIPE is ignored
/// so writes to dead sockets surface as EPIPE.
///
/// Must be constructed before any worker thread is spawned, so every thread
/// inherits the signal mask.
pub struct SignalFd {
    fd: RawFd,
}

impl SignalFd {
    pub fn new() -> io::Result<Self> {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);

            let mut mask: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, libc::SIGINT);
            libc::sigaddset(&mut mask, libc::SIGTERM);
            libc::sigaddset(&mut mask, libc::SIGQUIT);

            if libc::sigprocmask(libc::SIG_BLOCK, &mask, ptr::null_mut()) < 0 {
                return Err(io::Error::last_os_error());
            }

            let fd = libc::signalfd(-1, &mask, libc::SFD_CLOEXEC);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { fd })
        }
    }

    /// Block until a shutdown signal arrives; returns the signal number.
    pub fn wait(&self) -> io::Result<i32> {
        unsafe {
            let mut info: libc::signalfd_siginfo = mem::zeroed();
            let want = mem::size_of::<libc::signalfd_siginfo>();
            let got = libc::read(self.fd, &mut info as *mut _ as *mut c_void, want);
            if got as usize != want {
                return Err(io::Error::last_os_error());
            }
            Ok(info.ssi_signo as i32)
        }
    }
}

impl Drop for SignalFd {
    fn drop(&mut self) {
        close_fd(self.fd);
    }
}
