use std::io;
use std::os::fd::RawFd;

use ahash::AHashMap;

pub const INTEREST_READ: u32 = 0x1;
pub const INTEREST_WRITE: u32 = 0x2;

/// One readiness report from a poll round.
#[derive(Debug, Copy, Clone)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Readiness backend. Object-safe so the net actor can take any
/// implementation behind a box; `del` is deferred until the next poll,
/// letting callers drop descriptors from inside event handling.
pub trait Selector: Send {
    fn add(&mut self, fd: RawFd, interest: u32) -> io::Result<()>;

    /// Schedules removal. Applied at the start of the next `poll`.
    fn del(&mut self, fd: RawFd);

    fn set_read(&mut self, fd: RawFd) -> io::Result<()>;

    fn set_write(&mut self, fd: RawFd) -> io::Result<()>;

    fn set_read_write(&mut self, fd: RawFd) -> io::Result<()>;

    /// Waits up to `timeout_ms` and appends ready events to `out`,
    /// reporting only directions present in `mode_mask`. Returns the
    /// number appended.
    fn poll(&mut self, mode_mask: u32, timeout_ms: i32, out: &mut Vec<Event>) -> io::Result<usize>;
}

/// Portable backend over poll(2). Rebuilds the pollfd array each round;
/// fine for the descriptor counts a single actor handles.
pub struct PollSelector {
    fds: AHashMap<RawFd, u32>,
    removed: Vec<RawFd>,
    pollfds: Vec<libc::pollfd>,
}

impl PollSelector {
    pub fn new() -> Self {
        Self {
            fds: AHashMap::new(),
            removed: Vec::new(),
            pollfds: Vec::new(),
        }
    }

    fn set_interest(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        match self.fds.get_mut(&fd) {
            Some(slot) => {
                *slot = interest;
                Ok(())
            }
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn apply_removals(&mut self) {
        for fd in self.removed.drain(..) {
            self.fds.remove(&fd);
        }
    }
}

impl Default for PollSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector for PollSelector {
    fn add(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        self.removed.retain(|&r| r != fd);
        self.fds.insert(fd, interest);
        Ok(())
    }

    fn del(&mut self, fd: RawFd) {
        self.removed.push(fd);
    }

    fn set_read(&mut self, fd: RawFd) -> io::Result<()> {
        self.set_interest(fd, INTEREST_READ)
    }

    fn set_write(&mut self, fd: RawFd) -> io::Result<()> {
        self.set_interest(fd, INTEREST_WRITE)
    }

    fn set_read_write(&mut self, fd: RawFd) -> io::Result<()> {
        self.set_interest(fd, INTEREST_READ | INTEREST_WRITE)
    }

    fn poll(&mut self, mode_mask: u32, timeout_ms: i32, out: &mut Vec<Event>) -> io::Result<usize> {
        self.apply_removals();

        self.pollfds.clear();
        for (&fd, &interest) in &self.fds {
            let watched = interest & mode_mask;
            if watched == 0 {
                continue;
            }
            let mut events: libc::c_short = 0;
            if watched & INTEREST_READ != 0 {
                events |= libc::POLLIN;
            }
            if watched & INTEREST_WRITE != 0 {
                events |= libc::POLLOUT;
            }
            self.pollfds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            });
        }
        if self.pollfds.is_empty() {
            return Ok(0);
        }

        let rc = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        let mut appended = 0;
        for pfd in &self.pollfds {
            if pfd.revents == 0 {
                continue;
            }
            out.push(Event {
                fd: pfd.fd,
                readable: pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0,
                writable: pfd.revents & libc::POLLOUT != 0,
                error: pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0,
            });
            appended += 1;
        }
        Ok(appended)
    }
}

/// epoll backend. Level-triggered; `mode_mask` is applied after the wait
/// since suppressed directions are reported again on the next round.
#[cfg(target_os = "linux")]
pub struct EpollSelector {
    epfd: RawFd,
    interests: AHashMap<RawFd, u32>,
    removed: Vec<RawFd>,
    events: Vec<libc::epoll_event>,
}

#[cfg(target_os = "linux")]
impl EpollSelector {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd,
            interests: AHashMap::new(),
            removed: Vec::new(),
            events: Vec::with_capacity(64),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: u32) -> io::Result<()> {
        let mut events: u32 = 0;
        if interest & INTEREST_READ != 0 {
            events |= libc::EPOLLIN as u32;
        }
        if interest & INTEREST_WRITE != 0 {
            events |= libc::EPOLLOUT as u32;
        }
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_interest(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        match self.interests.get_mut(&fd) {
            Some(slot) => {
                let prev = *slot;
                *slot = interest;
                if prev != interest {
                    self.ctl(libc::EPOLL_CTL_MOD, fd, interest)?;
                }
                Ok(())
            }
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn apply_removals(&mut self) {
        for fd in std::mem::take(&mut self.removed) {
            if self.interests.remove(&fd).is_some() {
                // The descriptor may already be closed; EBADF is expected then.
                let _ = self.ctl(libc::EPOLL_CTL_DEL, fd, 0);
            }
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for EpollSelector {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

#[cfg(target_os = "linux")]
impl Selector for EpollSelector {
    fn add(&mut self, fd: RawFd, interest: u32) -> io::Result<()> {
        self.removed.retain(|&r| r != fd);
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)?;
        self.interests.insert(fd, interest);
        Ok(())
    }

    fn del(&mut self, fd: RawFd) {
        self.removed.push(fd);
    }

    fn set_read(&mut self, fd: RawFd) -> io::Result<()> {
        self.set_interest(fd, INTEREST_READ)
    }

    fn set_write(&mut self, fd: RawFd) -> io::Result<()> {
        self.set_interest(fd, INTEREST_WRITE)
    }

    fn set_read_write(&mut self, fd: RawFd) -> io::Result<()> {
        self.set_interest(fd, INTEREST_READ | INTEREST_WRITE)
    }

    fn poll(&mut self, mode_mask: u32, timeout_ms: i32, out: &mut Vec<Event>) -> io::Result<usize> {
        self.apply_removals();
        if self.interests.is_empty() {
            return Ok(0);
        }

        self.events.clear();
        let cap = self.events.capacity();
        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                cap as libc::c_int,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        unsafe {
            self.events.set_len(rc as usize);
        }

        let mut appended = 0;
        for ev in &self.events {
            let fd = ev.u64 as RawFd;
            let error = ev.events & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0;
            let mut readable = ev.events & libc::EPOLLIN as u32 != 0;
            let mut writable = ev.events & libc::EPOLLOUT as u32 != 0;
            if mode_mask & INTEREST_READ == 0 {
                readable = false;
            }
            if mode_mask & INTEREST_WRITE == 0 {
                writable = false;
            }
            if !readable && !writable && !error {
                continue;
            }
            out.push(Event {
                fd,
                readable,
                writable,
                error,
            });
            appended += 1;
        }
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let a = TcpStream::connect(addr).unwrap();
        let (b, _) = listener.accept().unwrap();
        (a, b)
    }

    #[test]
    fn poll_reports_readable_after_write() {
        let (mut a, b) = connected_pair();
        let mut sel = PollSelector::new();
        sel.add(b.as_raw_fd(), INTEREST_READ).unwrap();

        let mut out = Vec::new();
        assert_eq!(
            sel.poll(INTEREST_READ | INTEREST_WRITE, 0, &mut out).unwrap(),
            0
        );

        a.write_all(b"x").unwrap();
        let n = sel
            .poll(INTEREST_READ | INTEREST_WRITE, 1000, &mut out)
            .unwrap();
        assert_eq!(n, 1);
        assert!(out[0].readable);
        assert_eq!(out[0].fd, b.as_raw_fd());
    }

    #[test]
    fn deferred_del_suppresses_events() {
        let (mut a, b) = connected_pair();
        let mut sel = PollSelector::new();
        sel.add(b.as_raw_fd(), INTEREST_READ).unwrap();
        a.write_all(b"x").unwrap();
        sel.del(b.as_raw_fd());

        let mut out = Vec::new();
        assert_eq!(
            sel.poll(INTEREST_READ | INTEREST_WRITE, 0, &mut out).unwrap(),
            0
        );
    }

    #[test]
    fn mode_mask_filters_writable() {
        let (a, _b) = connected_pair();
        let mut sel = PollSelector::new();
        sel.add(a.as_raw_fd(), INTEREST_WRITE).unwrap();

        let mut out = Vec::new();
        // Write suppressed by the mask, nothing to watch.
        assert_eq!(sel.poll(INTEREST_READ, 0, &mut out).unwrap(), 0);
        let n = sel.poll(INTEREST_READ | INTEREST_WRITE, 1000, &mut out).unwrap();
        assert_eq!(n, 1);
        assert!(out[0].writable);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn epoll_reports_readable_after_write() {
        let (mut a, b) = connected_pair();
        let mut sel = EpollSelector::new().unwrap();
        sel.add(b.as_raw_fd(), INTEREST_READ).unwrap();

        a.write_all(b"x").unwrap();
        let mut out = Vec::new();
        let n = sel
            .poll(INTEREST_READ | INTEREST_WRITE, 1000, &mut out)
            .unwrap();
        assert_eq!(n, 1);
        assert!(out[0].readable);
    }
}
