use std::cmp;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::ready::Ready;
use crate::sys::fd::FileDesc;
use crate::token::Token;

/// epoll-backed Selector. Timer and Wakeup are real registrable
/// descriptors (`timerfd`, `eventfd`), lifted from
/// `queen_io::sys::timerfd`/`queen_io::sys::eventfd`.
pub struct Selector {
    epfd: RawFd,
    timer: FileDesc,
    wake: FileDesc,
}

fn ioevent_to_epoll(interest: Ready) -> u32 {
    let mut kind = 0;

    if interest.is_readable() {
        kind |= EPOLLIN;
    }

    if interest.is_writable() {
        kind |= EPOLLOUT;
    }

    (kind | EPOLLET) as u32
}

fn epoll_to_ready(events: u32) -> Ready {
    let events = events as i32;
    let mut ready = Ready::empty();

    if events & EPOLLIN != 0 || events & EPOLLPRI != 0 {
        ready.insert(Ready::readable());
    }

    if events & EPOLLOUT != 0 {
        ready.insert(Ready::writable());
    }

    if events & EPOLLERR != 0 {
        ready.insert(Ready::error());
    }

    if events & EPOLLRDHUP != 0 || events & EPOLLHUP != 0 {
        ready.insert(Ready::hup());
    }

    ready
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;

        let timerfd = syscall!(timerfd_create(
            libc::CLOCK_MONOTONIC,
            libc::TFD_CLOEXEC | libc::TFD_NONBLOCK
        ))?;
        let timer = unsafe { FileDesc::new(timerfd) };

        let wakefd = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
        let wake = unsafe { FileDesc::new(wakefd) };

        let selector = Selector { epfd, timer, wake };

        selector.add(selector.timer.as_raw_fd(), TIMER_TOKEN, Ready::readable())?;
        selector.add(selector.wake.as_raw_fd(), WAKE_TOKEN, Ready::readable())?;

        Ok(selector)
    }

    pub fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: ioevent_to_epoll(interest),
            u64: token.0 as u64,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: ioevent_to_epoll(interest),
            u64: token.0 as u64,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info))?;
        Ok(())
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };

        match syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info)) {
            Ok(_) => Ok(()),
            // idempotent: removing an fd that isn't registered is not an error
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn wait(&self, out: &mut [libc::epoll_event], timeout_ms: i32) -> io::Result<usize> {
        let cnt = loop {
            match syscall!(epoll_wait(
                self.epfd,
                out.as_mut_ptr(),
                cmp::min(out.len(), i32::MAX as usize) as i32,
                timeout_ms
            )) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        Ok(cnt as usize)
    }

    /// Arm (`ms >= 0`) or disarm (`ms < 0`) the monotonic timer. Zero is
    /// rounded up to one nanosecond so that arming with zero still fires,
    /// per the Timer contract in §4.2.
    pub fn arm_timer(&self, ms: i64) -> io::Result<()> {
        let value = if ms < 0 {
            libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            }
        } else {
            let ms = cmp::max(ms, 1) as u64;
            libc::timespec {
                tv_sec: (ms / 1000) as i64,
                tv_nsec: ((ms % 1000) * 1_000_000) as i64,
            }
        };

        let new_value = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: value,
        };
        let mut old_value: libc::itimerspec = unsafe { std::mem::zeroed() };

        syscall!(timerfd_settime(
            self.timer.as_raw_fd(),
            0,
            &new_value,
            &mut old_value
        ))?;
        Ok(())
    }

    /// Increment the wakeup counter; guaranteed to surface a readable
    /// event at least once before the next drain.
    pub fn poke_wakeup(&self) -> io::Result<()> {
        use std::io::Write;

        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match (&self.wake).write_all(&buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn drain_timer(&self) -> io::Result<()> {
        drain_u64(&self.timer)
    }

    pub fn drain_wakeup(&self) -> io::Result<()> {
        drain_u64(&self.wake)
    }

    pub fn timer_token() -> Token {
        TIMER_TOKEN
    }

    pub fn wake_token() -> Token {
        WAKE_TOKEN
    }

    pub fn event_token(event: &libc::epoll_event) -> Token {
        Token(event.u64 as usize)
    }

    pub fn event_readiness(event: &libc::epoll_event) -> Ready {
        epoll_to_ready(event.events)
    }

    pub fn events_buffer(capacity: usize) -> Vec<libc::epoll_event> {
        vec![libc::epoll_event { events: 0, u64: 0 }; capacity]
    }
}

const TIMER_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

fn drain_u64(fd: &FileDesc) -> io::Result<()> {
    let mut buf = [0u8; 8];
    let mut reader = fd;
    match reader.read(&mut buf) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e),
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}
