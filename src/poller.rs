//! Readiness multiplexer over file descriptors: epoll on Linux, kqueue on
//! macOS (see [`crate::sys`]). The Engine is the only consumer; it never
//! touches `sys::Selector` directly.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::ready::Ready;
use crate::sys::Selector;
use crate::token::Token;

/// Reserved token identifying the Timer's readiness event.
pub const TIMER_TOKEN: Token = Token(usize::MAX);
/// Reserved token identifying the Wakeup's readiness event.
pub const WAKE_TOKEN: Token = Token(usize::MAX - 1);

const EVENTS_CAPACITY: usize = 1024;

/// One ready (token, interest) pair returned from [`Poller::wait`].
#[derive(Copy, Clone, Debug)]
pub struct ReadyEvent {
    pub token: Token,
    pub readiness: Ready,
}

pub struct Poller {
    selector: Selector,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        Ok(Poller {
            selector: Selector::new()?,
        })
    }

    /// Register `fd` with `interest`. Fails if `fd` is already registered
    /// (mirrors `epoll_ctl(EPOLL_CTL_ADD)` semantics; the kqueue backend
    /// treats add and modify identically since kevent registration is
    /// always idempotent).
    pub fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        self.selector.add(fd, token, interest)
    }

    /// Change the registered interest for `fd`. Fails if not registered.
    pub fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        self.selector.modify(fd, token, interest)
    }

    /// Drop the registration for `fd`. Idempotent.
    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.selector.remove(fd)
    }

    /// Block up to `timeout` (or indefinitely if `None`), appending ready
    /// events into `out`. Returns the number appended.
    pub fn wait(&self, out: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<usize> {
        out.clear();

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let mut raw = Selector::events_buffer(EVENTS_CAPACITY);
        let n = self.selector.wait(&mut raw, timeout_ms)?;

        for event in &raw[..n] {
            out.push(ReadyEvent {
                token: Selector::event_token(event),
                readiness: Selector::event_readiness(event),
            });
        }

        Ok(n)
    }

    /// Arm (`ms >= 0`) or disarm (`ms < 0`) the Timer. Zero fires as soon
    /// as possible rather than disarming.
    pub fn arm_timer(&self, ms: i64) -> io::Result<()> {
        self.selector.arm_timer(ms)
    }

    /// Signal the Wakeup; guaranteed to deliver at least one readable
    /// event before the next `drain_wakeup`.
    pub fn poke_wakeup(&self) -> io::Result<()> {
        self.selector.poke_wakeup()
    }

    pub fn drain_timer(&self) -> io::Result<()> {
        self.selector.drain_timer()
    }

    pub fn drain_wakeup(&self) -> io::Result<()> {
        self.selector.drain_wakeup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_zero_fires_promptly() {
        let poller = Poller::new().expect("poller");
        poller.arm_timer(0).expect("arm");

        let mut events = Vec::new();
        let n = poller
            .wait(&mut events, Some(Duration::from_millis(50)))
            .expect("wait");

        assert_eq!(n, 1);
        assert_eq!(events[0].token, TIMER_TOKEN);
        poller.drain_timer().expect("drain");
    }

    #[test]
    fn disarmed_timer_never_fires() {
        let poller = Poller::new().expect("poller");
        poller.arm_timer(-1).expect("disarm");

        let mut events = Vec::new();
        let n = poller
            .wait(&mut events, Some(Duration::from_millis(20)))
            .expect("wait");

        assert_eq!(n, 0);
    }

    #[test]
    fn repeated_wakeup_collapses_to_one_drain() {
        let poller = Poller::new().expect("poller");
        poller.poke_wakeup().expect("poke 1");
        poller.poke_wakeup().expect("poke 2");
        poller.poke_wakeup().expect("poke 3");

        let mut events = Vec::new();
        let n = poller
            .wait(&mut events, Some(Duration::from_millis(50)))
            .expect("wait");

        assert!(n >= 1);
        assert!(events.iter().any(|e| e.token == WAKE_TOKEN));
        poller.drain_wakeup().expect("drain");

        let n = poller
            .wait(&mut events, Some(Duration::from_millis(20)))
            .expect("wait again");
        assert_eq!(n, 0);
    }
}
