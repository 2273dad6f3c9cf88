use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use libc::{
    kevent, kqueue, timespec, EVFILT_READ, EVFILT_TIMER, EVFILT_USER, EV_ADD, EV_CLEAR,
    EV_DELETE, EV_ENABLE, EV_ERROR, NOTE_TRIGGER, NOTE_USECONDS,
};

use crate::ready::Ready;
use crate::token::Token;

/// kqueue-backed Selector.
///
/// Unlike Linux, kqueue expresses the Timer and Wakeup as native filters
/// (`EVFILT_TIMER`, `EVFILT_USER`) registered directly against the kqueue
/// descriptor rather than as separate file descriptors — there is no
/// `timerfd`/`eventfd` equivalent to open. The public contract
/// (`arm_timer`/`poke_wakeup`/`drain_timer`/`drain_wakeup`) hides this so
/// the Engine's loop reads identically on both platforms.
pub struct Selector {
    kq: RawFd,
}

const TIMER_IDENT: usize = 1;
const WAKE_IDENT: usize = 2;

fn ready_to_filters(interest: Ready) -> (bool, bool) {
    (interest.is_readable(), interest.is_writable())
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let kq = syscall!(kqueue())?;
        let selector = Selector { kq };

        // EVFILT_USER never fires spuriously and needs no NOTE_TRIGGER
        // until `poke_wakeup` asks for one.
        selector.apply(&[libc::kevent {
            ident: WAKE_IDENT,
            filter: EVFILT_USER,
            flags: EV_ADD | EV_CLEAR,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        }])?;

        Ok(selector)
    }

    fn apply(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let ret = unsafe {
            kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    pub fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        self.modify(fd, token, interest)
    }

    pub fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let (read, write) = ready_to_filters(interest);
        let udata = token.0 as *mut libc::c_void;

        let mut changes = Vec::with_capacity(2);

        changes.push(libc::kevent {
            ident: fd as usize,
            filter: EVFILT_READ,
            flags: if read {
                EV_ADD | EV_CLEAR
            } else {
                EV_DELETE
            },
            fflags: 0,
            data: 0,
            udata,
        });

        changes.push(libc::kevent {
            ident: fd as usize,
            filter: libc::EVFILT_WRITE,
            flags: if write {
                EV_ADD | EV_CLEAR
            } else {
                EV_DELETE
            },
            fflags: 0,
            data: 0,
            udata,
        });

        // EV_DELETE on a filter that was never added returns ENOENT; that's
        // fine, it just means that half of the interest mask was already
        // absent.
        for change in changes {
            if let Err(e) = self.apply(&[change]) {
                if e.raw_os_error() != Some(libc::ENOENT) {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        for filter in [EVFILT_READ, libc::EVFILT_WRITE] {
            let change = libc::kevent {
                ident: fd as usize,
                filter,
                flags: EV_DELETE,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            };

            if let Err(e) = self.apply(&[change]) {
                if e.raw_os_error() != Some(libc::ENOENT) {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    pub fn wait(&self, out: &mut [libc::kevent], timeout_ms: i32) -> io::Result<usize> {
        let ts = if timeout_ms < 0 {
            None
        } else {
            Some(timespec {
                tv_sec: (timeout_ms as i64) / 1000,
                tv_nsec: ((timeout_ms as i64) % 1000) * 1_000_000,
            })
        };

        let ts_ptr = ts.as_ref().map(|t| t as *const _).unwrap_or(ptr::null());

        let n = loop {
            let ret = unsafe {
                kevent(
                    self.kq,
                    ptr::null(),
                    0,
                    out.as_mut_ptr(),
                    out.len() as i32,
                    ts_ptr,
                )
            };

            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            break ret;
        };

        Ok(n as usize)
    }

    /// Arm (`ms >= 0`) or disarm (`ms < 0`) a one-shot `EVFILT_TIMER`.
    pub fn arm_timer(&self, ms: i64) -> io::Result<()> {
        if ms < 0 {
            let change = libc::kevent {
                ident: TIMER_IDENT,
                filter: EVFILT_TIMER,
                flags: EV_DELETE,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            };

            return match self.apply(&[change]) {
                Ok(()) => Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
                Err(e) => Err(e),
            };
        }

        let ms = std::cmp::max(ms, 0);
        // zero arming still fires: schedule one microsecond out.
        let data = if ms == 0 { 1 } else { ms * 1000 };

        let change = libc::kevent {
            ident: TIMER_IDENT,
            filter: EVFILT_TIMER,
            flags: EV_ADD | EV_ENABLE | EV_CLEAR,
            fflags: NOTE_USECONDS,
            data: data as isize,
            udata: ptr::null_mut(),
        };

        self.apply(&[change])
    }

    pub fn poke_wakeup(&self) -> io::Result<()> {
        let change = libc::kevent {
            ident: WAKE_IDENT,
            filter: EVFILT_USER,
            flags: 0,
            fflags: NOTE_TRIGGER,
            data: 0,
            udata: ptr::null_mut(),
        };

        self.apply(&[change])
    }

    /// EVFILT_TIMER/EVFILT_USER are self-draining (EV_CLEAR); nothing to
    /// read back, unlike the Linux timerfd/eventfd descriptors.
    pub fn drain_timer(&self) -> io::Result<()> {
        Ok(())
    }

    pub fn drain_wakeup(&self) -> io::Result<()> {
        Ok(())
    }

    pub fn timer_token() -> Token {
        Token(usize::MAX)
    }

    pub fn wake_token() -> Token {
        Token(usize::MAX - 1)
    }

    pub fn event_token(event: &libc::kevent) -> Token {
        match event.filter {
            EVFILT_TIMER => Self::timer_token(),
            EVFILT_USER => Self::wake_token(),
            _ => Token(event.udata as usize),
        }
    }

    pub fn event_readiness(event: &libc::kevent) -> Ready {
        if event.flags & EV_ERROR != 0 {
            return Ready::error();
        }

        match event.filter {
            EVFILT_READ => Ready::readable(),
            libc::EVFILT_WRITE => Ready::writable(),
            EVFILT_TIMER | EVFILT_USER => Ready::readable(),
            _ => Ready::empty(),
        }
    }

    pub fn events_buffer(capacity: usize) -> Vec<libc::kevent> {
        vec![
            libc::kevent {
                ident: 0,
                filter: 0,
                flags: 0,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            };
            capacity
        ]
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.kq);
        }
    }
}
