/// Opaque identifier handed back alongside a readiness event.
///
/// The engine uses two reserved values (see [`crate::poller::TIMER_TOKEN`]
/// and [`crate::poller::WAKE_TOKEN`]) and otherwise hands out one token per
/// `SocketBinding`, taken from the slab key that stores it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    #[inline]
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    #[inline]
    fn from(val: Token) -> usize {
        val.0
    }
}
