/// An opaque identifier attached to a descriptor when it is registered with
/// an [`Epoll`](super::Epoll) instance, returned alongside the readiness bits
/// that fired for it.
///
/// `corepool` stores a pointer-sized tag in `Token`, not a raw fd, so that a
/// registration can outlive fd reuse within a single epoll generation.
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
