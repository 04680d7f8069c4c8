use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::epoll::{Epoll, EpollOpt, Ready, Token};
use crate::queue::Queue;

/// A ping carrying an optional message: `arg2`, if non-zero, is a
/// `CString::into_raw` pointer the receiving worker takes ownership of and
/// frees after logging it.
pub const MSG_PING: u32 = 1;
/// Tells the receiving worker to leave its poll loop once it next checks
/// [`crate::worker::Worker::should_shutdown`].
pub const MSG_SHUTDOWN: u32 = 2;
/// Invokes a function pointer on the receiving worker's own thread. `arg1`
/// is the function, packed through `usize`; `arg2` is its single
/// `*mut c_void` argument.
pub const MSG_CALL: u32 = 3;

/// A single entry on a worker's private message queue.
///
/// Deliberately a flat, `Copy` struct — it crosses threads through a
/// lock-free queue and must not carry anything that needs a destructor run
/// on the sending side.
#[derive(Debug, Clone, Copy)]
pub struct Message {
    pub id: u32,
    pub arg1: isize,
    pub arg2: isize,
}

impl Message {
    pub fn new(id: u32, arg1: isize, arg2: isize) -> Message {
        Message { id, arg1, arg2 }
    }
}

/// The lock-free MPSC channel each worker polls for control messages
/// (`PING`/`SHUTDOWN`/`CALL`), backed by [`Queue`] and woken through the
/// same eventfd-based [`crate::waker::Waker`] every other `Source` in this
/// crate uses.
#[derive(Clone)]
pub struct MessageQueue {
    inner: Queue<Message>,
}

impl MessageQueue {
    pub fn new() -> io::Result<MessageQueue> {
        Ok(MessageQueue { inner: Queue::unbounded()? })
    }

    /// Enqueues `msg`. Does not allocate or log — safe to call from a
    /// context that must not block or touch global state, such as a signal
    /// handler. Returns `false` once the queue has been closed by
    /// [`crate::pool::Pool::finish`], at which point the message is dropped
    /// rather than queued.
    pub fn post(&self, msg: Message) -> bool {
        self.inner.push(msg).is_ok()
    }

    pub fn try_pop(&self) -> Option<Message> {
        self.inner.pop().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn close(&self) -> bool {
        self.inner.close()
    }

    pub(crate) fn add_to_worker(&self, epoll: &Epoll, token: Token) -> io::Result<()> {
        epoll.add(&self.inner, token, Ready::readable(), EpollOpt::edge())
    }
}

impl AsRawFd for MessageQueue {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn post_then_pop_round_trips() {
        let q = MessageQueue::new().unwrap();
        assert!(q.post(Message::new(MSG_PING, 0, 0)));

        let msg = q.try_pop().unwrap();
        assert_eq!(msg.id, MSG_PING);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn post_fails_once_closed() {
        let q = MessageQueue::new().unwrap();
        q.close();
        assert!(!q.post(Message::new(MSG_SHUTDOWN, 0, 0)));
    }
}
