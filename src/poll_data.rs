use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::epoll::Ready;

/// Bits describing what a handler actually did with an event, folded into
/// the owning worker's [`crate::stats::Statistics`]. Purely observational —
/// the core never branches on these beyond counting them.
pub type ActionFlags = u32;

pub const ACTION_NOP: ActionFlags = 0;
pub const ACTION_ACCEPT: ActionFlags = 1 << 0;
pub const ACTION_READ: ActionFlags = 1 << 1;
pub const ACTION_WRITE: ActionFlags = 1 << 2;
pub const ACTION_HUP: ActionFlags = 1 << 3;
pub const ACTION_ERROR: ActionFlags = 1 << 4;

/// A registered descriptor's dispatch callback: `(worker_id, events) ->
/// actions`. The handler closure closes over whatever state it needs instead
/// of receiving a `self` pointer back, which is the Rust-idiomatic stand-in
/// for the C `(pdata, worker_id, events) -> actions` signature.
pub type HandlerFn = dyn Fn(usize, Ready) -> ActionFlags + Send + Sync;

/// The attachment bound to every descriptor registered with a worker's
/// private pollset or the shared listener pollset.
///
/// `SharedListener` is a tag, not a handler: it marks the one descriptor in
/// each worker's private set that stands for the shared listener pollset
/// itself (see [`crate::worker::Worker::handle_shared_listener_event`]).
/// Dispatching on this tag instead of downcasting a pointer resolves the
/// "Downcast from PollData to Worker" design note.
#[derive(Clone)]
pub enum PollData {
    Handler(Arc<HandlerFn>),
    SharedListener,
}

impl PollData {
    pub fn handler<F>(f: F) -> PollData
    where
        F: Fn(usize, Ready) -> ActionFlags + Send + Sync + 'static,
    {
        PollData::Handler(Arc::new(f))
    }

    /// Invokes `handler`, isolating the worker loop from a panicking handler.
    /// A caught panic is logged and folded into `ACTION_NOP` rather than
    /// propagated, since one misbehaving handler terminating its worker
    /// thread would silently shrink the pool (a Non-goal: dynamic resizing
    /// is explicitly out of scope, which cuts both ways).
    pub(crate) fn dispatch_handler(handler: &Arc<HandlerFn>, worker_id: usize, events: Ready) -> ActionFlags {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(worker_id, events))) {
            Ok(actions) => actions,
            Err(_) => {
                log::error!("poll handler for worker {} panicked; treating as no-op", worker_id);
                ACTION_NOP
            }
        }
    }
}
