use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::epoll::{Epoll, EpollOpt, Events, Ready, Token};
use crate::error::{resolve_ctl_error, PollError};
use crate::heartbeat::HeartbeatClock;
use crate::hooks::CycleHooks;
use crate::message::{Message, MessageQueue, MSG_CALL, MSG_PING, MSG_SHUTDOWN};
use crate::poll_data::{
    PollData, ACTION_ACCEPT, ACTION_ERROR, ACTION_HUP, ACTION_NOP, ACTION_READ, ACTION_WRITE,
};
use crate::stats::{Statistics, MAXNFDS, N_QUEUE_TIMES};

const MAX_EVENTS: usize = 1024;

/// What a worker's poll loop is doing right now, readable from any thread
/// for introspection (it backs no control-flow decision of its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Idle,
    Polling,
    Processing,
    ZProcessing,
}

/// The shared, level-triggered pollset every worker polls for the fan-out
/// listener fds registered through [`crate::pool::Pool::add_shared_fd`].
///
/// Kept level-triggered (unlike a worker's own private pollset) so a
/// listener that's still readable after one worker drains a single
/// connection off it stays visible to whichever worker polls it next — the
/// mechanism that spreads inbound connections across the pool without a
/// dedicated accept thread.
pub(crate) struct SharedListener {
    epoll: Epoll,
    registry: Mutex<HashMap<RawFd, PollData>>,
}

impl SharedListener {
    pub(crate) fn new(epoll: Epoll) -> SharedListener {
        SharedListener { epoll, registry: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn add(&self, fd: RawFd, interest: Ready, pdata: PollData) -> Result<(), PollError> {
        let token = Token(fd as usize);
        self.epoll
            .add(&fd, token, interest, EpollOpt::level())
            .map_err(|e| resolve_ctl_error(fd, true, e))?;
        self.registry.lock().unwrap().insert(fd, pdata);
        Ok(())
    }

    pub(crate) fn remove(&self, fd: RawFd) -> Result<(), PollError> {
        self.epoll.delete(&fd).map_err(|e| resolve_ctl_error(fd, false, e))?;
        self.registry.lock().unwrap().remove(&fd);
        Ok(())
    }
}

impl AsRawFd for SharedListener {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}

/// One fixed worker in the pool: a private edge-triggered pollset, a
/// message queue, and the thread that drives both.
pub struct Worker {
    id: usize,
    epoll: Epoll,
    registry: Mutex<HashMap<RawFd, PollData>>,
    queue: MessageQueue,
    shared: Arc<SharedListener>,
    state: Mutex<WorkerState>,
    should_shutdown: AtomicBool,
    shutdown_initiated: AtomicBool,
    statistics: Statistics,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: Arc<SharedListener>) -> std::io::Result<Worker> {
        let epoll = Epoll::new()?;
        let queue = MessageQueue::new()?;

        let worker = Worker {
            id,
            epoll,
            registry: Mutex::new(HashMap::new()),
            queue,
            shared,
            state: Mutex::new(WorkerState::Stopped),
            should_shutdown: AtomicBool::new(false),
            shutdown_initiated: AtomicBool::new(false),
            statistics: Statistics::new(),
            thread: Mutex::new(None),
        };

        let shared_fd = worker.shared.as_raw_fd();
        worker
            .epoll
            .add(&shared_fd, Token(shared_fd as usize), Ready::readable(), EpollOpt::level())?;
        worker.registry.lock().unwrap().insert(shared_fd, PollData::SharedListener);

        let queue_fd = worker.queue.as_raw_fd();
        worker.queue.add_to_worker(&worker.epoll, Token(queue_fd as usize))?;
        worker
            .registry
            .lock()
            .unwrap()
            .insert(queue_fd, PollData::handler(|_worker_id, _events| ACTION_NOP));

        Ok(worker)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn should_shutdown(&self) -> bool {
        self.should_shutdown.load(Ordering::Acquire)
    }

    /// Registers `fd` on this worker's private pollset, forcing
    /// edge-triggered delivery. The caller must be running on this worker's
    /// own thread, or otherwise guarantee it isn't racing the worker's poll
    /// loop over the same fd.
    pub fn add_fd(&self, fd: RawFd, interest: Ready, pdata: PollData) -> Result<(), PollError> {
        let token = Token(fd as usize);
        self.epoll
            .add(&fd, token, interest, EpollOpt::edge())
            .map_err(|e| resolve_ctl_error(fd, true, e))?;
        self.registry.lock().unwrap().insert(fd, pdata);
        Ok(())
    }

    pub fn remove_fd(&self, fd: RawFd) -> Result<(), PollError> {
        self.epoll.delete(&fd).map_err(|e| resolve_ctl_error(fd, false, e))?;
        self.registry.lock().unwrap().remove(&fd);
        Ok(())
    }

    /// Enqueues `(id, arg1, arg2)` on this worker's message queue. Safe to
    /// call from any thread, including a signal handler: no allocation, no
    /// logging, no locking beyond the lock-free queue's own push.
    pub fn post_message(&self, id: u32, arg1: isize, arg2: isize) -> bool {
        self.queue.post(Message::new(id, arg1, arg2))
    }

    /// Posts at most one `SHUTDOWN` message to this worker, across however
    /// many times `shutdown` is called. The `compare_exchange` makes the
    /// check-and-set atomic, so only the caller that wins the race posts.
    pub fn shutdown(&self) {
        let won = self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if won {
            self.post_message(MSG_SHUTDOWN, 0, 0);
        }
    }

    pub(crate) fn close_queue(&self) -> bool {
        self.queue.close()
    }

    pub(crate) fn set_thread_handle(&self, handle: JoinHandle<()>) {
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn join(&self) {
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// The poll loop proper: adaptive spin-then-block polling of the
    /// worker's private pollset, dispatching each ready descriptor (folding
    /// its returned action flags into [`Statistics`]), then draining the
    /// message queue once per cycle.
    pub(crate) fn run(
        &self,
        heartbeat: &dyn HeartbeatClock,
        cycle_hooks: &dyn CycleHooks,
        number_poll_spins: u32,
        max_poll_sleep_ms: u32,
    ) {
        *self.state.lock().unwrap() = WorkerState::Idle;

        let mut events = Events::with_capacity(MAX_EVENTS);
        let mut timeout_bias: u32 = 1;
        let mut poll_spins: u32 = 0;

        while !self.should_shutdown() {
            *self.state.lock().unwrap() = WorkerState::Polling;
            self.statistics.n_polls.fetch_add(1, Ordering::Relaxed);

            let mut nfds = match self.epoll.wait(&mut events, Some(Duration::ZERO)) {
                Ok(n) => n,
                Err(e) => {
                    log::debug!("worker {}: nonblocking epoll_wait failed: {}", self.id, e);
                    0
                }
            };

            let mut from_nonblocking_poll = nfds > 0;

            if nfds == 0 {
                // Compares the pre-increment spin count, then always bumps
                // it, mirroring the original's `poll_spins++ > number_poll_spins`
                // post-increment test.
                let spun_too_long = poll_spins > number_poll_spins;
                poll_spins += 1;

                if spun_too_long {
                    if timeout_bias < 10 {
                        timeout_bias += 1;
                    }

                    self.statistics.blockingpolls.fetch_add(1, Ordering::Relaxed);
                    let timeout_ms = (max_poll_sleep_ms as u64 * timeout_bias as u64) / 10;

                    nfds = match self.epoll.wait(&mut events, Some(Duration::from_millis(timeout_ms))) {
                        Ok(n) => n,
                        Err(e) => {
                            log::debug!("worker {}: blocking epoll_wait failed: {}", self.id, e);
                            0
                        }
                    };

                    if nfds == 0 {
                        poll_spins = 0;
                    } else {
                        from_nonblocking_poll = false;
                    }
                }
            } else {
                timeout_bias = 1;
                poll_spins = 0;
            }

            if nfds > 0 {
                self.statistics.n_pollev.fetch_add(1, Ordering::Relaxed);
                if from_nonblocking_poll {
                    self.statistics.n_nbpollev.fetch_add(1, Ordering::Relaxed);
                }
                self.statistics.evq_length.store(nfds as u64, Ordering::Relaxed);

                let prev_max = self.statistics.evq_max.load(Ordering::Relaxed);
                if nfds as u64 > prev_max {
                    self.statistics.evq_max.store(nfds as u64, Ordering::Relaxed);
                }

                let bucket = (nfds - 1).min(MAXNFDS - 1);
                self.statistics.n_fds[bucket].fetch_add(1, Ordering::Relaxed);

                *self.state.lock().unwrap() = WorkerState::Processing;
            }

            let cycle_start = heartbeat.tick();

            for i in 0..nfds {
                let event = match events.get(i) {
                    Some(e) => e,
                    None => continue,
                };

                let started = heartbeat.tick();
                let qtime = started.saturating_sub(cycle_start);
                let qbucket = (qtime as usize).min(N_QUEUE_TIMES);
                self.statistics.qtimes[qbucket].fetch_add(1, Ordering::Relaxed);

                let prev_maxq = self.statistics.maxqtime.load(Ordering::Relaxed);
                if qtime > prev_maxq {
                    self.statistics.maxqtime.store(qtime, Ordering::Relaxed);
                }

                let fd = event.token().0 as RawFd;
                let actions = self.dispatch(fd, event.readiness());

                if actions & ACTION_ACCEPT != 0 {
                    self.statistics.n_accept.fetch_add(1, Ordering::Relaxed);
                }
                if actions & ACTION_READ != 0 {
                    self.statistics.n_read.fetch_add(1, Ordering::Relaxed);
                }
                if actions & ACTION_WRITE != 0 {
                    self.statistics.n_write.fetch_add(1, Ordering::Relaxed);
                }
                if actions & ACTION_HUP != 0 {
                    self.statistics.n_hup.fetch_add(1, Ordering::Relaxed);
                }
                if actions & ACTION_ERROR != 0 {
                    self.statistics.n_error.fetch_add(1, Ordering::Relaxed);
                }

                // saturating: the exectimes histogram bucket is clamped to
                // the overflow slot instead of wrapping with `% N_QUEUE_TIMES`.
                let exec = heartbeat.tick().saturating_sub(started);
                let ebucket = (exec as usize).min(N_QUEUE_TIMES);
                self.statistics.exectimes[ebucket].fetch_add(1, Ordering::Relaxed);

                let prev_maxe = self.statistics.maxexectime.load(Ordering::Relaxed);
                if exec > prev_maxe {
                    self.statistics.maxexectime.store(exec, Ordering::Relaxed);
                }
            }

            cycle_hooks.process_idle_sessions(self.id);

            *self.state.lock().unwrap() = WorkerState::ZProcessing;
            cycle_hooks.process_zombies(self.id);

            self.drain_messages();

            *self.state.lock().unwrap() = WorkerState::Idle;
        }

        *self.state.lock().unwrap() = WorkerState::Stopped;
    }

    fn dispatch(&self, fd: RawFd, events: Ready) -> crate::poll_data::ActionFlags {
        let handler = {
            let reg = self.registry.lock().unwrap();
            match reg.get(&fd) {
                Some(PollData::Handler(h)) => Some(h.clone()),
                Some(PollData::SharedListener) => None,
                None => {
                    log::debug!("worker {}: no handler registered for fd {}", self.id, fd);
                    return ACTION_NOP;
                }
            }
        };

        match handler {
            Some(h) => PollData::dispatch_handler(&h, self.id, events),
            None => self.handle_shared_listener_event(),
        }
    }

    /// Polls the shared listener pollset for exactly one ready descriptor
    /// and dispatches it. Called when a worker's own pollset reports the
    /// shared listener fd as readable; each worker only ever takes one
    /// listener event per wakeup, which is what spreads accepts round-robin
    /// across the pool instead of letting one worker drain the whole batch.
    fn handle_shared_listener_event(&self) -> crate::poll_data::ActionFlags {
        let mut events = Events::with_capacity(1);

        let nfds = match self.shared.epoll.wait(&mut events, Some(Duration::ZERO)) {
            Ok(n) => n,
            Err(e) => {
                log::error!("worker {}: epoll_wait on the shared listener failed: {}", self.id, e);
                0
            }
        };

        if nfds == 0 {
            return ACTION_NOP;
        }

        let event = match events.get(0) {
            Some(e) => e,
            None => return ACTION_NOP,
        };
        let fd = event.token().0 as RawFd;

        let handler = {
            let reg = self.shared.registry.lock().unwrap();
            match reg.get(&fd) {
                Some(PollData::Handler(h)) => Some(h.clone()),
                _ => None,
            }
        };

        match handler {
            Some(h) => PollData::dispatch_handler(&h, self.id, event.readiness()),
            None => {
                log::error!("worker {}: no handler registered for shared listener fd {}", self.id, fd);
                ACTION_NOP
            }
        }
    }

    fn drain_messages(&self) {
        while let Some(msg) = self.queue.try_pop() {
            self.handle_message(msg);
        }
    }

    fn handle_message(&self, msg: Message) {
        match msg.id {
            MSG_PING => {
                let text = if msg.arg2 != 0 {
                    // SAFETY: `arg2` is a `CString::into_raw` pointer handed
                    // to `post_message(MSG_PING, ..)`; this is the single
                    // place that reclaims it.
                    let cstr = unsafe { std::ffi::CString::from_raw(msg.arg2 as *mut libc::c_char) };
                    cstr.to_string_lossy().into_owned()
                } else {
                    "Alive and kicking".to_string()
                };
                log::info!("worker {}: {}", self.id, text);
            }
            MSG_SHUTDOWN => {
                log::info!("worker {}: received shutdown message", self.id);
                self.should_shutdown.store(true, Ordering::Release);
            }
            MSG_CALL => {
                // SAFETY: `arg1` was packed from a `fn(usize, *mut c_void)`
                // by whoever posted this message; function pointers and
                // `usize` are the same width on every platform this crate
                // targets.
                let f: fn(usize, *mut std::ffi::c_void) =
                    unsafe { std::mem::transmute::<usize, fn(usize, *mut std::ffi::c_void)>(msg.arg1 as usize) };
                f(self.id, msg.arg2 as *mut std::ffi::c_void);
            }
            other => {
                log::error!("worker {}: received unrecognized message id {}", self.id, other);
            }
        }
    }
}
