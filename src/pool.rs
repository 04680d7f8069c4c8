use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, OnceLock};

use crate::config::Config;
use crate::epoll::{Epoll, Ready};
use crate::error::PoolError;
use crate::heartbeat::{HeartbeatClock, RealHeartbeat};
use crate::hooks::{CycleHooks, NoopCycleHooks, NoopThreadHooks, ThreadHooks};
use crate::poll_data::PollData;
use crate::stats::{self, PoolStatistics, StatKind};
use crate::worker::{SharedListener, Worker};

thread_local! {
    static CURRENT_WORKER: Cell<Option<usize>> = const { Cell::new(None) };
}

struct PoolState {
    workers: Vec<Arc<Worker>>,
    shared: Arc<SharedListener>,
    config: Config,
    heartbeat: Arc<dyn HeartbeatClock>,
    thread_hooks: Arc<dyn ThreadHooks>,
    cycle_hooks: Arc<dyn CycleHooks>,
}

fn pool_cell() -> &'static Mutex<Option<PoolState>> {
    static POOL: OnceLock<Mutex<Option<PoolState>>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(None))
}

/// Process-wide handle to the worker pool. There is exactly one pool per
/// process, mirroring the core's own `this_unit`/`this_thread` globals;
/// `Pool`'s associated functions are the only way to reach it.
pub struct Pool;

impl Pool {
    /// Creates the shared listener pollset and every worker's private
    /// pollset and message queue. Does not start any threads — call
    /// [`Pool::start`] for that.
    ///
    /// If a worker fails to come up partway through, the workers already
    /// created are dropped (in reverse order) and their fds closed before
    /// the error is returned, leaving the pool uninitialized rather than
    /// half-initialized.
    pub fn init(config: Config) -> Result<(), PoolError> {
        Self::init_with_hooks(
            config,
            Arc::new(RealHeartbeat::new()),
            Arc::new(NoopThreadHooks),
            Arc::new(NoopCycleHooks),
        )
    }

    pub fn init_with_hooks(
        config: Config,
        heartbeat: Arc<dyn HeartbeatClock>,
        thread_hooks: Arc<dyn ThreadHooks>,
        cycle_hooks: Arc<dyn CycleHooks>,
    ) -> Result<(), PoolError> {
        let mut guard = pool_cell().lock().unwrap();
        if guard.is_some() {
            return Err(PoolError::AlreadyInitialized);
        }

        let shared_epoll = Epoll::new().map_err(PoolError::SharedListener)?;
        let shared = Arc::new(SharedListener::new(shared_epoll));

        let mut workers = Vec::with_capacity(config.thread_count);
        for id in 0..config.thread_count {
            match Worker::new(id, shared.clone()) {
                Ok(w) => workers.push(Arc::new(w)),
                Err(source) => {
                    // Unwind: drop what was already brought up, in reverse
                    // order, before reporting the failure.
                    while workers.pop().is_some() {}
                    return Err(PoolError::WorkerCreate { id, source });
                }
            }
        }

        *guard = Some(PoolState { workers, shared, config, heartbeat, thread_hooks, cycle_hooks });
        Ok(())
    }

    /// Spawns one OS thread per worker and enters its poll loop.
    pub fn start() -> Result<(), PoolError> {
        let guard = pool_cell().lock().unwrap();
        let state = guard.as_ref().ok_or(PoolError::NotInitialized)?;

        for worker in &state.workers {
            let worker = worker.clone();
            let heartbeat = state.heartbeat.clone();
            let thread_hooks = state.thread_hooks.clone();
            let cycle_hooks = state.cycle_hooks.clone();
            let number_poll_spins = state.config.number_poll_spins;
            let max_poll_sleep_ms = state.config.max_poll_sleep_ms;
            let id = worker.id();

            let spawned = std::thread::Builder::new()
                .name(format!("corepool-worker-{id}"))
                .spawn(move || {
                    CURRENT_WORKER.with(|c| c.set(Some(id)));

                    if thread_hooks.thread_init() {
                        worker.run(heartbeat.as_ref(), cycle_hooks.as_ref(), number_poll_spins, max_poll_sleep_ms);
                        thread_hooks.thread_finish();
                    } else {
                        log::error!("worker {} failed per-thread initialization, exiting without polling", id);
                    }

                    CURRENT_WORKER.with(|c| c.set(None));
                });

            match spawned {
                Ok(handle) => worker.set_thread_handle(handle),
                Err(source) => return Err(PoolError::ThreadSpawn { id, source }),
            }
        }

        Ok(())
    }

    /// Looks up a worker by id.
    pub fn get(id: usize) -> Option<Arc<Worker>> {
        let guard = pool_cell().lock().unwrap();
        guard.as_ref().and_then(|s| s.workers.get(id).cloned())
    }

    /// The id of the worker running on the calling thread, if any.
    pub fn current_id() -> Option<usize> {
        CURRENT_WORKER.with(|c| c.get())
    }

    /// The worker running on the calling thread, if any.
    pub fn current() -> Option<Arc<Worker>> {
        Self::current_id().and_then(Self::get)
    }

    /// Registers `fd` on the shared, level-triggered listener pollset every
    /// worker polls.
    pub fn add_shared_fd(fd: RawFd, interest: Ready, pdata: PollData) -> Result<(), PoolError> {
        let guard = pool_cell().lock().unwrap();
        let state = guard.as_ref().ok_or(PoolError::NotInitialized)?;
        state.shared.add(fd, interest, pdata)?;
        Ok(())
    }

    pub fn remove_shared_fd(fd: RawFd) -> Result<(), PoolError> {
        let guard = pool_cell().lock().unwrap();
        let state = guard.as_ref().ok_or(PoolError::NotInitialized)?;
        state.shared.remove(fd)?;
        Ok(())
    }

    /// Posts a `SHUTDOWN` message to one worker.
    pub fn shutdown(worker_id: usize) -> bool {
        match Self::get(worker_id) {
            Some(w) => {
                w.shutdown();
                true
            }
            None => false,
        }
    }

    /// Posts a `SHUTDOWN` message to every worker. Best-effort and
    /// signal-friendly: if the pool's lock is currently held (only possible
    /// during `init`/`start`/`finish`, never during steady-state polling),
    /// this silently does nothing rather than blocking — a real signal
    /// handler in a non-managed runtime would use the same non-blocking
    /// stance, since blocking inside a handler can deadlock against the
    /// thread it interrupted.
    pub fn shutdown_all() {
        if let Ok(guard) = pool_cell().try_lock() {
            if let Some(state) = guard.as_ref() {
                for w in &state.workers {
                    w.shutdown();
                }
            }
        }
    }

    /// Posts `(id, arg1, arg2)` to every worker, returning how many accepted
    /// it. Same best-effort, non-blocking stance as [`Pool::shutdown_all`].
    pub fn broadcast_message(id: u32, arg1: isize, arg2: isize) -> usize {
        match pool_cell().try_lock() {
            Ok(guard) => match guard.as_ref() {
                Some(state) => state.workers.iter().filter(|w| w.post_message(id, arg1, arg2)).count(),
                None => 0,
            },
            Err(_) => 0,
        }
    }

    /// Blocks until every worker thread has exited.
    pub fn join() {
        let guard = pool_cell().lock().unwrap();
        if let Some(state) = guard.as_ref() {
            for w in &state.workers {
                w.join();
            }
        }
    }

    /// Closes every worker's message queue (so a racing [`Worker::post_message`]
    /// observes it closed and returns `false` rather than queuing into the
    /// void), joins every worker thread, then tears the pool down so
    /// [`Pool::init`] can be called again.
    pub fn finish() -> Result<(), PoolError> {
        let mut guard = pool_cell().lock().unwrap();
        let state = guard.take().ok_or(PoolError::NotInitialized)?;

        for w in &state.workers {
            w.close_queue();
            w.join();
        }

        Ok(())
    }

    /// Folds every worker's [`crate::stats::Statistics`] into one
    /// pool-wide [`PoolStatistics`].
    pub fn get_statistics() -> Option<PoolStatistics> {
        let guard = pool_cell().lock().unwrap();
        let state = guard.as_ref()?;
        Some(stats::reduce(&state.workers))
    }

    pub fn get_one_statistic(kind: StatKind) -> Option<u64> {
        let guard = pool_cell().lock().unwrap();
        let state = guard.as_ref()?;
        Some(stats::reduce_one(&state.workers, kind))
    }
}

