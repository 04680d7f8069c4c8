/// Per-thread setup/teardown run on a worker's own thread, before and after
/// its poll loop. Stands in for the external module-init/module-finish
/// collaborator the worker thread entry point calls out to; `corepool` has
/// no such modules of its own, so [`NoopThreadHooks`] is the default.
pub trait ThreadHooks: Send + Sync {
    /// Returns `false` to abandon the thread before it enters its poll loop.
    fn thread_init(&self) -> bool {
        true
    }

    fn thread_finish(&self) {}
}

#[derive(Default)]
pub struct NoopThreadHooks;

impl ThreadHooks for NoopThreadHooks {}

/// Work a worker runs once per poll cycle, after draining its event batch
/// and before it goes back to polling. Stands in for the idle-session sweep
/// and zombie-connection reclamation the original core interleaves with its
/// event loop; both are out of scope here, so [`NoopCycleHooks`] is the
/// default.
pub trait CycleHooks: Send + Sync {
    fn process_idle_sessions(&self, worker_id: usize) {
        let _ = worker_id;
    }

    fn process_zombies(&self, worker_id: usize) {
        let _ = worker_id;
    }
}

#[derive(Default)]
pub struct NoopCycleHooks;

impl CycleHooks for NoopCycleHooks {}
