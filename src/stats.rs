use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::worker::Worker;

/// Size of the per-worker "how many fds were ready in one poll" histogram.
pub const MAXNFDS: usize = 256;
/// Number of non-overflow buckets in the queue/exec-time histograms; bucket
/// `N_QUEUE_TIMES` itself is the overflow bucket for anything at or beyond
/// it.
pub const N_QUEUE_TIMES: usize = 30;

/// One worker's live counters, each independently atomic so a message
/// handler running on another thread (via [`crate::message::MSG_CALL`]) can
/// bump them without the owning worker taking a lock on its own hot path.
pub struct Statistics {
    pub n_read: AtomicU64,
    pub n_write: AtomicU64,
    pub n_error: AtomicU64,
    pub n_hup: AtomicU64,
    pub n_accept: AtomicU64,
    pub n_polls: AtomicU64,
    pub n_pollev: AtomicU64,
    pub n_nbpollev: AtomicU64,
    pub blockingpolls: AtomicU64,
    pub evq_length: AtomicU64,
    pub evq_max: AtomicU64,
    pub maxqtime: AtomicU64,
    pub maxexectime: AtomicU64,
    pub n_fds: [AtomicU64; MAXNFDS],
    pub qtimes: [AtomicU64; N_QUEUE_TIMES + 1],
    pub exectimes: [AtomicU64; N_QUEUE_TIMES + 1],
}

impl Statistics {
    pub fn new() -> Statistics {
        Statistics {
            n_read: AtomicU64::new(0),
            n_write: AtomicU64::new(0),
            n_error: AtomicU64::new(0),
            n_hup: AtomicU64::new(0),
            n_accept: AtomicU64::new(0),
            n_polls: AtomicU64::new(0),
            n_pollev: AtomicU64::new(0),
            n_nbpollev: AtomicU64::new(0),
            blockingpolls: AtomicU64::new(0),
            evq_length: AtomicU64::new(0),
            evq_max: AtomicU64::new(0),
            maxqtime: AtomicU64::new(0),
            maxexectime: AtomicU64::new(0),
            n_fds: std::array::from_fn(|_| AtomicU64::new(0)),
            qtimes: std::array::from_fn(|_| AtomicU64::new(0)),
            exectimes: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            n_read: self.n_read.load(Ordering::Relaxed),
            n_write: self.n_write.load(Ordering::Relaxed),
            n_error: self.n_error.load(Ordering::Relaxed),
            n_hup: self.n_hup.load(Ordering::Relaxed),
            n_accept: self.n_accept.load(Ordering::Relaxed),
            n_polls: self.n_polls.load(Ordering::Relaxed),
            n_pollev: self.n_pollev.load(Ordering::Relaxed),
            n_nbpollev: self.n_nbpollev.load(Ordering::Relaxed),
            blockingpolls: self.blockingpolls.load(Ordering::Relaxed),
            evq_length: self.evq_length.load(Ordering::Relaxed),
            evq_max: self.evq_max.load(Ordering::Relaxed),
            maxqtime: self.maxqtime.load(Ordering::Relaxed),
            maxexectime: self.maxexectime.load(Ordering::Relaxed),
            n_fds: std::array::from_fn(|i| self.n_fds[i].load(Ordering::Relaxed)),
            qtimes: std::array::from_fn(|i| self.qtimes[i].load(Ordering::Relaxed)),
            exectimes: std::array::from_fn(|i| self.exectimes[i].load(Ordering::Relaxed)),
        }
    }
}

impl Default for Statistics {
    fn default() -> Statistics {
        Statistics::new()
    }
}

/// A plain-value read of one worker's [`Statistics`] at a point in time, and
/// also the shape [`reduce`] folds a whole pool's workers down into.
#[derive(Debug, Clone)]
pub struct StatSnapshot {
    pub n_read: u64,
    pub n_write: u64,
    pub n_error: u64,
    pub n_hup: u64,
    pub n_accept: u64,
    pub n_polls: u64,
    pub n_pollev: u64,
    pub n_nbpollev: u64,
    pub blockingpolls: u64,
    pub evq_length: u64,
    pub evq_max: u64,
    pub maxqtime: u64,
    pub maxexectime: u64,
    pub n_fds: [u64; MAXNFDS],
    pub qtimes: [u64; N_QUEUE_TIMES + 1],
    pub exectimes: [u64; N_QUEUE_TIMES + 1],
}

/// Pool-wide statistics, one reduction per [`crate::pool::Pool::get_statistics`]
/// call: counters sum, `evq_max`/`maxqtime`/`maxexectime` take the worst
/// worker, `evq_length` and the two latency histograms average.
pub type PoolStatistics = StatSnapshot;

/// One named counter from [`PoolStatistics`], for
/// [`crate::pool::Pool::get_one_statistic`] callers that want a single value
/// without paying for a full reduction's worth of cloning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Read,
    Write,
    Error,
    Hup,
    Accept,
    EvqLength,
    EvqMax,
    MaxQTime,
    MaxExecTime,
}

pub(crate) fn reduce(workers: &[Arc<Worker>]) -> PoolStatistics {
    let snaps: Vec<StatSnapshot> = workers.iter().map(|w| w.statistics().snapshot()).collect();
    let n = (snaps.len() as u64).max(1);

    let sum = |f: fn(&StatSnapshot) -> u64| snaps.iter().map(f).sum::<u64>();
    let max = |f: fn(&StatSnapshot) -> u64| snaps.iter().map(f).max().unwrap_or(0);

    let mut n_fds = [0u64; MAXNFDS];
    for (i, slot) in n_fds.iter_mut().enumerate() {
        *slot = snaps.iter().map(|s| s.n_fds[i]).sum();
    }

    let mut qtimes = [0u64; N_QUEUE_TIMES + 1];
    let mut exectimes = [0u64; N_QUEUE_TIMES + 1];
    for i in 0..=N_QUEUE_TIMES {
        qtimes[i] = snaps.iter().map(|s| s.qtimes[i]).sum::<u64>() / n;
        exectimes[i] = snaps.iter().map(|s| s.exectimes[i]).sum::<u64>() / n;
    }

    PoolStatistics {
        n_read: sum(|s| s.n_read),
        n_write: sum(|s| s.n_write),
        n_error: sum(|s| s.n_error),
        n_hup: sum(|s| s.n_hup),
        n_accept: sum(|s| s.n_accept),
        n_polls: sum(|s| s.n_polls),
        n_pollev: sum(|s| s.n_pollev),
        n_nbpollev: sum(|s| s.n_nbpollev),
        blockingpolls: sum(|s| s.blockingpolls),
        evq_length: sum(|s| s.evq_length) / n,
        evq_max: max(|s| s.evq_max),
        maxqtime: max(|s| s.maxqtime),
        maxexectime: max(|s| s.maxexectime),
        n_fds,
        qtimes,
        exectimes,
    }
}

pub(crate) fn reduce_one(workers: &[Arc<Worker>], kind: StatKind) -> u64 {
    let reduced = reduce(workers);

    match kind {
        StatKind::Read => reduced.n_read,
        StatKind::Write => reduced.n_write,
        StatKind::Error => reduced.n_error,
        StatKind::Hup => reduced.n_hup,
        StatKind::Accept => reduced.n_accept,
        StatKind::EvqLength => reduced.evq_length,
        StatKind::EvqMax => reduced.evq_max,
        StatKind::MaxQTime => reduced.maxqtime,
        StatKind::MaxExecTime => reduced.maxexectime,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snapshot_reads_back_what_was_stored() {
        let stats = Statistics::new();
        stats.n_read.fetch_add(5, Ordering::Relaxed);
        stats.n_fds[2].fetch_add(1, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.n_read, 5);
        assert_eq!(snap.n_fds[2], 1);
    }
}
