use std::env;

/// Tunables for [`crate::pool::Pool::init`].
///
/// `Default` picks the same values the core falls back to when its
/// configuration file is silent on these settings; [`Config::from_env`]
/// layers environment overrides on top, the way a deployment would pin them
/// without recompiling.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Number of workers in the pool. One thread, one private pollset, one
    /// message queue per worker — fixed for the pool's lifetime.
    pub thread_count: usize,
    /// Consecutive empty nonblocking polls a worker tolerates before
    /// switching to a blocking poll.
    pub number_poll_spins: u32,
    /// Ceiling, in milliseconds, on the blocking poll timeout once a worker
    /// has gone idle long enough to fully back off.
    pub max_poll_sleep_ms: u32,
}

const DEFAULT_NUMBER_POLL_SPINS: u32 = 9;
const DEFAULT_MAX_POLL_SLEEP_MS: u32 = 10;

impl Default for Config {
    fn default() -> Config {
        Config {
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            number_poll_spins: DEFAULT_NUMBER_POLL_SPINS,
            max_poll_sleep_ms: DEFAULT_MAX_POLL_SLEEP_MS,
        }
    }
}

impl Config {
    /// Starts from [`Config::default`] and overrides with
    /// `COREPOOL_THREADS` / `COREPOOL_NBPOLLS` / `COREPOOL_POLLSLEEP` when
    /// they parse, leaving the default in place otherwise.
    pub fn from_env() -> Config {
        let mut cfg = Config::default();

        if let Ok(v) = env::var("COREPOOL_THREADS") {
            if let Ok(n) = v.parse() {
                cfg.thread_count = n;
            }
        }
        if let Ok(v) = env::var("COREPOOL_NBPOLLS") {
            if let Ok(n) = v.parse() {
                cfg.number_poll_spins = n;
            }
        }
        if let Ok(v) = env::var("COREPOOL_POLLSLEEP") {
            if let Ok(n) = v.parse() {
                cfg.max_poll_sleep_ms = n;
            }
        }

        cfg
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_thread_count_is_at_least_one() {
        assert!(Config::default().thread_count >= 1);
    }
}
