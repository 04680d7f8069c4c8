//! Scenario 6 from the spec's testable-properties list: an `add_fd` call
//! that hits an unrecoverable `epoll_ctl` errno (`EBADF`, here, from a
//! descriptor that was never opened) must abort the process rather than
//! return an error the caller could paper over.
//!
//! `std::process::abort()` can't be caught in-process, so this re-invokes
//! the test binary as a child, filtered down to just this test, with an
//! environment flag telling the child to actually perform the fatal call
//! instead of spawning another child. The parent then asserts the child
//! died to `SIGABRT`.

use std::env;
use std::os::unix::io::RawFd;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

use corepool::{Config, PollData, Pool, Ready};

const TRIGGER_ENV: &str = "COREPOOL_TRIGGER_FATAL_ADD_FD";

#[test]
fn add_fd_with_ebadf_aborts_the_process() {
    if env::var_os(TRIGGER_ENV).is_some() {
        Pool::init(Config { thread_count: 1, number_poll_spins: 4, max_poll_sleep_ms: 20 }).unwrap();
        let worker = Pool::get(0).unwrap();

        // Never opened by this process, so epoll_ctl(ADD) fails EBADF.
        let bad_fd: RawFd = 987_654;
        let pdata = PollData::handler(|_worker_id, _events| corepool::ACTION_NOP);

        let _ = worker.add_fd(bad_fd, Ready::readable(), pdata);
        panic!("add_fd with an invalid descriptor must abort before returning");
    }

    let exe = env::current_exe().expect("test binary path");
    let output = Command::new(exe)
        .arg("--exact")
        .arg("add_fd_with_ebadf_aborts_the_process")
        .arg("--test-threads=1")
        .env(TRIGGER_ENV, "1")
        .output()
        .expect("failed to spawn child test process");

    assert!(!output.status.success(), "child process should not exit successfully");
    assert_eq!(
        output.status.signal(),
        Some(libc::SIGABRT),
        "child did not die to SIGABRT (status: {:?}, stderr: {})",
        output.status,
        String::from_utf8_lossy(&output.stderr),
    );
}
