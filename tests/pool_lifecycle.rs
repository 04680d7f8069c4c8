//! End-to-end coverage of `Pool`'s lifecycle and fan-out behavior, driven
//! through real threads, sockets and message posts rather than mocked
//! collaborators.
//!
//! `Pool` is one process-wide singleton, so every test here takes
//! `pool_lock()` for its whole body and tears the pool down with
//! `Pool::finish()` before returning, even on an assertion failure path,
//! to avoid leaking a live pool (and its threads) into the next test.

use std::ffi::CString;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use corepool::{Config, Epoll, EpollOpt, PollData, Pool, Ready, Token, Worker, WorkerState, MSG_CALL, MSG_PING};

fn pool_lock() -> MutexGuard<'static, ()> {
    let _ = env_logger::try_init();

    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    match LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

fn small_config(thread_count: usize) -> Config {
    Config { thread_count, number_poll_spins: 4, max_poll_sleep_ms: 20 }
}

#[test]
fn ping_message_is_drained_without_panicking() {
    let _guard = pool_lock();

    Pool::init(small_config(2)).unwrap();
    Pool::start().unwrap();

    let worker = Pool::get(0).unwrap();
    let text = CString::new("hi").unwrap();
    assert!(worker.post_message(MSG_PING, 0, text.into_raw() as isize));

    // A bare PING (no string payload) must also be handled.
    assert!(worker.post_message(MSG_PING, 0, 0));

    wait_until(|| Pool::get_statistics().unwrap().n_polls > 0, Duration::from_secs(1));

    Pool::shutdown_all();
    Pool::join();
    Pool::finish().unwrap();
}

#[test]
fn shutdown_all_stops_every_worker() {
    let _guard = pool_lock();

    Pool::init(small_config(4)).unwrap();
    Pool::start().unwrap();

    Pool::shutdown_all();
    Pool::join();

    for id in 0..4 {
        let worker = Pool::get(id).unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped, "worker {id} did not stop");
    }

    Pool::finish().unwrap();
}

#[test]
fn shutdown_called_twice_posts_at_most_one_shutdown() {
    let _guard = pool_lock();

    Pool::init(small_config(1)).unwrap();
    Pool::start().unwrap();

    let worker = Pool::get(0).unwrap();
    worker.shutdown();
    worker.shutdown();

    worker.join();
    assert_eq!(worker.state(), WorkerState::Stopped);

    Pool::finish().unwrap();
}

#[test]
fn idle_worker_transitions_from_spinning_to_blocking_polls() {
    let _guard = pool_lock();

    // Matches spec.md scenario 5 verbatim: small number_poll_spins/
    // max_poll_sleep_ms so an idle worker quickly exceeds 10 blocking
    // polls and its per-poll timeout ramps to its cap.
    Pool::init(Config { thread_count: 1, number_poll_spins: 5, max_poll_sleep_ms: 100 }).unwrap();
    Pool::start().unwrap();

    let done = wait_until(
        || Pool::get_statistics().map(|s| s.blockingpolls).unwrap_or(0) >= 10,
        Duration::from_secs(5),
    );
    assert!(
        done,
        "only {} blocking polls observed",
        Pool::get_statistics().unwrap().blockingpolls
    );

    Pool::shutdown_all();
    Pool::join();
    Pool::finish().unwrap();
}

#[test]
fn broadcast_call_message_reaches_every_worker() {
    let _guard = pool_lock();

    Pool::init(small_config(3)).unwrap();
    Pool::start().unwrap();

    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.store(0, Ordering::SeqCst);

    fn bump(_worker_id: usize, _arg: *mut std::ffi::c_void) {
        COUNTER.fetch_add(1, Ordering::SeqCst);
    }

    let accepted = Pool::broadcast_message(MSG_CALL, bump as usize as isize, 0);
    assert_eq!(accepted, 3);

    let reached = wait_until(|| COUNTER.load(Ordering::SeqCst) == 3, Duration::from_secs(1));
    assert!(reached, "only {} of 3 workers ran the call", COUNTER.load(Ordering::SeqCst));

    Pool::shutdown_all();
    Pool::join();
    Pool::finish().unwrap();
}

#[test]
fn accept_fan_out_spreads_across_workers() {
    let _guard = pool_lock();

    Pool::init(small_config(2)).unwrap();
    Pool::start().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let fd = listener.as_raw_fd();

    let per_worker: Arc<[AtomicUsize; 2]> = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
    let accepted = per_worker.clone();

    let pdata = PollData::handler(move |worker_id, _events| {
        if listener.accept().is_ok() {
            accepted[worker_id].fetch_add(1, Ordering::SeqCst);
            corepool::ACTION_ACCEPT
        } else {
            corepool::ACTION_NOP
        }
    });

    Pool::add_shared_fd(fd, Ready::readable(), pdata).unwrap();

    for _ in 0..100 {
        let stream = TcpStream::connect(addr).unwrap();
        drop(stream);
    }

    let total = |counts: &[AtomicUsize; 2]| {
        counts[0].load(Ordering::SeqCst) + counts[1].load(Ordering::SeqCst)
    };

    let done = wait_until(|| total(&per_worker) >= 100, Duration::from_secs(5));
    assert!(done, "only {} of 100 connections were accepted", total(&per_worker));
    assert_eq!(total(&per_worker), 100);
    assert!(per_worker[0].load(Ordering::SeqCst) >= 1, "worker 0 saw no accepts");
    assert!(per_worker[1].load(Ordering::SeqCst) >= 1, "worker 1 saw no accepts");

    Pool::remove_shared_fd(fd).unwrap();
    Pool::shutdown_all();
    Pool::join();
    Pool::finish().unwrap();
}

#[test]
fn get_statistics_sums_accept_counts_across_workers() {
    let _guard = pool_lock();

    Pool::init(small_config(2)).unwrap();
    Pool::start().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let fd = listener.as_raw_fd();

    let pdata = PollData::handler(move |_worker_id, _events| {
        if listener.accept().is_ok() {
            corepool::ACTION_ACCEPT
        } else {
            corepool::ACTION_NOP
        }
    });
    Pool::add_shared_fd(fd, Ready::readable(), pdata).unwrap();

    for _ in 0..10 {
        drop(TcpStream::connect(addr).unwrap());
    }

    let done = wait_until(
        || Pool::get_statistics().map(|s| s.n_accept).unwrap_or(0) >= 10,
        Duration::from_secs(5),
    );
    assert!(done);
    assert_eq!(Pool::get_statistics().unwrap().n_accept, 10);

    Pool::remove_shared_fd(fd).unwrap();
    Pool::shutdown_all();
    Pool::join();
    Pool::finish().unwrap();
}

#[test]
fn init_finish_init_round_trips() {
    let _guard = pool_lock();

    Pool::init(small_config(1)).unwrap();
    Pool::start().unwrap();
    Pool::shutdown_all();
    Pool::join();
    Pool::finish().unwrap();

    Pool::init(small_config(1)).unwrap();
    Pool::start().unwrap();
    Pool::shutdown_all();
    Pool::join();
    Pool::finish().unwrap();
}

#[test]
fn init_twice_without_finish_fails() {
    let _guard = pool_lock();

    Pool::init(small_config(1)).unwrap();
    let err = Pool::init(small_config(1));
    assert!(err.is_err());

    Pool::finish().unwrap();
}

#[test]
fn add_fd_remove_fd_round_trip_before_start() {
    let _guard = pool_lock();

    Pool::init(small_config(1)).unwrap();

    let worker: Arc<Worker> = Pool::get(0).unwrap();

    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0);
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let pdata = PollData::handler(|_id, _events| corepool::ACTION_READ);
    worker.add_fd(read_fd, Ready::readable(), pdata.clone()).unwrap();
    worker.remove_fd(read_fd).unwrap();
    // Re-adding after a clean remove must succeed, matching the "prior
    // state" invariant for add/remove round trips.
    worker.add_fd(read_fd, Ready::readable(), pdata).unwrap();
    worker.remove_fd(read_fd).unwrap();

    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }

    Pool::finish().unwrap();
}

#[test]
fn epoll_opt_add_remove_round_trips_through_the_ioctl() {
    let epoll = Epoll::new().unwrap();
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let (read_fd, write_fd) = (fds[0], fds[1]);

    // `Epoll::add` itself doesn't force a trigger mode -- that's `Worker`'s
    // and `SharedListener`'s job -- so this only pins that the opts plumbing
    // (`EpollOpt::edge()`/`EpollOpt::level()`) actually round-trips through
    // the ioctl layer by not erroring out.
    epoll.add(&read_fd, Token(read_fd as usize), Ready::readable(), EpollOpt::edge()).unwrap();
    epoll.delete(&read_fd).unwrap();

    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}
