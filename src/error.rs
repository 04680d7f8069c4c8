use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

/// Failures from registering or removing a descriptor in a pollset.
///
/// Only the three errno values the kernel documents as recoverable for
/// `epoll_ctl` surface here. Every other errno means the calling process's
/// view of its own fd table or epoll instance is corrupt, which is not
/// something a caller can sensibly recover from — see [`resolve_ctl_error`].
#[derive(Debug, Error)]
pub enum PollError {
    #[error("file descriptor {fd} is already registered")]
    AlreadyRegistered { fd: RawFd },
    #[error("epoll instance has no space left to watch file descriptor {fd}")]
    ResourceExhausted { fd: RawFd },
    #[error("file descriptor {fd} is not registered")]
    NotRegistered { fd: RawFd },
}

/// Failures from [`crate::pool::Pool::init`] and friends.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is already initialized")]
    AlreadyInitialized,
    #[error("worker pool has not been initialized")]
    NotInitialized,
    #[error("failed to create the shared listener epoll instance")]
    SharedListener(#[source] io::Error),
    #[error("failed to create worker {id}")]
    WorkerCreate { id: usize, #[source] source: io::Error },
    #[error("failed to spawn thread for worker {id}")]
    ThreadSpawn { id: usize, #[source] source: io::Error },
    #[error(transparent)]
    Poll(#[from] PollError),
}

/// Turns an `epoll_ctl` failure into a [`PollError`] or aborts the process.
///
/// `EEXIST`/`ENOSPC` (on add) and `ENOENT` (on delete) are the errno values
/// the kernel documents as ordinary operating conditions — a caller racing
/// itself, or a watch limit being hit. Everything else (`EBADF`, `EINVAL`,
/// `ENOMEM`, `EPERM`, or an undocumented errno) means the fd table or the
/// epoll instance itself is in a state the rest of the pool can no longer
/// reason about, so the process aborts rather than continuing on corrupt
/// state — mirroring the `raise(SIGABRT)` the core takes in the same cases.
pub(crate) fn resolve_ctl_error(fd: RawFd, adding: bool, err: io::Error) -> PollError {
    let errno = err.raw_os_error();

    match (adding, errno) {
        (true, Some(libc::EEXIST)) => {
            log::error!("file descriptor {} already present in an epoll instance", fd);
            PollError::AlreadyRegistered { fd }
        }
        (true, Some(libc::ENOSPC)) => {
            log::error!("epoll watch limit reached adding file descriptor {}", fd);
            PollError::ResourceExhausted { fd }
        }
        (false, Some(libc::ENOENT)) => {
            log::error!("file descriptor {} was not registered", fd);
            PollError::NotRegistered { fd }
        }
        (_, errno) => {
            log::error!(
                "unrecoverable epoll_ctl error on file descriptor {}: {} (errno {:?})",
                fd, err, errno
            );
            std::process::abort();
        }
    }
}
