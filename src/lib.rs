//! Worker-pool and event-dispatch core for a multi-threaded network proxy.
//!
//! A [`Pool`] owns a fixed set of [`Worker`]s. Each worker drives its own
//! private, edge-triggered [`epoll::Epoll`] instance and a lock-free
//! message queue, and additionally polls a pollset shared by the whole
//! pool — level-triggered, so that whichever worker gets to it next still
//! sees it ready — which is how inbound connections fan out across workers
//! without a dedicated accept thread.
//!
//! # Example
//!
//! ```no_run
//! use corepool::{Config, Pool};
//!
//! Pool::init(Config::default()).unwrap();
//! Pool::start().unwrap();
//!
//! // ... register listening sockets with Pool::add_shared_fd, run the
//! // process, eventually ...
//!
//! Pool::shutdown_all();
//! Pool::finish().unwrap();
//! ```

mod sys;

pub mod epoll;

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod hooks;
pub mod message;
pub mod poll_data;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod waker;
pub mod worker;

pub use config::Config;
pub use epoll::{Epoll, EpollOpt, Event, Events, Ready, Source, Token};
pub use error::{PollError, PoolError};
pub use heartbeat::{FakeHeartbeat, HeartbeatClock, RealHeartbeat};
pub use hooks::{CycleHooks, NoopCycleHooks, NoopThreadHooks, ThreadHooks};
pub use message::{Message, MessageQueue, MSG_CALL, MSG_PING, MSG_SHUTDOWN};
pub use poll_data::{
    ActionFlags, PollData, ACTION_ACCEPT, ACTION_ERROR, ACTION_HUP, ACTION_NOP, ACTION_READ,
    ACTION_WRITE,
};
pub use pool::Pool;
pub use stats::{PoolStatistics, StatKind, Statistics};
pub use waker::Waker;
pub use worker::{Worker, WorkerState};
