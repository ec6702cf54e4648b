//! # threadloom
//!
//! A bounded worker pool where every worker owns a dedicated queue and a
//! dedicated OS thread.
//!
//! ## Key Concepts
//! - Dispatch: tasks are spread over worker queues round robin
//! - Backpressure: a full queue makes `execute` wait briefly, then reject
//! - Elasticity: workers are added under load and retire when idle
//! - Two shutdowns: a graceful drain and a forced stop
//!
//! ## Usage Example
//!
//! ```rust
//! use std::time::Duration;
//! use threadloom::{PoolConfig, ThreadPool};
//!
//! let pool = ThreadPool::new(PoolConfig::new(2, 4, 1, Duration::from_secs(5), 16)).unwrap();
//!
//! pool.execute(|| println!("fire and forget")).unwrap();
//! let answer = pool.submit(|| 6 * 7).unwrap();
//! assert_eq!(answer.get().unwrap(), 42);
//!
//! pool.shutdown();
//! assert!(pool.await_termination(Duration::from_secs(5)));
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod logging;
pub mod naming;
pub mod pool;
pub mod registry;
mod worker;

pub use cancel::CancelToken;
pub use config::PoolConfig;
pub use error::{BuildError, ConfigError, TaskError};
pub use events::TracingSink;
pub use handle::{TaskHandle, TaskState};
pub use naming::ThreadFactory;
pub use pool::ThreadPool;
pub use registry::{WorkerInfo, WorkerStatus};

// Boundary types live in the api crate
pub use threadloom_api::{
    Cancelled, EventSink, Executor, NoopSink, PoolEvent, RejectedExecution, RetireReason, Task,
};
