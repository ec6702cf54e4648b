//! # threadloom API
//!
//! Boundary types shared between the threadloom worker pool and anything that
//! wants to hand it work: schedulers, stream operators, or plain callers.
//!
//! ## Core Components
//!
//! - **Executor**: the "run this unit of work" capability
//! - **Errors**: why a submission was refused
//! - **Events**: lifecycle event shapes and the sink that receives them
//!
//! ## Usage Example
//!
//! ```rust
//! use threadloom_api::{Executor, RejectedExecution, Task};
//!
//! struct Inline;
//!
//! impl Executor for Inline {
//!     fn execute_task(&self, task: Task) -> Result<(), RejectedExecution> {
//!         task();
//!         Ok(())
//!     }
//! }
//!
//! fn schedule(executor: &dyn Executor) -> Result<(), RejectedExecution> {
//!     executor.execute_task(Box::new(|| println!("hello from the executor")))
//! }
//!
//! schedule(&Inline).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! - [`executor`]: the `Executor` trait and `Task` alias
//! - [`errors`]: `RejectedExecution` and `Cancelled`
//! - [`events`]: `PoolEvent`, `RetireReason` and `EventSink`

pub mod errors;
pub mod events;
pub mod executor;

pub use errors::{Cancelled, RejectedExecution};
pub use events::{EventSink, NoopSink, PoolEvent, RetireReason};
pub use executor::{Executor, Task};
