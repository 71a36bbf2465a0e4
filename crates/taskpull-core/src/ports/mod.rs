//! Ports - 抽象化レイヤー
//!
//! Each trait is a seam to something outside the scheduling core:
//! - `TaskStore`: durable task queue (SQLite file, or in-memory for tests)
//! - `Communicator`: tagged point-to-point message fabric of a process group
//! - `TaskExecutor`: the function that actually runs a task

pub mod communicator;
pub mod executor;
pub mod task_store;

pub use self::communicator::Communicator;
pub use self::executor::TaskExecutor;
pub use self::task_store::TaskStore;
