//! Impls - ports の実装
//!
//! - **LocalFabric**: in-process `Communicator` group (tokio mpsc)
//! - **CommandExecutor**: `TaskExecutor` that runs an external program per task
//!
//! Task store implementations live in `store`.

pub mod command_executor;
pub mod local_fabric;

pub use self::command_executor::CommandExecutor;
pub use self::local_fabric::{LocalCommunicator, LocalFabric};
