//! taskpull-core
//!
//! Core building blocks for pull-based task scheduling: a controller hands
//! out tasks from a persistent priority queue to workers that ask for them.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Priority, Rank, Task, TaskResult, Outcome）
//! - **protocol**: READY / START / DONE / EXIT のタグとメッセージ
//! - **ports**: 抽象化レイヤー（TaskStore, Communicator, TaskExecutor）
//! - **store**: TaskStore の実装（SQLite, in-memory）
//! - **impls**: その他の実装（LocalFabric, CommandExecutor）
//! - **app**: TaskManager, Controller, Worker, run_local
//! - **config**: 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod protocol;
pub mod store;

pub use app::{Controller, RunSummary, TaskManager, Worker, WorkerGroup, WorkerSummary, run_local};
pub use config::Config;
pub use error::{ConfigError, ExecutorError, ProtocolError, SchedulerError, StoreError};
pub use observability::StatusCounts;
