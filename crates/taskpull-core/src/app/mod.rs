//! App - アプリケーション層
//!
//! ports を組み合わせてスケジューリングを実装します。
//!
//! # 主要コンポーネント
//! - **TaskManager**: タスクストアへの唯一の入口（claim / start / save_result）
//! - **Controller**: READY に対してタスクを配り、DONE を記録する
//! - **Worker**: READY -> START -> execute -> DONE のループ
//! - **WorkerGroup / run_local**: 1 プロセス内でグループ全体を動かす

pub mod controller;
pub mod group;
pub mod task_manager;
pub mod worker;

pub use self::controller::{Controller, RunSummary};
pub use self::group::{WorkerGroup, run_local};
pub use self::task_manager::TaskManager;
pub use self::worker::{Worker, WorkerSummary};
