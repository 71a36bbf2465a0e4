use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Span, error, info, info_span};

use crate::app::{Controller, RunSummary, TaskManager, Worker, WorkerSummary};
use crate::domain::{Rank, RunId};
use crate::error::SchedulerError;
use crate::impls::LocalFabric;
use crate::ports::{Communicator, TaskExecutor, TaskStore};

/// Worker group handle.
/// - 各ワーカーは自分の tokio task で動く
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    joins: Vec<(Rank, JoinHandle<Result<WorkerSummary, SchedulerError>>)>,
}

impl WorkerGroup {
    /// Spawn one worker per communicator, all sharing `executor`.
    pub fn spawn<C, E>(comms: Vec<C>, executor: Arc<E>, parent: &Span) -> Self
    where
        C: Communicator + 'static,
        E: TaskExecutor,
    {
        let joins = comms
            .into_iter()
            .map(|comm| {
                let rank = comm.rank();
                let span = info_span!(parent: parent, "worker", %rank);
                let worker = Worker::new(comm, Arc::clone(&executor)).with_span(span);
                (rank, tokio::spawn(worker.run()))
            })
            .collect();
        Self { joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Cancel every worker at its next suspension point.
    pub fn abort(&self) {
        for (_, join) in &self.joins {
            join.abort();
        }
    }

    /// Wait for all workers.
    ///
    /// Every worker is awaited; the first failure (an error the worker
    /// returned, or a panic) is then reported for the whole group.
    pub async fn join(self) -> Result<Vec<WorkerSummary>, SchedulerError> {
        let mut summaries = Vec::with_capacity(self.joins.len());
        let mut failure = None;
        for (rank, join) in self.joins {
            match join.await {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(e)) => {
                    error!(%rank, error = %e, "worker ended with an error");
                    failure.get_or_insert(e);
                }
                Err(e) if e.is_panic() => {
                    error!(%rank, "worker panicked");
                    failure.get_or_insert(SchedulerError::WorkerPanicked(rank));
                }
                Err(_) => {}
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(summaries),
        }
    }
}

/// Run a whole process group inside this process: one controller on the
/// current task and `workers` workers on their own tasks.
pub async fn run_local<S, E>(
    manager: &TaskManager<S>,
    executor: Arc<E>,
    workers: usize,
) -> Result<RunSummary, SchedulerError>
where
    S: TaskStore,
    E: TaskExecutor,
{
    if workers == 0 {
        return Err(SchedulerError::NoWorkers);
    }

    let run_id = RunId::new();
    let span = info_span!("run", run = %run_id);

    let mut comms = LocalFabric::group(workers + 1);
    let controller_comm = comms.remove(0);
    let group = WorkerGroup::spawn(comms, executor, &span);

    let controller_span = info_span!(parent: &span, "controller", rank = %controller_comm.rank());
    let controller = Controller::new(controller_comm, manager)
        .with_run_id(run_id)
        .with_span(controller_span);

    match controller.run().await {
        Ok(summary) => {
            let done = group.join().await?;
            let executed: u64 = done.iter().map(|s| s.executed).sum();
            info!(parent: &span, workers = done.len(), executed, "all workers joined");
            Ok(summary)
        }
        Err(e) => {
            group.abort();
            // aborted workers are not an error of their own
            let _ = group.join().await;
            Err(e)
        }
    }
}
