//! Controller - hands out tasks to workers on request and records results.
//!
//! # フロー
//! 1. READY(worker)  -> claim_next -> START(task) or EXIT
//! 2. DONE(result)   -> save_result
//! 3. EXIT(worker)   -> exited += 1
//! 4. exited == workers -> drained
//!
//! The controller's only suspension point is the receive from any worker.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{Instrument, Span, error, info, info_span};

use crate::app::TaskManager;
use crate::domain::{Rank, RunId, TaskResult};
use crate::error::{ProtocolError, SchedulerError};
use crate::ports::{Communicator, TaskStore};
use crate::protocol::{Role, Tag, encode};

/// Bookkeeping of one controller invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub workers: usize,
    /// START messages sent.
    pub dispatched: u64,
    /// DONE messages received.
    pub completed: u64,
    /// EXIT acknowledgements received.
    pub exited: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Tasks dispatched but not yet reported back.
    pub fn in_flight(&self) -> u64 {
        self.dispatched.saturating_sub(self.completed)
    }
}

pub struct Controller<'a, C, S: TaskStore> {
    comm: C,
    manager: &'a TaskManager<S>,
    run_id: RunId,
    span: Span,
}

impl<'a, C: Communicator, S: TaskStore> Controller<'a, C, S> {
    pub fn new(comm: C, manager: &'a TaskManager<S>) -> Self {
        let run_id = RunId::new();
        let span = info_span!("controller", run = %run_id, rank = %comm.rank());
        Self {
            comm,
            manager,
            run_id,
            span,
        }
    }

    /// Log under `span` instead of the default `controller` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Serve workers until every one of them has exited.
    pub async fn run(mut self) -> Result<RunSummary, SchedulerError> {
        let span = self.span.clone();
        self.serve().instrument(span).await
    }

    async fn serve(&mut self) -> Result<RunSummary, SchedulerError> {
        let workers = self.comm.size().saturating_sub(1);
        if workers == 0 {
            return Err(SchedulerError::NoWorkers);
        }

        let started = Instant::now();
        let mut summary = RunSummary {
            run_id: self.run_id,
            workers,
            dispatched: 0,
            completed: 0,
            exited: 0,
            elapsed: Duration::ZERO,
        };

        let tasks = self.manager.count_pending().await?;
        info!(tasks, workers, "controller starting");

        while summary.exited < workers {
            let envelope = self.comm.recv().await?;
            let source = envelope.source;
            let tag = envelope.tag(Role::Controller).inspect_err(|e| {
                error!(tag = envelope.tag, worker = %source, error = %e, "unknown tag");
            })?;

            match tag {
                Tag::Ready => {
                    // Worker is ready, so send it a task
                    match self.manager.claim_next().await? {
                        Some(task) => {
                            let priority = task.priority;
                            self.manager.start_task(priority).await?;
                            self.comm
                                .send(source, Tag::Start, encode(Tag::Start, &task)?)
                                .await?;
                            summary.dispatched += 1;
                            info!(%priority, worker = %source, "sending task");
                        }
                        None => {
                            self.comm.send(source, Tag::Exit, Value::Null).await?;
                        }
                    }
                }
                Tag::Done => {
                    let result: TaskResult = envelope.decode(Tag::Done)?;
                    info!(
                        priority = %result.priority,
                        status = %result.status,
                        worker = %source,
                        "got result from worker"
                    );
                    self.manager.save_result(&result).await?;
                    summary.completed += 1;
                }
                Tag::Exit => {
                    info!(worker = %source, "worker exited");
                    summary.exited += 1;
                }
                Tag::Start => {
                    let err = ProtocolError::UnexpectedTag {
                        role: Role::Controller,
                        tag,
                        from: source,
                    };
                    error!(error = %err, "protocol violation");
                    return Err(err.into());
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            dispatched = summary.dispatched,
            completed = summary.completed,
            in_flight = summary.in_flight(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "controller finishing"
        );
        Ok(summary)
    }

    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }
}
