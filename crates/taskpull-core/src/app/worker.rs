//! Worker - asks the controller for work, runs it, reports back.
//!
//! # ループ
//! 1. READY -> controller
//! 2. START(task) -> execute -> DONE(result)
//! 3. EXIT -> leave the loop
//!
//! Executor failures (errors and panics) never leave the loop: they are
//! reported as a `FATAL` result and the worker asks for the next task.
//! Whatever ends the loop, the worker's last message is EXIT.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::domain::{ExecutionReport, Rank, Task, TaskParameters, TaskResult};
use crate::error::{ExecutorError, ProtocolError, SchedulerError};
use crate::ports::{Communicator, TaskExecutor};
use crate::protocol::{Role, Tag, encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerSummary {
    /// Tasks received and reported, whatever their outcome.
    pub executed: u64,
    /// Of which ended as `FATAL` because the executor failed.
    pub fatal: u64,
}

pub struct Worker<C, E> {
    comm: C,
    executor: Arc<E>,
    span: Span,
}

impl<C: Communicator, E: TaskExecutor> Worker<C, E> {
    pub fn new(comm: C, executor: Arc<E>) -> Self {
        let span = info_span!("worker", rank = %comm.rank());
        Self {
            comm,
            executor,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    /// Run until the controller says EXIT, then acknowledge it.
    ///
    /// The acknowledgement is also sent when the loop ends on an error.
    pub async fn run(mut self) -> Result<WorkerSummary, SchedulerError> {
        let span = self.span.clone();
        async move {
            let mut summary = WorkerSummary::default();
            let served = self.serve(&mut summary).await;
            if let Err(e) = &served {
                error!(error = %e, "worker loop failed");
            }

            let ack = self
                .comm
                .send(Rank::CONTROLLER, Tag::Exit, Value::Null)
                .await;
            if let Err(e) = &ack {
                warn!(error = %e, "could not send EXIT to controller");
            }

            served?;
            ack?;
            info!(executed = summary.executed, fatal = summary.fatal, "worker exiting");
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self, summary: &mut WorkerSummary) -> Result<(), SchedulerError> {
        loop {
            self.comm
                .send(Rank::CONTROLLER, Tag::Ready, Value::Null)
                .await?;

            let envelope = self.comm.recv().await?;
            let source = envelope.source;
            if !source.is_controller() {
                return Err(ProtocolError::UnexpectedSource {
                    role: Role::Worker,
                    from: source,
                }
                .into());
            }

            match envelope.tag(Role::Worker)? {
                Tag::Start => {
                    let task: Task = envelope.decode(Tag::Start)?;
                    let (priority, parameters) = task.into_parts();
                    debug!(%priority, target_id = parameters.target_id, "got task");

                    let started = Instant::now();
                    let report = match self.execute(parameters.clone()).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(%priority, error = %e, "task failed");
                            summary.fatal += 1;
                            ExecutionReport::fatal(&e)
                        }
                    };
                    let result = TaskResult::new(priority, parameters, report, started.elapsed());

                    self.comm
                        .send(Rank::CONTROLLER, Tag::Done, encode(Tag::Done, &result)?)
                        .await?;
                    summary.executed += 1;
                }
                Tag::Exit => return Ok(()),
                tag @ (Tag::Ready | Tag::Done) => {
                    return Err(ProtocolError::UnexpectedTag {
                        role: Role::Worker,
                        tag,
                        from: source,
                    }
                    .into());
                }
            }
        }
    }

    /// Run the executor on its own task so that a panic is contained.
    async fn execute(&self, parameters: TaskParameters) -> Result<ExecutionReport, ExecutorError> {
        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.execute(parameters).await });
        match handle.await {
            Ok(result) => result,
            Err(join) if join.is_panic() => Err(ExecutorError::Panicked(panic_message(
                join.into_panic(),
            ))),
            Err(join) => Err(ExecutorError::Failed(join.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outcome, Priority};
    use crate::impls::LocalFabric;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl TaskExecutor for Echo {
        async fn execute(&self, parameters: TaskParameters) -> Result<ExecutionReport, ExecutorError> {
            match parameters.target_id {
                0 => panic!("boom"),
                1 => Err(ExecutorError::Failed("bad input".into())),
                id => Ok(ExecutionReport::ok().with_detail("target", id)),
            }
        }
    }

    fn start(task_id: i64) -> Value {
        let task = Task {
            priority: Priority::new(task_id + 100),
            status: crate::domain::TaskStatus::Running,
            parameters: TaskParameters::new(task_id),
        };
        encode(Tag::Start, &task).unwrap()
    }

    #[tokio::test]
    async fn executes_until_exit_and_acknowledges() {
        let mut group = LocalFabric::group(2);
        let worker = Worker::new(group.pop().unwrap(), Arc::new(Echo));
        let mut controller = group.pop().unwrap();
        let handle = tokio::spawn(worker.run());

        let mut tasks = vec![start(5), start(1), start(0)].into_iter();
        let mut results = Vec::new();
        loop {
            let env = controller.recv().await.unwrap();
            match env.tag(Role::Controller).unwrap() {
                Tag::Ready => match tasks.next() {
                    Some(payload) => controller.send(env.source, Tag::Start, payload).await.unwrap(),
                    None => controller.send(env.source, Tag::Exit, Value::Null).await.unwrap(),
                },
                Tag::Done => results.push(env.decode::<TaskResult>(Tag::Done).unwrap()),
                Tag::Exit => break,
                Tag::Start => unreachable!(),
            }
        }

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.executed, 3);
        assert_eq!(summary.fatal, 2);

        assert_eq!(results[0].priority, Priority::new(105));
        assert_eq!(results[0].status, Outcome::Ok);
        assert_eq!(results[0].details["target"], 5);
        assert_eq!(results[1].status, Outcome::Fatal);
        assert_eq!(results[1].details["error"], "bad input");
        assert_eq!(results[2].status, Outcome::Fatal);
        assert!(results[2].details["error"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn protocol_error_still_sends_exit() {
        let mut group = LocalFabric::group(2);
        let worker = Worker::new(group.pop().unwrap(), Arc::new(Echo));
        let mut controller = group.pop().unwrap();
        let handle = tokio::spawn(worker.run());

        let ready = controller.recv().await.unwrap();
        assert_eq!(ready.tag, Tag::Ready.code());
        controller.send_raw(ready.source, 99, Value::Null).await.unwrap();

        let exit = controller.recv().await.unwrap();
        assert_eq!(exit.tag, Tag::Exit.code());

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Protocol(ProtocolError::UnknownTag { tag: 99, .. })
        ));
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(3_u8)), "unknown panic");
    }
}
