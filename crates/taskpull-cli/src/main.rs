mod cli;

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskpull_core::domain::{ExecutionReport, NewTask, Priority, TaskParameters, TaskResult};
use taskpull_core::impls::CommandExecutor;
use taskpull_core::ports::{TaskExecutor, TaskStore};
use taskpull_core::store::SqliteTaskStore;
use taskpull_core::{Config, TaskManager, run_local};

use crate::cli::{Args, Command, PathArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();

    let config = load_config(&args.paths)?;

    match args.command {
        Command::Run { workers } => run(&config, workers.unwrap_or(config.workers), &args.paths).await,
        Command::Once {
            target,
            method,
            random,
        } => {
            let parameters = if random {
                let manager = TaskManager::open(&config.todo_file)
                    .await
                    .with_context(|| format!("open {}", config.todo_file.display()))?;
                match manager.get_random_task().await? {
                    Some(task) => task.parameters,
                    None => {
                        warn!("no pending tasks");
                        return Ok(());
                    }
                }
            } else {
                let Some(target) = target else {
                    bail!("--target or --random is required");
                };
                let mut parameters = TaskParameters::new(target);
                if let Some(method) = method {
                    parameters = parameters.with_method(method);
                }
                parameters
            };
            once(&config, parameters, &args.paths).await
        }
        Command::Status => {
            let manager = TaskManager::open(&config.todo_file)
                .await
                .with_context(|| format!("open {}", config.todo_file.display()))?;
            let counts = manager.close().await?;
            println!("{counts}");
            Ok(())
        }
        Command::Import { file, overwrite } => import(&config.todo_file, &file, overwrite).await,
        Command::Reset => {
            let manager = TaskManager::open(&config.todo_file)
                .await
                .with_context(|| format!("open {}", config.todo_file.display()))?;
            let n = manager.reset_running().await?;
            info!(tasks = n, "reset running tasks to pending");
            manager.close().await?;
            Ok(())
        }
    }
}

fn load_config(paths: &PathArgs) -> Result<Config> {
    let mut config = Config::from_env().context("read configuration from environment")?;
    if let Some(input) = &paths.input {
        config = config.with_input_folder(input);
    }
    if let Some(output) = &paths.output {
        config.output_folder = output.clone();
    }
    if let Some(todo) = &paths.todo {
        config.todo_file = todo.clone();
    }
    if let Some(executor) = &paths.executor {
        config.executor = Some(executor.clone());
    }
    Ok(config)
}

fn executor(config: &Config, paths: &PathArgs) -> Result<CommandExecutor> {
    let program = config.executor()?;
    Ok(
        CommandExecutor::new(program, &config.input_folder, &config.output_folder)
            .with_args(paths.executor_args.iter().cloned()),
    )
}

async fn run(config: &Config, workers: usize, paths: &PathArgs) -> Result<()> {
    let executor = Arc::new(executor(config, paths)?);
    let manager = TaskManager::open(&config.todo_file)
        .await
        .with_context(|| format!("open {}", config.todo_file.display()))?;

    info!(
        input = %config.input_folder.display(),
        output = %config.output_folder.display(),
        program = %executor.program().display(),
        workers,
        "starting run"
    );

    let summary = run_local(&manager, executor, workers).await?;
    let counts = manager.close().await?;
    println!(
        "{} dispatched={} completed={} elapsed={:.1}s {counts}",
        summary.run_id,
        summary.dispatched,
        summary.completed,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

async fn once(config: &Config, parameters: TaskParameters, paths: &PathArgs) -> Result<()> {
    let executor = executor(config, paths)?;
    info!(target_id = parameters.target_id, "running single task");

    let started = Instant::now();
    let report = match executor.execute(parameters.clone()).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "task failed");
            ExecutionReport::fatal(&e)
        }
    };
    // not part of the queue
    let result = TaskResult::new(Priority::new(0), parameters, report, started.elapsed());
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn import(todo_file: &Path, source: &Path, overwrite: bool) -> Result<()> {
    let text =
        fs::read_to_string(source).with_context(|| format!("read {}", source.display()))?;
    let tasks = parse_tasks(&text)?;

    if overwrite && todo_file.exists() {
        fs::remove_file(todo_file)
            .with_context(|| format!("remove {}", todo_file.display()))?;
    }
    let store = SqliteTaskStore::create(todo_file)
        .await
        .with_context(|| format!("create {}", todo_file.display()))?;
    if let Err(e) = store.insert_tasks(&tasks).await {
        drop(store);
        // an empty queue file would block the next import
        if let Err(rm) = fs::remove_file(todo_file) {
            warn!(path = %todo_file.display(), error = %rm, "could not remove queue file");
        }
        return Err(e).context("insert tasks");
    }
    info!(tasks = tasks.len(), path = %todo_file.display(), "queue file created");
    Ok(())
}

/// One JSON object per non-empty line. Lines without a `priority` get their
/// 1-based line number. Duplicate priorities and reserved parameter names
/// are rejected before anything is written.
fn parse_tasks(text: &str) -> Result<Vec<NewTask>> {
    let mut tasks = Vec::new();
    let mut seen = HashSet::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lineno = index + 1;
        let mut value: Value =
            serde_json::from_str(line).with_context(|| format!("line {lineno}: invalid JSON"))?;
        let Value::Object(map) = &mut value else {
            bail!("line {lineno}: expected a JSON object");
        };
        map.entry("priority").or_insert_with(|| Value::from(lineno as i64));
        let task: NewTask =
            serde_json::from_value(value).with_context(|| format!("line {lineno}: invalid task"))?;
        task.validate().with_context(|| format!("line {lineno}"))?;
        if !seen.insert(task.priority) {
            bail!("line {lineno}: duplicate priority {}", task.priority);
        }
        tasks.push(task);
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpull_core::domain::Method;

    #[test]
    fn priorities_default_to_line_numbers() {
        let text = r#"{"target_id": 10, "method": "psf"}

{"target_id": 11, "priority": 99, "sector": 4}
"#;
        let tasks = parse_tasks(text).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, Priority::new(1));
        assert_eq!(tasks[0].parameters.method, Some(Method::Psf));
        assert_eq!(tasks[1].priority, Priority::new(99));
        assert_eq!(tasks[1].parameters.field("sector"), Some(&Value::from(4)));
    }

    #[test]
    fn rejects_duplicate_priorities() {
        let text = "{\"target_id\": 1, \"priority\": 2}\n{\"target_id\": 2}\n";
        let err = parse_tasks(text).unwrap_err();
        assert!(err.to_string().contains("line 2: duplicate priority 2"));
    }

    #[test]
    fn rejects_a_todolist_status_column() {
        let err = parse_tasks(r#"{"target_id": 1, "status": 1}"#).unwrap_err();
        assert!(format!("{err:#}").contains("status"));
    }

    #[tokio::test]
    async fn existing_queue_is_only_replaced_with_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tasks.jsonl");
        let todo = dir.path().join("todo.sqlite");
        fs::write(&source, "{\"target_id\": 1, \"priority\": 1}\n").unwrap();

        import(&todo, &source, false).await.unwrap();
        assert!(import(&todo, &source, false).await.is_err());
        import(&todo, &source, true).await.unwrap();
        assert!(todo.exists());
    }

    #[test]
    fn rejects_non_objects() {
        let err = parse_tasks("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
