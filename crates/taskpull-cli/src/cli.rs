use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use taskpull_core::config;
use taskpull_core::domain::Method;

#[derive(Parser, Debug)]
#[command(name = "taskpull", version, about = "Pull-based task scheduling over a SQLite queue")]
pub struct Args {
    /// Print debug messages.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub debug: bool,

    /// Only report warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub paths: PathArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for the environment configuration.
#[derive(ClapArgs, Debug, Default)]
pub struct PathArgs {
    /// Input folder (default: $TASKPULL_INPUT).
    #[arg(long, global = true)]
    pub input: Option<PathBuf>,

    /// Output folder (default: $TASKPULL_OUTPUT).
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    /// Queue file (default: $TASKPULL_TODO or <input>/todo.sqlite).
    #[arg(long, global = true)]
    pub todo: Option<PathBuf>,

    /// Program run once per task (default: $TASKPULL_EXECUTOR).
    #[arg(long, global = true)]
    pub executor: Option<PathBuf>,

    /// Extra argument for the executor program. Repeatable.
    #[arg(long = "executor-arg", global = true, allow_hyphen_values = true)]
    pub executor_args: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every pending task with a local controller and worker group.
    Run {
        /// Number of workers (default: $TASKPULL_WORKERS or cores - 1).
        #[arg(short, long, value_parser = parse_workers)]
        workers: Option<usize>,
    },

    /// Run a single task outside the scheduler.
    Once {
        /// Target to process.
        #[arg(long, conflicts_with = "random", required_unless_present = "random")]
        target: Option<i64>,

        /// Method for --target.
        #[arg(long, requires = "target")]
        method: Option<Method>,

        /// Pick a random pending task from the queue. The queue is not changed.
        #[arg(long)]
        random: bool,
    },

    /// Print the number of tasks per status.
    Status,

    /// Create the queue file from JSON lines, one task per line.
    Import {
        file: PathBuf,

        /// Replace an existing queue file.
        #[arg(long)]
        overwrite: bool,
    },

    /// Put tasks left running by an interrupted run back to pending.
    Reset,
}

fn parse_workers(raw: &str) -> Result<usize, String> {
    config::parse_workers("--workers", raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_workers() {
        let args = Args::try_parse_from(["taskpull", "-d", "run", "--workers", "3"]).unwrap();
        assert!(args.debug);
        assert!(matches!(args.command, Command::Run { workers: Some(3) }));
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(Args::try_parse_from(["taskpull", "run", "-w", "0"]).is_err());
    }

    #[test]
    fn once_needs_a_target_or_random() {
        assert!(Args::try_parse_from(["taskpull", "once"]).is_err());
        assert!(Args::try_parse_from(["taskpull", "once", "--target", "1", "--random"]).is_err());

        let args =
            Args::try_parse_from(["taskpull", "once", "--target", "7", "--method", "psf"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Once {
                target: Some(7),
                method: Some(Method::Psf),
                random: false
            }
        ));
    }

    #[test]
    fn path_overrides_are_global() {
        let args = Args::try_parse_from(["taskpull", "status", "--todo", "/q/todo.sqlite"]).unwrap();
        assert_eq!(args.paths.todo, Some(PathBuf::from("/q/todo.sqlite")));
    }
}
