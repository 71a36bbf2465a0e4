//! CommandExecutor - runs each task in an external program
//!
//! Protocol with the program:
//! - stdin: one JSON object, the job parameters plus `input_folder` /
//!   `output_folder`
//! - stdout: one JSON object `{"status": "OK" | ..., "details": {...}}`
//! - exit code 0; anything else is an executor failure

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{ExecutionReport, TaskParameters};
use crate::error::ExecutorError;
use crate::ports::TaskExecutor;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: PathBuf,
    args: Vec<String>,
    input_folder: PathBuf,
    output_folder: PathBuf,
}

impl CommandExecutor {
    pub fn new(
        program: impl Into<PathBuf>,
        input_folder: impl Into<PathBuf>,
        output_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            input_folder: input_folder.into(),
            output_folder: output_folder.into(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn request(&self, parameters: &TaskParameters) -> Result<Vec<u8>, ExecutorError> {
        let mut request = serde_json::to_value(parameters)
            .map_err(|e| ExecutorError::InvalidOutput(format!("encode parameters: {e}")))?;
        if let Value::Object(map) = &mut request {
            map.insert(
                "input_folder".to_string(),
                Value::String(self.input_folder.display().to_string()),
            );
            map.insert(
                "output_folder".to_string(),
                Value::String(self.output_folder.display().to_string()),
            );
        }
        Ok(request.to_string().into_bytes())
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, parameters: TaskParameters) -> Result<ExecutionReport, ExecutorError> {
        let request = self.request(&parameters)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| ExecutorError::Spawn {
                program: self.program.display().to_string(),
                error,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request).await?;
            // close stdin so the program sees EOF
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        debug!(target_id = parameters.target_id, "executor finished");
        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExecutorError::InvalidOutput(format!("{e}")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::Outcome;

    fn sh(script: &str) -> CommandExecutor {
        CommandExecutor::new("/bin/sh", "/data/in", "/data/out").with_args(["-c", script])
    }

    #[tokio::test]
    async fn parses_the_program_report() {
        let exec = sh(r#"cat > /dev/null; echo '{"status": "WARNING", "details": {"contamination": 0.9}}'"#);
        let report = exec.execute(TaskParameters::new(42)).await.unwrap();
        assert_eq!(report.status, Outcome::Warning);
        assert_eq!(report.details["contamination"], 0.9);
    }

    #[tokio::test]
    async fn passes_parameters_and_folders_on_stdin() {
        // echo the request back as the details payload
        let exec = sh(r#"printf '{"status":"OK","details":%s}' "$(cat)""#);
        let report = exec
            .execute(TaskParameters::new(7).with_field("sector", 3))
            .await
            .unwrap();
        assert_eq!(report.details["target_id"], 7);
        assert_eq!(report.details["sector"], 3);
        assert_eq!(report.details["input_folder"], "/data/in");
        assert_eq!(report.details["output_folder"], "/data/out");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let exec = sh("cat > /dev/null; echo nope >&2; exit 3");
        let err = exec.execute(TaskParameters::new(1)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Failed(msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn garbage_output_is_rejected() {
        let exec = sh("cat > /dev/null; echo not-json");
        let err = exec.execute(TaskParameters::new(1)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let exec = CommandExecutor::new("/definitely/not/here", ".", ".");
        let err = exec.execute(TaskParameters::new(1)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }
}
