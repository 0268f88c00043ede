//! Local process execution for the package and diagnostics layers

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::ExecError;
use crate::result::CommandOutput;
use crate::traits::Executor;

/// Runs programs on this machine
///
/// Arguments go straight to the program as an argv vector; nothing is
/// interpreted by a shell. A child that outlives its deadline is killed.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn spawn(
        &self,
        program: &str,
        args: &[&str],
        deadline: Option<Duration>,
    ) -> Result<CommandOutput, ExecError> {
        let started = Instant::now();
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(format!("{program}: {e}")))?;

        let collected = match deadline {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(collected) => collected,
                Err(_) => {
                    warn!(program = %program, timeout = ?limit, "local command timed out");
                    return Err(ExecError::Timeout {
                        host: "localhost".to_string(),
                        command: render(program, args),
                        timeout: limit,
                    });
                }
            },
            None => child.wait_with_output().await,
        };
        let output = collected.map_err(|e| ExecError::SpawnError(format!("{program}: {e}")))?;

        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };
        debug!(
            program = %program,
            status = result.status,
            duration = ?result.duration,
            "local command finished"
        );
        Ok(result)
    }
}

/// `program arg...` for error messages
fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Executor for LocalExecutor {
    #[instrument(skip(self), level = "debug")]
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ExecError> {
        self.spawn(program, args, None).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        self.spawn(program, args, Some(timeout)).await
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}
