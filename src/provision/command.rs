//! External command execution.
//!
//! # Responsibilities
//! - Describe a command invocation as data (`Cmd`)
//! - Run it through tokio (`SystemRunner`) or record it (`DryRunRunner`)
//!
//! # Design Decisions
//! - Provisioning code is generic over `CommandRunner` so every tool call
//!   can be observed without spawning anything
//! - A non-zero exit is data, not an error; `run_checked` turns it into one

use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use tokio::process::Command;

use crate::provision::ProvisionError;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Something that can execute a `Cmd`.
pub trait CommandRunner: Send + Sync {
    /// Run to completion. Only spawn failures are errors.
    fn run(&self, cmd: &Cmd) -> impl Future<Output = Result<CommandOutput, ProvisionError>> + Send;

    /// Run and fail on a non-zero exit.
    fn run_checked(
        &self,
        cmd: &Cmd,
    ) -> impl Future<Output = Result<CommandOutput, ProvisionError>> + Send {
        async move {
            let output = self.run(cmd).await?;
            if output.is_success() {
                Ok(output)
            } else {
                Err(ProvisionError::Command {
                    command: cmd.to_string(),
                    code: output.code,
                    stderr: output.stderr.trim().to_string(),
                })
            }
        }
    }
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &Cmd) -> Result<CommandOutput, ProvisionError> {
        tracing::debug!(command = %cmd, "Running command");

        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProvisionError::Spawn {
                command: cmd.to_string(),
                source: e,
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.is_success() {
            tracing::debug!(command = %cmd, code = ?result.code, "Command exited unsuccessfully");
        }
        Ok(result)
    }
}

type Responder = Box<dyn Fn(&Cmd) -> Option<CommandOutput> + Send + Sync>;

/// Records commands instead of running them.
///
/// Every command succeeds with empty output unless a responder registered
/// with [`DryRunRunner::respond`] returns something for it.
#[derive(Default)]
pub struct DryRunRunner {
    history: Mutex<Vec<Cmd>>,
    responders: Vec<Responder>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a responder. Earlier responders take priority.
    pub fn respond<F>(mut self, f: F) -> Self
    where
        F: Fn(&Cmd) -> Option<CommandOutput> + Send + Sync + 'static,
    {
        self.responders.push(Box::new(f));
        self
    }

    /// Commands seen so far, in order.
    pub fn history(&self) -> Vec<Cmd> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Rendered command lines seen so far.
    pub fn lines(&self) -> Vec<String> {
        self.history().iter().map(Cmd::to_string).collect()
    }
}

impl fmt::Debug for DryRunRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryRunRunner")
            .field("history", &self.history())
            .field("responders", &self.responders.len())
            .finish()
    }
}

impl CommandRunner for DryRunRunner {
    async fn run(&self, cmd: &Cmd) -> Result<CommandOutput, ProvisionError> {
        tracing::info!(command = %cmd, "Dry run: not executing");
        if let Ok(mut history) = self.history.lock() {
            history.push(cmd.clone());
        }
        Ok(self
            .responders
            .iter()
            .find_map(|r| r(cmd))
            .unwrap_or_else(CommandOutput::success))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_display() {
        let cmd = Cmd::new("postmap").arg("/etc/postfix/virtual");
        assert_eq!(cmd.to_string(), "postmap /etc/postfix/virtual");
    }

    #[tokio::test]
    async fn test_dry_run_records_and_responds() {
        let runner = DryRunRunner::new().respond(|cmd| {
            (cmd.program == "false").then(|| CommandOutput::failure(1, "nope"))
        });

        assert!(runner.run(&Cmd::new("true")).await.unwrap().is_success());
        let err = runner.run_checked(&Cmd::new("false").arg("x")).await.unwrap_err();
        assert!(err.to_string().contains("false x"));
        assert_eq!(runner.lines(), vec!["true", "false x"]);
    }

    #[tokio::test]
    async fn test_system_runner_reports_exit_code() {
        let out = SystemRunner.run(&Cmd::new("sh").args(["-c", "echo hi; exit 3"])).await.unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn test_system_runner_spawn_failure() {
        let err = SystemRunner
            .run(&Cmd::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Spawn { .. }));
    }
}
