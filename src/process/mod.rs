//! Subprocess execution for runtime verbs
//!
//! Every runtime verb is a separate invocation of the runtime executable.
//! This module owns spawning that executable, collecting its output line by
//! line from both streams, and resolving with a [`CommandOutcome`] once the
//! process exits.

mod cancel;
mod runner;

pub use cancel::CancelHandle;
pub use runner::SubprocessRunner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which stream a line of output arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    Stdout,
    Stderr,
}

/// Result of one subprocess invocation.
///
/// The same shape is used for successful and failed runs; only the exit code
/// tells them apart. `exit_code` is `None` when the process never started or
/// was terminated by a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub exit_code: Option<i32>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    /// Lines from both streams in arrival order
    pub combined_lines: Vec<String>,
}

impl CommandOutcome {
    /// Build an outcome from a process exit code and no output
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Default::default()
        }
    }

    /// Outcome used when the executable could not be started at all
    pub fn spawn_failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            exit_code: None,
            stdout_lines: Vec::new(),
            stderr_lines: vec![message.clone()],
            combined_lines: vec![message],
        }
    }

    /// Append a line to the matching stream buffer and the combined log
    pub fn push_line(&mut self, source: OutputSource, line: String) {
        match source {
            OutputSource::Stdout => self.stdout_lines.push(line.clone()),
            OutputSource::Stderr => self.stderr_lines.push(line.clone()),
        }
        self.combined_lines.push(line);
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// All stdout lines joined with newlines
    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }

    /// All stderr lines joined with newlines
    pub fn stderr(&self) -> String {
        self.stderr_lines.join("\n")
    }
}

/// Errors raised while driving a subprocess, as opposed to the process
/// itself exiting non-zero
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
        outcome: CommandOutcome,
    },
    #[error("I/O error while waiting for `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` was cancelled")]
    Cancelled { program: String, outcome: CommandOutcome },
    #[error("`{program}` timed out after {} seconds", .limit.as_secs())]
    TimedOut {
        program: String,
        limit: Duration,
        outcome: CommandOutcome,
    },
}

impl ProcessError {
    /// Output captured before the failure, when there is any
    pub fn outcome(&self) -> Option<&CommandOutcome> {
        match self {
            ProcessError::Spawn { outcome, .. }
            | ProcessError::Cancelled { outcome, .. }
            | ProcessError::TimedOut { outcome, .. } => Some(outcome),
            ProcessError::Io { .. } => None,
        }
    }
}

/// Callback receiving each output line as it arrives
pub type OutputSink<'a> = &'a (dyn Fn(OutputSource, &str) + Send + Sync);

/// Spawns an executable with a literal argument vector and waits for it.
///
/// A non-zero exit is not an error at this level; it is reported through
/// [`CommandOutcome::exit_code`]. Implementations call `on_output` for every
/// line in arrival order before resolving.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        on_output: OutputSink<'_>,
    ) -> Result<CommandOutcome, ProcessError>;

    /// Handle that terminates whatever process is currently in flight
    fn cancel_handle(&self) -> CancelHandle;
}

/// Flatten nested argument groups into one argument vector
pub fn flatten_args<I, G, S>(groups: I) -> Vec<String>
where
    I: IntoIterator<Item = G>,
    G: IntoIterator<Item = S>,
    S: Into<String>,
{
    groups
        .into_iter()
        .flat_map(|group| group.into_iter().map(Into::into))
        .collect()
}
