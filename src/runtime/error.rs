use crate::process::{CommandOutcome, ProcessError};

/// Errors from runtime verbs
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Not connected: no active container")]
    NotConnected,
    #[error("`{verb}` exited with code {code}: {stderr}", code = display_code(.outcome), stderr = trimmed_stderr(.outcome))]
    NonZeroExit { verb: String, outcome: CommandOutcome },
    #[error("Unrecognised version output: {line:?}")]
    VersionParse { line: String },
    #[error("`run` produced no container id (output: {output:?})")]
    MissingContainerId { output: String },
    #[error("Refusing to exec an empty command")]
    EmptyCommand,
    #[error(transparent)]
    Process(#[from] ProcessError),
}

fn display_code(outcome: &CommandOutcome) -> String {
    match outcome.exit_code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

fn trimmed_stderr(outcome: &CommandOutcome) -> String {
    outcome.stderr().trim().to_string()
}

impl RuntimeError {
    /// Subprocess output attached to this error, if any
    pub fn outcome(&self) -> Option<&CommandOutcome> {
        match self {
            RuntimeError::NonZeroExit { outcome, .. } => Some(outcome),
            RuntimeError::Process(e) => e.outcome(),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.outcome().and_then(|o| o.exit_code)
    }

    /// True when the runtime executable could not be started at all
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, RuntimeError::Process(ProcessError::Spawn { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_message_includes_stderr() {
        let mut outcome = CommandOutcome::with_exit_code(2);
        outcome.push_line(
            crate::process::OutputSource::Stderr,
            "ls: cannot access 'nope'".to_string(),
        );
        let err = RuntimeError::NonZeroExit {
            verb: "exec".to_string(),
            outcome,
        };
        assert_eq!(
            err.to_string(),
            "`exec` exited with code 2: ls: cannot access 'nope'"
        );
        assert_eq!(err.exit_code(), Some(2));
    }

    #[test]
    fn test_not_connected_has_no_outcome() {
        assert!(RuntimeError::NotConnected.outcome().is_none());
        assert!(!RuntimeError::NotConnected.is_spawn_failure());
    }
}
