//! Exec commands queued for a session and the per-command results

use crate::process::CommandOutcome;
use crate::runtime::RuntimeError;
use regex::Regex;
use std::sync::LazyLock;

/// A command to run inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecCommand {
    /// Already split into an argument vector
    Tokens(Vec<String>),
    /// A single shell-style line, split with [`tokenize`]
    Line(String),
}

impl ExecCommand {
    pub fn tokens(&self) -> Vec<String> {
        match self {
            ExecCommand::Tokens(tokens) => tokens.clone(),
            ExecCommand::Line(line) => tokenize(line),
        }
    }
}

impl From<&str> for ExecCommand {
    fn from(line: &str) -> Self {
        ExecCommand::Line(line.to_string())
    }
}

impl From<String> for ExecCommand {
    fn from(line: String) -> Self {
        ExecCommand::Line(line)
    }
}

impl From<Vec<String>> for ExecCommand {
    fn from(tokens: Vec<String>) -> Self {
        ExecCommand::Tokens(tokens)
    }
}

// Quoted spans or runs of non-blank characters. A literal pattern, always compiles.
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'|[^ \t]+"#).expect("token pattern compiles"));

/// Split a command line on spaces and tabs, keeping `'...'` and `"..."` spans
/// as single tokens.
///
/// A token that starts and ends with the same quote has those quotes removed.
/// Backslashes are kept as they are and an unmatched quote stays part of its
/// token.
pub fn tokenize(line: &str) -> Vec<String> {
    TOKEN
        .find_iter(line)
        .map(|m| strip_quotes(m.as_str()).to_string())
        .collect()
}

fn strip_quotes(token: &str) -> &str {
    for quote in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            return &token[1..token.len() - 1];
        }
    }
    token
}

/// Result of one exec step
#[derive(Debug)]
pub struct ExecRecord {
    pub command: Vec<String>,
    pub result: Result<CommandOutcome, RuntimeError>,
}

impl ExecRecord {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn exit_code(&self) -> Option<i32> {
        match &self.result {
            Ok(outcome) => outcome.exit_code,
            Err(e) => e.exit_code(),
        }
    }
}

/// Ordered results of an execute phase
#[derive(Debug, Default)]
pub struct ExecBatchResult {
    records: Vec<ExecRecord>,
}

impl ExecBatchResult {
    pub(crate) fn push(&mut self, record: ExecRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ExecRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecRecord> {
        self.records.iter().filter(|r| !r.succeeded())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}
