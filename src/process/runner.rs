use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::{Stream, StreamExt};

use super::{CancelHandle, CommandOutcome, OutputSink, OutputSource, ProcessError, ProcessRunner};

/// Runs commands as real child processes with tokio.
///
/// Arguments are passed as a literal vector, never through a shell. The
/// child inherits the current environment and working directory.
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner {
    timeout: Option<Duration>,
    cancel: CancelHandle,
}

impl SubprocessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill any subprocess that runs longer than `limit`
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        on_output: OutputSink<'_>,
    ) -> Result<CommandOutcome, ProcessError> {
        log::debug!("Spawning {} {:?}", program, args);

        // Subscribe before spawning so a cancel issued during startup is seen
        let mut cancelled = self.cancel.subscribe();

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to spawn {}: {}", program, e);
                let outcome = CommandOutcome::spawn_failure(e.to_string());
                on_output(OutputSource::Stderr, &e.to_string());
                return Err(ProcessError::Spawn {
                    program: program.to_string(),
                    source: e,
                    outcome,
                });
            }
        };

        let mut outcome = CommandOutcome::default();

        let interrupted = {
            let drive = collect_output(&mut child, &mut outcome, on_output);
            tokio::select! {
                result = with_deadline(self.timeout, drive) => match result {
                    Some(Ok(code)) => Ok(code),
                    Some(Err(e)) => Err(Interrupt::Io(e)),
                    None => Err(Interrupt::Deadline),
                },
                _ = cancelled.changed() => Err(Interrupt::Cancelled),
            }
        };

        match interrupted {
            Ok(exit_code) => {
                outcome.exit_code = exit_code;
                log::debug!("{} exited with {:?}", program, exit_code);
                Ok(outcome)
            }
            Err(Interrupt::Io(source)) => Err(ProcessError::Io {
                program: program.to_string(),
                source,
            }),
            Err(Interrupt::Deadline) => {
                terminate(&mut child, program).await;
                Err(ProcessError::TimedOut {
                    program: program.to_string(),
                    limit: self.timeout.unwrap_or_default(),
                    outcome,
                })
            }
            Err(Interrupt::Cancelled) => {
                terminate(&mut child, program).await;
                Err(ProcessError::Cancelled {
                    program: program.to_string(),
                    outcome,
                })
            }
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

enum Interrupt {
    Io(std::io::Error),
    Deadline,
    Cancelled,
}

async fn with_deadline<F, T>(limit: Option<Duration>, future: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}

async fn terminate(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        log::warn!("Failed to kill {}: {}", program, e);
    }
}

/// Read both streams to completion, then wait for the exit status
async fn collect_output(
    child: &mut Child,
    outcome: &mut CommandOutcome,
    on_output: OutputSink<'_>,
) -> std::io::Result<Option<i32>> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut lines = Box::pin(
        stream_lines(stdout, OutputSource::Stdout).merge(stream_lines(stderr, OutputSource::Stderr)),
    );

    while let Some((source, line)) = lines.next().await {
        on_output(source, &line);
        outcome.push_line(source, line);
    }

    let status = child.wait().await?;
    Ok(status.code())
}

/// Decode a pipe into lines, replacing invalid UTF-8 rather than failing
fn stream_lines<R>(reader: Option<R>, source: OutputSource) -> impl Stream<Item = (OutputSource, String)>
where
    R: AsyncRead + Unpin + Send,
{
    futures_util::stream::unfold(reader.map(BufReader::new), move |reader| async move {
        let mut reader = reader?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some(((source, line), Some(reader)))
            }
            Err(e) => {
                log::warn!("Stopped reading {:?}: {}", source, e);
                None
            }
        }
    })
}
