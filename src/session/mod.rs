//! One full container session: start, exec each command, shut down, report
//!
//! Exec commands run strictly one after another. A failing command is
//! recorded and the batch moves on; only failing to reach the runtime or to
//! start the container ends the session early. Shutdown runs exactly once
//! after the execute phase, whatever the commands did.

pub mod command;
pub mod config;

pub use command::{tokenize, ExecBatchResult, ExecCommand, ExecRecord};
pub use config::{materialize_volume, SessionConfig, ShutdownPolicy, DEFAULT_SHELL};

use std::path::PathBuf;
use std::sync::Arc;

use crate::process::{CancelHandle, ProcessRunner, SubprocessRunner};
use crate::runtime::{ContainerId, Event, EventKind, RuntimeClient, RuntimeError, RuntimeInfo};

/// Failures that end a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Container runtime `{program}` is unavailable: {source}")]
    RuntimeUnavailable {
        program: String,
        #[source]
        source: RuntimeError,
    },
    #[error("Failed to pull image: {0}")]
    Pull(#[source] RuntimeError),
    #[error("Failed to start container: {0}")]
    Start(#[source] RuntimeError),
    #[error("Invalid container id to attach to: {0:?}")]
    Attach(String),
    #[error("Failed to shut down container: {0}")]
    Shutdown(#[source] RuntimeError),
}

/// What a finished session produced
#[derive(Debug)]
pub struct SessionReport {
    pub container_id: Option<ContainerId>,
    pub runtime: RuntimeInfo,
    pub results: ExecBatchResult,
    /// Final container status, when status output was requested
    pub status: Option<String>,
}

/// Drives a [`RuntimeClient`] through one session
#[derive(Debug)]
pub struct SessionController {
    config: SessionConfig,
    client: RuntimeClient,
    cwd: Option<PathBuf>,
}

impl SessionController {
    pub fn new(config: SessionConfig) -> Self {
        let runner = SubprocessRunner::new().with_timeout(config.timeout);
        Self::with_runner(config, Arc::new(runner))
    }

    pub fn with_runner(config: SessionConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        let client = RuntimeClient::with_runner(config.image.clone(), config.runtime.clone(), runner);
        Self {
            config,
            client,
            cwd: None,
        }
    }

    /// Resolve `./` volume paths against `cwd` instead of the process directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Directory `./` volume paths are resolved against, read when the
    /// container is started unless [`with_cwd`](Self::with_cwd) fixed it
    fn resolve_cwd(&self) -> PathBuf {
        if let Some(cwd) = &self.cwd {
            return cwd.clone();
        }
        std::env::current_dir().unwrap_or_else(|e| {
            log::warn!("Cannot read current directory, using '.': {}", e);
            PathBuf::from(".")
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn client(&self) -> &RuntimeClient {
        &self.client
    }

    /// Terminates the runtime invocation currently in flight
    pub fn cancel_handle(&self) -> CancelHandle {
        self.client.cancel_handle()
    }

    /// Run the whole session
    pub async fn run(&mut self) -> Result<SessionReport, SessionError> {
        let _verbose = self.config.verbose.then(|| {
            self.client.events().scoped(EventKind::lifecycle(), log_event)
        });

        self.check_runtime().await?;
        self.start().await?;

        let results = self.execute().await;
        self.shutdown().await?;

        let status = if self.config.output_status {
            self.output_status().await
        } else {
            None
        };

        Ok(SessionReport {
            container_id: self.client.last_container_id().cloned(),
            runtime: self.client.info().clone(),
            results,
            status,
        })
    }

    /// A runtime that cannot be spawned is fatal; odd version output is not
    async fn check_runtime(&mut self) -> Result<(), SessionError> {
        match self.client.version().await {
            Ok(_) => Ok(()),
            Err(e) if e.is_spawn_failure() => Err(SessionError::RuntimeUnavailable {
                program: self.config.runtime.clone(),
                source: e,
            }),
            Err(e) => {
                log::warn!("Could not determine runtime version: {}", e);
                Ok(())
            }
        }
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        if let Some(target) = &self.config.attach_to {
            let id = ContainerId::new(target).ok_or_else(|| SessionError::Attach(target.clone()))?;
            self.client.attach(id);
            return Ok(());
        }

        if self.config.pull {
            self.client.pull(&[]).await.map_err(SessionError::Pull)?;
        }

        let run_args = self.config.run_args(&self.resolve_cwd());
        let id = self
            .client
            .run(&self.config.shell, &run_args)
            .await
            .map_err(SessionError::Start)?;
        log::info!("Container {} is running", id.short());
        Ok(())
    }

    /// Run every queued command in order, continuing past failures.
    /// Output is forwarded to the terminal only for the duration of this phase.
    pub async fn execute(&mut self) -> ExecBatchResult {
        let mut results = ExecBatchResult::default();
        let _output = self
            .client
            .events()
            .scoped([EventKind::Stdout, EventKind::Stderr], print_output);

        for command in &self.config.exec {
            let tokens = command.tokens();
            log::info!("Exec: {:?}", tokens);
            let result = self.client.exec(&tokens).await;
            match &result {
                Ok(outcome) => log::info!("Exec SUCCESS ({:?}): {:?}", outcome.exit_code, tokens),
                Err(e) => log::error!("Exec ERROR ({:?}): {:?}: {}", e.exit_code(), tokens, e),
            }
            results.push(ExecRecord {
                command: tokens,
                result,
            });
        }

        results
    }

    /// Apply the configured shutdown policy. A kill failure is logged and
    /// does not prevent removal; when removal runs, only its result is
    /// reported.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        let policy = self.config.shutdown_policy();
        if policy == ShutdownPolicy::Keep {
            log::debug!("Leaving container running");
            return Ok(());
        }

        log::info!("Killing instance");
        let killed = self.client.kill().await;
        if let Err(e) = &killed {
            log::error!("Kill error: {}", e);
        }

        if policy != ShutdownPolicy::KillAndRemove {
            return killed.map(|_| ()).map_err(SessionError::Shutdown);
        }

        log::info!("Removing instance");
        self.client.rm(&[]).await.map(|_| ()).map_err(|e| {
            log::error!("Remove error: {}", e);
            SessionError::Shutdown(e)
        })
    }

    async fn output_status(&self) -> Option<String> {
        let id = self.client.last_container_id()?;
        match self.client.status().await {
            Ok(status) => {
                let status = status.unwrap_or_default();
                println!("Status ({}): {}", id, status);
                Some(status)
            }
            Err(e) => {
                log::warn!("Could not query status of {}: {}", id, e);
                println!("Status ({}): unknown", id);
                None
            }
        }
    }
}

fn print_output(event: &Event) {
    match event {
        Event::Stdout(line) => println!("{}", line),
        Event::Stderr(line) => eprintln!("{}", line),
        _ => {}
    }
}

fn log_event(event: &Event) {
    match serde_json::to_string(event) {
        Ok(json) => log::info!("{}: {}", event.kind(), json),
        Err(e) => log::warn!("{}: unserializable event: {}", event.kind(), e),
    }
}
