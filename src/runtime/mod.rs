//! Container runtime client
//!
//! [`RuntimeClient`] drives an external runtime executable (`docker` by
//! default) one verb at a time. It tracks the container it started, so that
//! `exec`, `kill`, `stop` and `rm` always target the right id, and publishes
//! lifecycle [`Event`]s on its [`EventBus`].
//!
//! Calls on one client must not overlap; every mutating verb takes
//! `&mut self`, which enforces this at compile time.

mod error;
pub mod events;
pub mod version;

pub use error::RuntimeError;
pub use events::{Event, EventBus, EventKind, Subscription, SubscriptionId};
pub use version::{parse_version_line, RuntimeInfo};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::process::{
    flatten_args, CancelHandle, CommandOutcome, OutputSource, ProcessRunner, SubprocessRunner,
};

pub const DEFAULT_IMAGE: &str = "node:latest";
pub const DEFAULT_RUNTIME: &str = "docker";

/// Identifier of a container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Wrap an id or name supplied by the user, kept verbatim apart from
    /// surrounding whitespace
    pub fn new(id: impl AsRef<str>) -> Option<Self> {
        let id = id.as_ref().trim();
        (!id.is_empty()).then(|| Self(id.to_string()))
    }

    /// Derive an id from the output line of `run -d`: trim, then drop every
    /// character that is not ASCII alphanumeric
    pub fn from_run_output(line: &str) -> Option<Self> {
        let id: String = line
            .trim()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        (!id.is_empty()).then_some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 12 character form printed by `docker ps`
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which container, if any, a client is bound to.
///
/// `Stopped` remembers the last id after `kill`/`stop` so that `rm` can still
/// reach it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContainerState {
    #[default]
    Inactive,
    Active(ContainerId),
    Stopped(ContainerId),
}

impl ContainerState {
    pub fn active(&self) -> Option<&ContainerId> {
        match self {
            ContainerState::Active(id) => Some(id),
            _ => None,
        }
    }

    pub fn last(&self) -> Option<&ContainerId> {
        match self {
            ContainerState::Active(id) | ContainerState::Stopped(id) => Some(id),
            ContainerState::Inactive => None,
        }
    }
}

/// Client for one logical session with the container runtime
pub struct RuntimeClient {
    image: String,
    program: String,
    runner: Arc<dyn ProcessRunner>,
    state: ContainerState,
    info: RuntimeInfo,
    events: EventBus,
}

impl std::fmt::Debug for RuntimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClient")
            .field("image", &self.image)
            .field("program", &self.program)
            .field("state", &self.state)
            .field("info", &self.info)
            .finish()
    }
}

impl RuntimeClient {
    /// Create a client that spawns real subprocesses
    pub fn new(image: impl Into<String>, program: impl Into<String>) -> Self {
        Self::with_runner(image, program, Arc::new(SubprocessRunner::new()))
    }

    pub fn with_runner(
        image: impl Into<String>,
        program: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            image: image.into(),
            program: program.into(),
            runner,
            state: ContainerState::Inactive,
            info: RuntimeInfo::default(),
            events: EventBus::new(),
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn info(&self) -> &RuntimeInfo {
        &self.info
    }

    pub fn state(&self) -> &ContainerState {
        &self.state
    }

    /// Container currently considered running, if any
    pub fn container_id(&self) -> Option<&ContainerId> {
        self.state.active()
    }

    /// Most recent container id, kept after the container is stopped
    pub fn last_container_id(&self) -> Option<&ContainerId> {
        self.state.last()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.runner.cancel_handle()
    }

    /// Emit `error` and hand the error back for propagation
    fn fail(&self, err: RuntimeError) -> RuntimeError {
        log::debug!("Runtime verb failed: {}", err);
        self.events.emit(Event::Error(err.to_string()));
        err
    }

    /// Spawn the runtime with `args`, streaming output as events.
    /// A non-zero exit becomes [`RuntimeError::NonZeroExit`].
    async fn spawn(&self, args: Vec<String>) -> Result<CommandOutcome, RuntimeError> {
        self.events.emit(Event::Spawn {
            command: self.program.clone(),
            args: args.clone(),
        });

        let events = &self.events;
        let sink = move |source: OutputSource, line: &str| {
            events.emit(match source {
                OutputSource::Stdout => Event::Stdout(line.to_string()),
                OutputSource::Stderr => Event::Stderr(line.to_string()),
            })
        };

        let outcome = self.runner.run(&self.program, &args, &sink).await?;
        if !outcome.success() {
            return Err(RuntimeError::NonZeroExit {
                verb: args.first().cloned().unwrap_or_default(),
                outcome,
            });
        }
        Ok(outcome)
    }

    /// Query `<runtime> --version` and remember the version and build
    pub async fn version(&mut self) -> Result<RuntimeInfo, RuntimeError> {
        let outcome = match self.spawn(vec!["--version".to_string()]).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e)),
        };

        let line = outcome.stdout_lines.first().cloned().unwrap_or_default();
        let Some(info) = parse_version_line(&line) else {
            return Err(self.fail(RuntimeError::VersionParse { line }));
        };

        log::info!("Runtime version {} (build {})", info.version, info.build);
        self.info = info.clone();
        self.events.emit(Event::DockerInfo {
            version: info.version.clone(),
            build: info.build.clone(),
        });
        Ok(info)
    }

    /// `<runtime> pull <image> <args...>`
    pub async fn pull(&self, args: &[String]) -> Result<CommandOutcome, RuntimeError> {
        log::info!("Pulling image {}", self.image);
        let args = flatten_args([vec!["pull".to_string(), self.image.clone()], args.to_vec()]);
        match self.spawn(args).await {
            Ok(outcome) => {
                self.events.emit(Event::Pulled(outcome.clone()));
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Start a detached container running `shell`:
    /// `<runtime> run -d <verb_args...> -it <image> <shell>`.
    ///
    /// If a container is already active its id is returned without spawning
    /// anything.
    pub async fn run(&mut self, shell: &str, verb_args: &[String]) -> Result<ContainerId, RuntimeError> {
        if let Some(id) = self.state.active() {
            log::debug!("Container {} already running, not starting another", id.short());
            return Ok(id.clone());
        }

        let args = flatten_args([
            vec!["run".to_string(), "-d".to_string()],
            verb_args.to_vec(),
            vec!["-it".to_string(), self.image.clone(), shell.to_string()],
        ]);

        let outcome = match self.spawn(args).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e)),
        };

        let first_line = outcome
            .stdout_lines
            .iter()
            .find(|line| !line.trim().is_empty())
            .cloned()
            .unwrap_or_default();
        let Some(id) = ContainerId::from_run_output(&first_line) else {
            return Err(self.fail(RuntimeError::MissingContainerId {
                output: outcome.stdout(),
            }));
        };

        log::info!("Started container {}", id.short());
        self.state = ContainerState::Active(id.clone());
        self.events.emit(Event::Running(outcome));
        Ok(id)
    }

    /// Bind to an already running container instead of starting one
    pub fn attach(&mut self, id: ContainerId) {
        log::info!("Attaching to existing container {}", id);
        self.state = ContainerState::Active(id);
    }

    /// `<runtime> exec <id> <command...>` against the active container
    pub async fn exec(&self, command: &[String]) -> Result<CommandOutcome, RuntimeError> {
        let Some(id) = self.state.active() else {
            return Err(self.fail(RuntimeError::NotConnected));
        };
        if command.is_empty() {
            return Err(self.fail(RuntimeError::EmptyCommand));
        }

        let args = flatten_args([
            vec!["exec".to_string(), id.to_string()],
            command.to_vec(),
        ]);
        match self.spawn(args).await {
            Ok(outcome) => {
                self.events.emit(Event::ExecDone(outcome.clone()));
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `<runtime> stop <id>`. Resolves to `None` when nothing is active.
    pub async fn stop(&mut self, args: &[String]) -> Result<Option<CommandOutcome>, RuntimeError> {
        let Some(id) = self.state.active().cloned() else {
            return Ok(None);
        };

        let args = flatten_args([vec!["stop".to_string(), id.to_string()], args.to_vec()]);
        match self.spawn(args).await {
            Ok(outcome) => {
                self.state = ContainerState::Stopped(id);
                self.events.emit(Event::Stopped(outcome.clone()));
                Ok(Some(outcome))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `<runtime> kill <id>`. Resolves to `None` when nothing is active.
    pub async fn kill(&mut self) -> Result<Option<CommandOutcome>, RuntimeError> {
        let Some(id) = self.state.active().cloned() else {
            return Ok(None);
        };

        match self.spawn(vec!["kill".to_string(), id.to_string()]).await {
            Ok(outcome) => {
                self.state = ContainerState::Stopped(id);
                self.events.emit(Event::Killed(outcome.clone()));
                Ok(Some(outcome))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `<runtime> rm -v <last id>`. Resolves to `None` when no container was
    /// ever bound to this client.
    pub async fn rm(&self, args: &[String]) -> Result<Option<CommandOutcome>, RuntimeError> {
        let Some(id) = self.state.last() else {
            return Ok(None);
        };

        let args = flatten_args([
            vec!["rm".to_string(), "-v".to_string(), id.to_string()],
            args.to_vec(),
        ]);
        match self.spawn(args).await {
            Ok(outcome) => {
                self.events.emit(Event::Removed(outcome.clone()));
                Ok(Some(outcome))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Status string (`running`, `exited`, ...) of the last container, via
    /// `<runtime> inspect --format {{.State.Status}} <id>`
    pub async fn status(&self) -> Result<Option<String>, RuntimeError> {
        let Some(id) = self.state.last() else {
            return Ok(None);
        };

        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            id.to_string(),
        ];
        match self.spawn(args).await {
            Ok(outcome) => Ok(Some(outcome.stdout().trim().to_string())),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Run an arbitrary verb without touching container state
    pub async fn command(&self, verb: &str, args: &[String]) -> Result<CommandOutcome, RuntimeError> {
        let args = flatten_args([vec![verb.to_string()], args.to_vec()]);
        self.spawn(args).await.map_err(|e| self.fail(e))
    }

    /// Ids of containers matching `filter_args`, using this client's runner
    pub async fn list_containers(&self, filter_args: &[String]) -> Result<Vec<String>, RuntimeError> {
        containers(self.runner.as_ref(), &self.program, filter_args).await
    }
}

fn discard_output(_: OutputSource, _: &str) {}

/// `<runtime> ps <args...>`. Not tied to any client instance.
pub async fn ps(
    runner: &dyn ProcessRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutcome, RuntimeError> {
    let args = flatten_args([vec!["ps".to_string()], args.to_vec()]);
    let outcome = runner.run(program, &args, &discard_output).await?;
    if !outcome.success() {
        return Err(RuntimeError::NonZeroExit {
            verb: "ps".to_string(),
            outcome,
        });
    }
    Ok(outcome)
}

/// Container ids from `<runtime> ps -q <filter_args...>`, one per line
pub async fn containers(
    runner: &dyn ProcessRunner,
    program: &str,
    filter_args: &[String],
) -> Result<Vec<String>, RuntimeError> {
    let args = flatten_args([vec!["-q".to_string()], filter_args.to_vec()]);
    let outcome = ps(runner, program, &args).await?;
    Ok(outcome
        .stdout_lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
