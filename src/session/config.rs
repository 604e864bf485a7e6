use std::path::Path;
use std::time::Duration;

use super::command::ExecCommand;
use crate::runtime::{DEFAULT_IMAGE, DEFAULT_RUNTIME};

pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Everything a session needs to know, as decoded from the command line
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub image: String,
    pub runtime: String,
    /// Entrypoint process of the container
    pub shell: String,
    pub verbose: bool,
    pub working_dir: Option<String>,
    /// `host:container` mappings; a leading `./` on the host side is resolved
    /// against the current directory
    pub volumes: Vec<String>,
    /// `hostPort:containerPort` mappings
    pub publish: Vec<String>,
    pub remove_on_exit: bool,
    pub kill_on_exit: bool,
    /// Wrap this existing container instead of starting a new one
    pub attach_to: Option<String>,
    pub output_status: bool,
    pub pull: bool,
    pub exec: Vec<ExecCommand>,
    /// Upper bound on any single runtime invocation
    pub timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            runtime: DEFAULT_RUNTIME.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            verbose: false,
            working_dir: None,
            volumes: Vec::new(),
            publish: Vec::new(),
            remove_on_exit: true,
            kill_on_exit: true,
            attach_to: None,
            output_status: false,
            pull: false,
            exec: Vec::new(),
            timeout: None,
        }
    }
}

/// What shutdown does with the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Leave the container alone
    Keep,
    /// Kill it but keep it around for inspection
    Kill,
    /// Kill it, then remove it even if the kill failed
    KillAndRemove,
}

impl SessionConfig {
    /// Removal is only reachable through killing; with `kill_on_exit` off
    /// the container is left untouched whatever `remove_on_exit` says.
    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        match (self.kill_on_exit, self.remove_on_exit) {
            (false, _) => ShutdownPolicy::Keep,
            (true, false) => ShutdownPolicy::Kill,
            (true, true) => ShutdownPolicy::KillAndRemove,
        }
    }

    /// Verb flags for `run`: `-v` pairs, `-p` pairs, then `-w`
    pub fn run_args(&self, cwd: &Path) -> Vec<String> {
        let mut args = Vec::new();
        for volume in &self.volumes {
            args.push("-v".to_string());
            args.push(materialize_volume(volume, cwd));
        }
        for port in &self.publish {
            args.push("-p".to_string());
            args.push(port.clone());
        }
        if let Some(dir) = &self.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        args
    }
}

/// Rewrite a leading `./` in a volume spec to `<cwd>/`
pub fn materialize_volume(spec: &str, cwd: &Path) -> String {
    match spec.strip_prefix("./") {
        Some(rest) => format!("{}/{}", cwd.display().to_string().trim_end_matches('/'), rest),
        None => spec.to_string(),
    }
}
