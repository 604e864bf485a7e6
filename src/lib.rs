pub mod process;
pub mod runtime;
pub mod session;

pub use process::{CancelHandle, CommandOutcome, OutputSource, ProcessError, ProcessRunner, SubprocessRunner};
pub use runtime::{
    containers, ps, ContainerId, ContainerState, Event, EventBus, EventKind, RuntimeClient,
    RuntimeError, RuntimeInfo,
};
pub use session::{
    ExecBatchResult, ExecCommand, ExecRecord, SessionConfig, SessionController, SessionError,
    SessionReport, ShutdownPolicy,
};
