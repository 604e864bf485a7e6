//! Typed lifecycle events emitted by [`RuntimeClient`](super::RuntimeClient)
//!
//! Handlers are registered per [`EventKind`] and invoked synchronously in
//! registration order. Dispatch works on a snapshot of the handler list, so a
//! handler may subscribe or unsubscribe (itself or others) while an event is
//! being delivered without affecting that delivery. A panicking handler is
//! logged and does not stop its siblings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::process::CommandOutcome;

/// Every event the runtime client can emit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// Emitted right before a subprocess starts
    Spawn { command: String, args: Vec<String> },
    Stdout(String),
    Stderr(String),
    DockerInfo { version: String, build: String },
    Pulled(CommandOutcome),
    Running(CommandOutcome),
    ExecDone(CommandOutcome),
    Stopped(CommandOutcome),
    Killed(CommandOutcome),
    Removed(CommandOutcome),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Spawn,
    Stdout,
    Stderr,
    DockerInfo,
    Pulled,
    Running,
    ExecDone,
    Stopped,
    Killed,
    Removed,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::Spawn,
        EventKind::Stdout,
        EventKind::Stderr,
        EventKind::DockerInfo,
        EventKind::Pulled,
        EventKind::Running,
        EventKind::ExecDone,
        EventKind::Stopped,
        EventKind::Killed,
        EventKind::Removed,
        EventKind::Error,
    ];

    /// Lifecycle events, i.e. everything except raw output streaming
    pub fn lifecycle() -> impl Iterator<Item = EventKind> {
        Self::ALL
            .into_iter()
            .filter(|kind| !matches!(kind, EventKind::Stdout | EventKind::Stderr))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Spawn => "spawn",
            EventKind::Stdout => "stdout",
            EventKind::Stderr => "stderr",
            EventKind::DockerInfo => "docker_info",
            EventKind::Pulled => "pulled",
            EventKind::Running => "running",
            EventKind::ExecDone => "exec_done",
            EventKind::Stopped => "stopped",
            EventKind::Killed => "killed",
            EventKind::Removed => "removed",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Spawn { .. } => EventKind::Spawn,
            Event::Stdout(_) => EventKind::Stdout,
            Event::Stderr(_) => EventKind::Stderr,
            Event::DockerInfo { .. } => EventKind::DockerInfo,
            Event::Pulled(_) => EventKind::Pulled,
            Event::Running(_) => EventKind::Running,
            Event::ExecDone(_) => EventKind::ExecDone,
            Event::Stopped(_) => EventKind::Stopped,
            Event::Killed(_) => EventKind::Killed,
            Event::Removed(_) => EventKind::Removed,
            Event::Error(_) => EventKind::Error,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one registration for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    kind: EventKind,
    seq: u64,
}

#[derive(Default)]
struct Registry {
    next_seq: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// Shared publish/subscribe registry. Clones refer to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        let count: usize = registry.handlers.values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("handlers", &count).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_arc(kind, Arc::new(handler))
    }

    fn subscribe_arc(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        let mut registry = self.lock();
        let seq = registry.next_seq;
        registry.next_seq += 1;
        registry.handlers.entry(kind).or_default().push((seq, handler));
        SubscriptionId { kind, seq }
    }

    /// Register one handler for several kinds at once
    pub fn subscribe_many<I, F>(&self, kinds: I, handler: F) -> Vec<SubscriptionId>
    where
        I: IntoIterator<Item = EventKind>,
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        kinds
            .into_iter()
            .map(|kind| self.subscribe_arc(kind, handler.clone()))
            .collect()
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        let Some(handlers) = registry.handlers.get_mut(&id.kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(seq, _)| *seq != id.seq);
        before != handlers.len()
    }

    /// Subscribe for as long as the returned guard lives
    pub fn scoped<I, F>(&self, kinds: I, handler: F) -> Subscription
    where
        I: IntoIterator<Item = EventKind>,
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Subscription {
            bus: self.clone(),
            ids: self.subscribe_many(kinds, handler),
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().handlers.get(&kind).map_or(0, Vec::len)
    }

    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let snapshot: Vec<Handler> = {
            let registry = self.lock();
            match registry.handlers.get(&kind) {
                Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                log::error!("Handler for '{}' event panicked", kind);
            }
        }
    }
}

/// Registrations removed when dropped
#[must_use = "the handlers are removed as soon as the subscription is dropped"]
pub struct Subscription {
    bus: EventBus,
    ids: Vec<SubscriptionId>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}
