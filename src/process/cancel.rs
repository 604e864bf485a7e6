use std::sync::Arc;
use tokio::sync::watch;

/// Terminates the subprocess a runner currently has in flight.
///
/// Cancelling only affects processes already running when [`cancel`] is
/// called; later spawns proceed normally, so cleanup verbs still run after an
/// interrupted exec step.
///
/// [`cancel`]: CancelHandle::cancel
#[derive(Debug, Clone)]
pub struct CancelHandle {
    generation: Arc<watch::Sender<u64>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            generation: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        log::debug!("Cancellation requested for in-flight subprocess");
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Subscribe before spawning; the receiver fires on the next `cancel`
    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}
