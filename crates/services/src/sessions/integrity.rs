use std::sync::{Arc, Mutex};

use exam_core::model::{EnvironmentSignal, KeyCombo, SessionSettings, Violation, ViolationKind};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lock;
use super::view::SessionEvent;
use crate::Clock;

/// Host-side channel for raw environment signals (visibility, key presses,
/// context menu). The host publishes; sessions subscribe.
#[derive(Debug, Clone)]
pub struct EnvironmentBus {
    sender: broadcast::Sender<EnvironmentSignal>,
}

impl EnvironmentBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver a signal to every bound listener. Returns how many received it.
    pub fn publish(&self, signal: EnvironmentSignal) -> usize {
        self.sender.send(signal).unwrap_or(0)
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EnvironmentSignal> {
        self.sender.subscribe()
    }
}

impl Default for EnvironmentBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Append-only log of integrity violations for one session.
///
/// Violations are informational; they never block answering or submission.
pub struct IntegrityMonitor {
    clock: Clock,
    disallowed: Vec<KeyCombo>,
    log: Mutex<Vec<Violation>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl IntegrityMonitor {
    #[must_use]
    pub fn new(
        clock: Clock,
        settings: &SessionSettings,
        events: broadcast::Sender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            clock,
            disallowed: settings.disallowed_keys().to_vec(),
            log: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            events,
        })
    }

    /// Subscribe to `bus`. Returns `false` if already bound.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn bind(self: &Arc<Self>, bus: &EnvironmentBus) -> bool {
        let mut listener = lock(&self.listener);
        if listener.is_some() {
            return false;
        }

        let mut signals = bus.subscribe();
        let weak = Arc::downgrade(self);
        *listener = Some(tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(signal) => {
                        let Some(monitor) = weak.upgrade() else {
                            break;
                        };
                        monitor.record(&signal);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "integrity listener lagged; signals dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        debug!("integrity monitor bound");
        true
    }

    /// Release the bus subscription. Safe to call repeatedly.
    ///
    /// The receiver is dropped once the runtime cancels the listener task.
    pub fn unbind(&self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
            debug!("integrity monitor unbound");
        }
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        lock(&self.listener).is_some()
    }

    fn classify(&self, signal: &EnvironmentSignal) -> Option<(ViolationKind, String)> {
        match signal {
            EnvironmentSignal::VisibilityChanged { hidden: true } => Some((
                ViolationKind::VisibilityHidden,
                "exam window hidden".to_owned(),
            )),
            EnvironmentSignal::VisibilityChanged { hidden: false } => None,
            EnvironmentSignal::KeyCombo(combo) if self.disallowed.contains(combo) => Some((
                ViolationKind::DisallowedKeyCombo,
                format!("disallowed key combination {combo}"),
            )),
            EnvironmentSignal::KeyCombo(_) => None,
            EnvironmentSignal::ContextMenu => Some((
                ViolationKind::ContextMenu,
                "context menu opened".to_owned(),
            )),
        }
    }

    /// Classify `signal` and append a violation if it is one.
    pub fn record(&self, signal: &EnvironmentSignal) -> Option<Violation> {
        let (kind, description) = self.classify(signal)?;
        let violation = Violation::new(kind, self.clock.now(), description);
        let total = {
            let mut log = lock(&self.log);
            log.push(violation.clone());
            log.len()
        };
        info!(?kind, total, "integrity violation recorded");
        let _ = self
            .events
            .send(SessionEvent::ViolationRecorded { kind, total });
        Some(violation)
    }

    #[must_use]
    pub fn violation_count(&self) -> usize {
        lock(&self.log).len()
    }

    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        lock(&self.log).clone()
    }
}

impl Drop for IntegrityMonitor {
    fn drop(&mut self) {
        self.unbind();
    }
}
