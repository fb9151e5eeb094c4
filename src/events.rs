//! Console events and operator notices.
//!
//! The console publishes a [`ConsoleEvent`] whenever something the operator should
//! see changes. Front ends (the CLI, tests) subscribe through an [`EventHub`] and get
//! a [`Subscription`] whose lifetime bounds the subscription: dropping the handle
//! unregisters it, on every exit path.
//!
//! Errors surface as [`Notice`]s on a [`NoticeBoard`]. Transient notices can be
//! dismissed; the connectivity notice is blocking and is only cleared by a reconnect.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::archive::{ExportProgress, ExportReport};
use crate::calibration::ConfigField;
use crate::capture::{ProcedureKind, SolveOutcome};
use crate::error::ConsoleError;
use crate::mode::OperatingMode;

/// Live rig telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RigStatus {
    /// Detection frame rate reported by the service
    pub fps: Option<f64>,
    /// Number of cameras the service found
    pub camera_count: Option<usize>,
}

/// Category of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Link to the sensing service is down
    Connectivity,
    /// Mode change refused
    ModeRejected,
    /// A calibration solve failed
    SolveFailed,
    /// Calibration edit could not be parsed or validated
    ConfigEdit,
    /// Archive export failed
    Export,
    /// Error message from the service, or any other local failure
    General,
}

impl NoticeKind {
    /// Kind for a console error.
    pub fn of(err: &ConsoleError) -> Self {
        match err {
            ConsoleError::TransportDisconnected => NoticeKind::Connectivity,
            ConsoleError::ModeRejected(_) | ConsoleError::TransitionNotAllowed { .. } => {
                NoticeKind::ModeRejected
            }
            ConsoleError::SolveFailed { .. } => NoticeKind::SolveFailed,
            ConsoleError::MalformedConfigEdit { .. } | ConsoleError::ShapeMismatch { .. } => {
                NoticeKind::ConfigEdit
            }
            ConsoleError::ExportFailure(_) => NoticeKind::Export,
            _ => NoticeKind::General,
        }
    }
}

/// Something shown to the operator until dismissed or resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    /// Board-unique id, used to dismiss it
    pub id: u64,
    /// Category
    pub kind: NoticeKind,
    /// Text shown to the operator
    pub message: String,
    /// Blocks further operation until resolved
    pub blocking: bool,
    /// When it was last raised
    pub raised_at: DateTime<Utc>,
}

/// Transient notices kept before the oldest is dropped.
pub const MAX_TRANSIENT_NOTICES: usize = 32;

/// Active notices.
#[derive(Debug, Default)]
pub struct NoticeBoard {
    notices: Vec<Notice>,
    next_id: u64,
}

impl NoticeBoard {
    /// An empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a notice for `err`.
    pub fn raise(&mut self, err: &ConsoleError) -> Notice {
        self.raise_message(NoticeKind::of(err), err.to_string(), err.is_blocking())
    }

    /// Raise a notice with a custom message.
    ///
    /// A blocking notice of a kind that is already showing is not duplicated. A
    /// transient notice repeating one already showing moves it to the end with a new
    /// timestamp and keeps its id. Past [`MAX_TRANSIENT_NOTICES`] the oldest
    /// transient notice is dropped.
    pub fn raise_message(
        &mut self,
        kind: NoticeKind,
        message: impl Into<String>,
        blocking: bool,
    ) -> Notice {
        let message = message.into();
        if blocking {
            if let Some(existing) = self.notices.iter().find(|n| n.blocking && n.kind == kind) {
                return existing.clone();
            }
        } else if let Some(pos) = self
            .notices
            .iter()
            .position(|n| !n.blocking && n.kind == kind && n.message == message)
        {
            let mut repeated = self.notices.remove(pos);
            repeated.raised_at = Utc::now();
            self.notices.push(repeated.clone());
            return repeated;
        } else if self.notices.iter().filter(|n| !n.blocking).count() >= MAX_TRANSIENT_NOTICES {
            if let Some(oldest) = self.notices.iter().position(|n| !n.blocking) {
                let dropped = self.notices.remove(oldest);
                debug!(id = dropped.id, "notice board full, oldest notice dropped");
            }
        }
        self.next_id += 1;
        let notice = Notice {
            id: self.next_id,
            kind,
            message,
            blocking,
            raised_at: Utc::now(),
        };
        self.notices.push(notice.clone());
        notice
    }

    /// Dismiss a transient notice. Blocking notices stay.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id || n.blocking);
        self.notices.len() != before
    }

    /// Dismiss every transient notice. Returns the removed ids.
    pub fn dismiss_all(&mut self) -> Vec<u64> {
        let removed = self
            .notices
            .iter()
            .filter(|n| !n.blocking)
            .map(|n| n.id)
            .collect();
        self.notices.retain(|n| n.blocking);
        removed
    }

    /// Resolve blocking notices of `kind`. Returns the removed ids.
    pub fn resolve(&mut self, kind: NoticeKind) -> Vec<u64> {
        let removed = self
            .notices
            .iter()
            .filter(|n| n.blocking && n.kind == kind)
            .map(|n| n.id)
            .collect();
        self.notices.retain(|n| !(n.blocking && n.kind == kind));
        removed
    }

    /// Whether anything is blocking.
    pub fn is_blocked(&self) -> bool {
        self.notices.iter().any(|n| n.blocking)
    }

    /// Notices in the order raised.
    pub fn active(&self) -> &[Notice] {
        &self.notices
    }
}

/// Event published by the console.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ConsoleEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    ModeChanged {
        mode: OperatingMode,
    },
    NoticeRaised(Notice),
    NoticeCleared {
        id: u64,
    },
    SampleCaptured {
        procedure: ProcedureKind,
        samples: usize,
    },
    SolveCompleted {
        procedure: ProcedureKind,
        outcome: SolveOutcome,
    },
    CalibrationUpdated {
        fields: Vec<ConfigField>,
    },
    RecordingStarted {
        name: String,
    },
    RecordingStopped {
        name: String,
        samples: usize,
    },
    ExportProgress(ExportProgress),
    ExportFinished(ExportReport),
    ExportFailed {
        name: String,
        reason: String,
    },
    RigStatus(RigStatus),
}

struct HubInner {
    subscribers: Mutex<Vec<(u64, mpsc::Sender<ConsoleEvent>)>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Fan-out of console events to any number of subscribers.
///
/// Each subscriber has its own bounded queue. A subscriber that falls behind
/// misses events rather than stalling the console.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl EventHub {
    /// Create a hub whose subscriber queues hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a subscriber. It is removed when the handle is dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push((id, tx));
        }
        debug!(subscriber = id, "event subscriber registered");
        Subscription {
            id,
            rx,
            hub: Arc::clone(&self.inner),
        }
    }

    /// Deliver `event` to every subscriber without waiting.
    pub fn publish(&self, event: ConsoleEvent) {
        let Ok(mut subscribers) = self.inner.subscribers.lock() else {
            return;
        };
        subscribers.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = id, "event subscriber is lagging, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<ConsoleEvent>,
    hub: Arc<HubInner>,
}

impl Subscription {
    /// Next event, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<ConsoleEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ConsoleEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subscribers) = self.hub.subscribers.lock() {
            subscribers.retain(|(id, _)| *id != self.id);
        }
        debug!(subscriber = self.id, "event subscriber released");
    }
}
