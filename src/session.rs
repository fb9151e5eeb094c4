//! Session recording.
//!
//! A session is a named stretch of the detection stream captured in full. While
//! recording, every detection event is appended to a [`SessionBuffer`], which keeps
//! four parallel series (timestamps, triangulated points, residual errors and
//! per-camera image points) that always have the same length.
//!
//! ## Lifecycle
//!
//! ```text
//!         start(name)
//!   Idle ─────────────▶ Recording
//!    ▲                      │
//!    └──────────────────────┘
//!            stop()  ──▶ Arc<CompletedSession> (handed to the exporter)
//! ```
//!
//! `stop` freezes the buffer into an [`Arc<CompletedSession>`]. The recorder keeps a
//! clone as "last recording" so it can be exported again; a new `start` always
//! begins with a fresh buffer, so an export of the previous session can still be
//! running while the next one records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::ConsoleContext;
use crate::error::{ConsoleError, ConsoleResult};
use crate::mode::{Feature, ModeController};
use crate::protocol::{DetectionEvent, DetectionSink, ImagePoint, ObjectPoint, ServiceRequest};

/// Four equal-length series, one entry per recorded detection event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionBuffer {
    timestamps: Vec<f64>,
    object_points: Vec<Vec<Option<ObjectPoint>>>,
    errors: Vec<Vec<f64>>,
    image_points: Vec<Vec<Option<ImagePoint>>>,
}

impl SessionBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event to all four series.
    pub fn push(&mut self, event: &DetectionEvent) {
        self.timestamps.push(event.timestamp_ms);
        self.object_points.push(event.object_points.clone());
        self.errors.push(event.errors.clone());
        self.image_points.push(event.image_points.clone());
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Frame timestamps in milliseconds.
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Triangulated points per frame.
    pub fn object_points(&self) -> &[Vec<Option<ObjectPoint>>] {
        &self.object_points
    }

    /// Residual errors per frame.
    pub fn errors(&self) -> &[Vec<f64>] {
        &self.errors
    }

    /// Per-camera image points per frame.
    pub fn image_points(&self) -> &[Vec<Option<ImagePoint>>] {
        &self.image_points
    }
}

/// Options sent with `start-recording`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingOptions {
    /// Ask the service to also store raw camera media
    pub record_raw_media: bool,
}

/// A stopped session, ready for export.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedSession {
    /// Session name, also the archive name
    pub name: String,
    /// When `start` was accepted
    pub started_at: DateTime<Utc>,
    /// When `stop` was called
    pub stopped_at: DateTime<Utc>,
    /// Recorded series
    pub buffer: SessionBuffer,
}

/// Recorder state.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderState {
    /// Not recording; events are discarded
    Idle,
    /// Buffering every event
    Recording {
        /// Session name
        name: String,
        /// Start time
        started_at: DateTime<Utc>,
    },
}

/// Validate a session name for use as an archive and directory name.
pub fn validate_session_name(name: &str) -> ConsoleResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.contains(['/', '\\'])
        || name.contains("..")
        || name.chars().any(char::is_control)
    {
        return Err(ConsoleError::InvalidSessionName(name.to_string()));
    }
    Ok(())
}

/// Buffers the detection stream between `start` and `stop`.
#[derive(Debug)]
pub struct SessionRecorder {
    state: RecorderState,
    buffer: SessionBuffer,
    last_completed: Option<Arc<CompletedSession>>,
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRecorder {
    /// Idle recorder with no previous session.
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            buffer: SessionBuffer::new(),
            last_completed: None,
        }
    }

    /// Begin recording `name`.
    ///
    /// Requires the recording feature to be enabled by the current mode.
    pub fn start(
        &mut self,
        ctx: &ConsoleContext,
        mode: &ModeController,
        name: &str,
        options: RecordingOptions,
    ) -> ConsoleResult<()> {
        if let RecorderState::Recording { name: active, .. } = &self.state {
            return Err(ConsoleError::AlreadyRecording(active.clone()));
        }
        validate_session_name(name)?;
        ctx.ensure_connected()?;
        mode.require(Feature::Recording)?;

        ctx.send(ServiceRequest::StartRecording {
            name: name.to_string(),
            record_raw_media: options.record_raw_media,
        })?;

        self.buffer = SessionBuffer::new();
        self.state = RecorderState::Recording {
            name: name.to_string(),
            started_at: Utc::now(),
        };
        info!(session = %name, raw_media = options.record_raw_media, "recording started");
        Ok(())
    }

    /// Stop recording and freeze the buffer.
    ///
    /// The session ends locally even if the service cannot be told.
    pub fn stop(&mut self, ctx: &ConsoleContext) -> ConsoleResult<Arc<CompletedSession>> {
        let RecorderState::Recording { name, started_at } =
            std::mem::replace(&mut self.state, RecorderState::Idle)
        else {
            return Err(ConsoleError::NotRecording);
        };

        if let Err(e) = ctx.send(ServiceRequest::StopRecording) {
            warn!(session = %name, error = %e, "could not notify service that recording stopped");
        }

        let completed = Arc::new(CompletedSession {
            name,
            started_at,
            stopped_at: Utc::now(),
            buffer: std::mem::take(&mut self.buffer),
        });
        info!(
            session = %completed.name,
            samples = completed.buffer.len(),
            "recording stopped"
        );
        self.last_completed = Some(Arc::clone(&completed));
        Ok(completed)
    }

    /// Current state.
    pub fn state(&self) -> &RecorderState {
        &self.state
    }

    /// Whether a session is active.
    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording { .. })
    }

    /// Events recorded so far in the active session.
    pub fn sample_count(&self) -> usize {
        self.buffer.len()
    }

    /// The most recently stopped session.
    pub fn last_completed(&self) -> Option<Arc<CompletedSession>> {
        self.last_completed.clone()
    }
}

impl DetectionSink for SessionRecorder {
    fn on_detection(&mut self, event: &DetectionEvent) -> bool {
        if !self.is_recording() {
            return false;
        }
        self.buffer.push(event);
        if self.buffer.len() % 1000 == 0 {
            debug!(samples = self.buffer.len(), "recording");
        }
        true
    }
}
