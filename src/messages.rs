//! Message types for talking to the console coordinator.
//!
//! Front ends never touch console state directly. They send a [`ConsoleCommand`]
//! over an mpsc channel and await the reply on the oneshot receiver embedded in it
//! (see [`crate::console`]).
//!
//! # Message Flow
//!
//! ```text
//! Front end                          Console task
//! ---------                          ------------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Receive command (between stream events)
//!                                    4. Validate against mode and link state
//!                                    5. Send response
//! 6. Await oneshot receiver   <------
//! ```
//!
//! Every variant has a helper constructor returning the command together with its
//! receiver:
//!
//! ```rust
//! use mocap_console::messages::ConsoleCommand;
//! use mocap_console::capture::ProcedureKind;
//!
//! let (cmd, rx) = ConsoleCommand::arm(ProcedureKind::Pose);
//! // cmd_tx.send(cmd).await?;
//! // rx.await??;
//! ```

use serde::Serialize;
use tokio::sync::oneshot;

use crate::archive::ExportProgress;
use crate::calibration::ConfigField;
use crate::capture::{PoseSolve, ProcedureKind, SolveOutcome};
use crate::error::ConsoleResult;
use crate::events::{Notice, RigStatus};
use crate::mode::{ModeToggle, OperatingMode};
use crate::session::RecordingOptions;

/// Reply channel carrying a console result.
pub type Reply<T> = oneshot::Sender<ConsoleResult<T>>;

/// Which solve to submit, with its operator inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolveCommand {
    /// Pose solve from the pose captures
    Pose(PoseSolve),
    /// Scale solve; `None` uses the configured reference distance
    Scale {
        /// Reference distance override in metres
        reference_distance: Option<f64>,
    },
    /// Floor alignment from the alignment captures
    Alignment,
    /// Origin from the most recent origin capture
    Origin,
}

impl SolveCommand {
    /// Procedure whose captures are submitted.
    pub fn procedure(&self) -> ProcedureKind {
        match self {
            SolveCommand::Pose(_) => ProcedureKind::Pose,
            SolveCommand::Scale { .. } => ProcedureKind::Scale,
            SolveCommand::Alignment => ProcedureKind::Alignment,
            SolveCommand::Origin => ProcedureKind::Origin,
        }
    }
}

/// A session that was just stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session name
    pub name: String,
    /// Frames recorded
    pub samples: usize,
}

/// Snapshot of one procedure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureStatus {
    /// Which procedure
    pub procedure: ProcedureKind,
    /// Captures collected so far
    pub samples: usize,
    /// Next matching detection will be captured
    pub armed: bool,
    /// A solve is outstanding
    pub processing: bool,
    /// Result of the last solve
    pub last_outcome: Option<SolveOutcome>,
}

/// Snapshot of everything the operator sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleStatus {
    /// Link to the sensing service is up
    pub connected: bool,
    /// Confirmed operating mode
    pub mode: OperatingMode,
    /// Mode requested and awaiting confirmation
    pub pending_mode: Option<OperatingMode>,
    /// Pose, scale, alignment and origin, in that order
    pub procedures: Vec<ProcedureStatus>,
    /// Name of the active recording
    pub recording: Option<String>,
    /// Frames in the active recording
    pub recorded_samples: usize,
    /// Name of the last completed recording
    pub last_session: Option<String>,
    /// Calibration fields that currently have a value
    pub calibration: Vec<ConfigField>,
    /// Archive export progress
    pub export: ExportProgress,
    /// Live telemetry
    pub rig: RigStatus,
    /// Active notices, oldest first
    pub notices: Vec<Notice>,
}

/// Commands accepted by the console coordinator.
#[derive(Debug)]
pub enum ConsoleCommand {
    /// Ask the service for a mode change.
    ///
    /// # Response
    ///
    /// - `Ok(())`: request sent; the mode changes when the service confirms
    /// - `Err`: link down or transition not in the table
    RequestMode {
        target: OperatingMode,
        response: Reply<()>,
    },

    /// Press a mode bar toggle.
    Toggle {
        toggle: ModeToggle,
        response: Reply<()>,
    },

    /// Arm a single-shot capture for a procedure.
    ///
    /// # Response
    ///
    /// - `Err(ModeUnavailable)`: the current mode does not enable the procedure
    Arm {
        procedure: ProcedureKind,
        response: Reply<()>,
    },

    /// Cancel a pending capture.
    Disarm {
        procedure: ProcedureKind,
        response: oneshot::Sender<()>,
    },

    /// Drop a procedure's captures.
    ClearCaptures {
        procedure: ProcedureKind,
        response: oneshot::Sender<()>,
    },

    /// Submit captures for solving. The outcome arrives later as an event.
    Solve {
        command: SolveCommand,
        response: Reply<()>,
    },

    /// Start recording a session.
    StartRecording {
        name: String,
        options: RecordingOptions,
        response: Reply<()>,
    },

    /// Stop recording. The session is exported in the background.
    StopRecording {
        response: Reply<SessionSummary>,
    },

    /// Export the last completed session again, optionally under another name.
    ExportLast {
        name: Option<String>,
        response: Reply<()>,
    },

    /// Load calibration from durable storage.
    LoadCalibration {
        response: Reply<Vec<ConfigField>>,
    },

    /// Save calibration to durable storage and push it upstream.
    SaveCalibration {
        response: Reply<Vec<ConfigField>>,
    },

    /// Replace one calibration field from structured text.
    EditCalibration {
        field: ConfigField,
        raw: String,
        response: Reply<()>,
    },

    /// Forward camera exposure and gain.
    UpdateCameraSettings {
        exposure: f64,
        gain: f64,
        response: Reply<()>,
    },

    /// Forward the point detection threshold.
    UpdateDetectionSettings {
        threshold: f64,
        response: Reply<()>,
    },

    /// Snapshot of the console.
    GetStatus {
        response: oneshot::Sender<ConsoleStatus>,
    },

    /// Dismiss all transient notices. Replies with the dismissed ids.
    DismissNotices {
        response: oneshot::Sender<Vec<u64>>,
    },

    /// Stop the console loop.
    ///
    /// An active recording is stopped first (without export).
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

impl ConsoleCommand {
    /// Helper to create a RequestMode command
    pub fn request_mode(target: OperatingMode) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::RequestMode { target, response: tx }, rx)
    }

    /// Helper to create a Toggle command
    pub fn toggle(toggle: ModeToggle) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Toggle { toggle, response: tx }, rx)
    }

    /// Helper to create an Arm command
    pub fn arm(procedure: ProcedureKind) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Arm { procedure, response: tx }, rx)
    }

    /// Helper to create a Disarm command
    pub fn disarm(procedure: ProcedureKind) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Disarm { procedure, response: tx }, rx)
    }

    /// Helper to create a ClearCaptures command
    pub fn clear_captures(procedure: ProcedureKind) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::ClearCaptures { procedure, response: tx }, rx)
    }

    /// Helper to create a Solve command
    pub fn solve(command: SolveCommand) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Solve { command, response: tx }, rx)
    }

    /// Helper to create a StartRecording command
    pub fn start_recording(
        name: String,
        options: RecordingOptions,
    ) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::StartRecording {
                name,
                options,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a StopRecording command
    pub fn stop_recording() -> (Self, oneshot::Receiver<ConsoleResult<SessionSummary>>) {
        let (tx, rx) = oneshot::channel();
        (Self::StopRecording { response: tx }, rx)
    }

    /// Helper to create an ExportLast command
    pub fn export_last(name: Option<String>) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::ExportLast { name, response: tx }, rx)
    }

    /// Helper to create a LoadCalibration command
    pub fn load_calibration() -> (Self, oneshot::Receiver<ConsoleResult<Vec<ConfigField>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::LoadCalibration { response: tx }, rx)
    }

    /// Helper to create a SaveCalibration command
    pub fn save_calibration() -> (Self, oneshot::Receiver<ConsoleResult<Vec<ConfigField>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SaveCalibration { response: tx }, rx)
    }

    /// Helper to create an EditCalibration command
    pub fn edit_calibration(
        field: ConfigField,
        raw: String,
    ) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::EditCalibration {
                field,
                raw,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create an UpdateCameraSettings command
    pub fn update_camera_settings(
        exposure: f64,
        gain: f64,
    ) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::UpdateCameraSettings {
                exposure,
                gain,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create an UpdateDetectionSettings command
    pub fn update_detection_settings(
        threshold: f64,
    ) -> (Self, oneshot::Receiver<ConsoleResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::UpdateDetectionSettings { threshold, response: tx }, rx)
    }

    /// Helper to create a GetStatus command
    pub fn get_status() -> (Self, oneshot::Receiver<ConsoleStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    /// Helper to create a DismissNotices command
    pub fn dismiss_notices() -> (Self, oneshot::Receiver<Vec<u64>>) {
        let (tx, rx) = oneshot::channel();
        (Self::DismissNotices { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
