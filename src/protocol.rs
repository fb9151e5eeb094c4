//! Wire types exchanged with the sensing service.
//!
//! Messages travel as JSON envelopes of the form `{"event": "<name>", "data": ...}`.
//! [`ServiceRequest`] covers everything the console sends, [`ServiceEvent`] everything
//! it receives, and [`ServiceState`] is the full snapshot returned by the bootstrap
//! call on (re)connect.

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationConfig, CameraPose, Matrix};
use crate::mode::OperatingMode;

/// 2D detection in image coordinates.
pub type ImagePoint = [f64; 2];

/// Triangulated 3D point in reconstruction coordinates.
pub type ObjectPoint = [f64; 3];

/// One frame's worth of detections.
///
/// `image_points` holds one entry per camera (`None` when that camera saw nothing);
/// `object_points` and `errors` hold one entry per triangulated point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Frame timestamp in milliseconds
    #[serde(rename = "time_ms")]
    pub timestamp_ms: f64,
    /// Per-camera image point
    #[serde(default)]
    pub image_points: Vec<Option<ImagePoint>>,
    /// Triangulated points, when triangulation is enabled
    #[serde(default)]
    pub object_points: Vec<Option<ObjectPoint>>,
    /// Residual error per triangulated point
    #[serde(default)]
    pub errors: Vec<f64>,
}

impl DetectionEvent {
    /// First triangulated point that is present.
    pub fn first_object_point(&self) -> Option<ObjectPoint> {
        self.object_points.iter().flatten().next().copied()
    }
}

/// Something that consumes the detection stream.
///
/// Capture coordinators and the session recorder each implement this and are fed
/// independently; none of them sees another's state.
pub trait DetectionSink {
    /// Handle one detection event. Returns `true` if the sink kept any data from it.
    fn on_detection(&mut self, event: &DetectionEvent) -> bool;
}

/// Requests sent to the sensing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum ServiceRequest {
    /// Bootstrap snapshot request
    GetState,
    ChangeMode {
        target: OperatingMode,
    },
    SolveFullPose {
        points: Vec<Vec<Option<ImagePoint>>>,
    },
    SolveBundleAdjustment {
        points: Vec<Vec<Option<ImagePoint>>>,
        current_poses: Vec<CameraPose>,
    },
    SolveScale {
        points: Vec<Vec<Option<ObjectPoint>>>,
        reference_distance: f64,
    },
    SolveFloorAlignment {
        points: Vec<Vec<Option<ObjectPoint>>>,
        current_poses: Vec<CameraPose>,
        world_transform: Matrix,
    },
    SetOrigin {
        point: ObjectPoint,
        world_transform: Matrix,
    },
    SetCameraPoses {
        poses: Vec<CameraPose>,
    },
    SetWorldTransform {
        matrix: Matrix,
    },
    SetIntrinsics {
        matrices: Vec<Matrix>,
    },
    SetDistortion {
        coefficients: Vec<Vec<f64>>,
    },
    StartRecording {
        name: String,
        record_raw_media: bool,
    },
    StopRecording,
    UpdateCameraSettings {
        exposure: f64,
        gain: f64,
    },
    UpdateDetectionSettings {
        threshold: f64,
    },
}

impl ServiceRequest {
    /// Envelope name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceRequest::GetState => "get-state",
            ServiceRequest::ChangeMode { .. } => "change-mode",
            ServiceRequest::SolveFullPose { .. } => "solve-full-pose",
            ServiceRequest::SolveBundleAdjustment { .. } => "solve-bundle-adjustment",
            ServiceRequest::SolveScale { .. } => "solve-scale",
            ServiceRequest::SolveFloorAlignment { .. } => "solve-floor-alignment",
            ServiceRequest::SetOrigin { .. } => "set-origin",
            ServiceRequest::SetCameraPoses { .. } => "set-camera-poses",
            ServiceRequest::SetWorldTransform { .. } => "set-world-transform",
            ServiceRequest::SetIntrinsics { .. } => "set-intrinsics",
            ServiceRequest::SetDistortion { .. } => "set-distortion",
            ServiceRequest::StartRecording { .. } => "start-recording",
            ServiceRequest::StopRecording => "stop-recording",
            ServiceRequest::UpdateCameraSettings { .. } => "update-camera-settings",
            ServiceRequest::UpdateDetectionSettings { .. } => "update-detection-settings",
        }
    }
}

/// Full service state returned by the bootstrap call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Current operating mode
    pub mode: OperatingMode,
    /// Calibration held by the service; absent fields are unset there
    #[serde(flatten)]
    pub calibration: CalibrationConfig,
}

/// Events received from the sensing service or raised by the link itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum ServiceEvent {
    DetectionEvent(DetectionEvent),
    ModeChanged {
        mode: OperatingMode,
    },
    ModeChangeRejected {
        reason: String,
    },
    PoseSolved {
        poses: Vec<CameraPose>,
        #[serde(default)]
        intrinsics: Option<Vec<Matrix>>,
        #[serde(default)]
        distortion: Option<Vec<Vec<f64>>>,
        reprojection_error: f64,
    },
    ScaleSolved {
        scale_factor: f64,
        poses: Vec<CameraPose>,
    },
    ScaleFailed {
        reason: String,
    },
    /// Reply to floor alignment and origin requests
    WorldTransformSolved {
        matrix: Matrix,
    },
    GenericError {
        message: String,
    },
    FrameRate {
        fps: f64,
    },
    CameraCount {
        count: usize,
    },
    /// Unsolicited full state snapshot
    State(ServiceState),
    /// Link came up and the bootstrap call returned
    #[serde(skip)]
    Connected(ServiceState),
    /// Link dropped
    #[serde(skip)]
    Disconnected {
        reason: String,
    },
}
