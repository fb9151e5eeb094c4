//! Operating mode tracking and feature gating.
//!
//! The sensing service runs a ranked pipeline: cameras are discovered, images are
//! processed, points are captured, then triangulated and finally grouped into
//! objects. Everything the operator can do is gated on the current rank.
//!
//! # State Machine
//!
//! ```text
//!              SaveImage
//!                 ▲ │
//!                 │ ▼
//! CamerasFound ◀──▶ ImageProcessing ◀──▶ PointCapture ◀──▶ Triangulation ◀──▶ ObjectDetection
//! ```
//!
//! The controller never mutates the mode on its own. [`ModeController::request_transition`]
//! only validates and forwards the request; the new mode is applied when the service
//! confirms it through [`ModeController::on_confirmed`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::context::ConsoleContext;
use crate::error::{ConsoleError, ConsoleResult};
use crate::protocol::ServiceRequest;

/// Ranked pipeline stage of the sensing service.
///
/// Serialized as its integer rank, which is what the service sends and expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum OperatingMode {
    /// Service is starting up
    Initializing,
    /// No cameras were detected
    CamerasNotFound,
    /// Cameras detected, raw frames only
    CamerasFound,
    /// Saving raw images
    SaveImage,
    /// Thresholding and blob extraction
    ImageProcessing,
    /// Per-camera 2D point detection
    PointCapture,
    /// 3D triangulation across cameras
    Triangulation,
    /// Rigid object grouping
    ObjectDetection,
}

impl OperatingMode {
    /// All modes in rank order.
    pub const ALL: [OperatingMode; 8] = [
        OperatingMode::Initializing,
        OperatingMode::CamerasNotFound,
        OperatingMode::CamerasFound,
        OperatingMode::SaveImage,
        OperatingMode::ImageProcessing,
        OperatingMode::PointCapture,
        OperatingMode::Triangulation,
        OperatingMode::ObjectDetection,
    ];

    /// Numeric rank as used on the wire.
    pub fn rank(self) -> i8 {
        match self {
            OperatingMode::Initializing => -1,
            OperatingMode::CamerasNotFound => 0,
            OperatingMode::CamerasFound => 1,
            OperatingMode::SaveImage => 2,
            OperatingMode::ImageProcessing => 3,
            OperatingMode::PointCapture => 4,
            OperatingMode::Triangulation => 5,
            OperatingMode::ObjectDetection => 6,
        }
    }

    /// Look up a mode by rank.
    pub fn from_rank(rank: i8) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.rank() == rank)
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            OperatingMode::Initializing => "Initializing",
            OperatingMode::CamerasNotFound => "Cameras not found",
            OperatingMode::CamerasFound => "Cameras found",
            OperatingMode::SaveImage => "Save image",
            OperatingMode::ImageProcessing => "Processing images",
            OperatingMode::PointCapture => "Capturing points",
            OperatingMode::Triangulation => "Triangulating",
            OperatingMode::ObjectDetection => "Detecting objects",
        }
    }

    /// Modes the service accepts a transition *from* when asked for `self`.
    pub fn allowed_sources(self) -> &'static [OperatingMode] {
        use OperatingMode::*;
        match self {
            SaveImage => &[CamerasFound],
            CamerasFound => &[ImageProcessing, SaveImage],
            ImageProcessing => &[CamerasFound, PointCapture],
            PointCapture => &[ImageProcessing, Triangulation],
            Triangulation => &[PointCapture, ObjectDetection],
            ObjectDetection => &[Triangulation],
            Initializing | CamerasNotFound => &[],
        }
    }

    /// Whether `self -> target` is in the transition table.
    pub fn can_transition_to(self, target: OperatingMode) -> bool {
        target.allowed_sources().contains(&self)
    }

    /// Parse an operator-typed mode name (`triangulation`, `point-capture`, `5`).
    pub fn parse_name(name: &str) -> Option<Self> {
        if let Ok(rank) = name.parse::<i8>() {
            return Self::from_rank(rank);
        }
        let normalized = name.to_ascii_lowercase().replace(['-', '_', ' '], "");
        match normalized.as_str() {
            "initializing" => Some(OperatingMode::Initializing),
            "camerasnotfound" => Some(OperatingMode::CamerasNotFound),
            "camerasfound" => Some(OperatingMode::CamerasFound),
            "saveimage" => Some(OperatingMode::SaveImage),
            "imageprocessing" | "processing" => Some(OperatingMode::ImageProcessing),
            "pointcapture" | "points" => Some(OperatingMode::PointCapture),
            "triangulation" | "triangulate" => Some(OperatingMode::Triangulation),
            "objectdetection" | "objects" => Some(OperatingMode::ObjectDetection),
            _ => None,
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<i8> for OperatingMode {
    type Error = String;

    fn try_from(rank: i8) -> Result<Self, Self::Error> {
        Self::from_rank(rank).ok_or_else(|| format!("unknown operating mode rank {rank}"))
    }
}

impl From<OperatingMode> for i8 {
    fn from(mode: OperatingMode) -> Self {
        mode.rank()
    }
}

/// Operator-facing capabilities and the rank they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Sampling per-camera image points for pose calibration
    PoseCapture,
    /// Sampling triangulated points (scale, alignment, origin)
    ObjectCapture,
    /// Recording a session
    Recording,
}

impl Feature {
    /// Minimum mode for the feature to be enabled.
    pub fn required_mode(self) -> OperatingMode {
        match self {
            Feature::PoseCapture => OperatingMode::PointCapture,
            Feature::ObjectCapture | Feature::Recording => OperatingMode::Triangulation,
        }
    }

    /// Short name used in errors.
    pub fn name(self) -> &'static str {
        match self {
            Feature::PoseCapture => "pose capture",
            Feature::ObjectCapture => "object point capture",
            Feature::Recording => "recording",
        }
    }
}

/// A two-way switch in the mode bar.
///
/// Each toggle flips between its own mode and a fallback of lower rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeToggle {
    /// Mode entered when switching on
    pub mode: OperatingMode,
    /// Mode returned to when switching off
    pub fallback: OperatingMode,
}

impl ModeToggle {
    /// Image processing on/off.
    pub const IMAGE_PROCESSING: ModeToggle = ModeToggle {
        mode: OperatingMode::ImageProcessing,
        fallback: OperatingMode::CamerasFound,
    };
    /// Point capture on/off.
    pub const POINT_CAPTURE: ModeToggle = ModeToggle {
        mode: OperatingMode::PointCapture,
        fallback: OperatingMode::ImageProcessing,
    };
    /// Triangulation on/off.
    pub const TRIANGULATION: ModeToggle = ModeToggle {
        mode: OperatingMode::Triangulation,
        fallback: OperatingMode::PointCapture,
    };

    /// The toggles in mode bar order.
    pub const ALL: [ModeToggle; 3] = [
        ModeToggle::IMAGE_PROCESSING,
        ModeToggle::POINT_CAPTURE,
        ModeToggle::TRIANGULATION,
    ];

    /// Whether the toggle shows as switched on.
    pub fn is_on(&self, current: OperatingMode) -> bool {
        current >= self.mode
    }

    /// Whether the toggle can be pressed in the current mode.
    pub fn is_actionable(&self, current: OperatingMode) -> bool {
        current >= self.fallback && current <= self.mode
    }

    /// The mode a press would request.
    pub fn target(&self, current: OperatingMode) -> OperatingMode {
        if current == self.mode {
            self.fallback
        } else {
            self.mode
        }
    }
}

/// Tracks the authoritative operating mode and gates features on it.
#[derive(Debug)]
pub struct ModeController {
    current: OperatingMode,
    pending: Option<OperatingMode>,
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new(OperatingMode::Initializing)
    }
}

impl ModeController {
    /// Create a controller starting at `initial`.
    pub fn new(initial: OperatingMode) -> Self {
        Self {
            current: initial,
            pending: None,
        }
    }

    /// Current authoritative mode.
    pub fn current(&self) -> OperatingMode {
        self.current
    }

    /// Transition requested but not yet confirmed, if any.
    pub fn pending(&self) -> Option<OperatingMode> {
        self.pending
    }

    /// `current_rank >= required_rank`.
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.current >= feature.required_mode()
    }

    /// Like [`is_enabled`](Self::is_enabled) but as a `Result` for `?` chains.
    pub fn require(&self, feature: Feature) -> ConsoleResult<()> {
        if self.is_enabled(feature) {
            Ok(())
        } else {
            Err(ConsoleError::ModeUnavailable {
                feature: feature.name(),
                required: feature.required_mode(),
                current: self.current,
            })
        }
    }

    /// Ask the service to move to `target`.
    ///
    /// Local state is not touched; the mode only changes once the service confirms.
    pub fn request_transition(
        &mut self,
        ctx: &ConsoleContext,
        target: OperatingMode,
    ) -> ConsoleResult<()> {
        ctx.ensure_connected()?;
        if !self.current.can_transition_to(target) {
            return Err(ConsoleError::TransitionNotAllowed {
                from: self.current,
                to: target,
            });
        }
        ctx.outbox().send(ServiceRequest::ChangeMode { target })?;
        debug!(from = %self.current, to = %target, "mode change requested");
        self.pending = Some(target);
        Ok(())
    }

    /// Press a mode bar toggle.
    pub fn toggle(&mut self, ctx: &ConsoleContext, toggle: ModeToggle) -> ConsoleResult<()> {
        if !toggle.is_actionable(self.current) {
            return Err(ConsoleError::TransitionNotAllowed {
                from: self.current,
                to: toggle.target(self.current),
            });
        }
        self.request_transition(ctx, toggle.target(self.current))
    }

    /// Apply a mode confirmed by the service.
    pub fn on_confirmed(&mut self, mode: OperatingMode) {
        if mode != self.current {
            info!(from = %self.current, to = %mode, "operating mode changed");
        }
        self.current = mode;
        self.pending = None;
    }

    /// The service refused the last request; the mode stays as it was.
    pub fn on_rejected(&mut self, reason: &str) -> ConsoleError {
        warn!(mode = %self.current, reason, "mode change rejected");
        self.pending = None;
        ConsoleError::ModeRejected(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::connected_context;

    #[test]
    fn ranks_round_trip() {
        for mode in OperatingMode::ALL {
            assert_eq!(OperatingMode::from_rank(mode.rank()), Some(mode));
        }
        assert_eq!(OperatingMode::from_rank(7), None);
        assert!(OperatingMode::Triangulation > OperatingMode::PointCapture);
    }

    #[test]
    fn serializes_as_rank() {
        let json = serde_json::to_string(&OperatingMode::Triangulation).unwrap();
        assert_eq!(json, "5");
        let mode: OperatingMode = serde_json::from_str("-1").unwrap();
        assert_eq!(mode, OperatingMode::Initializing);
        assert!(serde_json::from_str::<OperatingMode>("42").is_err());
    }

    #[test]
    fn features_gate_on_rank() {
        let controller = ModeController::new(OperatingMode::PointCapture);
        assert!(controller.is_enabled(Feature::PoseCapture));
        assert!(!controller.is_enabled(Feature::Recording));

        let controller = ModeController::new(OperatingMode::ObjectDetection);
        assert!(controller.is_enabled(Feature::PoseCapture));
        assert!(controller.is_enabled(Feature::ObjectCapture));
        assert!(matches!(
            ModeController::new(OperatingMode::ImageProcessing).require(Feature::ObjectCapture),
            Err(ConsoleError::ModeUnavailable { .. })
        ));
    }

    #[test]
    fn toggles_flip_between_adjacent_modes() {
        let t = ModeToggle::POINT_CAPTURE;
        assert_eq!(t.target(OperatingMode::ImageProcessing), OperatingMode::PointCapture);
        assert_eq!(t.target(OperatingMode::PointCapture), OperatingMode::ImageProcessing);
        assert!(t.is_actionable(OperatingMode::ImageProcessing));
        assert!(!t.is_actionable(OperatingMode::Triangulation));
        assert!(t.is_on(OperatingMode::Triangulation));

        let t = ModeToggle::IMAGE_PROCESSING;
        assert!(t.is_actionable(OperatingMode::CamerasFound));
        assert!(!t.is_actionable(OperatingMode::PointCapture));
    }

    #[test]
    fn request_does_not_mutate_mode() {
        let (ctx, mut outbound) = connected_context();
        let mut controller = ModeController::new(OperatingMode::PointCapture);

        controller
            .request_transition(&ctx, OperatingMode::Triangulation)
            .unwrap();
        assert_eq!(controller.current(), OperatingMode::PointCapture);
        assert_eq!(controller.pending(), Some(OperatingMode::Triangulation));
        assert_eq!(
            outbound.try_recv().unwrap(),
            ServiceRequest::ChangeMode {
                target: OperatingMode::Triangulation
            }
        );

        controller.on_confirmed(OperatingMode::Triangulation);
        assert_eq!(controller.current(), OperatingMode::Triangulation);
        assert_eq!(controller.pending(), None);
    }

    #[test]
    fn skipping_ranks_is_refused_locally() {
        let (ctx, mut outbound) = connected_context();
        let mut controller = ModeController::new(OperatingMode::ImageProcessing);

        let err = controller
            .request_transition(&ctx, OperatingMode::Triangulation)
            .unwrap_err();
        assert!(matches!(err, ConsoleError::TransitionNotAllowed { .. }));
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn rejection_keeps_mode() {
        let (ctx, _outbound) = connected_context();
        let mut controller = ModeController::new(OperatingMode::PointCapture);
        controller.toggle(&ctx, ModeToggle::TRIANGULATION).unwrap();

        let err = controller.on_rejected("cameras busy");
        assert!(matches!(err, ConsoleError::ModeRejected(ref r) if r == "cameras busy"));
        assert_eq!(controller.current(), OperatingMode::PointCapture);
        assert_eq!(controller.pending(), None);
    }

    #[test]
    fn parses_operator_names() {
        assert_eq!(
            OperatingMode::parse_name("point-capture"),
            Some(OperatingMode::PointCapture)
        );
        assert_eq!(OperatingMode::parse_name("5"), Some(OperatingMode::Triangulation));
        assert_eq!(OperatingMode::parse_name("warp"), None);
    }
}
