//! Single-shot capture for calibration procedures.
//!
//! Every calibration procedure samples the detection stream the same way: the
//! operator arms a capture, the next detection event is consumed (one sample is
//! appended) and the capture disarms itself. Once enough samples are collected the
//! operator submits them to the sensing service and waits for a solve reply.
//!
//! # Architecture
//!
//! ```text
//!                      ┌─────────────────────────────┐
//! detection stream ──▶ │ CaptureCoordinator<P>       │ ── submit ──▶ sensing service
//!                      │   samples: Vec<P::Sample>   │ ◀── reply ───
//!                      └─────────────────────────────┘
//!                                   │
//!                  P: CaptureProcedure (pose | scale | alignment | origin)
//! ```
//!
//! [`CaptureCoordinator`] owns the protocol and the sample arena; a
//! [`CaptureProcedure`] only knows what to pull out of an event and how to build
//! its solve request. Coordinators never share samples with each other.
//!
//! Solve requests carry no identifier. If two submits are in flight on the same
//! procedure, the reply received last determines the final outcome.

pub mod procedures;

pub use procedures::{
    FloorAlignment, OriginCalibration, PoseCalibration, PoseSolve, ScaleCalibration, ScaleSolve,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationConfig;
use crate::context::ConsoleContext;
use crate::error::{ConsoleError, ConsoleResult};
use crate::mode::{Feature, ModeController};
use crate::protocol::{DetectionEvent, DetectionSink, ServiceRequest};

// =============================================================================
// Procedure identity and outcomes
// =============================================================================

/// The four calibration procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureKind {
    /// Camera pose (extrinsics, optionally intrinsics) from image points
    Pose,
    /// Metric scale from a known reference distance
    Scale,
    /// Floor plane alignment of the world transform
    Alignment,
    /// World origin placement
    Origin,
}

impl ProcedureKind {
    /// All procedures.
    pub const ALL: [ProcedureKind; 4] = [
        ProcedureKind::Pose,
        ProcedureKind::Scale,
        ProcedureKind::Alignment,
        ProcedureKind::Origin,
    ];

    /// Parse an operator-typed procedure name.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pose" | "poses" => Some(ProcedureKind::Pose),
            "scale" => Some(ProcedureKind::Scale),
            "align" | "alignment" | "floor" => Some(ProcedureKind::Alignment),
            "origin" => Some(ProcedureKind::Origin),
            _ => None,
        }
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcedureKind::Pose => "pose",
            ProcedureKind::Scale => "scale",
            ProcedureKind::Alignment => "alignment",
            ProcedureKind::Origin => "origin",
        })
    }
}

/// Reprojection error classified into a human-readable band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityBand {
    /// error <= 1
    Excellent,
    /// 1 < error <= 3
    Ok,
    /// 3 < error <= 10
    Poor,
    /// error > 10 (or not a number)
    NotGoodEnough,
}

impl QualityBand {
    /// Band for a reprojection error in pixels.
    pub fn from_error(error: f64) -> Self {
        if error <= 1.0 {
            QualityBand::Excellent
        } else if error <= 3.0 {
            QualityBand::Ok
        } else if error <= 10.0 {
            QualityBand::Poor
        } else {
            QualityBand::NotGoodEnough
        }
    }

    /// Label shown to the operator.
    pub fn label(self) -> &'static str {
        match self {
            QualityBand::Excellent => "excellent",
            QualityBand::Ok => "OK",
            QualityBand::Poor => "poor",
            QualityBand::NotGoodEnough => "not good enough",
        }
    }
}

impl fmt::Display for QualityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the last solve reply for a procedure said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolveOutcome {
    /// Pose solved
    Pose {
        /// Mean reprojection error in pixels
        reprojection_error: f64,
        /// Band of `reprojection_error`
        band: QualityBand,
    },
    /// Scale solved
    Scale {
        /// Factor applied to the camera translations
        scale_factor: f64,
    },
    /// World transform replaced (alignment or origin)
    WorldTransform,
    /// Solve failed on the service side
    Failed {
        /// Reason reported by the service
        reason: String,
    },
}

impl SolveOutcome {
    /// Outcome for a pose reply.
    pub fn pose(reprojection_error: f64) -> Self {
        SolveOutcome::Pose {
            reprojection_error,
            band: QualityBand::from_error(reprojection_error),
        }
    }
}

impl fmt::Display for SolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveOutcome::Pose {
                reprojection_error,
                band,
            } => write!(f, "reprojection error {reprojection_error:.3} px ({band})"),
            SolveOutcome::Scale { scale_factor } => write!(f, "scale factor {scale_factor:.5}"),
            SolveOutcome::WorldTransform => f.write_str("world transform updated"),
            SolveOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

// =============================================================================
// Procedure trait
// =============================================================================

/// Procedure-specific half of the capture protocol.
pub trait CaptureProcedure {
    /// What one capture keeps from a detection event.
    type Sample: Clone + fmt::Debug + Send + 'static;

    /// Operator choices made at submit time.
    type Solve: fmt::Debug;

    /// Which procedure this is.
    const KIND: ProcedureKind;

    /// Capability the current mode must enable before arming.
    const FEATURE: Feature;

    /// Pull this procedure's sub-payload out of `event`.
    ///
    /// `None` means the event had nothing usable; the capture still disarms.
    fn extract(event: &DetectionEvent) -> Option<Self::Sample>;

    /// Build the solve request for `samples` (never empty).
    fn build_request(
        solve: Self::Solve,
        samples: &[Self::Sample],
        config: &CalibrationConfig,
    ) -> ConsoleResult<ServiceRequest>;
}

// =============================================================================
// Coordinator
// =============================================================================

/// Arm/consume/submit state for one procedure.
pub struct CaptureCoordinator<P: CaptureProcedure> {
    samples: Vec<P::Sample>,
    armed: bool,
    processing: bool,
    outcome: Option<SolveOutcome>,
    _procedure: PhantomData<P>,
}

impl<P: CaptureProcedure> fmt::Debug for CaptureCoordinator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureCoordinator")
            .field("procedure", &P::KIND)
            .field("samples", &self.samples.len())
            .field("armed", &self.armed)
            .field("processing", &self.processing)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl<P: CaptureProcedure> Default for CaptureCoordinator<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CaptureProcedure> CaptureCoordinator<P> {
    /// Empty, disarmed coordinator.
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            armed: false,
            processing: false,
            outcome: None,
            _procedure: PhantomData,
        }
    }

    /// Procedure this coordinator runs.
    pub fn kind(&self) -> ProcedureKind {
        P::KIND
    }

    /// Wait for the next detection event. Arming twice is a no-op.
    pub fn arm(&mut self, ctx: &ConsoleContext, mode: &ModeController) -> ConsoleResult<()> {
        ctx.ensure_connected()?;
        mode.require(P::FEATURE)?;
        if self.armed {
            debug!(procedure = %P::KIND, "capture already armed");
            return Ok(());
        }
        self.armed = true;
        debug!(procedure = %P::KIND, "capture armed");
        Ok(())
    }

    /// Cancel a pending capture.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Drop every captured sample.
    pub fn clear(&mut self) {
        debug!(procedure = %P::KIND, dropped = self.samples.len(), "captures cleared");
        self.samples.clear();
    }

    /// Send the captured samples for solving.
    ///
    /// The samples are kept so the operator can add more and resubmit.
    pub fn submit(
        &mut self,
        ctx: &ConsoleContext,
        solve: P::Solve,
        config: &CalibrationConfig,
    ) -> ConsoleResult<()> {
        ctx.ensure_connected()?;
        if self.samples.is_empty() {
            return Err(ConsoleError::NothingCaptured(P::KIND));
        }
        let request = P::build_request(solve, &self.samples, config)?;
        info!(
            procedure = %P::KIND,
            request = request.name(),
            samples = self.samples.len(),
            "submitting calibration solve"
        );
        ctx.send(request)?;
        self.processing = true;
        Ok(())
    }

    /// Record a solve reply. A failure is returned as [`ConsoleError::SolveFailed`].
    pub fn on_reply(&mut self, outcome: SolveOutcome) -> ConsoleResult<()> {
        if !self.processing {
            debug!(procedure = %P::KIND, "reply received with no solve outstanding");
        }
        self.processing = false;
        let result = match &outcome {
            SolveOutcome::Failed { reason } => {
                warn!(procedure = %P::KIND, reason = %reason, "solve failed");
                Err(ConsoleError::SolveFailed {
                    procedure: P::KIND,
                    reason: reason.clone(),
                })
            }
            other => {
                info!(procedure = %P::KIND, outcome = %other, "solve completed");
                Ok(())
            }
        };
        self.outcome = Some(outcome);
        result
    }

    /// Captured samples in capture order.
    pub fn samples(&self) -> &[P::Sample] {
        &self.samples
    }

    /// Number of captured samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the next detection event will be captured.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether a submitted solve has not been answered yet.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Outcome of the last reply received.
    pub fn last_outcome(&self) -> Option<&SolveOutcome> {
        self.outcome.as_ref()
    }
}

impl<P: CaptureProcedure> DetectionSink for CaptureCoordinator<P> {
    fn on_detection(&mut self, event: &DetectionEvent) -> bool {
        if !self.armed {
            return false;
        }
        self.armed = false;
        match P::extract(event) {
            Some(sample) => {
                self.samples.push(sample);
                debug!(procedure = %P::KIND, samples = self.samples.len(), "sample captured");
                true
            }
            None => {
                debug!(procedure = %P::KIND, "armed event had nothing to capture");
                false
            }
        }
    }
}

/// Pose procedure coordinator.
pub type PoseCapture = CaptureCoordinator<PoseCalibration>;
/// Scale procedure coordinator.
pub type ScaleCapture = CaptureCoordinator<ScaleCalibration>;
/// Floor alignment coordinator.
pub type AlignmentCapture = CaptureCoordinator<FloorAlignment>;
/// Origin coordinator.
pub type OriginCapture = CaptureCoordinator<OriginCalibration>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{connected_context, disconnected_context};
    use crate::mode::OperatingMode;

    fn frame(t: f64) -> DetectionEvent {
        DetectionEvent {
            timestamp_ms: t,
            image_points: vec![Some([t, t + 1.0]), None],
            object_points: vec![Some([t, 0.0, 1.0])],
            errors: vec![0.2],
        }
    }

    #[test]
    fn quality_bands_follow_thresholds() {
        let cases = [
            (0.5, "excellent"),
            (1.0, "excellent"),
            (1.01, "OK"),
            (3.0, "OK"),
            (3.01, "poor"),
            (10.0, "poor"),
            (10.01, "not good enough"),
        ];
        for (error, label) in cases {
            assert_eq!(QualityBand::from_error(error).label(), label, "error {error}");
        }
        assert_eq!(QualityBand::from_error(f64::NAN), QualityBand::NotGoodEnough);
    }

    #[test]
    fn arm_consumes_exactly_one_event() {
        let (ctx, _outbound) = connected_context();
        let mode = ModeController::new(OperatingMode::PointCapture);
        let mut pose = PoseCapture::new();

        assert!(!pose.on_detection(&frame(1.0)), "unarmed events are filtered");
        pose.arm(&ctx, &mode).unwrap();
        pose.arm(&ctx, &mode).unwrap();
        assert!(pose.on_detection(&frame(2.0)));
        assert!(!pose.on_detection(&frame(3.0)));

        assert_eq!(pose.len(), 1);
        assert_eq!(pose.samples()[0], vec![Some([2.0, 3.0]), None]);
        assert!(!pose.is_armed());
    }

    #[test]
    fn arming_is_gated_by_mode_and_link() {
        let (ctx, _outbound) = connected_context();
        let mut scale = ScaleCapture::new();
        let err = scale
            .arm(&ctx, &ModeController::new(OperatingMode::PointCapture))
            .unwrap_err();
        assert!(matches!(err, ConsoleError::ModeUnavailable { .. }));

        let (offline, _outbound) = disconnected_context();
        let err = scale
            .arm(&offline, &ModeController::new(OperatingMode::Triangulation))
            .unwrap_err();
        assert!(err.is_blocking());
        assert!(!scale.is_armed());
    }

    #[test]
    fn submit_requires_samples() {
        let (ctx, mut outbound) = connected_context();
        let mut pose = PoseCapture::new();
        let err = pose
            .submit(&ctx, PoseSolve::Full, &CalibrationConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConsoleError::NothingCaptured(ProcedureKind::Pose)));
        assert!(outbound.try_recv().is_err());
        assert!(!pose.is_processing());
    }

    #[test]
    fn last_received_reply_wins() {
        let (ctx, mut outbound) = connected_context();
        let mode = ModeController::new(OperatingMode::Triangulation);
        let mut scale = ScaleCapture::new();
        scale.arm(&ctx, &mode).unwrap();
        scale.on_detection(&frame(1.0));

        let solve = || ScaleSolve {
            reference_distance: 0.119,
        };
        let config = CalibrationConfig::default();
        scale.submit(&ctx, solve(), &config).unwrap();
        scale.submit(&ctx, solve(), &config).unwrap();
        for _ in 0..2 {
            assert!(matches!(
                outbound.try_recv().unwrap(),
                ServiceRequest::SolveScale { .. }
            ));
        }

        // The second submit's reply arrives first, the first submit's reply last.
        scale
            .on_reply(SolveOutcome::Scale { scale_factor: 2.0 })
            .unwrap();
        let err = scale
            .on_reply(SolveOutcome::Failed {
                reason: "Did not find valid points".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ConsoleError::SolveFailed { procedure: ProcedureKind::Scale, .. }));
        assert!(matches!(scale.last_outcome(), Some(SolveOutcome::Failed { .. })));
        assert!(!scale.is_processing());
        assert_eq!(scale.len(), 1, "failure leaves samples untouched");
    }

    #[test]
    fn clear_empties_only_this_procedure() {
        let (ctx, _outbound) = connected_context();
        let mode = ModeController::new(OperatingMode::Triangulation);
        let mut scale = ScaleCapture::new();
        let mut align = AlignmentCapture::new();
        scale.arm(&ctx, &mode).unwrap();
        align.arm(&ctx, &mode).unwrap();
        let event = frame(5.0);
        scale.on_detection(&event);
        align.on_detection(&event);

        scale.clear();
        assert!(scale.is_empty());
        assert_eq!(align.len(), 1);
    }

    #[test]
    fn disarm_cancels_pending_capture() {
        let (ctx, _outbound) = connected_context();
        let mut origin = OriginCapture::new();
        origin
            .arm(&ctx, &ModeController::new(OperatingMode::ObjectDetection))
            .unwrap();
        origin.disarm();
        assert!(!origin.on_detection(&frame(1.0)));
        assert!(origin.is_empty());
    }
}
