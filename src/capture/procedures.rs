//! The four calibration procedures.
//!
//! | Procedure | Sample | Request |
//! |---|---|---|
//! | [`PoseCalibration`] | per-camera image points | `solve-full-pose` / `solve-bundle-adjustment` |
//! | [`ScaleCalibration`] | triangulated points | `solve-scale` |
//! | [`FloorAlignment`] | triangulated points | `solve-floor-alignment` |
//! | [`OriginCalibration`] | first triangulated point | `set-origin` |

use super::{CaptureProcedure, ProcedureKind};
use crate::calibration::{CalibrationConfig, CameraPose, ConfigField, Matrix};
use crate::error::{ConsoleError, ConsoleResult};
use crate::mode::Feature;
use crate::protocol::{DetectionEvent, ImagePoint, ObjectPoint, ServiceRequest};

fn poses_for(procedure: ProcedureKind, config: &CalibrationConfig) -> ConsoleResult<Vec<CameraPose>> {
    config
        .camera_poses
        .clone()
        .ok_or(ConsoleError::MissingCalibration {
            procedure,
            field: ConfigField::CameraPoses,
        })
}

fn world_transform_for(procedure: ProcedureKind, config: &CalibrationConfig) -> ConsoleResult<Matrix> {
    config
        .world_transform
        .clone()
        .ok_or(ConsoleError::MissingCalibration {
            procedure,
            field: ConfigField::WorldTransform,
        })
}

/// Camera pose calibration from per-camera image points.
#[derive(Debug)]
pub enum PoseCalibration {}

/// Which pose solver to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseSolve {
    /// Solve every pose from scratch
    Full,
    /// Refine the current poses
    BundleAdjustment,
}

impl CaptureProcedure for PoseCalibration {
    type Sample = Vec<Option<ImagePoint>>;
    type Solve = PoseSolve;

    const KIND: ProcedureKind = ProcedureKind::Pose;
    const FEATURE: Feature = Feature::PoseCapture;

    fn extract(event: &DetectionEvent) -> Option<Self::Sample> {
        Some(event.image_points.clone())
    }

    fn build_request(
        solve: PoseSolve,
        samples: &[Self::Sample],
        config: &CalibrationConfig,
    ) -> ConsoleResult<ServiceRequest> {
        let points = samples.to_vec();
        Ok(match solve {
            PoseSolve::Full => ServiceRequest::SolveFullPose { points },
            PoseSolve::BundleAdjustment => ServiceRequest::SolveBundleAdjustment {
                points,
                current_poses: poses_for(Self::KIND, config)?,
            },
        })
    }
}

/// Metric scale from two markers a known distance apart.
#[derive(Debug)]
pub enum ScaleCalibration {}

/// Scale solve parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleSolve {
    /// Real distance between the two markers, in metres
    pub reference_distance: f64,
}

impl CaptureProcedure for ScaleCalibration {
    type Sample = Vec<Option<ObjectPoint>>;
    type Solve = ScaleSolve;

    const KIND: ProcedureKind = ProcedureKind::Scale;
    const FEATURE: Feature = Feature::ObjectCapture;

    fn extract(event: &DetectionEvent) -> Option<Self::Sample> {
        Some(event.object_points.clone())
    }

    fn build_request(
        solve: ScaleSolve,
        samples: &[Self::Sample],
        _config: &CalibrationConfig,
    ) -> ConsoleResult<ServiceRequest> {
        if !(solve.reference_distance.is_finite() && solve.reference_distance > 0.0) {
            return Err(ConsoleError::Configuration(format!(
                "reference distance must be positive, got {}",
                solve.reference_distance
            )));
        }
        Ok(ServiceRequest::SolveScale {
            points: samples.to_vec(),
            reference_distance: solve.reference_distance,
        })
    }
}

/// Floor plane alignment from points on the floor.
#[derive(Debug)]
pub enum FloorAlignment {}

impl CaptureProcedure for FloorAlignment {
    type Sample = Vec<Option<ObjectPoint>>;
    type Solve = ();

    const KIND: ProcedureKind = ProcedureKind::Alignment;
    const FEATURE: Feature = Feature::ObjectCapture;

    fn extract(event: &DetectionEvent) -> Option<Self::Sample> {
        Some(event.object_points.clone())
    }

    fn build_request(
        _solve: (),
        samples: &[Self::Sample],
        config: &CalibrationConfig,
    ) -> ConsoleResult<ServiceRequest> {
        Ok(ServiceRequest::SolveFloorAlignment {
            points: samples.to_vec(),
            current_poses: poses_for(Self::KIND, config)?,
            world_transform: world_transform_for(Self::KIND, config)?,
        })
    }
}

/// World origin placement from a single marker.
#[derive(Debug)]
pub enum OriginCalibration {}

impl CaptureProcedure for OriginCalibration {
    type Sample = ObjectPoint;
    type Solve = ();

    const KIND: ProcedureKind = ProcedureKind::Origin;
    const FEATURE: Feature = Feature::ObjectCapture;

    fn extract(event: &DetectionEvent) -> Option<Self::Sample> {
        event.first_object_point()
    }

    /// Uses the most recent capture.
    fn build_request(
        _solve: (),
        samples: &[Self::Sample],
        config: &CalibrationConfig,
    ) -> ConsoleResult<ServiceRequest> {
        let point = *samples
            .last()
            .ok_or(ConsoleError::NothingCaptured(Self::KIND))?;
        Ok(ServiceRequest::SetOrigin {
            point,
            world_transform: world_transform_for(Self::KIND, config)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::identity;

    fn event(points: Vec<Option<ObjectPoint>>) -> DetectionEvent {
        DetectionEvent {
            timestamp_ms: 0.0,
            image_points: vec![Some([1.0, 2.0])],
            object_points: points,
            errors: Vec::new(),
        }
    }

    #[test]
    fn bundle_adjustment_needs_current_poses() {
        let samples = vec![vec![Some([1.0, 2.0])]];
        let err = PoseCalibration::build_request(
            PoseSolve::BundleAdjustment,
            &samples,
            &CalibrationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConsoleError::MissingCalibration {
                field: ConfigField::CameraPoses,
                ..
            }
        ));

        let config = CalibrationConfig {
            camera_poses: Some(vec![CameraPose::identity()]),
            ..Default::default()
        };
        let request =
            PoseCalibration::build_request(PoseSolve::BundleAdjustment, &samples, &config).unwrap();
        assert_eq!(request.name(), "solve-bundle-adjustment");
    }

    #[test]
    fn origin_takes_first_present_point_and_last_sample() {
        assert_eq!(
            OriginCalibration::extract(&event(vec![None, Some([1.0, 2.0, 3.0])])),
            Some([1.0, 2.0, 3.0])
        );
        assert_eq!(OriginCalibration::extract(&event(vec![None])), None);

        let config = CalibrationConfig {
            world_transform: Some(identity(4)),
            ..Default::default()
        };
        let request =
            OriginCalibration::build_request((), &[[0.0; 3], [4.0, 5.0, 6.0]], &config).unwrap();
        assert_eq!(
            request,
            ServiceRequest::SetOrigin {
                point: [4.0, 5.0, 6.0],
                world_transform: identity(4),
            }
        );
    }

    #[test]
    fn alignment_sends_poses_and_world_transform() {
        let config = CalibrationConfig {
            camera_poses: Some(vec![CameraPose::identity()]),
            ..Default::default()
        };
        let samples = vec![vec![Some([0.0, 0.0, 0.0])]];
        assert!(FloorAlignment::build_request((), &samples, &config).is_err());

        let config = CalibrationConfig {
            world_transform: Some(identity(4)),
            ..config
        };
        let ServiceRequest::SolveFloorAlignment { points, .. } =
            FloorAlignment::build_request((), &samples, &config).unwrap()
        else {
            panic!("expected floor alignment request");
        };
        assert_eq!(points, samples);
    }

    #[test]
    fn scale_rejects_non_positive_distance() {
        let samples = vec![vec![Some([0.0, 0.0, 0.0])]];
        let config = CalibrationConfig::default();
        assert!(ScaleCalibration::build_request(
            ScaleSolve {
                reference_distance: 0.0
            },
            &samples,
            &config
        )
        .is_err());
        assert!(ScaleCalibration::build_request(
            ScaleSolve {
                reference_distance: 0.119
            },
            &samples,
            &config
        )
        .is_ok());
    }
}
