//! Calibration configuration shared by every procedure.
//!
//! A [`CalibrationConfig`] holds the four pieces of rig calibration: camera poses,
//! intrinsic matrices, distortion coefficients and the world transform. Any of them
//! may be absent until it is first loaded from storage, received from the service or
//! produced by a solve.
//!
//! Operator edits arrive as structured text and are parsed permissively: the JSON has
//! to match the container shape (lists of numbers) but matrix dimensions are not
//! checked unless `calibration.strict_shapes` is switched on, in which case
//! [`CalibrationConfig::validate_field`] runs before an edit is accepted.

pub mod storage;
pub mod store;

pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use store::CalibrationConfigStore;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConsoleError, ConsoleResult};
use crate::protocol::ServiceRequest;

/// Row-major matrix as sent on the wire.
pub type Matrix = Vec<Vec<f64>>;

/// Camera translation, accepted either flat (`[x, y, z]`) or as a column vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Translation {
    /// `[x, y, z]`
    Vector(Vec<f64>),
    /// `[[x], [y], [z]]`
    Column(Matrix),
}

impl Translation {
    /// Components in order, regardless of layout.
    pub fn components(&self) -> Vec<f64> {
        match self {
            Translation::Vector(v) => v.clone(),
            Translation::Column(rows) => rows.iter().flatten().copied().collect(),
        }
    }
}

/// Extrinsic pose of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Rotation matrix
    #[serde(rename = "R")]
    pub rotation: Matrix,
    /// Translation vector
    pub t: Translation,
}

impl CameraPose {
    /// Pose at the origin with identity rotation.
    pub fn identity() -> Self {
        Self {
            rotation: identity(3),
            t: Translation::Vector(vec![0.0; 3]),
        }
    }
}

/// `n x n` identity matrix.
pub fn identity(n: usize) -> Matrix {
    (0..n)
        .map(|row| (0..n).map(|col| if row == col { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// One of the four calibration fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigField {
    /// Per-camera extrinsics
    CameraPoses,
    /// Reconstruction-to-world transform
    WorldTransform,
    /// Per-camera intrinsic matrices
    IntrinsicMatrices,
    /// Per-camera distortion coefficients
    DistortionCoefficients,
}

impl ConfigField {
    /// All fields, in archive order.
    pub const ALL: [ConfigField; 4] = [
        ConfigField::CameraPoses,
        ConfigField::WorldTransform,
        ConfigField::IntrinsicMatrices,
        ConfigField::DistortionCoefficients,
    ];

    /// Key in durable storage.
    pub fn storage_key(self) -> &'static str {
        match self {
            ConfigField::CameraPoses => "CAMERA_POSE",
            ConfigField::WorldTransform => "WORLD_MATRIX",
            ConfigField::IntrinsicMatrices => "INTRINSIC_MATRICES",
            ConfigField::DistortionCoefficients => "DISTORTION_COEFS",
        }
    }

    /// File name inside a session archive.
    pub fn archive_file(self) -> &'static str {
        match self {
            ConfigField::CameraPoses => "camera_poses.json",
            ConfigField::WorldTransform => "world_matrix.json",
            ConfigField::IntrinsicMatrices => "intrinsics.json",
            ConfigField::DistortionCoefficients => "distortion_coefs.json",
        }
    }

    /// Parse an operator-typed field name.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "_").as_str() {
            "poses" | "camera_poses" => Some(ConfigField::CameraPoses),
            "world" | "world_transform" | "world_matrix" => Some(ConfigField::WorldTransform),
            "intrinsics" | "intrinsic_matrices" => Some(ConfigField::IntrinsicMatrices),
            "distortion" | "distortion_coefficients" | "distortion_coefs" => {
                Some(ConfigField::DistortionCoefficients)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigField::CameraPoses => "camera poses",
            ConfigField::WorldTransform => "world transform",
            ConfigField::IntrinsicMatrices => "intrinsic matrices",
            ConfigField::DistortionCoefficients => "distortion coefficients",
        })
    }
}

/// Rig calibration. Also used as a partial update, where absent means "not sent".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Per-camera extrinsics
    pub camera_poses: Option<Vec<CameraPose>>,
    /// Per-camera intrinsic matrices
    pub intrinsic_matrices: Option<Vec<Matrix>>,
    /// Per-camera distortion coefficients
    pub distortion_coefficients: Option<Vec<Vec<f64>>>,
    /// Reconstruction-to-world transform
    pub world_transform: Option<Matrix>,
}

impl CalibrationConfig {
    /// Whether `field` has a value.
    pub fn is_present(&self, field: ConfigField) -> bool {
        match field {
            ConfigField::CameraPoses => self.camera_poses.is_some(),
            ConfigField::WorldTransform => self.world_transform.is_some(),
            ConfigField::IntrinsicMatrices => self.intrinsic_matrices.is_some(),
            ConfigField::DistortionCoefficients => self.distortion_coefficients.is_some(),
        }
    }

    /// Fields that have a value.
    pub fn present_fields(&self) -> Vec<ConfigField> {
        ConfigField::ALL
            .into_iter()
            .filter(|field| self.is_present(*field))
            .collect()
    }

    /// Serialize one field as structured text (`null` when absent).
    pub fn field_to_json(&self, field: ConfigField) -> serde_json::Result<String> {
        match field {
            ConfigField::CameraPoses => serde_json::to_string(&self.camera_poses),
            ConfigField::WorldTransform => serde_json::to_string(&self.world_transform),
            ConfigField::IntrinsicMatrices => serde_json::to_string(&self.intrinsic_matrices),
            ConfigField::DistortionCoefficients => {
                serde_json::to_string(&self.distortion_coefficients)
            }
        }
    }

    /// Parse `raw` into a config holding only `field`.
    ///
    /// Nothing is written to `self`; callers merge the result once it is known good.
    pub fn parse_field(field: ConfigField, raw: &str) -> serde_json::Result<CalibrationConfig> {
        let mut parsed = CalibrationConfig::default();
        match field {
            ConfigField::CameraPoses => parsed.camera_poses = Some(serde_json::from_str(raw)?),
            ConfigField::WorldTransform => {
                parsed.world_transform = Some(serde_json::from_str(raw)?)
            }
            ConfigField::IntrinsicMatrices => {
                parsed.intrinsic_matrices = Some(serde_json::from_str(raw)?)
            }
            ConfigField::DistortionCoefficients => {
                parsed.distortion_coefficients = Some(serde_json::from_str(raw)?)
            }
        }
        Ok(parsed)
    }

    /// Overwrite every field present in `update`. Returns the fields written.
    pub fn merge(&mut self, update: CalibrationConfig) -> Vec<ConfigField> {
        let mut written = Vec::new();
        if let Some(poses) = update.camera_poses {
            self.camera_poses = Some(poses);
            written.push(ConfigField::CameraPoses);
        }
        if let Some(matrix) = update.world_transform {
            self.world_transform = Some(matrix);
            written.push(ConfigField::WorldTransform);
        }
        if let Some(matrices) = update.intrinsic_matrices {
            self.intrinsic_matrices = Some(matrices);
            written.push(ConfigField::IntrinsicMatrices);
        }
        if let Some(coefficients) = update.distortion_coefficients {
            self.distortion_coefficients = Some(coefficients);
            written.push(ConfigField::DistortionCoefficients);
        }
        written
    }

    /// The `set-*` request carrying the current value of `field`, if it has one.
    pub fn push_request(&self, field: ConfigField) -> Option<ServiceRequest> {
        match field {
            ConfigField::CameraPoses => self
                .camera_poses
                .clone()
                .map(|poses| ServiceRequest::SetCameraPoses { poses }),
            ConfigField::WorldTransform => self
                .world_transform
                .clone()
                .map(|matrix| ServiceRequest::SetWorldTransform { matrix }),
            ConfigField::IntrinsicMatrices => self
                .intrinsic_matrices
                .clone()
                .map(|matrices| ServiceRequest::SetIntrinsics { matrices }),
            ConfigField::DistortionCoefficients => self
                .distortion_coefficients
                .clone()
                .map(|coefficients| ServiceRequest::SetDistortion { coefficients }),
        }
    }

    /// Check matrix dimensions of `field`. Absent fields pass.
    pub fn validate_field(&self, field: ConfigField) -> ConsoleResult<()> {
        let mismatch = |detail: String| ConsoleError::ShapeMismatch { field, detail };
        match field {
            ConfigField::CameraPoses => {
                for (i, pose) in self.camera_poses.iter().flatten().enumerate() {
                    check_square(&pose.rotation, 3)
                        .map_err(|d| mismatch(format!("camera {i} rotation {d}")))?;
                    let t = pose.t.components().len();
                    if t != 3 {
                        return Err(mismatch(format!("camera {i} translation has {t} components")));
                    }
                }
            }
            ConfigField::WorldTransform => {
                if let Some(matrix) = &self.world_transform {
                    check_square(matrix, 4).map_err(mismatch)?;
                }
            }
            ConfigField::IntrinsicMatrices => {
                for (i, k) in self.intrinsic_matrices.iter().flatten().enumerate() {
                    check_square(k, 3).map_err(|d| mismatch(format!("camera {i} {d}")))?;
                }
            }
            ConfigField::DistortionCoefficients => {
                for (i, row) in self.distortion_coefficients.iter().flatten().enumerate() {
                    if row.is_empty() || row.len() > 14 {
                        return Err(mismatch(format!(
                            "camera {i} has {} coefficients",
                            row.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_square(matrix: &Matrix, n: usize) -> Result<(), String> {
    if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
        let cols = matrix.first().map_or(0, Vec::len);
        return Err(format!("is {}x{}, expected {n}x{n}", matrix.len(), cols));
    }
    Ok(())
}
