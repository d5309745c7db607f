//! Data model for the reach workspace estimator.
//!
//! This crate defines the declarative inputs of a sampling run:
//!
//! - [`ChainDef`]: a serial kinematic chain (joints, origins, axes, limits,
//!   tool point), loadable from JSON or TOML.
//! - [`PipelineConfig`]: sampler, shell, stream, dedup and progress settings.
//!
//! Nothing here evaluates kinematics; that lives in `reach-kernel`.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod config;

pub use config::{
    DedupConfig, PipelineConfig, ProgressConfig, Resolution, SamplerConfig, ShellConfig,
    StreamConfig,
};

use thiserror::Error;

/// Errors raised while loading or validating IR documents.
#[derive(Error, Debug)]
pub enum IrError {
    /// File could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse failure.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Document parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// 3D vector with f64 components (conventionally meters).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vec3 {
    /// Create a new Vec3.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Unit Z, the default joint axis.
    pub fn unit_z() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }
}

/// Rigid placement of a joint frame relative to its parent link.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Origin {
    /// Translation.
    pub xyz: Vec3,
    /// Fixed-axis roll, pitch, yaw in radians.
    pub rpy: Vec3,
}

/// Kind of a joint in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointKind {
    /// Rigid connection, never sampled.
    Fixed,
    /// Rotation about `axis` within limits.
    Revolute,
    /// Unlimited rotation about `axis`.
    Continuous,
    /// Translation along `axis` within limits.
    Prismatic,
}

impl JointKind {
    /// Whether the joint contributes a degree of freedom.
    pub fn is_movable(self) -> bool {
        !matches!(self, JointKind::Fixed)
    }
}

/// Joint limits as they appear in a robot description. Either bound may be
/// missing; normalization happens in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Limits {
    /// Lower bound (radians or meters).
    pub lower: Option<f64>,
    /// Upper bound (radians or meters).
    pub upper: Option<f64>,
}

impl Limits {
    /// Limits with both bounds set.
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }
}

/// One joint of a serial chain, followed by its child link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDef {
    /// Stable joint name.
    pub id: String,
    /// Joint kind.
    pub kind: JointKind,
    /// Placement of the joint frame in the parent link frame.
    #[serde(default)]
    pub origin: Origin,
    /// Motion axis in the joint frame.
    #[serde(default = "Vec3::unit_z")]
    pub axis: Vec3,
    /// Motion limits.
    #[serde(default)]
    pub limits: Limits,
    /// Initial joint value.
    #[serde(default)]
    pub state: f64,
}

/// A serial kinematic chain with a designated tool point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChainDef {
    /// Optional robot name.
    #[serde(default)]
    pub name: Option<String>,
    /// Placement of the chain root in the world.
    #[serde(default)]
    pub base: Origin,
    /// Joints from root to tip.
    #[serde(default)]
    pub joints: Vec<JointDef>,
    /// Tool point offset in the frame after the last joint. `None` means the
    /// chain has no designated end effector.
    #[serde(default)]
    pub tool_point: Option<Vec3>,
}

impl ChainDef {
    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, IrError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Deserialize from a TOML string.
    pub fn from_toml(text: &str) -> Result<Self, IrError> {
        Ok(toml::from_str(text)?)
    }

    /// Serialize to a pretty JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a chain file, picking the format from the extension
    /// (`.toml` is TOML, anything else JSON).
    pub fn load(path: &Path) -> Result<Self, IrError> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml(&text),
            _ => Self::from_json(&text),
        }
    }

    /// Number of joints that contribute a degree of freedom.
    pub fn movable_count(&self) -> usize {
        self.joints.iter().filter(|j| j.kind.is_movable()).count()
    }
}
