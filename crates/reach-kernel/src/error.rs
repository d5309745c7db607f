//! Error types for workspace estimation.

use thiserror::Error;

/// Errors that can occur while sampling or reducing a workspace.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// The model has no designated end effector.
    #[error("kinematic model has no tool point")]
    NoToolPoint,

    /// The model has nothing to sample.
    #[error("kinematic model has no movable joints")]
    NoMovableJoints,

    /// Chain description cannot be evaluated.
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    /// Voxel size must be a positive finite number.
    #[error("voxel size must be positive, got {0}")]
    InvalidVoxelSize(f64),

    /// Direction grid needs at least one bin per axis.
    #[error("direction grid needs at least one bin per axis ({theta} x {phi})")]
    InvalidGrid {
        /// Azimuth bins requested.
        theta: usize,
        /// Polar bins requested.
        phi: usize,
    },
}

/// Result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;
