#![warn(missing_docs)]

//! Workspace estimation kernel for articulated chains.
//!
//! This crate turns a kinematic model into a reachable-workspace point cloud
//! and reduces that cloud for display:
//!
//! - [`KinematicModel`]: the seam to any forward-kinematics evaluator
//! - [`SerialChain`]: a built-in serial chain model loaded from a
//!   [`reach_ir::ChainDef`]
//! - [`sample_workspace`] / [`SampleRun`]: uniform joint-space sampling with
//!   pose snapshot/restore and cooperative abort
//! - [`voxel_downsample`]: first-wins spatial hash dedup
//! - [`extract_shell`]: outer reach boundary and inner cavity boundary per
//!   direction bin
//!
//! # Example
//!
//! ```ignore
//! use rand::SeedableRng;
//! use reach_kernel::{sample_workspace, AbortSignal, SampleOutcome, SerialChain};
//!
//! let chain = reach_ir::ChainDef::load("arm.json".as_ref())?;
//! let mut model = SerialChain::from_def(&chain)?;
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//!
//! let outcome = sample_workspace(&mut model, 10_000, 2_500, &mut rng, &AbortSignal::new())?;
//! if let SampleOutcome::Complete(points) = outcome {
//!     println!("{} samples", points.len());
//! }
//! ```

mod abort;
mod chain;
mod error;
mod model;
mod sampler;
mod shell;
mod voxel;

pub use abort::AbortSignal;
pub use chain::SerialChain;
pub use error::{KernelError, Result};
pub use model::{JointSpec, KinematicModel, PoseSnapshot, SamplePoint};
pub use sampler::{sample_workspace, SampleOutcome, SampleRun, StepStatus};
pub use shell::{
    detect_inner_radius, extract_shell, DirectionBin, DirectionGrid, Shell, ShellPoint,
};
pub use voxel::{voxel_downsample, voxel_key};
