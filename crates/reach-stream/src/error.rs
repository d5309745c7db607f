//! Error types for streaming and pipeline runs.

use reach_ir::IrError;
use reach_kernel::KernelError;
use reach_pcd::PcdError;
use thiserror::Error;

/// Errors from moving frames and control text over a transport.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The channel is not open.
    #[error("transport not ready")]
    TransportNotReady,

    /// The peer went away mid-operation.
    #[error("transport closed")]
    Closed,

    /// The underlying channel reported a failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Cancelled before every frame was sent.
    #[error("stream {seq_id} aborted after {frames_sent} frames")]
    Aborted {
        /// Stream id.
        seq_id: u32,
        /// Frames that reached the transport.
        frames_sent: u32,
    },

    /// Frame encoding failed.
    #[error("pcd error: {0}")]
    Pcd(#[from] PcdError),
}

/// Errors from a [`crate::WorkspacePipeline`] run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The kinematic model has no tool point.
    #[error("kinematic model has no tool point")]
    NoToolPoint,

    /// The kinematic model has no movable joints.
    #[error("kinematic model has no movable joints")]
    NoMovableJoints,

    /// The transport was not open when the run started.
    #[error("transport not ready")]
    TransportNotReady,

    /// Cancelled. `seq_id` is set once uploading had started.
    #[error("pipeline aborted")]
    Aborted {
        /// Stream id, if uploading had started.
        seq_id: Option<u32>,
        /// Frames sent before the abort was seen.
        frames_sent: u32,
    },

    /// Pipeline configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] IrError),

    /// Sampling or shell extraction failed.
    #[error("kernel error: {0}")]
    Kernel(KernelError),

    /// Transport failure during upload.
    #[error("stream error: {0}")]
    Stream(StreamError),
}

impl From<KernelError> for PipelineError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::NoToolPoint => Self::NoToolPoint,
            KernelError::NoMovableJoints => Self::NoMovableJoints,
            other => Self::Kernel(other),
        }
    }
}

impl From<StreamError> for PipelineError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::TransportNotReady => Self::TransportNotReady,
            StreamError::Aborted {
                seq_id,
                frames_sent,
            } => Self::Aborted {
                seq_id: Some(seq_id),
                frames_sent,
            },
            other => Self::Stream(other),
        }
    }
}

impl PipelineError {
    /// Whether this is a cooperative cancellation rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, StreamError>;
