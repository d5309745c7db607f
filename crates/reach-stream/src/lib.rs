#![warn(missing_docs)]

//! Drives a workspace estimation run end to end.
//!
//! [`WorkspacePipeline`] samples a [`reach_kernel::KinematicModel`] in
//! batches, yielding to the tokio scheduler between batches, then streams
//! the raw cloud as PCD2 frames over a [`Transport`]. One
//! [`reach_kernel::AbortSignal`] cancels either phase; if frames were
//! already sent the pipeline tells the receiver with `pcd_abort|seq=<id>`.
//!
//! [`ReceiverSession`] is the other end of the channel.
//!
//! # Example
//!
//! ```ignore
//! use reach_ir::PipelineConfig;
//! use reach_stream::{WorkspacePipeline, WsTransport};
//!
//! let mut pipeline = WorkspacePipeline::new(PipelineConfig::default())?;
//! let mut transport = WsTransport::connect("ws://127.0.0.1:8000/ws_workspace").await?;
//! let report = pipeline
//!     .run(&mut model, &mut transport, &mut |pct: f64, label: &str| {
//!         eprintln!("{pct:5.1}% {label}");
//!     })
//!     .await?;
//! println!("sent {} points as seq {}", report.stream.meta.total_points, report.stream.meta.seq_id);
//! ```

mod error;
mod pipeline;
mod receiver;
mod streamer;
mod transport;

pub use error::{PipelineError, StreamError};
pub use pipeline::{
    NoProgress, PipelineState, ProgressSink, RunReport, SampleReport, WorkspacePipeline,
};
pub use receiver::{ReceivedCloud, ReceiverSession};
pub use streamer::{send_abort, send_points, StreamOptions, StreamSummary};
pub use transport::{MemoryTransport, Transport, WireMessage, WsTransport};
