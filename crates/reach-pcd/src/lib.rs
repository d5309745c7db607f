#![warn(missing_docs)]

//! PCD2: a chunked, 16-bit quantized point cloud wire format.
//!
//! A stream is a sequence of binary frames sharing one `seq_id`, one
//! bounding box and one per-axis quantization scale. Every frame carries a
//! fixed 52-byte little-endian header followed by `points_in_chunk` triples
//! of `u16`:
//!
//! ```text
//! 0   magic "PCD2"        28  min_x   f32
//! 4   seq_id        u32   32  min_y   f32
//! 8   chunk_index   u32   36  min_z   f32
//! 12  chunk_count   u32   40  scale_x f32
//! 16  total_points  u32   44  scale_y f32
//! 20  start_index   u32   48  scale_z f32
//! 24  points_in_chunk u32 52  qx qy qz u16 ...
//! ```
//!
//! This crate provides the sender side ([`Pcd2Encoder`]), the receiver side
//! ([`StreamAssembler`]) and the text control messages exchanged alongside
//! the frames ([`ControlMessage`]). It performs no I/O.

mod assembly;
mod control;
mod encoder;
mod error;
mod frame;
mod quantize;

pub use assembly::{AssemblyEvent, StreamAssembler};
pub use control::{AbortTarget, ControlMessage};
pub use encoder::{random_seq_id, Pcd2Encoder, StreamMeta};
pub use error::{PcdError, Result};
pub use frame::{Frame, FrameHeader, HEADER_LEN, MAGIC, POINT_STRIDE};
pub use quantize::{Quantization, MIN_EXTENT, QUANT_MAX};
