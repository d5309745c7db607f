//! Error types for PCD2 encoding and decoding.

use thiserror::Error;

/// Errors from building or reading PCD2 frames and control messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PcdError {
    /// Frame shorter than the fixed header.
    #[error("payload too small: {0} bytes")]
    TooShort(usize),

    /// Frame does not start with `PCD2`.
    #[error("bad magic: {0:?}")]
    BadMagic([u8; 4]),

    /// Payload size disagrees with `points_in_chunk`.
    #[error("bad length for seq {seq_id} chunk {chunk_index}: got {got} bytes, expected {expected}")]
    BadLength {
        /// Stream id.
        seq_id: u32,
        /// Chunk index from the header.
        chunk_index: u32,
        /// Payload bytes after the header.
        got: usize,
        /// `points_in_chunk * 6`.
        expected: usize,
    },

    /// Chunk points fall outside `[0, total_points)`.
    #[error("bad range for seq {seq_id}: [{start}, {end}) outside {total} points")]
    BadRange {
        /// Stream id.
        seq_id: u32,
        /// First point index of the chunk.
        start: u64,
        /// One past the last point index.
        end: u64,
        /// Stream point count.
        total: u32,
    },

    /// Chunk points overlap points already held by another chunk of the stream.
    #[error("chunk {chunk_index} of seq {seq_id} overlaps stored points in [{start}, {end})")]
    Overlap {
        /// Stream id.
        seq_id: u32,
        /// Offending chunk.
        chunk_index: u32,
        /// First point index of the chunk.
        start: u64,
        /// One past the last point index.
        end: u64,
        /// Stream point count.
        total: u32,
    },

    /// Chunk index is not below the stream's chunk count.
    #[error("chunk {index} out of range for {count} chunks")]
    ChunkOutOfRange {
        /// Requested chunk.
        index: u32,
        /// Chunks in the stream.
        count: u32,
    },

    /// A frame's stream-level fields differ from the first frame of its stream.
    #[error("header of seq {seq_id} chunk {chunk_index} disagrees with stream")]
    HeaderMismatch {
        /// Stream id.
        seq_id: u32,
        /// Offending chunk.
        chunk_index: u32,
    },

    /// `chunk_points` must be at least one.
    #[error("chunk size must be > 0")]
    InvalidChunkSize,

    /// Point count does not fit the u32 header fields.
    #[error("too many points for one stream: {0}")]
    TooManyPoints(usize),

    /// Text message does not follow the control grammar.
    #[error("invalid control message: {0}")]
    InvalidControl(String),
}

/// Result type for PCD2 operations.
pub type Result<T> = std::result::Result<T, PcdError>;
