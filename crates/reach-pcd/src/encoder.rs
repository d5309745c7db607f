//! Sender side: split a point cloud into PCD2 frames.

use byteorder::{ByteOrder, LittleEndian};
use nalgebra::Point3;

use crate::error::{PcdError, Result};
use crate::frame::{FrameHeader, HEADER_LEN, POINT_STRIDE};
use crate::quantize::Quantization;

/// Stream id drawn uniformly from the full u32 range.
pub fn random_seq_id() -> u32 {
    rand::random()
}

/// Stream-level facts the receiver learns from the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMeta {
    /// Stream id.
    pub seq_id: u32,
    /// Points in the stream.
    pub total_points: u32,
    /// Frames in the stream; zero for an empty cloud.
    pub chunk_count: u32,
}

/// Encodes one point cloud as a sequence of PCD2 frames.
///
/// The bounding box and quantization are computed once over the whole
/// cloud, so every frame shares them. Frames are built lazily; the caller
/// decides when to stop.
#[derive(Debug)]
pub struct Pcd2Encoder<'a> {
    points: &'a [Point3<f64>],
    chunk_points: usize,
    meta: StreamMeta,
    quant: Quantization,
}

impl<'a> Pcd2Encoder<'a> {
    /// Prepare a stream over `points` with at most `chunk_points` per frame.
    pub fn new(points: &'a [Point3<f64>], chunk_points: usize, seq_id: u32) -> Result<Self> {
        if chunk_points == 0 {
            return Err(PcdError::InvalidChunkSize);
        }
        let total_points =
            u32::try_from(points.len()).map_err(|_| PcdError::TooManyPoints(points.len()))?;
        let chunk_count = points.len().div_ceil(chunk_points) as u32;

        Ok(Self {
            points,
            chunk_points,
            meta: StreamMeta {
                seq_id,
                total_points,
                chunk_count,
            },
            quant: Quantization::from_points(points),
        })
    }

    /// Stream id, point count and chunk count.
    pub fn meta(&self) -> StreamMeta {
        self.meta
    }

    /// Quantization shared by every frame.
    pub fn quantization(&self) -> Quantization {
        self.quant
    }

    /// Header of chunk `index`.
    pub fn header(&self, index: u32) -> Result<FrameHeader> {
        if index >= self.meta.chunk_count {
            return Err(PcdError::ChunkOutOfRange {
                index,
                count: self.meta.chunk_count,
            });
        }
        let start = index as usize * self.chunk_points;
        let end = (start + self.chunk_points).min(self.points.len());
        Ok(FrameHeader {
            seq_id: self.meta.seq_id,
            chunk_index: index,
            chunk_count: self.meta.chunk_count,
            total_points: self.meta.total_points,
            start_index: start as u32,
            points_in_chunk: (end - start) as u32,
            quant: self.quant,
        })
    }

    /// Encode chunk `index` into a complete frame.
    pub fn encode_chunk(&self, index: u32) -> Result<Vec<u8>> {
        let header = self.header(index)?;
        let start = header.start_index as usize;
        let chunk = &self.points[start..start + header.points_in_chunk as usize];

        let mut buf = vec![0u8; HEADER_LEN + chunk.len() * POINT_STRIDE];
        header.write_to(&mut buf);
        for (p, out) in chunk
            .iter()
            .zip(buf[HEADER_LEN..].chunks_exact_mut(POINT_STRIDE))
        {
            LittleEndian::write_u16_into(&self.quant.quantize(p), out);
        }
        Ok(buf)
    }

    /// All frames in order.
    pub fn frames(&self) -> impl Iterator<Item = Result<Vec<u8>>> + '_ {
        (0..self.meta.chunk_count).map(move |i| self.encode_chunk(i))
    }
}
