//! PCD2 frame header and payload layout.

use byteorder::{ByteOrder, LittleEndian};
use nalgebra::Point3;

use crate::error::{PcdError, Result};
use crate::quantize::Quantization;

/// Frame magic.
pub const MAGIC: [u8; 4] = *b"PCD2";

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 52;

/// Bytes per quantized point.
pub const POINT_STRIDE: usize = 6;

/// Fixed-size header at the start of every PCD2 frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    /// Stream id shared by all frames of one stream.
    pub seq_id: u32,
    /// Zero-based chunk index.
    pub chunk_index: u32,
    /// Chunks in the stream.
    pub chunk_count: u32,
    /// Points in the stream.
    pub total_points: u32,
    /// Index of this chunk's first point within the stream.
    pub start_index: u32,
    /// Points carried by this frame.
    pub points_in_chunk: u32,
    /// Stream quantization.
    pub quant: Quantization,
}

impl FrameHeader {
    /// Serialize into the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Panics if `buf` is shorter than [`HEADER_LEN`].
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.seq_id);
        LittleEndian::write_u32(&mut buf[8..12], self.chunk_index);
        LittleEndian::write_u32(&mut buf[12..16], self.chunk_count);
        LittleEndian::write_u32(&mut buf[16..20], self.total_points);
        LittleEndian::write_u32(&mut buf[20..24], self.start_index);
        LittleEndian::write_u32(&mut buf[24..28], self.points_in_chunk);
        LittleEndian::write_f32_into(&self.quant.min, &mut buf[28..40]);
        LittleEndian::write_f32_into(&self.quant.scale, &mut buf[40..52]);
    }

    /// Parse the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(PcdError::TooShort(bytes.len()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != MAGIC {
            return Err(PcdError::BadMagic(magic));
        }

        let mut min = [0f32; 3];
        let mut scale = [0f32; 3];
        LittleEndian::read_f32_into(&bytes[28..40], &mut min);
        LittleEndian::read_f32_into(&bytes[40..52], &mut scale);

        Ok(Self {
            seq_id: LittleEndian::read_u32(&bytes[4..8]),
            chunk_index: LittleEndian::read_u32(&bytes[8..12]),
            chunk_count: LittleEndian::read_u32(&bytes[12..16]),
            total_points: LittleEndian::read_u32(&bytes[16..20]),
            start_index: LittleEndian::read_u32(&bytes[20..24]),
            points_in_chunk: LittleEndian::read_u32(&bytes[24..28]),
            quant: Quantization { min, scale },
        })
    }

    /// Payload size implied by `points_in_chunk`.
    pub fn payload_len(&self) -> usize {
        self.points_in_chunk as usize * POINT_STRIDE
    }

    /// One past the last point index covered by this chunk.
    pub fn end_index(&self) -> u64 {
        self.start_index as u64 + self.points_in_chunk as u64
    }

    /// Whether the stream-level fields match `other`.
    pub fn same_stream(&self, other: &FrameHeader) -> bool {
        self.seq_id == other.seq_id
            && self.chunk_count == other.chunk_count
            && self.total_points == other.total_points
            && self.quant == other.quant
    }
}

/// A decoded frame: header plus quantized points.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Quantized points in stream order.
    pub points: Vec<[u16; 3]>,
}

impl Frame {
    /// Decode a complete frame.
    ///
    /// The payload after the header must hold exactly `points_in_chunk`
    /// points.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::parse(bytes)?;
        let payload = &bytes[HEADER_LEN..];
        let expected = header.payload_len();
        if payload.len() != expected {
            return Err(PcdError::BadLength {
                seq_id: header.seq_id,
                chunk_index: header.chunk_index,
                got: payload.len(),
                expected,
            });
        }

        let points = payload
            .chunks_exact(POINT_STRIDE)
            .map(|p| {
                [
                    LittleEndian::read_u16(&p[0..2]),
                    LittleEndian::read_u16(&p[2..4]),
                    LittleEndian::read_u16(&p[4..6]),
                ]
            })
            .collect();
        Ok(Self { header, points })
    }

    /// Encode header and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.points.len() * POINT_STRIDE];
        self.header.write_to(&mut buf);
        for (q, out) in self
            .points
            .iter()
            .zip(buf[HEADER_LEN..].chunks_exact_mut(POINT_STRIDE))
        {
            LittleEndian::write_u16_into(q, out);
        }
        buf
    }

    /// Dequantized points.
    pub fn dequantize(&self) -> Vec<Point3<f64>> {
        self.points
            .iter()
            .map(|q| self.header.quant.dequantize(*q))
            .collect()
    }
}
