//! Receiver side: reassemble PCD2 frames into point clouds.

use std::collections::{BTreeMap, HashMap, HashSet};

use nalgebra::Point3;
use tracing::{debug, info, warn};

use crate::control::ControlMessage;
use crate::error::{PcdError, Result};
use crate::frame::{Frame, FrameHeader};

/// Something observable that happened while accepting a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyEvent {
    /// First frame of a new stream.
    Begin {
        /// Stream id.
        seq_id: u32,
        /// Points announced by the header.
        total_points: u32,
        /// Frames announced by the header.
        chunk_count: u32,
    },
    /// Chunk stored; emitted on every second chunk and on the last one.
    Progress {
        /// Stream id.
        seq_id: u32,
        /// Distinct chunks stored so far.
        received: u32,
        /// Frames in the stream.
        chunk_count: u32,
    },
    /// All chunks arrived.
    Complete {
        /// Stream id.
        seq_id: u32,
        /// Dequantized points ordered by their stream index.
        points: Vec<Point3<f64>>,
    },
    /// Every chunk arrived but their points do not cover the stream; the
    /// assembly was dropped.
    Incomplete {
        /// Stream id.
        seq_id: u32,
        /// Points carried by the stored chunks.
        covered: u64,
        /// Points announced by the header.
        total_points: u32,
    },
    /// A chunk index that was already stored.
    Duplicate {
        /// Stream id.
        seq_id: u32,
        /// Repeated chunk.
        chunk_index: u32,
    },
    /// Frame of an aborted stream, dropped.
    Discarded {
        /// Stream id.
        seq_id: u32,
    },
}

impl AssemblyEvent {
    /// Text reply owed to the sender, if any.
    pub fn reply(&self) -> Option<ControlMessage> {
        match self {
            Self::Begin {
                seq_id,
                total_points,
                chunk_count,
            } => Some(ControlMessage::Begin {
                seq_id: *seq_id,
                total_points: *total_points,
                chunk_count: *chunk_count,
            }),
            Self::Progress {
                seq_id,
                received,
                chunk_count,
            } => Some(ControlMessage::Progress {
                seq_id: *seq_id,
                received: *received,
                chunk_count: *chunk_count,
            }),
            Self::Complete { seq_id, points } => Some(ControlMessage::Complete {
                seq_id: *seq_id,
                points: points.len() as u32,
            }),
            Self::Incomplete {
                seq_id,
                covered,
                total_points,
            } => Some(ControlMessage::Status {
                seq_id: *seq_id,
                stage: "incomplete".into(),
                detail: Some(format!("{covered}/{total_points}")),
            }),
            Self::Duplicate { .. } | Self::Discarded { .. } => None,
        }
    }
}

/// One stream being reassembled.
#[derive(Debug)]
struct Assembly {
    header: FrameHeader,
    chunks: BTreeMap<u32, Frame>,
    covered: u64,
}

/// Reassembles any number of interleaved PCD2 streams.
///
/// Chunks are kept as received and only stitched together once every chunk
/// index has arrived, so memory follows the bytes actually received rather
/// than the point count a header announces. A stream completes only when its
/// chunks cover `[0, total_points)` exactly once.
///
/// Aborted ids are remembered for the life of the assembler so late frames
/// keep being discarded; a session lives as long as one connection.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    assemblies: HashMap<u32, Assembly>,
    aborted: HashSet<u32>,
    last_seq: Option<u32>,
}

impl StreamAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one binary frame.
    ///
    /// `TooShort` and `BadMagic` errors mean the payload is not PCD2 at all
    /// and are normally dropped silently. `BadLength`, `BadRange`,
    /// `ChunkOutOfRange`, `HeaderMismatch` and `Overlap` reject the frame
    /// without touching the stream's assembly.
    pub fn accept(&mut self, bytes: &[u8]) -> Result<Vec<AssemblyEvent>> {
        let header = FrameHeader::parse(bytes)?;
        let seq_id = header.seq_id;
        self.last_seq = Some(seq_id);

        if self.aborted.contains(&seq_id) {
            self.assemblies.remove(&seq_id);
            debug!(seq_id, chunk = header.chunk_index, "discarding frame of aborted stream");
            return Ok(vec![AssemblyEvent::Discarded { seq_id }]);
        }

        let frame = Frame::decode(bytes)?;

        let stream = match self.assemblies.get(&seq_id) {
            Some(asm) => {
                if !asm.header.same_stream(&header) {
                    return Err(PcdError::HeaderMismatch {
                        seq_id,
                        chunk_index: header.chunk_index,
                    });
                }
                asm.header
            }
            None => header,
        };

        if header.chunk_index >= stream.chunk_count {
            return Err(PcdError::ChunkOutOfRange {
                index: header.chunk_index,
                count: stream.chunk_count,
            });
        }
        if header.end_index() > stream.total_points as u64 {
            return Err(PcdError::BadRange {
                seq_id,
                start: header.start_index as u64,
                end: header.end_index(),
                total: stream.total_points,
            });
        }

        let mut events = Vec::new();
        let asm = self.assemblies.entry(seq_id).or_insert_with(|| {
            info!(
                seq_id,
                total = header.total_points,
                chunks = header.chunk_count,
                "stream begin"
            );
            events.push(AssemblyEvent::Begin {
                seq_id,
                total_points: header.total_points,
                chunk_count: header.chunk_count,
            });
            Assembly {
                header,
                chunks: BTreeMap::new(),
                covered: 0,
            }
        });

        if asm.chunks.contains_key(&header.chunk_index) {
            events.push(AssemblyEvent::Duplicate {
                seq_id,
                chunk_index: header.chunk_index,
            });
            return Ok(events);
        }
        let (start, end) = (header.start_index as u64, header.end_index());
        if asm
            .chunks
            .values()
            .any(|f| (f.header.start_index as u64) < end && start < f.header.end_index())
        {
            return Err(PcdError::Overlap {
                seq_id,
                chunk_index: header.chunk_index,
                start,
                end,
                total: asm.header.total_points,
            });
        }
        asm.covered += end - start;
        asm.chunks.insert(header.chunk_index, frame);

        let received = asm.chunks.len() as u32;
        let chunk_count = asm.header.chunk_count;
        if received == chunk_count || received % 2 == 0 {
            events.push(AssemblyEvent::Progress {
                seq_id,
                received,
                chunk_count,
            });
        }

        if received == chunk_count {
            if let Some(asm) = self.assemblies.remove(&seq_id) {
                let total_points = asm.header.total_points;
                if asm.covered != total_points as u64 {
                    warn!(seq_id, covered = asm.covered, total_points, "stream incomplete");
                    events.push(AssemblyEvent::Incomplete {
                        seq_id,
                        covered: asm.covered,
                        total_points,
                    });
                    return Ok(events);
                }
                let points = asm.finish();
                info!(seq_id, points = points.len(), "stream complete");
                events.push(AssemblyEvent::Complete { seq_id, points });
            }
        }
        Ok(events)
    }

    /// Mark `seq_id` aborted and drop its partial assembly.
    ///
    /// Returns whether a partial assembly existed.
    pub fn abort(&mut self, seq_id: u32) -> bool {
        self.aborted.insert(seq_id);
        let dropped = self.assemblies.remove(&seq_id).is_some();
        info!(seq_id, dropped, "stream aborted");
        dropped
    }

    /// Abort the most recently seen stream, returning its id.
    pub fn abort_latest(&mut self) -> Option<u32> {
        let seq_id = self.last_seq?;
        self.abort(seq_id);
        Some(seq_id)
    }

    /// Whether `seq_id` was aborted.
    pub fn is_aborted(&self, seq_id: u32) -> bool {
        self.aborted.contains(&seq_id)
    }

    /// Streams with at least one chunk and not yet complete.
    pub fn in_flight(&self) -> usize {
        self.assemblies.len()
    }

    /// Seq id of the most recent PCD2 frame.
    pub fn last_seq(&self) -> Option<u32> {
        self.last_seq
    }
}

impl Assembly {
    fn finish(self) -> Vec<Point3<f64>> {
        let mut frames: Vec<Frame> = self.chunks.into_values().collect();
        frames.sort_by_key(|f| f.header.start_index);
        frames.iter().flat_map(Frame::dequantize).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Pcd2Encoder;
    use crate::frame::HEADER_LEN;

    fn cloud(n: usize) -> Vec<Point3<f64>> {
        (0..n)
            .map(|i| Point3::new(i as f64 * 0.1, 1.0, -(i as f64)))
            .collect()
    }

    fn completed(events: &[AssemblyEvent]) -> Option<&Vec<Point3<f64>>> {
        events.iter().find_map(|e| match e {
            AssemblyEvent::Complete { points, .. } => Some(points),
            _ => None,
        })
    }

    #[test]
    fn out_of_order_chunks_assemble_in_stream_order() {
        let points = cloud(10);
        let enc = Pcd2Encoder::new(&points, 3, 11).unwrap();
        let frames: Vec<Vec<u8>> = enc.frames().collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 4);

        let mut asm = StreamAssembler::new();
        let mut replies = Vec::new();
        let mut result = None;
        for i in [2, 0, 3, 1] {
            let events = asm.accept(&frames[i]).unwrap();
            if let Some(points) = completed(&events) {
                result = Some(points.clone());
            }
            replies.extend(events.iter().filter_map(|e| e.reply()).map(|m| m.to_string()));
        }

        assert_eq!(
            replies,
            vec![
                "pcd_begin|11|10|4",
                "pcd_progress|11|2|4",
                "pcd_progress|11|4|4",
                "pcd_ok|11|10",
            ]
        );
        let result = result.unwrap();
        assert_eq!(result.len(), 10);
        for (a, b) in points.iter().zip(&result) {
            assert!((a - b).norm() < 1e-3);
        }
        assert_eq!(asm.in_flight(), 0);
    }

    #[test]
    fn duplicate_chunk_counted_once() {
        let points = cloud(6);
        let enc = Pcd2Encoder::new(&points, 2, 1).unwrap();
        let first = enc.encode_chunk(0).unwrap();

        let mut asm = StreamAssembler::new();
        asm.accept(&first).unwrap();
        let events = asm.accept(&first).unwrap();
        assert_eq!(
            events,
            vec![AssemblyEvent::Duplicate {
                seq_id: 1,
                chunk_index: 0,
            }]
        );
        let events = asm.accept(&enc.encode_chunk(1).unwrap()).unwrap();
        assert!(events.contains(&AssemblyEvent::Progress {
            seq_id: 1,
            received: 2,
            chunk_count: 3,
        }));
    }

    #[test]
    fn malformed_frames_rejected() {
        let mut asm = StreamAssembler::new();
        assert!(matches!(asm.accept(b"PCD2"), Err(PcdError::TooShort(4))));

        let points = cloud(4);
        let enc = Pcd2Encoder::new(&points, 4, 5).unwrap();
        let mut bytes = enc.encode_chunk(0).unwrap();
        bytes.truncate(HEADER_LEN + 5);
        assert!(matches!(
            asm.accept(&bytes),
            Err(PcdError::BadLength {
                got: 5,
                expected: 24,
                ..
            })
        ));

        let mut header = enc.header(0).unwrap();
        header.start_index = 2;
        let frame = Frame {
            header,
            points: vec![[0, 0, 0]; 4],
        };
        assert_eq!(
            asm.accept(&frame.encode()),
            Err(PcdError::BadRange {
                seq_id: 5,
                start: 2,
                end: 6,
                total: 4,
            })
        );
        assert_eq!(asm.in_flight(), 0);
    }

    #[test]
    fn header_must_match_open_stream() {
        let points = cloud(4);
        let enc = Pcd2Encoder::new(&points, 2, 8).unwrap();
        let mut asm = StreamAssembler::new();
        asm.accept(&enc.encode_chunk(0).unwrap()).unwrap();

        let mut header = enc.header(1).unwrap();
        header.quant.scale[0] *= 2.0;
        let frame = Frame {
            header,
            points: vec![[1, 1, 1]; 2],
        };
        assert_eq!(
            asm.accept(&frame.encode()),
            Err(PcdError::HeaderMismatch {
                seq_id: 8,
                chunk_index: 1,
            })
        );
    }

    #[test]
    fn overlapping_chunk_rejected() {
        let points = cloud(10);
        let enc = Pcd2Encoder::new(&points, 5, 9).unwrap();
        let mut asm = StreamAssembler::new();
        asm.accept(&enc.encode_chunk(0).unwrap()).unwrap();

        let mut header = enc.header(1).unwrap();
        header.start_index = 0;
        header.points_in_chunk = 3;
        let frame = Frame {
            header,
            points: vec![[0, 0, 0]; 3],
        };
        assert_eq!(
            asm.accept(&frame.encode()),
            Err(PcdError::Overlap {
                seq_id: 9,
                chunk_index: 1,
                start: 0,
                end: 3,
                total: 10,
            })
        );
        assert_eq!(asm.in_flight(), 1);

        let events = asm.accept(&enc.encode_chunk(1).unwrap()).unwrap();
        assert_eq!(completed(&events).map(Vec::len), Some(10));
    }

    #[test]
    fn short_coverage_never_completes() {
        let points = cloud(10);
        let enc = Pcd2Encoder::new(&points, 5, 9).unwrap();
        let mut asm = StreamAssembler::new();
        asm.accept(&enc.encode_chunk(0).unwrap()).unwrap();

        let mut header = enc.header(1).unwrap();
        header.points_in_chunk = 3;
        let frame = Frame {
            header,
            points: vec![[0, 0, 0]; 3],
        };
        let events = asm.accept(&frame.encode()).unwrap();
        assert!(completed(&events).is_none());
        assert!(events.contains(&AssemblyEvent::Incomplete {
            seq_id: 9,
            covered: 8,
            total_points: 10,
        }));
        let replies: Vec<String> = events
            .iter()
            .filter_map(|e| e.reply())
            .map(|m| m.to_string())
            .collect();
        assert_eq!(
            replies,
            vec!["pcd_progress|9|2|2", "pcd_status|9|incomplete|8/10"]
        );
        assert_eq!(asm.in_flight(), 0);
    }

    #[test]
    fn aborted_stream_discards_later_frames() {
        let points = cloud(6);
        let enc = Pcd2Encoder::new(&points, 2, 21).unwrap();
        let mut asm = StreamAssembler::new();
        asm.accept(&enc.encode_chunk(0).unwrap()).unwrap();

        assert_eq!(asm.abort_latest(), Some(21));
        assert!(asm.is_aborted(21));
        assert_eq!(asm.in_flight(), 0);

        for i in 1..3 {
            let events = asm.accept(&enc.encode_chunk(i).unwrap()).unwrap();
            assert_eq!(events, vec![AssemblyEvent::Discarded { seq_id: 21 }]);
        }
        assert_eq!(asm.in_flight(), 0);
    }

    #[test]
    fn abort_without_stream_reports_none() {
        let mut asm = StreamAssembler::new();
        assert_eq!(asm.abort_latest(), None);
        assert!(!asm.abort(3));
        assert!(asm.is_aborted(3));
    }
}
