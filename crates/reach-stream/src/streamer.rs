//! Send a point cloud as PCD2 frames with cooperative yield and abort.

use reach_ir::StreamConfig;
use reach_kernel::{AbortSignal, SamplePoint};
use reach_pcd::{random_seq_id, AbortTarget, ControlMessage, Pcd2Encoder, StreamMeta};
use tracing::{debug, info};

use crate::error::{Result, StreamError};
use crate::transport::Transport;

/// Sender-side progress text goes out every this many frames.
const KIND_PROGRESS_EVERY: u32 = 10;

/// Encoding and pacing parameters for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    /// Points per frame.
    pub chunk_points: usize,
    /// Frames between `yield_now` calls.
    pub yield_every_chunks: usize,
    /// Stream id; random when `None`.
    pub seq_id: Option<u32>,
    /// Label announced with `pcd_kind` and used for `<kind>_progress`.
    pub kind: Option<String>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for StreamOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            chunk_points: config.chunk_points as usize,
            yield_every_chunks: config.yield_every_chunks as usize,
            seq_id: None,
            kind: config.kind.clone(),
        }
    }
}

/// Outcome of a fully sent stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Stream id, point count and chunk count.
    pub meta: StreamMeta,
    /// Frames handed to the transport.
    pub frames_sent: u32,
}

/// Stream `points` over `transport`.
///
/// The abort signal is checked before every frame. On abort this returns
/// [`StreamError::Aborted`] with the number of frames already sent and
/// sends nothing further; emitting the abort control message is up to the
/// caller (see [`send_abort`]).
///
/// `on_frame(sent, chunk_count)` runs after each frame.
pub async fn send_points<T, F>(
    transport: &mut T,
    points: &[SamplePoint],
    options: &StreamOptions,
    abort: &AbortSignal,
    mut on_frame: F,
) -> Result<StreamSummary>
where
    T: Transport + ?Sized,
    F: FnMut(u32, u32),
{
    if !transport.is_open() {
        return Err(StreamError::TransportNotReady);
    }

    let seq_id = options.seq_id.unwrap_or_else(random_seq_id);
    let encoder = Pcd2Encoder::new(points, options.chunk_points, seq_id)?;
    let meta = encoder.meta();
    let yield_every = options.yield_every_chunks.max(1) as u32;

    if abort.is_aborted() {
        return Err(StreamError::Aborted {
            seq_id,
            frames_sent: 0,
        });
    }

    info!(
        seq_id,
        points = meta.total_points,
        chunks = meta.chunk_count,
        "streaming point cloud"
    );

    if let Some(kind) = &options.kind {
        let msg = ControlMessage::Kind {
            seq_id,
            kind: kind.clone(),
        };
        transport.send_text(&msg.to_string()).await?;
    }

    let mut sent = 0u32;
    for index in 0..meta.chunk_count {
        if abort.is_aborted() {
            info!(seq_id, frames_sent = sent, "stream aborted");
            return Err(StreamError::Aborted {
                seq_id,
                frames_sent: sent,
            });
        }

        let frame = encoder.encode_chunk(index)?;
        let len = frame.len();
        transport.send_binary(frame).await?;
        sent += 1;
        debug!(seq_id, chunk = index, bytes = len, "frame sent");
        on_frame(sent, meta.chunk_count);

        if let Some(kind) = &options.kind {
            if sent % KIND_PROGRESS_EVERY == 0 || sent == meta.chunk_count {
                let msg = ControlMessage::KindProgress {
                    kind: kind.clone(),
                    seq_id,
                    sent,
                    count: meta.chunk_count,
                };
                transport.send_text(&msg.to_string()).await?;
            }
        }

        if sent % yield_every == 0 {
            tokio::task::yield_now().await;
        }
    }

    Ok(StreamSummary {
        meta,
        frames_sent: sent,
    })
}

/// Tell the receiver to discard stream `seq_id`.
pub async fn send_abort<T: Transport + ?Sized>(transport: &mut T, seq_id: u32) -> Result<()> {
    let msg = ControlMessage::Abort(AbortTarget::Seq(seq_id));
    transport.send_text(&msg.to_string()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, WireMessage};
    use nalgebra::Point3;
    use reach_pcd::Frame;

    fn cloud(n: usize) -> Vec<SamplePoint> {
        (0..n)
            .map(|i| Point3::new(i as f64, (i % 7) as f64, 0.5))
            .collect()
    }

    fn drain(rx: &mut MemoryTransport) -> Vec<WireMessage> {
        std::iter::from_fn(|| rx.try_recv()).collect()
    }

    #[tokio::test]
    async fn frames_sent_in_chunk_order() {
        let (mut tx, mut rx) = MemoryTransport::pair();
        let points = cloud(25);
        let options = StreamOptions {
            chunk_points: 10,
            yield_every_chunks: 1,
            seq_id: Some(99),
            kind: None,
        };
        let mut progress = Vec::new();
        let summary = send_points(&mut tx, &points, &options, &AbortSignal::new(), |s, n| {
            progress.push((s, n))
        })
        .await
        .unwrap();

        assert_eq!(summary.frames_sent, 3);
        assert_eq!(summary.meta.seq_id, 99);
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);

        let indices: Vec<u32> = drain(&mut rx)
            .into_iter()
            .map(|m| match m {
                WireMessage::Binary(b) => Frame::decode(&b).unwrap().header.chunk_index,
                WireMessage::Text(t) => panic!("unexpected text {t}"),
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn kind_announced_with_progress_text() {
        let (mut tx, mut rx) = MemoryTransport::pair();
        let points = cloud(12);
        let options = StreamOptions {
            chunk_points: 1,
            yield_every_chunks: 4,
            seq_id: Some(5),
            kind: Some("surface".into()),
        };
        send_points(&mut tx, &points, &options, &AbortSignal::new(), |_, _| {})
            .await
            .unwrap();

        let texts: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                WireMessage::Text(t) => Some(t),
                WireMessage::Binary(_) => None,
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                "pcd_kind|5|surface",
                "surface_progress|5|10|12",
                "surface_progress|5|12|12",
            ]
        );
    }

    #[tokio::test]
    async fn empty_cloud_sends_nothing() {
        let (mut tx, mut rx) = MemoryTransport::pair();
        let summary = send_points(&mut tx, &[], &StreamOptions::default(), &AbortSignal::new(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(summary.frames_sent, 0);
        assert_eq!(summary.meta.chunk_count, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn pre_raised_abort_sends_no_frame() {
        let (mut tx, mut rx) = MemoryTransport::pair();
        let abort = AbortSignal::new();
        abort.abort();
        let options = StreamOptions {
            seq_id: Some(3),
            ..StreamOptions::default()
        };
        let err = send_points(&mut tx, &cloud(5), &options, &abort, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Aborted {
                seq_id: 3,
                frames_sent: 0,
            }
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn closed_transport_not_ready() {
        let (mut tx, rx) = MemoryTransport::pair();
        drop(rx);
        let err = send_points(&mut tx, &cloud(5), &StreamOptions::default(), &AbortSignal::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::TransportNotReady));
    }
}
