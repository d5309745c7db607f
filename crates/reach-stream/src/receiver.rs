//! Receiving end of a PCD2 channel.

use std::collections::{BTreeMap, HashMap};

use nalgebra::Point3;
use reach_pcd::{AbortTarget, AssemblyEvent, ControlMessage, PcdError, StreamAssembler};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::transport::{Transport, WireMessage};

/// A fully reassembled stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedCloud {
    /// Stream id.
    pub seq_id: u32,
    /// Label from `pcd_kind`, if the sender announced one.
    pub kind: Option<String>,
    /// Dequantized points in stream order.
    pub points: Vec<Point3<f64>>,
}

/// Per-connection receiver state: stream assembly, abort bookkeeping and
/// the numeric settings sent with `pcd_cfg`.
#[derive(Debug, Default)]
pub struct ReceiverSession {
    assembler: StreamAssembler,
    config: BTreeMap<String, f64>,
    kinds: HashMap<u32, String>,
}

impl ReceiverSession {
    /// Create a session with empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings merged from every `pcd_cfg` so far.
    pub fn config(&self) -> &BTreeMap<String, f64> {
        &self.config
    }

    /// Whether `seq_id` was aborted on this session.
    pub fn is_aborted(&self, seq_id: u32) -> bool {
        self.assembler.is_aborted(seq_id)
    }

    /// Handle one control string, returning the reply to send, if any.
    pub fn handle_text(&mut self, text: &str) -> Option<ControlMessage> {
        let msg = match text.parse::<ControlMessage>() {
            Ok(msg) => msg,
            Err(_) => {
                debug!(text, "unknown command");
                return Some(ControlMessage::UnknownCommand);
            }
        };

        match msg {
            ControlMessage::Config(values) => {
                debug!(?values, "config update");
                self.config.extend(values);
                Some(ControlMessage::ConfigOk)
            }
            ControlMessage::Abort(AbortTarget::Latest) => {
                let seq_id = self.assembler.abort_latest();
                if let Some(seq_id) = seq_id {
                    self.kinds.remove(&seq_id);
                }
                Some(ControlMessage::AbortOk { seq_id })
            }
            ControlMessage::Abort(AbortTarget::Seq(seq_id)) => {
                self.assembler.abort(seq_id);
                self.kinds.remove(&seq_id);
                Some(ControlMessage::AbortOk {
                    seq_id: Some(seq_id),
                })
            }
            ControlMessage::Abort(AbortTarget::Unspecified) => {
                Some(ControlMessage::AbortOk { seq_id: None })
            }
            ControlMessage::Kind { seq_id, kind } => {
                self.kinds.insert(seq_id, kind);
                None
            }
            ControlMessage::KindProgress {
                kind,
                seq_id,
                sent,
                count,
            } => {
                debug!(%kind, seq_id, sent, count, "sender progress");
                None
            }
            ControlMessage::Ping => Some(ControlMessage::Pong),
            ControlMessage::StatusQuery => Some(ControlMessage::StatusOk),
            _ => Some(ControlMessage::UnknownCommand),
        }
    }

    /// Handle one binary frame, returning replies and a completed cloud.
    ///
    /// Payloads that are not PCD2 at all are dropped without a reply.
    pub fn handle_binary(&mut self, bytes: &[u8]) -> (Vec<ControlMessage>, Option<ReceivedCloud>) {
        let events = match self.assembler.accept(bytes) {
            Ok(events) => events,
            Err(PcdError::TooShort(len)) => {
                debug!(len, "drop: payload too small");
                return (Vec::new(), None);
            }
            Err(PcdError::BadMagic(head)) => {
                debug!(?head, "drop: bad magic");
                return (Vec::new(), None);
            }
            Err(PcdError::BadLength {
                seq_id,
                chunk_index,
                got,
                expected,
            }) => {
                warn!(seq_id, chunk_index, got, expected, "bad frame length");
                let reply = ControlMessage::BadLength {
                    seq_id,
                    chunk_index,
                    got,
                    expected,
                };
                return (vec![reply], None);
            }
            Err(PcdError::BadRange {
                seq_id,
                start,
                end,
                total,
            }) => {
                warn!(seq_id, start, end, total, "chunk outside stream");
                let reply = ControlMessage::BadRange {
                    seq_id,
                    start,
                    end,
                    total,
                };
                return (vec![reply], None);
            }
            Err(PcdError::Overlap {
                seq_id,
                chunk_index,
                start,
                end,
                total,
            }) => {
                warn!(seq_id, chunk_index, start, end, "chunk overlaps stored points");
                let reply = ControlMessage::BadRange {
                    seq_id,
                    start,
                    end,
                    total,
                };
                return (vec![reply], None);
            }
            Err(err) => {
                warn!(%err, "frame rejected");
                return (Vec::new(), None);
            }
        };

        let mut replies = Vec::new();
        let mut cloud = None;
        for event in events {
            replies.extend(event.reply());
            match event {
                AssemblyEvent::Complete { seq_id, points } => {
                    cloud = Some(ReceivedCloud {
                        seq_id,
                        kind: self.kinds.remove(&seq_id),
                        points,
                    });
                }
                AssemblyEvent::Incomplete { seq_id, .. } => {
                    self.kinds.remove(&seq_id);
                }
                _ => {}
            }
        }
        (replies, cloud)
    }

    /// Serve `transport` until the peer closes, replying to every message
    /// and handing each completed cloud to `on_cloud`.
    pub async fn serve<T, F>(&mut self, transport: &mut T, mut on_cloud: F) -> Result<()>
    where
        T: Transport + ?Sized,
        F: FnMut(ReceivedCloud),
    {
        while let Some(msg) = transport.recv().await? {
            let (replies, cloud) = match msg {
                WireMessage::Text(text) => {
                    debug!(%text, "text received");
                    (self.handle_text(&text).into_iter().collect(), None)
                }
                WireMessage::Binary(bytes) => self.handle_binary(&bytes),
            };
            for reply in replies {
                transport.send_text(&reply.to_string()).await?;
            }
            if let Some(cloud) = cloud {
                info!(seq_id = cloud.seq_id, points = cloud.points.len(), "cloud received");
                on_cloud(cloud);
            }
        }
        info!("peer closed");
        Ok(())
    }
}
