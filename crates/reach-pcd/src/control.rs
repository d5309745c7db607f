//! Text control messages exchanged alongside PCD2 frames.
//!
//! Every message is a `|`-separated line whose first field names it. Seq ids
//! are decimal and taken modulo 2^32 when parsed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PcdError;

/// Which stream an abort request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortTarget {
    /// `pcd_abort`: the most recently seen stream.
    Latest,
    /// `pcd_abort|seq=<id>`.
    Seq(u32),
    /// `pcd_abort|...` without a usable `seq=` field.
    Unspecified,
}

/// A typed PCD2 control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// `pcd_cfg|k=v|...`: numeric receiver settings.
    Config(BTreeMap<String, f64>),
    /// `pcd_cfg_ok`.
    ConfigOk,
    /// `pcd_abort` or `pcd_abort|seq=<id>`.
    Abort(AbortTarget),
    /// `pcd_abort_ok` or `pcd_abort_ok|seq=<id>`.
    AbortOk {
        /// Stream that was marked aborted, if any.
        seq_id: Option<u32>,
    },
    /// `pcd_kind|<seq>|<kind>`: label for the stream that follows.
    Kind {
        /// Stream id.
        seq_id: u32,
        /// Stream label.
        kind: String,
    },
    /// `<kind>_progress|<seq>|<sent>|<count>`: sender-side progress.
    KindProgress {
        /// Stream label.
        kind: String,
        /// Stream id.
        seq_id: u32,
        /// Frames sent so far.
        sent: u32,
        /// Frames in the stream.
        count: u32,
    },
    /// `pcd_begin|<seq>|<total>|<chunks>`.
    Begin {
        /// Stream id.
        seq_id: u32,
        /// Points in the stream.
        total_points: u32,
        /// Frames in the stream.
        chunk_count: u32,
    },
    /// `pcd_progress|<seq>|<got>|<count>`: receiver-side progress.
    Progress {
        /// Stream id.
        seq_id: u32,
        /// Distinct chunks received.
        received: u32,
        /// Frames in the stream.
        chunk_count: u32,
    },
    /// `pcd_ok|<seq>|<n>`: stream fully assembled.
    Complete {
        /// Stream id.
        seq_id: u32,
        /// Points reconstructed.
        points: u32,
    },
    /// `pcd_err|bad_len|seq=..|idx=..|got=..|exp=..`.
    BadLength {
        /// Stream id.
        seq_id: u32,
        /// Chunk index.
        chunk_index: u32,
        /// Payload bytes received.
        got: usize,
        /// Payload bytes expected.
        expected: usize,
    },
    /// `pcd_err|bad_range|seq=..|start=..|end=..|total=..`.
    BadRange {
        /// Stream id.
        seq_id: u32,
        /// First point index.
        start: u64,
        /// One past the last point index.
        end: u64,
        /// Stream point count.
        total: u32,
    },
    /// `pcd_status|<seq>|<stage>[|<detail>]`.
    Status {
        /// Stream id.
        seq_id: u32,
        /// Processing stage name.
        stage: String,
        /// Free-form detail.
        detail: Option<String>,
    },
    /// `surface_done|<seq>`.
    SurfaceDone {
        /// Stream id of the returned surface.
        seq_id: u32,
    },
    /// `ping`.
    Ping,
    /// `pong`.
    Pong,
    /// `status`.
    StatusQuery,
    /// `status_ok`.
    StatusOk,
    /// `err|unknown_command`.
    UnknownCommand,
}

impl ControlMessage {
    /// Configuration message from key/value pairs.
    pub fn config<'a>(values: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self::Config(values.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(values) => {
                f.write_str("pcd_cfg|")?;
                for (i, (k, v)) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                Ok(())
            }
            Self::ConfigOk => f.write_str("pcd_cfg_ok"),
            Self::Abort(AbortTarget::Latest) => f.write_str("pcd_abort"),
            Self::Abort(AbortTarget::Seq(seq)) => write!(f, "pcd_abort|seq={seq}"),
            Self::Abort(AbortTarget::Unspecified) => f.write_str("pcd_abort|"),
            Self::AbortOk { seq_id: Some(seq) } => write!(f, "pcd_abort_ok|seq={seq}"),
            Self::AbortOk { seq_id: None } => f.write_str("pcd_abort_ok"),
            Self::Kind { seq_id, kind } => write!(f, "pcd_kind|{seq_id}|{kind}"),
            Self::KindProgress {
                kind,
                seq_id,
                sent,
                count,
            } => write!(f, "{kind}_progress|{seq_id}|{sent}|{count}"),
            Self::Begin {
                seq_id,
                total_points,
                chunk_count,
            } => write!(f, "pcd_begin|{seq_id}|{total_points}|{chunk_count}"),
            Self::Progress {
                seq_id,
                received,
                chunk_count,
            } => write!(f, "pcd_progress|{seq_id}|{received}|{chunk_count}"),
            Self::Complete { seq_id, points } => write!(f, "pcd_ok|{seq_id}|{points}"),
            Self::BadLength {
                seq_id,
                chunk_index,
                got,
                expected,
            } => write!(
                f,
                "pcd_err|bad_len|seq={seq_id}|idx={chunk_index}|got={got}|exp={expected}"
            ),
            Self::BadRange {
                seq_id,
                start,
                end,
                total,
            } => write!(
                f,
                "pcd_err|bad_range|seq={seq_id}|start={start}|end={end}|total={total}"
            ),
            Self::Status {
                seq_id,
                stage,
                detail,
            } => {
                write!(f, "pcd_status|{seq_id}|{stage}")?;
                if let Some(detail) = detail {
                    write!(f, "|{detail}")?;
                }
                Ok(())
            }
            Self::SurfaceDone { seq_id } => write!(f, "surface_done|{seq_id}"),
            Self::Ping => f.write_str("ping"),
            Self::Pong => f.write_str("pong"),
            Self::StatusQuery => f.write_str("status"),
            Self::StatusOk => f.write_str("status_ok"),
            Self::UnknownCommand => f.write_str("err|unknown_command"),
        }
    }
}

fn invalid(text: &str) -> PcdError {
    PcdError::InvalidControl(text.to_string())
}

/// Decimal seq id reduced modulo 2^32.
fn parse_seq(field: &str) -> Option<u32> {
    let wide: i128 = field.trim().parse().ok()?;
    Some(wide.rem_euclid(1 << 32) as u32)
}

fn parse_num<T: FromStr>(field: &str) -> Option<T> {
    field.trim().parse().ok()
}

/// Value of `key=` among `fields`.
fn keyed<'a>(fields: &[&'a str], key: &str) -> Option<&'a str> {
    fields.iter().find_map(|f| {
        let (k, v) = f.split_once('=')?;
        (k == key).then_some(v)
    })
}

fn parse_error(fields: &[&str]) -> Option<ControlMessage> {
    match fields.first().copied()? {
        "bad_len" => Some(ControlMessage::BadLength {
            seq_id: parse_seq(keyed(fields, "seq")?)?,
            chunk_index: parse_num(keyed(fields, "idx")?)?,
            got: parse_num(keyed(fields, "got")?)?,
            expected: parse_num(keyed(fields, "exp")?)?,
        }),
        "bad_range" => Some(ControlMessage::BadRange {
            seq_id: parse_seq(keyed(fields, "seq")?)?,
            start: parse_num(keyed(fields, "start")?)?,
            end: parse_num(keyed(fields, "end")?)?,
            total: parse_num(keyed(fields, "total")?)?,
        }),
        _ => None,
    }
}

impl FromStr for ControlMessage {
    type Err = PcdError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "pcd_cfg_ok" => return Ok(Self::ConfigOk),
            "pcd_abort" => return Ok(Self::Abort(AbortTarget::Latest)),
            "pcd_abort_ok" => return Ok(Self::AbortOk { seq_id: None }),
            "ping" => return Ok(Self::Ping),
            "pong" => return Ok(Self::Pong),
            "status" => return Ok(Self::StatusQuery),
            "status_ok" => return Ok(Self::StatusOk),
            "err|unknown_command" => return Ok(Self::UnknownCommand),
            _ => {}
        }

        let (head, rest) = text.split_once('|').ok_or_else(|| invalid(text))?;
        let fields: Vec<&str> = rest.split('|').collect();

        let parsed = match head {
            "pcd_cfg" => {
                let values = fields
                    .iter()
                    .filter_map(|f| {
                        let (k, v) = f.split_once('=')?;
                        Some((k.to_string(), v.trim().parse::<f64>().ok()?))
                    })
                    .collect();
                Some(Self::Config(values))
            }
            "pcd_abort" => Some(Self::Abort(
                keyed(&fields, "seq")
                    .and_then(parse_seq)
                    .map_or(AbortTarget::Unspecified, AbortTarget::Seq),
            )),
            "pcd_abort_ok" => keyed(&fields, "seq")
                .and_then(parse_seq)
                .map(|seq| Self::AbortOk { seq_id: Some(seq) }),
            "pcd_kind" => match fields.as_slice() {
                [seq, kind] => Some(Self::Kind {
                    seq_id: parse_seq(seq).ok_or_else(|| invalid(text))?,
                    kind: kind.to_string(),
                }),
                _ => None,
            },
            "pcd_begin" => match fields.as_slice() {
                [seq, total, chunks] => Some(Self::Begin {
                    seq_id: parse_seq(seq).ok_or_else(|| invalid(text))?,
                    total_points: parse_num(total).ok_or_else(|| invalid(text))?,
                    chunk_count: parse_num(chunks).ok_or_else(|| invalid(text))?,
                }),
                _ => None,
            },
            "pcd_progress" => match fields.as_slice() {
                [seq, got, count] => Some(Self::Progress {
                    seq_id: parse_seq(seq).ok_or_else(|| invalid(text))?,
                    received: parse_num(got).ok_or_else(|| invalid(text))?,
                    chunk_count: parse_num(count).ok_or_else(|| invalid(text))?,
                }),
                _ => None,
            },
            "pcd_ok" => match fields.as_slice() {
                [seq, n] => Some(Self::Complete {
                    seq_id: parse_seq(seq).ok_or_else(|| invalid(text))?,
                    points: parse_num(n).ok_or_else(|| invalid(text))?,
                }),
                _ => None,
            },
            "pcd_err" => parse_error(&fields),
            "pcd_status" => {
                let mut parts = rest.splitn(3, '|');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(seq), Some(stage), detail) if !stage.is_empty() => Some(Self::Status {
                        seq_id: parse_seq(seq).ok_or_else(|| invalid(text))?,
                        stage: stage.to_string(),
                        detail: detail.map(str::to_string),
                    }),
                    _ => None,
                }
            }
            "surface_done" => match fields.as_slice() {
                [seq] => parse_seq(seq).map(|seq_id| Self::SurfaceDone { seq_id }),
                _ => None,
            },
            other => match (other.strip_suffix("_progress"), fields.as_slice()) {
                (Some(kind), [seq, sent, count]) if !kind.is_empty() => Some(Self::KindProgress {
                    kind: kind.to_string(),
                    seq_id: parse_seq(seq).ok_or_else(|| invalid(text))?,
                    sent: parse_num(sent).ok_or_else(|| invalid(text))?,
                    count: parse_num(count).ok_or_else(|| invalid(text))?,
                }),
                _ => None,
            },
        };

        parsed.ok_or_else(|| invalid(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ControlMessage {
        text.parse().unwrap()
    }

    #[test]
    fn wire_text_matches_protocol() {
        assert_eq!(
            ControlMessage::Begin {
                seq_id: 9,
                total_points: 250000,
                chunk_count: 2,
            }
            .to_string(),
            "pcd_begin|9|250000|2"
        );
        assert_eq!(
            ControlMessage::BadLength {
                seq_id: 1,
                chunk_index: 0,
                got: 11,
                expected: 12,
            }
            .to_string(),
            "pcd_err|bad_len|seq=1|idx=0|got=11|exp=12"
        );
        assert_eq!(
            ControlMessage::config([("voxel_size", 0.01)]).to_string(),
            "pcd_cfg|voxel_size=0.01"
        );
        assert_eq!(
            ControlMessage::Abort(AbortTarget::Seq(42)).to_string(),
            "pcd_abort|seq=42"
        );
        assert_eq!(
            ControlMessage::KindProgress {
                kind: "workspace".into(),
                seq_id: 5,
                sent: 10,
                count: 12,
            }
            .to_string(),
            "workspace_progress|5|10|12"
        );
    }

    #[test]
    fn receiver_progress_is_not_a_kind_progress() {
        assert_eq!(
            parse("pcd_progress|3|2|4"),
            ControlMessage::Progress {
                seq_id: 3,
                received: 2,
                chunk_count: 4,
            }
        );
        assert_eq!(
            parse("surface_progress|3|2|4"),
            ControlMessage::KindProgress {
                kind: "surface".into(),
                seq_id: 3,
                sent: 2,
                count: 4,
            }
        );
    }

    #[test]
    fn abort_forms() {
        assert_eq!(parse("pcd_abort"), ControlMessage::Abort(AbortTarget::Latest));
        assert_eq!(
            parse("pcd_abort|seq=4294967297"),
            ControlMessage::Abort(AbortTarget::Seq(1))
        );
        assert_eq!(
            parse("pcd_abort|seq=-1"),
            ControlMessage::Abort(AbortTarget::Seq(u32::MAX))
        );
        assert_eq!(
            parse("pcd_abort|seq=abc"),
            ControlMessage::Abort(AbortTarget::Unspecified)
        );
        assert_eq!(
            parse("pcd_abort_ok|seq=7"),
            ControlMessage::AbortOk { seq_id: Some(7) }
        );
    }

    #[test]
    fn config_skips_malformed_pairs() {
        let ControlMessage::Config(values) = parse("pcd_cfg|voxel_size=0.02|bogus|sigma=x|iso_level=0.5")
        else {
            panic!("expected config");
        };
        assert_eq!(values.len(), 2);
        assert_eq!(values["voxel_size"], 0.02);
        assert_eq!(values["iso_level"], 0.5);
    }

    #[test]
    fn status_keeps_detail_verbatim() {
        assert_eq!(
            parse("pcd_status|8|processing_error|ValueError:a|b"),
            ControlMessage::Status {
                seq_id: 8,
                stage: "processing_error".into(),
                detail: Some("ValueError:a|b".into()),
            }
        );
        assert_eq!(
            parse("pcd_status|8|aborted"),
            ControlMessage::Status {
                seq_id: 8,
                stage: "aborted".into(),
                detail: None,
            }
        );
    }

    #[test]
    fn display_then_parse_is_identity() {
        let messages = [
            ControlMessage::ConfigOk,
            ControlMessage::AbortOk { seq_id: None },
            ControlMessage::Kind {
                seq_id: 77,
                kind: "workspace".into(),
            },
            ControlMessage::Complete {
                seq_id: 77,
                points: 1000,
            },
            ControlMessage::BadRange {
                seq_id: 2,
                start: 10,
                end: 30,
                total: 20,
            },
            ControlMessage::SurfaceDone { seq_id: 78 },
            ControlMessage::UnknownCommand,
        ];
        for msg in messages {
            assert_eq!(parse(&msg.to_string()), msg);
        }
    }

    #[test]
    fn unknown_text_rejected() {
        assert!("hello".parse::<ControlMessage>().is_err());
        assert!("pcd_begin|1|2".parse::<ControlMessage>().is_err());
        assert!("pcd_ok|x|2".parse::<ControlMessage>().is_err());
        assert!("_progress|1|2|3".parse::<ControlMessage>().is_err());
    }
}
