//! JSON-lines session traces, replayed by the `metabox` binary.
//!
//! One record per line, tagged by `type`. Blank lines and lines starting
//! with `#` are skipped.
//!
//! ```text
//! {"type":"anchor","event":"added","id":"6f1c...","pose":{"position":[0,1,-0.5],"orientation":[0,0,0,1]}}
//! {"type":"activate","module":"sesame"}
//! {"type":"collision","a":"HandJoint:Right_indexFingerTip","b":"metaBoxSkin","phase":"began"}
//! {"type":"transcript","text":"開閉","is_final":true}
//! ```

use crate::collision::{CollisionPairEvent, CollisionPhase};
use crate::geometry::Pose;
use crate::modules::flea_market::ProductDraft;
use crate::modules::{ModuleCommand, ModuleKind};
use crate::sensor::{AnchorEvent, AnchorId, AnchorUpdate, HandJointSample, JointName, TrackedObjectAnchor};
use crate::session::{SessionError, SessionHandle};
use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceRecord {
    Activate {
        module: ModuleKind,
    },
    Deactivate,
    Joint {
        joint: JointName,
        pose: Pose,
        #[serde(default = "default_tracked")]
        tracked: bool,
    },
    Anchor {
        event: AnchorEvent,
        id: AnchorId,
        #[serde(default)]
        pose: Pose,
        #[serde(default = "default_tracked")]
        tracked: bool,
        #[serde(default = "default_reference_object")]
        reference_object: String,
    },
    Collision {
        a: String,
        b: String,
        phase: CollisionPhase,
    },
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    TimerStart {
        minutes: u32,
        seconds: u32,
    },
    TimerUnlock,
    Stock {
        name: String,
        description: String,
        price: Option<i64>,
    },
    ConfirmListing,
    Purchase,
    SleepMs {
        ms: u64,
    },
}

fn default_tracked() -> bool {
    true
}

fn default_reference_object() -> String {
    "metaBox".to_string()
}

/// Parse one trace line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<TraceRecord>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let record = serde_json::from_str(line).context("Invalid trace record")?;
    Ok(Some(record))
}

/// Stream of records from a line-oriented reader, with 1-based line numbers in errors.
pub fn records<R>(reader: R) -> impl Stream<Item = Result<TraceRecord>>
where
    R: AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    LinesStream::new(reader.lines())
        .enumerate()
        .filter_map(|(index, line)| async move {
            let line_no = index + 1;
            match line {
                Ok(line) => parse_line(&line)
                    .with_context(|| format!("Trace line {}", line_no))
                    .transpose(),
                Err(e) => Some(Err(anyhow::Error::new(e)
                    .context(format!("Failed to read trace line {}", line_no)))),
            }
        })
}

/// Feed one record into a running session.
///
/// Operator commands the module rejects are logged and skipped; only a closed
/// session is an error.
pub async fn replay(session: &SessionHandle, record: TraceRecord) -> Result<()> {
    debug!(?record, "Replaying trace record");

    let command = match record {
        TraceRecord::Activate { module } => {
            session.activate(module).await?;
            return Ok(());
        }
        TraceRecord::Deactivate => {
            session.deactivate().await?;
            return Ok(());
        }
        TraceRecord::Joint {
            joint,
            pose,
            tracked,
        } => {
            session.update_joint(HandJointSample {
                joint,
                pose,
                tracked,
            });
            return Ok(());
        }
        TraceRecord::Anchor {
            event,
            id,
            pose,
            tracked,
            reference_object,
        } => {
            session
                .anchor(AnchorUpdate {
                    event,
                    anchor: TrackedObjectAnchor {
                        id,
                        pose,
                        tracked,
                        reference_object,
                    },
                })
                .await?;
            return Ok(());
        }
        TraceRecord::Collision { a, b, phase } => {
            session
                .collision(CollisionPairEvent {
                    name_a: a,
                    name_b: b,
                    phase,
                })
                .await?;
            return Ok(());
        }
        TraceRecord::SleepMs { ms } => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return Ok(());
        }

        TraceRecord::Transcript { text, is_final } => ModuleCommand::Transcript { text, is_final },
        TraceRecord::TimerStart { minutes, seconds } => ModuleCommand::StartTimer { minutes, seconds },
        TraceRecord::TimerUnlock => ModuleCommand::TimerUnlock,
        TraceRecord::Stock {
            name,
            description,
            price,
        } => ModuleCommand::Stock {
            draft: ProductDraft {
                name,
                description,
                price,
            },
        },
        TraceRecord::ConfirmListing => ModuleCommand::ConfirmListing,
        TraceRecord::Purchase => ModuleCommand::Purchase,
    };

    match session.command(command).await {
        Ok(reply) => {
            info!(?reply, "Module command applied");
            Ok(())
        }
        Err(SessionError::Closed) => Err(SessionError::Closed.into()),
        Err(e) => {
            warn!(error = %e, "Module command rejected");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::HandJoint;
    use glam::Vec3;

    #[test]
    fn test_parse_records() {
        let record = parse_line(r#"{"type":"activate","module":"flea_market"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            record,
            TraceRecord::Activate {
                module: ModuleKind::FleaMarket
            }
        );

        let record = parse_line(
            r#"{"type":"joint","joint":"HandJoint:Right_thumbTip","pose":{"position":[0.1,1.2,-0.3],"orientation":[0,0,0,1]}}"#,
        )
        .unwrap()
        .unwrap();
        let TraceRecord::Joint {
            joint,
            pose,
            tracked,
        } = record
        else {
            panic!("expected joint record");
        };
        assert_eq!(joint, JointName::right(HandJoint::ThumbTip));
        assert_eq!(pose.position, Vec3::new(0.1, 1.2, -0.3));
        assert!(tracked);

        let record = parse_line(r#"{"type":"stock","name":"Mug","description":"Blue","price":300}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            record,
            TraceRecord::Stock {
                name: "Mug".to_string(),
                description: "Blue".to_string(),
                price: Some(300),
            }
        );
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# knock twice").unwrap().is_none());
    }

    #[test]
    fn test_bad_record_is_error() {
        assert!(parse_line(r#"{"type":"teleport"}"#).is_err());
        assert!(parse_line("not json").is_err());
    }

    #[tokio::test]
    async fn test_records_stream_reports_line_numbers() {
        let input = b"# header\n{\"type\":\"deactivate\"}\n\n{\"type\":\"bogus\"}\n".as_slice();
        let results: Vec<_> = records(input).collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), &TraceRecord::Deactivate);
        let err = results[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("line 4"));
    }
}
