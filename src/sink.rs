// Durable store adapter (§6): writes decision records to a tabular store
// mirroring decision-record fields plus the raw event JSON and agent trace
// JSON. The concrete relational sink is out of scope (§1); this is a
// JSONL-file stand-in with the exact row shape a real `INSERT` would carry,
// following the same append-only `tokio::fs::OpenOptions` idiom the pack
// uses for its own side-effect dispatch.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::events::{DecisionRecord, TransactionEvent};

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RawInput<'a> {
    Event(&'a TransactionEvent),
    Unparsed(&'a str),
}

#[derive(Debug, Serialize)]
struct DurableRow<'a> {
    order_id: &'a str,
    user_id: &'a str,
    decision: String,
    risk_score: f32,
    confidence: f32,
    contributing_factors: &'a [crate::events::ContributingFactor],
    agent_trace: &'a Option<crate::events::AgentTrace>,
    elapsed_ms: u64,
    decided_at: DateTime<Utc>,
    raw_event: RawInput<'a>,
}

pub struct DurableSink {
    path: PathBuf,
}

impl DurableSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Offset commit for the input bus happens only after this returns
    /// `Ok` (§6): the decision record must be durably written first.
    pub async fn write(&self, event: &TransactionEvent, record: &DecisionRecord) -> Result<()> {
        self.write_row(RawInput::Event(event), record).await
    }

    /// Durable write for an input line that never parsed into a
    /// `TransactionEvent` (§7 `InvalidEvent`) — the raw payload is recorded
    /// in place of a structured event.
    pub async fn write_malformed(&self, raw_line: &str, record: &DecisionRecord) -> Result<()> {
        self.write_row(RawInput::Unparsed(raw_line), record).await
    }

    async fn write_row(&self, raw_event: RawInput<'_>, record: &DecisionRecord) -> Result<()> {
        let row = DurableRow {
            order_id: &record.order_id,
            user_id: &record.user_id,
            decision: record.decision.to_string(),
            risk_score: record.risk_score,
            confidence: record.confidence,
            contributing_factors: &record.contributing_factors,
            agent_trace: &record.agent_trace,
            elapsed_ms: record.elapsed_ms,
            decided_at: record.decided_at,
            raw_event,
        };
        let line = serde_json::to_string(&row)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let mut f = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        f.write_all(line.as_bytes()).await?;
        f.write_all(b"\n").await?;
        Ok(())
    }
}
