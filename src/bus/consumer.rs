// Input bus consumer (§6). The bus transport itself is an out-of-scope
// external collaborator (§1); this module supplies a local stand-in
// (tailing or timestamp-scaled replay of a JSONL file) that stands in for
// a real topic consumer, the same role the teacher's `tail_jsonl` /
// `replay_jsonl` play for its own event source.

use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt};
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

use crate::events::{InputItem, TransactionEvent};

/// Tails a JSONL file, forwarding each line to `tx`. Used for the `tail`
/// mode (treat the file as a live, at-least-once input topic). Lines that
/// fail to deserialize are forwarded too, as `InputItem::Malformed`, so
/// they still reach the orchestrator and produce a decision record.
pub async fn tail_jsonl(path: &Path, tx: Sender<InputItem>, seek_end: bool) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    if seek_end {
        file.seek(std::io::SeekFrom::End(0)).await?;
    }
    let mut reader = tokio::io::BufReader::new(file);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            continue;
        }
        if let Some(item) = parse_line(&line) {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    }
    Ok(())
}

/// Replays a JSONL file at `speed`x, honoring the recorded timestamp deltas
/// between consecutive events. Malformed lines are forwarded immediately,
/// without perturbing the pacing derived from the surrounding valid events.
/// Used for local scenario/demo runs.
pub async fn replay_jsonl(path: &Path, tx: Sender<InputItem>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut prev_ts: Option<chrono::DateTime<chrono::Utc>> = None;
    for line in content.lines() {
        let Some(item) = parse_line(line) else { continue };
        if let InputItem::Event(event) = &item {
            if let Some(prev) = prev_ts {
                let delta = (event.timestamp - prev).num_milliseconds().max(0) as f64 / speed.max(1e-6);
                if delta > 0.0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delta as u64)).await;
                }
            }
            prev_ts = Some(event.timestamp);
        }
        if tx.send(item).await.is_err() {
            break;
        }
    }
    info!("replay of {} complete", path.display());
    Ok(())
}

fn parse_line(line: &str) -> Option<InputItem> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<TransactionEvent>(trimmed) {
        Ok(event) => Some(InputItem::Event(event)),
        Err(e) => {
            warn!("input line failed schema validation, routing to manual review: {}", e);
            Some(InputItem::Malformed { raw: trimmed.to_string(), reason: e.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        serde_json::json!({
            "order_id": "o-1",
            "user_id": "u-1",
            "ip_address": "1.2.3.4",
            "amount": 42.0,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "payment_method": "card",
            "currency": "USD",
            "shipping_country": "US",
            "billing_country": "US",
        })
        .to_string()
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   \n").is_none());
    }

    #[test]
    fn valid_json_parses_to_an_event() {
        assert!(matches!(parse_line(&sample_json()), Some(InputItem::Event(_))));
    }

    #[test]
    fn unparsable_json_becomes_a_malformed_item_carrying_the_raw_line() {
        let raw = "{not valid json";
        match parse_line(raw) {
            Some(InputItem::Malformed { raw: r, reason }) => {
                assert_eq!(r, raw);
                assert!(!reason.is_empty());
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }
}
