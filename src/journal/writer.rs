// =============================================================================
// JSONL writers — append-only event and frame files, one object per line
// =============================================================================
//
// Events land at `<base>/<YYYY-MM-DD>/<symbol>.jsonl`, frames at
// `<base>/frames/<YYYY-MM-DD>/<symbol>.jsonl` — separate trees so the two
// schemas never mix.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::frame_record::FrameRecord;
use super::JournalEventRecord;

/// Appends journal events as JSONL.
#[derive(Debug, Clone)]
pub struct JsonlJournalWriter {
    base_dir: PathBuf,
}

impl JsonlJournalWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Append events for one (symbol, day). Returns the path written, or
    /// `None` when there was nothing to write.
    pub fn append_events(
        &self,
        symbol: &str,
        day_utc: &str,
        events: &[JournalEventRecord],
    ) -> Result<Option<PathBuf>> {
        if events.is_empty() {
            return Ok(None);
        }
        let out_dir = self.base_dir.join(day_utc);
        let path = out_dir.join(format!("{}.jsonl", symbol.to_lowercase()));
        append_lines(&out_dir, &path, events)?;
        Ok(Some(path))
    }
}

/// Appends frame marker records as JSONL.
#[derive(Debug, Clone)]
pub struct JsonlFramesWriter {
    base_dir: PathBuf,
}

impl JsonlFramesWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn append_frame(&self, symbol: &str, day_utc: &str, frame: &FrameRecord) -> Result<PathBuf> {
        let out_dir = self.base_dir.join("frames").join(day_utc);
        let path = out_dir.join(format!("{}.jsonl", symbol.to_lowercase()));
        append_lines(&out_dir, &path, std::slice::from_ref(frame))?;
        Ok(path)
    }
}

fn append_lines<T: serde::Serialize>(out_dir: &Path, path: &Path, items: &[T]) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create journal dir {}", out_dir.display()))?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open journal file {}", path.display()))?;
    for item in items {
        let line = serde_json::to_string(item).context("failed to serialise journal record")?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", path.display()))?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::frame_record::build_frame_record;
    use crate::types::{ComputeKind, SmcHint};

    #[test]
    fn events_writer_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonlJournalWriter::new(dir.path());

        let event = JournalEventRecord {
            ts: "2024-01-01T00:00:00.000Z".into(),
            symbol: "XAUUSD".into(),
            tf: "5m".into(),
            entity: "zone".into(),
            event: "created".into(),
            id: "z1".into(),
            entity_type: "ORDER_BLOCK".into(),
            direction: "LONG".into(),
            role: "PRIMARY".into(),
            price_min: Some(100.0),
            price_max: Some(110.0),
            level: None,
            ctx: Default::default(),
        };
        let path = writer
            .append_events("XAUUSD", "2024-01-01", &[event.clone(), event])
            .unwrap()
            .unwrap();
        assert!(path.ends_with("2024-01-01/xauusd.jsonl"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["entity"], "zone");
        assert_eq!(first["type"], "ORDER_BLOCK");
    }

    #[test]
    fn empty_events_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonlJournalWriter::new(dir.path());
        assert!(writer.append_events("X", "2024-01-01", &[]).unwrap().is_none());
    }

    #[test]
    fn frames_writer_uses_frames_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonlFramesWriter::new(dir.path());
        let record = build_frame_record(
            "eurusd",
            "5m",
            1_704_067_200_000,
            ComputeKind::Close,
            1_704_067_199_999,
            true,
            &SmcHint::default(),
        );
        let path = writer.append_frame("EURUSD", "2024-01-01", &record).unwrap();
        assert!(path.ends_with("frames/2024-01-01/eurusd.jsonl"));
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["kind"], "close");
        assert_eq!(parsed["symbol"], "EURUSD");
    }
}
