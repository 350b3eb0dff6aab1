//! JSON Lines writer for cycle history.
//!
//! Each line is a complete JSON object, so an interrupted write only loses
//! that line. Files rotate daily: `{prefix}_{YYYY-MM-DD}.jsonl`.

use crate::error::PersistenceResult;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Active writer state for daily file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Append-only JSON Lines writer with daily rotation.
pub struct JsonLinesWriter<T: Serialize> {
    base_dir: PathBuf,
    prefix: String,
    buffer: Vec<T>,
    max_buffer_size: usize,
    active_writer: Option<ActiveWriter>,
}

impl<T: Serialize> JsonLinesWriter<T> {
    /// Create a writer under `base_dir`; the directory is created if missing.
    pub fn new(base_dir: impl Into<PathBuf>, prefix: &str, max_buffer_size: usize) -> Self {
        let base_dir = base_dir.into();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create history directory");
        }

        Self {
            base_dir,
            prefix: prefix.to_string(),
            buffer: Vec::with_capacity(max_buffer_size.max(1)),
            max_buffer_size: max_buffer_size.max(1),
            active_writer: None,
        }
    }

    /// Path of the file for a given date string.
    pub fn path_for(&self, date: &str) -> PathBuf {
        self.base_dir.join(format!("{}_{}.jsonl", self.prefix, date))
    }

    /// Buffer a record, flushing once the buffer is full.
    pub fn add_record(&mut self, record: T) -> PersistenceResult<()> {
        self.buffer.push(record);

        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush writer on close");
            }
            info!(
                date = %active.date,
                records = active.records_written,
                "Closed JSON Lines writer"
            );
        }
    }

    fn open_writer(&mut self, date: &str) -> PersistenceResult<&mut ActiveWriter> {
        let filename = self.path_for(date);
        debug!(filename = %filename.display(), "Opening JSON Lines writer (append mode)");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&filename)?;

        Ok(self.active_writer.insert(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        }))
    }

    /// Flush buffered records to today's file.
    ///
    /// Records stay buffered until the write succeeds. A failed write drops
    /// the open file so the next flush reopens it.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();

        let needs_rotation = self
            .active_writer
            .as_ref()
            .is_some_and(|w| w.date != today);
        if needs_rotation {
            self.close_active_writer();
        }

        let mut batch = String::new();
        for record in &self.buffer {
            batch.push_str(&serde_json::to_string(record)?);
            batch.push('\n');
        }
        let count = self.buffer.len();

        let active = match self.active_writer.take() {
            Some(active) => self.active_writer.insert(active),
            None => self.open_writer(&today)?,
        };

        let written = active
            .writer
            .write_all(batch.as_bytes())
            .and_then(|()| active.writer.flush());
        match written {
            Ok(()) => active.records_written += count,
            Err(e) => {
                if let Some(failed) = self.active_writer.take() {
                    // Discard unwritten bytes instead of flushing them on drop.
                    let _ = failed.writer.into_parts();
                }
                warn!(?e, records = count, "History write failed, keeping records buffered");
                return Err(e.into());
            }
        }

        self.buffer.clear();
        debug!(date = %today, records = count, "Flushed records to JSON Lines");
        Ok(())
    }

    /// Close the writer, flushing any pending data.
    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active_writer();
        Ok(())
    }
}

impl<T: Serialize> Drop for JsonLinesWriter<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush buffer on drop");
        }
        self.close_active_writer();
    }
}

/// Read every parseable record from a JSON Lines file.
///
/// A missing file yields an empty list; unparseable lines are skipped.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> PersistenceResult<Vec<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(?e, path = %path.display(), "Skipping unparseable history line"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u32,
        label: String,
    }

    fn record(id: u32) -> Record {
        Record {
            id,
            label: format!("cycle_{id}"),
        }
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "cycles", 100);
        for i in 0..5 {
            writer.add_record(record(i)).unwrap();
        }
        writer.close().unwrap();

        let records: Vec<Record> = read_records(&writer.path_for(&today())).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0], record(0));
    }

    #[test]
    fn test_append_mode() {
        let dir = TempDir::new().unwrap();
        for batch in 0..2 {
            let mut writer = JsonLinesWriter::new(dir.path(), "cycles", 100);
            for i in 0..3 {
                writer.add_record(record(batch * 3 + i)).unwrap();
            }
            writer.close().unwrap();
        }

        let path = dir.path().join(format!("cycles_{}.jsonl", today()));
        let records: Vec<Record> = read_records(&path).unwrap();
        assert_eq!(records.len(), 6, "Should have 6 records total from 2 writes");
    }

    #[test]
    fn test_buffer_size_one_writes_immediately() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "cycles", 1);
        writer.add_record(record(7)).unwrap();

        let records: Vec<Record> = read_records(&writer.path_for(&today())).unwrap();
        assert_eq!(records, vec![record(7)]);
    }

    #[test]
    fn test_empty_flush_noop() {
        let dir = TempDir::new().unwrap();
        let mut writer: JsonLinesWriter<Record> = JsonLinesWriter::new(dir.path(), "cycles", 100);
        writer.flush().unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_failed_flush_keeps_records() {
        let dir = TempDir::new().unwrap();
        let history = dir.path().join("history");
        let mut writer = JsonLinesWriter::new(&history, "cycles", 100);
        writer.add_record(record(1)).unwrap();
        writer.add_record(record(2)).unwrap();

        std::fs::remove_dir_all(&history).unwrap();
        assert!(writer.flush().is_err());

        std::fs::create_dir_all(&history).unwrap();
        writer.flush().unwrap();

        let records: Vec<Record> = read_records(&writer.path_for(&today())).unwrap();
        assert_eq!(records, vec![record(1), record(2)]);
    }

    #[test]
    fn test_read_skips_bad_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.jsonl");
        std::fs::write(&path, "{\"id\":1,\"label\":\"a\"}\nnot json\n\n").unwrap();

        let records: Vec<Record> = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
    }
}
