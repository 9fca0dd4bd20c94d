//! Durable record of announcement outcomes.

use crate::error::{EngineError, EngineResult};
use crate::model::LogRecord;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Append-only sink for [`LogRecord`]s. Failures are reported, never retried
/// by the engine.
pub trait LogSink: Send + Sync {
    fn append(&self, record: &LogRecord) -> EngineResult<()>;
}

/// One JSON object per line, appended to a file.
#[derive(Debug)]
pub struct JsonlLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlLogSink {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back (for export or inspection).
    pub fn read_all(&self) -> EngineResult<Vec<LogRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl LogSink for JsonlLogSink {
    fn append(&self, record: &LogRecord) -> EngineResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| EngineError::Log(format!("{}: {}", self.path.display(), e)))
    }
}

/// Keeps records in memory. Cloned handles share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, record: &LogRecord) -> EngineResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}
