//! Newline-delimited JSON sink for derived domain events.
//!
//! Every record is serialized into a single buffer and handed to one
//! `write_all` on a file opened with `O_APPEND`, so external tailers never see
//! half a record even when several supervisors share one file.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub ts: DateTime<Utc>,
    /// `<origin>:<adapter id>`, e.g. `toybox:hethack`.
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Payload,
}

impl DomainEvent {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            ts: Utc::now(),
            source: source.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}

#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLog {
    /// Opens `path` for appending, creating it and its parent directories.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
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

    pub fn append(&self, event: &DomainEvent) -> std::io::Result<()> {
        let mut record = serde_json::to_vec(event).map_err(std::io::Error::other)?;
        record.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&record)?;
        file.flush()
    }
}
