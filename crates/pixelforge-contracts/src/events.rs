use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Everything a generation session reports to its `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        client: String,
        history_file: String,
        history_entries: usize,
    },
    GenerationSucceeded {
        mode: String,
        seed: u32,
        width: u32,
        height: u32,
        timestamp: String,
        fingerprint: String,
    },
    GenerationFailed {
        mode: String,
        error_kind: String,
        message: String,
    },
    BatchFinished {
        count: usize,
        succeeded: usize,
        failed: usize,
    },
    HistoryWriteFailed {
        error: String,
        history_file: String,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "session_started",
            SessionEvent::GenerationSucceeded { .. } => "generation_succeeded",
            SessionEvent::GenerationFailed { .. } => "generation_failed",
            SessionEvent::BatchFinished { .. } => "batch_finished",
            SessionEvent::HistoryWriteFailed { .. } => "history_write_failed",
        }
    }
}

/// Session event log: one compact JSON object per line carrying `type`,
/// `session_id` and `ts` next to the event fields. Clones share one lock.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    path: Option<PathBuf>,
    session_id: String,
    append_lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_sink(Some(path.into()), session_id.into())
    }

    /// Builds events without writing them anywhere.
    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::with_sink(None, session_id.into())
    }

    fn with_sink(path: Option<PathBuf>, session_id: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                session_id,
                append_lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn record(&self, event: &SessionEvent) -> anyhow::Result<Value> {
        let fields = match serde_json::to_value(event)? {
            Value::Object(fields) => fields,
            other => anyhow::bail!("session event serialized to {other}"),
        };
        let mut line = Map::new();
        line.insert("type".to_string(), Value::from(event.name()));
        line.insert("session_id".to_string(), Value::from(self.session_id()));
        line.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        for (key, value) in fields {
            line.entry(key).or_insert(value);
        }
        let line = Value::Object(line);

        if let Some(path) = self.path() {
            self.append(path, &line)?;
        }
        Ok(line)
    }

    fn append(&self, path: &Path, line: &Value) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut encoded = serde_json::to_vec(line)?;
        encoded.push(b'\n');
        let _guard = self
            .inner
            .append_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?
            .write_all(&encoded)?;
        Ok(())
    }
}
