use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Local, SecondsFormat};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub prompt: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Percentage in `0.0..=100.0`, unrounded.
    pub success_rate: f64,
}

/// Append-only generation log backed by one JSON array file.
///
/// The file is loaded once on open and rewritten in full after every
/// append. A missing or unparsable file reads as an empty log.
#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl HistoryRecorder {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = read_entries(&path).unwrap_or_default();
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends one entry stamped with the local time and persists the log.
    ///
    /// The file is re-read under an exclusive lock on `<log>.lock` and the
    /// entry is appended to what is on disk, so other sessions' appends and
    /// clears are never undone.
    pub fn record_attempt(
        &mut self,
        prompt: &str,
        settings: Map<String, Value>,
        success: bool,
    ) -> anyhow::Result<HistoryEntry> {
        let entry = HistoryEntry {
            timestamp: now_local_iso(),
            prompt: prompt.to_string(),
            settings,
            success,
        };

        let _lock = lock_log(&self.path)?;
        let mut entries = read_entries(&self.path).unwrap_or_default();
        entries.push(entry.clone());
        self.entries = entries;
        write_entries(&self.path, &self.entries)?;
        Ok(entry)
    }

    pub fn stats(&self) -> HistoryStats {
        let total = self.entries.len() as u64;
        let successful = self.entries.iter().filter(|entry| entry.success).count() as u64;
        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        HistoryStats {
            total,
            successful,
            failed: total - successful,
            success_rate,
        }
    }

    /// The `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        let _lock = lock_log(&self.path)?;
        self.entries.clear();
        write_entries(&self.path, &self.entries)
    }
}

fn read_entries(path: &Path) -> Option<Vec<HistoryEntry>> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Held until the returned handle is dropped.
fn lock_log(path: &Path) -> anyhow::Result<File> {
    ensure_parent(path)?;
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let lock_path = PathBuf::from(lock_path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("failed to open {}", lock_path.display()))?;
    FileExt::lock_exclusive(&file)
        .with_context(|| format!("failed to lock {}", lock_path.display()))?;
    Ok(file)
}

fn write_entries(path: &Path, entries: &[HistoryEntry]) -> anyhow::Result<()> {
    let dir = ensure_parent(path)?;
    let mut staging = NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to stage history in {}", dir.display()))?;
    staging
        .write_all(serde_json::to_string_pretty(entries)?.as_bytes())
        .context("failed to write staged history")?;
    staging
        .persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> anyhow::Result<PathBuf> {
    let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(PathBuf::from("."));
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    Ok(parent.to_path_buf())
}

fn now_local_iso() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
