//! Upload history
//!
//! A bounded log of finished uploads, stored as pretty-printed JSON. A missing
//! or unreadable file is treated as an empty history so a damaged log never
//! blocks the client.

use crate::error::SettingsResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Entries kept; older ones are dropped first
pub const MAX_HISTORY_ENTRIES: usize = 200;

/// One finished upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Local time the upload finished, `YYYY-MM-DD HH:MM:SS`
    pub ts: String,
    /// File name
    pub file: String,
    /// Cooling seconds applied to the upload
    pub cooling: u32,
    /// Whether the upload completed
    pub success: bool,
}

impl HistoryEntry {
    /// Entry stamped with the current local time
    pub fn now(file: impl Into<String>, cooling: u32, success: bool) -> Self {
        Self {
            ts: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            file: file.into(),
            cooling,
            success,
        }
    }
}

/// Upload history backed by a JSON file
#[derive(Debug, Clone)]
pub struct UploadHistory {
    path: PathBuf,
}

impl UploadHistory {
    /// History stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, oldest first
    pub fn load(&self) -> Vec<HistoryEntry> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Cannot read history {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring corrupt history {}: {}", self.path.display(), e);
            Vec::new()
        })
    }

    /// Append an entry, keeping the newest [`MAX_HISTORY_ENTRIES`]
    pub fn append(&self, entry: HistoryEntry) -> SettingsResult<()> {
        let mut entries = self.load();
        entries.push(entry);
        if entries.len() > MAX_HISTORY_ENTRIES {
            let excess = entries.len() - MAX_HISTORY_ENTRIES;
            entries.drain(..excess);
        }
        self.write(&entries)
    }

    /// Remove all entries
    pub fn clear(&self) -> SettingsResult<()> {
        self.write(&[])
    }

    fn write(&self, entries: &[HistoryEntry]) -> SettingsResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}
