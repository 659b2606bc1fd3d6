//! # Output Sinks
//!
//! File-system seam for the coordinator's Markdown outputs. [`FsSink`] writes
//! to disk; [`MemorySink`] captures output for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Destination for final documents and progress files
#[async_trait]
pub trait FileSink: Send + Sync {
    /// Create or overwrite `path` with `body`
    async fn write(&self, path: &Path, body: &str) -> Result<()>;
    /// Append `body` to `path`, creating it if missing
    async fn append(&self, path: &Path, body: &str) -> Result<()>;
}

/// Real file-system sink; creates parent directories as needed
#[derive(Default)]
pub struct FsSink;

impl FsSink {
    pub fn new() -> Self {
        Self
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileSink for FsSink {
    async fn write(&self, path: &Path, body: &str) -> Result<()> {
        Self::ensure_parent(path).await?;
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    async fn append(&self, path: &Path, body: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        Self::ensure_parent(path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(body.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", path.display()))
    }
}

/// In-memory sink for tests
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<BTreeMap<PathBuf, String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl FileSink for MemorySink {
    async fn write(&self, path: &Path, body: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), body.to_string());
        Ok(())
    }

    async fn append(&self, path: &Path, body: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default()
            .push_str(body);
        Ok(())
    }
}

/// Topic sanitization for file names: spaces become underscores
pub fn sanitize_topic(topic: &str) -> String {
    topic.replace(' ', "_")
}
