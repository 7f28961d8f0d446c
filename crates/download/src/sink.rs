//! Destinations for finished downloads.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;

use bytes::Bytes;
use cloudport_transfer::{artifact_file_name, validate_relative_path};
use tracing::debug;

use crate::error::DownloadError;

/// Boxed future returned by sinks.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DownloadError>> + Send + 'a>>;

/// A materialized download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name actually used, after sanitizing.
    pub name: String,
    pub size: u64,
    /// On-disk location, for sinks that write files.
    pub path: Option<PathBuf>,
}

/// Receives the bytes of each completed download.
pub trait ArtifactSink: Send + Sync {
    fn write<'a>(&'a self, name: &'a str, data: Bytes) -> SinkFuture<'a, Artifact>;
}

/// Writes artifacts into a directory.
///
/// Each file is written to `<name>.part` and renamed into place, so a
/// reader never observes a half-written artifact.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for DirectorySink {
    fn write<'a>(&'a self, name: &'a str, data: Bytes) -> SinkFuture<'a, Artifact> {
        Box::pin(async move {
            let name = artifact_file_name(name);
            validate_relative_path(&name)?;

            tokio::fs::create_dir_all(&self.dir).await?;
            let target = self.dir.join(&name);
            let partial = self.dir.join(format!("{name}.part"));
            tokio::fs::write(&partial, &data).await?;
            tokio::fs::rename(&partial, &target).await?;

            debug!(path = %target.display(), size = data.len(), "artifact written");
            Ok(Artifact {
                name,
                size: data.len() as u64,
                path: Some(target),
            })
        })
    }
}

/// Keeps artifacts in memory, keyed by sanitized name.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<HashMap<String, Bytes>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactSink for MemorySink {
    fn write<'a>(&'a self, name: &'a str, data: Bytes) -> SinkFuture<'a, Artifact> {
        Box::pin(async move {
            let name = artifact_file_name(name);
            let size = data.len() as u64;
            self.files
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(name.clone(), data);
            Ok(Artifact {
                name,
                size,
                path: None,
            })
        })
    }
}
