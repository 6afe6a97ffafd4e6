use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::error::SourceError;
use crate::source::{ChunkSource, FileProperties};

#[derive(Debug, Clone)]
struct StoredFile {
    data: Bytes,
    mime_type: Option<String>,
    name: Option<String>,
}

/// In-process [`ChunkSource`] serving byte buffers.
///
/// Records every chunk request so callers can assert on fetch patterns, and
/// can be switched into an outage mode where every call fails with
/// [`SourceError::Unavailable`].
#[derive(Debug)]
pub struct MemoryChunkSource {
    name: String,
    files: DashMap<String, StoredFile>,
    unavailable: AtomicBool,
    fetches: Mutex<Vec<(u64, u64)>>,
}

impl MemoryChunkSource {
    /// Create an empty source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: DashMap::new(),
            unavailable: AtomicBool::new(false),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Store `data` under `locator`.
    pub fn insert(
        &self,
        locator: impl Into<String>,
        data: impl Into<Bytes>,
        mime_type: Option<&str>,
        name: Option<&str>,
    ) {
        self.files.insert(
            locator.into(),
            StoredFile {
                data: data.into(),
                mime_type: mime_type.map(str::to_owned),
                name: name.map(str::to_owned),
            },
        );
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_file(
        self,
        locator: impl Into<String>,
        data: impl Into<Bytes>,
        mime_type: Option<&str>,
        name: Option<&str>,
    ) -> Self {
        self.insert(locator, data, mime_type, name);
        self
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// `(offset, size)` of every chunk request so far, in call order.
    pub fn fetches(&self) -> Vec<(u64, u64)> {
        self.fetches
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(SourceError::Unavailable(format!(
                "{} is offline",
                self.name
            )));
        }
        Ok(())
    }

    fn lookup(&self, locator: &str) -> Result<StoredFile, SourceError> {
        self.files
            .get(locator)
            .map(|f| f.clone())
            .ok_or_else(|| SourceError::NotFound(locator.to_owned()))
    }
}

#[async_trait]
impl ChunkSource for MemoryChunkSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn properties(&self, locator: &str) -> Result<FileProperties, SourceError> {
        self.check_available()?;
        let file = self.lookup(locator)?;
        Ok(FileProperties {
            size_bytes: file.data.len() as u64,
            mime_type: file.mime_type,
            name: file.name,
        })
    }

    async fn fetch_chunk(
        &self,
        locator: &str,
        offset: u64,
        size: u64,
    ) -> Result<Bytes, SourceError> {
        self.check_available()?;
        if let Ok(mut log) = self.fetches.lock() {
            log.push((offset, size));
        }
        let file = self.lookup(locator)?;
        let len = file.data.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
        let end = usize::try_from(offset.saturating_add(size))
            .unwrap_or(usize::MAX)
            .min(len);
        Ok(file.data.slice(start..end))
    }
}
