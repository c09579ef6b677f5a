//! Content source adapters.
//!
//! An import request is opened into a [`SourceStream`]: a lazy, finite
//! sequence of [`SourceItem`]s. Opening validates the top-level source
//! (file exists, archive parses, start URL answers); item bytes are only
//! loaded when a worker calls [`ItemContent::load`].

pub mod archive;
pub mod crawl;
pub mod file;

pub use archive::{ArchiveEntry, ArchiveOpener, ArchiveReader, ZipOpener};
pub use crawl::{FetchError, FetchedResource, Fetcher, HttpFetcher};
pub use file::UploadPayload;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::config::Config;
use crate::error::{SourceOpenError, TaskError, TaskResult};
use crate::jobs::spawn_blocking_in_slot;
use crate::types::JobKind;

/// A client import request, as posted to `POST /jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum ImportRequest {
    SingleUpload(UploadPayload),
    ArchiveImport {
        path: PathBuf,
    },
    UrlCrawl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_images: Option<usize>,
    },
}

impl ImportRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            ImportRequest::SingleUpload(_) => JobKind::SingleUpload,
            ImportRequest::ArchiveImport { .. } => JobKind::ArchiveImport,
            ImportRequest::UrlCrawl { .. } => JobKind::UrlCrawl,
        }
    }

    /// Item count known before opening, used for the job's initial total.
    pub fn total_hint(&self) -> Option<u64> {
        match self {
            ImportRequest::SingleUpload(_) => Some(1),
            _ => None,
        }
    }

    /// Build a request from a local path or URL, guessing the kind when not given.
    pub fn from_location(location: &str, kind: Option<JobKind>, title: Option<String>) -> Self {
        let kind = kind.unwrap_or_else(|| guess_kind(location));
        match kind {
            JobKind::SingleUpload => ImportRequest::SingleUpload(UploadPayload {
                path: Some(PathBuf::from(location)),
                title,
                ..UploadPayload::default()
            }),
            JobKind::ArchiveImport => ImportRequest::ArchiveImport {
                path: PathBuf::from(location),
            },
            JobKind::UrlCrawl => ImportRequest::UrlCrawl {
                url: location.to_string(),
                max_images: None,
            },
        }
    }
}

fn guess_kind(location: &str) -> JobKind {
    if location.starts_with("http://") || location.starts_with("https://") {
        return JobKind::UrlCrawl;
    }
    let is_zip = Path::new(location)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    if is_zip {
        JobKind::ArchiveImport
    } else {
        JobKind::SingleUpload
    }
}

/// Where an item's bytes come from. Loading is deferred to the worker.
#[derive(Clone)]
pub enum ItemContent {
    File(PathBuf),
    Inline(Arc<[u8]>),
    ArchiveEntry {
        reader: Arc<dyn ArchiveReader>,
        entry: ArchiveEntry,
    },
    Remote {
        url: Url,
        fetcher: Arc<dyn Fetcher>,
    },
}

impl std::fmt::Debug for ItemContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemContent::File(path) => f.debug_tuple("File").field(path).finish(),
            ItemContent::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            ItemContent::ArchiveEntry { entry, .. } => {
                f.debug_tuple("ArchiveEntry").field(&entry.name).finish()
            }
            ItemContent::Remote { url, .. } => f.debug_tuple("Remote").field(&url.as_str()).finish(),
        }
    }
}

impl ItemContent {
    /// Load the raw bytes, refusing anything larger than `max_bytes`.
    pub async fn load(&self, source_label: &str, max_bytes: u64) -> TaskResult<Arc<[u8]>> {
        match self {
            ItemContent::File(path) => file::read_file(path, source_label, max_bytes).await,
            ItemContent::Inline(bytes) => Ok(Arc::clone(bytes)),
            ItemContent::ArchiveEntry { reader, entry } => {
                let reader = Arc::clone(reader);
                let entry = entry.clone();
                let bytes = spawn_blocking_in_slot(move || reader.read_entry(&entry, max_bytes))
                    .await
                    .map_err(|e| TaskError::io(source_label, e))??;
                Ok(Arc::from(bytes))
            }
            ItemContent::Remote { url, fetcher } => {
                let resource = fetcher
                    .fetch(url, max_bytes)
                    .await
                    .map_err(|e| e.into_task_error(source_label))?;
                Ok(Arc::from(resource.bytes))
            }
        }
    }
}

/// One unit of work produced by an adapter.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Filename, archive entry path, or URL
    pub label: String,
    pub content: ItemContent,
    /// User-supplied title; derived from the label otherwise
    pub title: Option<String>,
}

impl SourceItem {
    pub fn new(label: impl Into<String>, content: ItemContent) -> Self {
        Self {
            label: label.into(),
            content,
            title: None,
        }
    }

    /// User title, or the label's file stem.
    pub fn title(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return title.trim().to_string();
        }
        derive_title(&self.label)
    }
}

/// File stem of the last path segment of a label (path, entry or URL).
pub fn derive_title(label: &str) -> String {
    let without_query = label.split(['?', '#']).next().unwrap_or(label);
    let last = without_query
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query);
    let stem = Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(last);
    if stem.is_empty() {
        label.to_string()
    } else {
        stem.to_string()
    }
}

/// Lazy sequence of items for one job.
///
/// Adapters produce into a bounded channel; the stream ends when the
/// producer closes it. An `Err` item is a per-item failure that does not end
/// the sequence.
pub struct SourceStream {
    rx: mpsc::Receiver<TaskResult<SourceItem>>,
    total_hint: Option<u64>,
}

impl SourceStream {
    pub fn new(rx: mpsc::Receiver<TaskResult<SourceItem>>, total_hint: Option<u64>) -> Self {
        Self { rx, total_hint }
    }

    /// A stream over items that are already known.
    pub fn from_items(items: Vec<TaskResult<SourceItem>>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        let total = items.len() as u64;
        for item in items {
            // Capacity covers every item, so this never fails.
            let _ = tx.try_send(item);
        }
        Self::new(rx, Some(total))
    }

    /// Item count, when known upfront.
    pub fn total_hint(&self) -> Option<u64> {
        self.total_hint
    }

    pub async fn next(&mut self) -> Option<TaskResult<SourceItem>> {
        self.rx.recv().await
    }
}

/// Opens import requests using the configured archive and fetch capabilities.
#[derive(Clone)]
pub struct SourceOpener {
    config: Arc<Config>,
    archives: Arc<dyn ArchiveOpener>,
    fetcher: Arc<dyn Fetcher>,
}

impl SourceOpener {
    pub fn new(config: Arc<Config>, archives: Arc<dyn ArchiveOpener>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            archives,
            fetcher,
        }
    }

    /// Open the top-level source. Errors here fail the whole job.
    pub async fn open(&self, request: &ImportRequest) -> Result<SourceStream, SourceOpenError> {
        match request {
            ImportRequest::SingleUpload(payload) => {
                let item = file::open_upload(payload).await?;
                Ok(SourceStream::from_items(vec![Ok(item)]))
            }
            ImportRequest::ArchiveImport { path } => {
                archive::open_archive(Arc::clone(&self.archives), path, &self.config.pipeline).await
            }
            ImportRequest::UrlCrawl { url, max_images } => {
                let mut crawl = self.config.import.crawl.clone();
                if let Some(max) = max_images {
                    crawl.max_images = (*max).clamp(1, crawl.max_images);
                }
                crawl::open_crawl(
                    Arc::clone(&self.fetcher),
                    url,
                    crawl,
                    self.config.limits.max_bytes(),
                    &self.config.pipeline,
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let json = r#"{"kind":"archive-import","payload":{"path":"/tmp/a.zip"}}"#;
        let request: ImportRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            ImportRequest::ArchiveImport {
                path: PathBuf::from("/tmp/a.zip")
            }
        );
        assert_eq!(request.kind(), JobKind::ArchiveImport);

        let json = r#"{"kind":"url-crawl","payload":{"url":"https://example.com"}}"#;
        let request: ImportRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.kind(), JobKind::UrlCrawl);
        assert_eq!(request.total_hint(), None);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let json = r#"{"kind":"ftp-mirror","payload":{}}"#;
        assert!(serde_json::from_str::<ImportRequest>(json).is_err());
    }

    #[test]
    fn test_from_location_guesses_kind() {
        assert_eq!(
            ImportRequest::from_location("https://example.com/gallery", None, None).kind(),
            JobKind::UrlCrawl
        );
        assert_eq!(
            ImportRequest::from_location("photos/Holiday.ZIP", None, None).kind(),
            JobKind::ArchiveImport
        );
        assert_eq!(
            ImportRequest::from_location("photos/beach.jpg", None, None).kind(),
            JobKind::SingleUpload
        );
        assert_eq!(
            ImportRequest::from_location("odd.zip", Some(JobKind::SingleUpload), None).kind(),
            JobKind::SingleUpload
        );
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("beach.jpg"), "beach");
        assert_eq!(derive_title("2021/summer/dunes.png"), "dunes");
        assert_eq!(derive_title("https://example.com/img/cat.webp?w=200"), "cat");
        assert_eq!(derive_title("noext"), "noext");
    }

    #[test]
    fn test_user_title_wins() {
        let mut item = SourceItem::new("beach.jpg", ItemContent::Inline(Arc::from(vec![0u8])));
        assert_eq!(item.title(), "beach");
        item.title = Some("  Sunset  ".to_string());
        assert_eq!(item.title(), "Sunset");
        item.title = Some("   ".to_string());
        assert_eq!(item.title(), "beach");
    }

    #[tokio::test]
    async fn test_from_items_stream() {
        let mut stream = SourceStream::from_items(vec![
            Ok(SourceItem::new("a.png", ItemContent::Inline(Arc::from(vec![1u8])))),
            Err(TaskError::io("b.png", "gone")),
        ]);
        assert_eq!(stream.total_hint(), Some(2));
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_inline_content_loads_without_copy() {
        let bytes: Arc<[u8]> = Arc::from(vec![1u8, 2, 3]);
        let content = ItemContent::Inline(Arc::clone(&bytes));
        let loaded = content.load("x.png", 1024).await.unwrap();
        assert!(Arc::ptr_eq(&loaded, &bytes));
    }
}
