//! Archive-import adapter and the archive reading capability.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::{SourceOpenError, TaskError, TaskResult};
use crate::pipeline::channel::bounded_channel;

use super::{ItemContent, SourceItem, SourceStream};

/// One file entry inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Position in the archive's central directory
    pub index: usize,
    /// Path inside the archive, used as the item label
    pub name: String,
    /// Uncompressed size as declared by the archive
    pub size: u64,
}

/// An opened archive whose entries can be read independently.
pub trait ArchiveReader: Send + Sync {
    /// Importable file entries, in archive order.
    fn entries(&self) -> &[ArchiveEntry];

    /// Decompress one entry. Blocking; call from the blocking pool.
    fn read_entry(&self, entry: &ArchiveEntry, max_bytes: u64) -> TaskResult<Vec<u8>>;
}

/// Opens archive files. Blocking; call from the blocking pool.
pub trait ArchiveOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn ArchiveReader>, SourceOpenError>;
}

/// Zip archives via the `zip` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipOpener;

impl ArchiveOpener for ZipOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn ArchiveReader>, SourceOpenError> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceOpenError::NotFound(path.to_path_buf())
            } else {
                SourceOpenError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| SourceOpenError::Archive {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut entries = Vec::new();
        for index in 0..archive.len() {
            let file = archive.by_index(index).map_err(|e| SourceOpenError::Archive {
                path: path.to_path_buf(),
                message: format!("entry {}: {}", index, e),
            })?;
            if file.is_dir() || is_metadata_entry(file.name()) {
                continue;
            }
            entries.push(ArchiveEntry {
                index,
                name: file.name().to_string(),
                size: file.size(),
            });
        }

        Ok(Arc::new(ZipReader {
            path: path.to_path_buf(),
            entries,
        }))
    }
}

/// Entries that are archive bookkeeping rather than user content.
fn is_metadata_entry(name: &str) -> bool {
    if name.starts_with("__MACOSX/") {
        return true;
    }
    name.rsplit('/')
        .next()
        .is_some_and(|file_name| file_name.starts_with('.'))
}

/// Reopens the file for every read so entries can be decompressed in parallel.
struct ZipReader {
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveReader for ZipReader {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read_entry(&self, entry: &ArchiveEntry, max_bytes: u64) -> TaskResult<Vec<u8>> {
        if entry.size > max_bytes {
            return Err(TaskError::TooLarge {
                source_label: entry.name.clone(),
                size_mb: entry.size / (1024 * 1024),
                max_mb: max_bytes / (1024 * 1024),
            });
        }

        let file = File::open(&self.path).map_err(|e| TaskError::io(&entry.name, e))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| TaskError::io(&entry.name, e))?;
        let zipped = archive.by_index(entry.index).map_err(|e| TaskError::Corrupt {
            source_label: entry.name.clone(),
            message: e.to_string(),
        })?;

        // Declared sizes can lie; cap what we actually inflate.
        let mut bytes = Vec::with_capacity(entry.size.min(max_bytes) as usize);
        zipped
            .take(max_bytes + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| TaskError::Corrupt {
                source_label: entry.name.clone(),
                message: format!("decompression failed: {}", e),
            })?;
        if bytes.len() as u64 > max_bytes {
            return Err(TaskError::TooLarge {
                source_label: entry.name.clone(),
                size_mb: bytes.len() as u64 / (1024 * 1024),
                max_mb: max_bytes / (1024 * 1024),
            });
        }
        Ok(bytes)
    }
}

/// Open an archive and stream one item per entry.
pub(crate) async fn open_archive(
    opener: Arc<dyn ArchiveOpener>,
    path: &Path,
    config: &PipelineConfig,
) -> Result<SourceStream, SourceOpenError> {
    let owned = path.to_path_buf();
    let reader = tokio::task::spawn_blocking(move || opener.open(&owned))
        .await
        .map_err(|e| SourceOpenError::Archive {
            path: path.to_path_buf(),
            message: format!("open task failed: {}", e),
        })??;

    let total = reader.entries().len() as u64;
    tracing::debug!("Archive {:?}: {} entries", path, total);

    let (tx, rx) = bounded_channel(config);
    tokio::spawn(async move {
        for entry in reader.entries().iter().cloned() {
            let item = SourceItem::new(
                entry.name.clone(),
                ItemContent::ArchiveEntry {
                    reader: Arc::clone(&reader),
                    entry,
                },
            );
            if tx.send(Ok(item)).await.is_err() {
                // Job stopped pulling
                break;
            }
        }
    });

    Ok(SourceStream::new(rx, Some(total)))
}
