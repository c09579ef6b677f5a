//! Single-upload adapter: one server-side file or one inline base64 blob.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{SourceOpenError, TaskError, TaskResult};

use super::{ItemContent, SourceItem};

/// Payload of a `single-upload` request.
///
/// Exactly one of `path` and `data` must be set. Inline uploads should name
/// the file so the job's error summaries have a useful label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Base64-encoded file content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub(crate) async fn open_upload(payload: &UploadPayload) -> Result<SourceItem, SourceOpenError> {
    let mut item = match (&payload.path, &payload.data) {
        (Some(path), None) => {
            let meta = tokio::fs::metadata(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SourceOpenError::NotFound(path.clone())
                } else {
                    SourceOpenError::Io {
                        path: path.clone(),
                        source: e,
                    }
                }
            })?;
            if !meta.is_file() {
                return Err(SourceOpenError::InvalidRequest(format!(
                    "{} is not a regular file",
                    path.display()
                )));
            }
            let label = payload
                .filename
                .clone()
                .unwrap_or_else(|| file_label(path));
            SourceItem::new(label, ItemContent::File(path.clone()))
        }
        (None, Some(data)) => {
            let bytes = BASE64.decode(data.trim()).map_err(|e| {
                SourceOpenError::InvalidRequest(format!("upload data is not valid base64: {}", e))
            })?;
            let label = payload
                .filename
                .clone()
                .unwrap_or_else(|| "upload".to_string());
            SourceItem::new(label, ItemContent::Inline(Arc::from(bytes)))
        }
        (Some(_), Some(_)) => {
            return Err(SourceOpenError::InvalidRequest(
                "single-upload takes either path or data, not both".into(),
            ))
        }
        (None, None) => {
            return Err(SourceOpenError::InvalidRequest(
                "single-upload needs a path or data".into(),
            ))
        }
    };
    item.title = payload.title.clone();
    Ok(item)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

/// Read a file, checking its size before pulling it into memory.
pub(crate) async fn read_file(path: &Path, source_label: &str, max_bytes: u64) -> TaskResult<Arc<[u8]>> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| TaskError::io(source_label, e))?;
    if meta.len() > max_bytes {
        return Err(TaskError::TooLarge {
            source_label: source_label.to_string(),
            size_mb: meta.len() / (1024 * 1024),
            max_mb: max_bytes / (1024 * 1024),
        });
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| TaskError::io(source_label, e))?;
    Ok(Arc::from(bytes))
}
