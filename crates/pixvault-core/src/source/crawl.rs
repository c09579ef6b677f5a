//! URL-crawl adapter and the fetch capability.
//!
//! The start URL is fetched while opening the job. If it is itself an
//! image the crawl yields that one item; otherwise image resources found on
//! the page (and on up to `max_pages - 1` linked pages) are emitted as they
//! are discovered. The stream closes when discovery is done.

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::config::{CrawlConfig, PipelineConfig};
use crate::error::{SourceOpenError, TaskError, TaskResult};
use crate::pipeline::channel::bounded_channel;
use crate::pipeline::Validator;

use super::{ItemContent, SourceItem, SourceStream};

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap()
});

static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// A fetched resource, fully buffered.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// Final URL after redirects
    pub url: Url,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedResource {
    /// Whether this resource should be treated as an image rather than a page.
    pub fn is_image(&self) -> bool {
        let declared = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("image/"));
        declared || Validator::sniff(&self.bytes).is_some()
    }
}

/// Fetch failures, classified for the two places they surface.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("{url} exceeds {max_bytes} bytes")]
    TooLarge { url: String, max_bytes: u64 },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    /// Per-item error for a failed image fetch.
    pub fn into_task_error(self, source_label: &str) -> TaskError {
        match self {
            FetchError::TooLarge { max_bytes, .. } => TaskError::TooLarge {
                source_label: source_label.to_string(),
                size_mb: max_bytes / (1024 * 1024) + 1,
                max_mb: max_bytes / (1024 * 1024),
            },
            other => TaskError::io(source_label, other),
        }
    }
}

/// Retrieves resources over the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, failing once more than `max_bytes` would be buffered.
    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<FetchedResource, FetchError>;
}

/// `reqwest`-backed fetcher with a per-request timeout and streaming size cap.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout_ms: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<FetchedResource, FetchError> {
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self.client.get(url.clone()).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                max_bytes,
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport)?;
            if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedResource {
            url: final_url,
            content_type,
            bytes,
        })
    }
}

/// Fetch the start URL and begin discovery.
pub(crate) async fn open_crawl(
    fetcher: Arc<dyn Fetcher>,
    url: &str,
    crawl: CrawlConfig,
    max_bytes: u64,
    pipeline: &PipelineConfig,
) -> Result<SourceStream, SourceOpenError> {
    let start = Url::parse(url).map_err(|e| SourceOpenError::InvalidRequest(format!(
        "invalid crawl URL {url}: {e}"
    )))?;
    if !matches!(start.scheme(), "http" | "https") {
        return Err(SourceOpenError::InvalidRequest(format!(
            "crawl URL must be http or https: {url}"
        )));
    }

    let root = fetcher
        .fetch(&start, max_bytes)
        .await
        .map_err(|e| SourceOpenError::Unreachable {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let (tx, rx) = bounded_channel(pipeline);

    if root.is_image() {
        let item = SourceItem::new(root.url.to_string(), ItemContent::Inline(Arc::from(root.bytes)));
        // Fresh channel with capacity >= 1
        let _ = tx.try_send(Ok(item));
        return Ok(SourceStream::new(rx, None));
    }

    tokio::spawn(async move {
        let crawler = Crawler {
            fetcher,
            crawl,
            max_bytes,
            tx,
        };
        crawler.run(root).await;
    });

    Ok(SourceStream::new(rx, None))
}

struct Crawler {
    fetcher: Arc<dyn Fetcher>,
    crawl: CrawlConfig,
    max_bytes: u64,
    tx: mpsc::Sender<TaskResult<SourceItem>>,
}

impl Crawler {
    async fn run(self, root: FetchedResource) {
        let start_host = root.url.host_str().map(str::to_string);
        let mut seen_pages: HashSet<Url> = HashSet::from([root.url.clone()]);
        let mut seen_images: HashSet<Url> = HashSet::new();
        let mut queue: VecDeque<Url> = VecDeque::new();
        let mut emitted = 0usize;
        let mut pages_visited = 0usize;
        let mut page = Some(root);

        while let Some(current) = page.take() {
            pages_visited += 1;
            let html = String::from_utf8_lossy(&current.bytes);

            for raw in extract_attr(&IMG_SRC, &html) {
                if emitted >= self.crawl.max_images {
                    tracing::debug!("Crawl reached max_images ({})", self.crawl.max_images);
                    return;
                }
                let item = match resolve(&current.url, &raw) {
                    Some(url) if seen_images.insert(url.clone()) => Ok(SourceItem::new(
                        url.to_string(),
                        ItemContent::Remote {
                            url,
                            fetcher: Arc::clone(&self.fetcher),
                        },
                    )),
                    Some(_) => continue,
                    // data: URIs and other schemes are not fetchable images
                    None if raw.starts_with("data:") => continue,
                    None => Err(TaskError::Unsupported {
                        source_label: raw.clone(),
                        format: "unresolvable URL".to_string(),
                    }),
                };
                emitted += 1;
                if self.tx.send(item).await.is_err() {
                    return;
                }
            }

            if pages_visited < self.crawl.max_pages {
                for raw in extract_attr(&LINK_HREF, &html) {
                    let Some(link) = resolve(&current.url, &raw) else {
                        continue;
                    };
                    let same_host = link.host_str().map(str::to_string) == start_host;
                    if self.crawl.same_host_only && !same_host {
                        continue;
                    }
                    if seen_pages.len() < self.crawl.max_pages && seen_pages.insert(link.clone()) {
                        queue.push_back(link);
                    }
                }
            }

            while page.is_none() {
                let Some(next) = queue.pop_front() else {
                    break;
                };
                match self.fetcher.fetch(&next, self.max_bytes).await {
                    Ok(resource) if !resource.is_image() => page = Some(resource),
                    Ok(_) => tracing::debug!("Skipping linked image page {}", next),
                    Err(e) => tracing::warn!("Crawl page fetch failed: {}", e),
                }
            }
        }

        tracing::debug!(
            "Crawl finished: {} pages, {} images",
            pages_visited,
            emitted
        );
    }
}

/// Attribute values captured by `pattern`, HTML-unescaped for `&amp;`.
fn extract_attr(pattern: &Regex, html: &str) -> Vec<String> {
    pattern
        .captures_iter(html)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim().replace("&amp;", "&"))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolve a reference against its page; only http(s) results are kept.
fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
