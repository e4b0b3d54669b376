/// On-disk cover image cache shared by all workers
use super::transport::{FetchRequest, HttpTransport, DEFAULT_USER_AGENT};
use crate::error::CoverError;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

const COVER_REFERER: &str = "https://www.javlibrary.com/";

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\-_.]").unwrap());

static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Downloads covers once and keeps them by sanitized item title
#[derive(Clone)]
pub struct CoverCache {
    /// Cache directory path
    cache_dir: PathBuf,
    transport: Arc<dyn HttpTransport>,
}

impl CoverCache {
    pub fn new(cache_dir: PathBuf, transport: Arc<dyn HttpTransport>) -> Self {
        Self { cache_dir, transport }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Replace anything outside `[\w\-_.]` with `_`
    pub fn sanitize(title: &str) -> String {
        UNSAFE_CHARS.replace_all(title, "_").into_owned()
    }

    pub fn cached_path(&self, title: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.jpg", Self::sanitize(title)))
    }

    /// Return the cached file for `title`, downloading `url` first if needed
    pub async fn fetch(&self, url: &str, title: &str) -> Result<PathBuf, CoverError> {
        let path = self.cached_path(title);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("📚 Cover cache hit: {}", path.display());
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let request = FetchRequest::get(url)
            .with_header("User-Agent", DEFAULT_USER_AGENT)
            .with_header("Referer", COVER_REFERER);
        let response = self.transport.execute(&request).await?;
        if !response.is_success() {
            return Err(CoverError::Status(response.status));
        }

        let part = self.cache_dir.join(format!(
            ".{}.{}.{}.part",
            Self::sanitize(title),
            std::process::id(),
            PART_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&part, &response.body).await?;

        if let Err(e) = tokio::fs::rename(&part, &path).await {
            let _ = tokio::fs::remove_file(&part).await;
            // Another worker finished the same cover first
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
            return Err(e.into());
        }

        info!("🖼️ Cached cover {} ({} bytes)", path.display(), response.body.len());
        Ok(path)
    }
}
