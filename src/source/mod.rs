//! Fetching media from the supported sources
//!
//! A [`SourceFetcher`] turns a URL into a local media file inside the
//! pipeline's working directory. Local file paths bypass the registry
//! entirely; see [`FetcherRegistry::is_local_file`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use url::Url;

pub mod direct;
pub mod instagram;

/// A media file produced by a fetcher.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    /// Where the file landed; inside the directory passed to `fetch`.
    pub path: PathBuf,
    /// Name to show users, derived from the source.
    pub filename: String,
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Unsupported URL format: {0}")]
    UnsupportedUrl(String),

    #[error("The platform is rate-limiting downloads, try again later")]
    RateLimited,

    #[error("Media not found or unavailable: {0}")]
    NotFound(String),

    #[error("Media is larger than the {limit} byte download limit")]
    TooLarge { limit: u64 },

    #[error("Download tool failed: {0}")]
    Tool(String),

    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for downloading media from different platforms
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download the media behind `url` into `dest_dir`. Implementations
    /// refuse anything larger than `max_bytes`.
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> Result<FetchedMedia, FetchError>;

    /// Check if this fetcher handles the given URL
    fn supports_url(&self, url: &str) -> bool;

    /// Get the name of this platform
    fn platform_name(&self) -> &'static str;
}

/// Registry for managing multiple fetchers
pub struct FetcherRegistry {
    fetchers: Vec<Box<dyn SourceFetcher>>,
}

impl FetcherRegistry {
    /// Create a new registry with the default fetchers
    pub fn new() -> Self {
        let mut registry = Self {
            fetchers: Vec::new(),
        };
        registry.register(Box::new(instagram::InstagramFetcher::new()));
        registry.register(Box::new(direct::DirectFetcher::new()));
        registry
    }

    /// Registry honoring a non-default yt-dlp location.
    pub fn with_yt_dlp_path(path: impl Into<String>) -> Self {
        let mut registry = Self {
            fetchers: Vec::new(),
        };
        registry.register(Box::new(
            instagram::InstagramFetcher::new().with_yt_dlp_path(path),
        ));
        registry.register(Box::new(direct::DirectFetcher::new()));
        registry
    }

    pub fn register(&mut self, fetcher: Box<dyn SourceFetcher>) {
        self.fetchers.push(fetcher);
    }

    /// Find a fetcher that supports the given URL
    pub fn find_fetcher(&self, url: &str) -> Option<&dyn SourceFetcher> {
        self.fetchers
            .iter()
            .find(|fetcher| fetcher.supports_url(url))
            .map(|boxed| boxed.as_ref())
    }

    /// List all supported platforms
    pub fn list_platforms(&self) -> Vec<&'static str> {
        self.fetchers
            .iter()
            .map(|fetcher| fetcher.platform_name())
            .collect()
    }

    /// Download via whichever fetcher claims the URL.
    pub async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> Result<FetchedMedia, FetchError> {
        let fetcher = self
            .find_fetcher(url)
            .ok_or_else(|| FetchError::UnsupportedUrl(url.to_string()))?;
        info!("Fetching media via {}", fetcher.platform_name());
        fetcher.fetch(url, dest_dir, max_bytes).await
    }

    /// Check if input is a local file path rather than a URL
    pub fn is_local_file(&self, input: &str) -> bool {
        if input.starts_with("http://") || input.starts_with("https://") {
            return false;
        }

        let path = Path::new(input);
        if path.exists() {
            return true;
        }

        // Not on disk, but does it look like a path?
        let has_extension = path.extension().is_some();
        let has_path_separators = input.contains('/') || input.contains('\\');
        let starts_with_dot = input.starts_with("./") || input.starts_with(".\\");

        has_extension || has_path_separators || starts_with_dot
    }
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a URL and insist on an http(s) scheme.
pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::UnsupportedUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::UnsupportedUrl(url.to_string()));
    }
    Ok(parsed)
}
