//! Instagram fetcher backed by yt-dlp

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{FetchError, FetchedMedia, SourceFetcher};

/// Hosts that serve Instagram media.
const ALLOWED_HOSTS: [&str; 4] = [
    "instagram.com",
    "www.instagram.com",
    "instagram.cdninstagram.com",
    "cdninstagram.com",
];

/// Path markers for reels, posts and IGTV.
const MEDIA_MARKERS: [&str; 4] = ["/reel/", "/reels/", "/p/", "/tv/"];

pub struct InstagramFetcher {
    yt_dlp_path: String,
}

impl InstagramFetcher {
    pub fn new() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
        }
    }

    pub fn with_yt_dlp_path(mut self, path: impl Into<String>) -> Self {
        self.yt_dlp_path = path.into();
        self
    }
}

impl Default for InstagramFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts reel, post and IGTV URLs on the known Instagram hosts.
pub fn validate_instagram_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::UnsupportedUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::UnsupportedUrl(url.to_string()));
    }

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    if !ALLOWED_HOSTS.contains(&host.as_str()) {
        return Err(FetchError::UnsupportedUrl(url.to_string()));
    }

    let path = parsed.path();
    if !MEDIA_MARKERS.iter().any(|marker| path.contains(marker)) {
        return Err(FetchError::UnsupportedUrl(url.to_string()));
    }

    Ok(parsed)
}

/// Arguments for a capped, restricted yt-dlp download into `template`.
fn yt_dlp_args(url: &Url, template: &Path, max_bytes: u64) -> Vec<String> {
    vec![
        "--quiet".to_string(),
        "--no-warnings".to_string(),
        "--no-playlist".to_string(),
        "--format".to_string(),
        "best[ext=mp4]/best".to_string(),
        "--output".to_string(),
        template.to_string_lossy().into_owned(),
        "--restrict-filenames".to_string(),
        "--trim-filenames".to_string(),
        "120".to_string(),
        "--retries".to_string(),
        "2".to_string(),
        "--limit-rate".to_string(),
        "5M".to_string(),
        "--max-filesize".to_string(),
        max_bytes.to_string(),
        "--no-check-certificates".to_string(),
        url.as_str().to_string(),
    ]
}

/// Map yt-dlp stderr onto our error variants.
fn classify_yt_dlp_failure(stderr: &str, url: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    if lower.contains("429") || lower.contains("rate-limit") || lower.contains("rate limit") {
        return FetchError::RateLimited;
    }
    if lower.contains("404")
        || lower.contains("not found")
        || lower.contains("unavailable")
        || lower.contains("not available")
        || lower.contains("does not exist")
    {
        return FetchError::NotFound(url.to_string());
    }
    let detail = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("yt-dlp exited with an error");
    FetchError::Tool(detail.to_string())
}

/// Find the completed download for this invocation's token, skipping
/// in-progress artifacts. With multiple matches the largest wins.
fn find_download(dir: &Path, token: &str) -> Result<Option<PathBuf>, FetchError> {
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(token) {
            continue;
        }
        if name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        if best.as_ref().map_or(true, |(largest, _)| size > *largest) {
            best = Some((size, entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}

#[async_trait]
impl SourceFetcher for InstagramFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> Result<FetchedMedia, FetchError> {
        let validated = validate_instagram_url(url)?;

        // Unique prefix so we can find whatever name yt-dlp settles on.
        let token = Uuid::new_v4().simple().to_string()[..12].to_string();
        let template = dest_dir.join(format!("{token}_%(id)s.%(ext)s"));

        debug!("Running yt-dlp for {validated}");
        let output = Command::new(&self.yt_dlp_path)
            .args(yt_dlp_args(&validated, &template, max_bytes))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| FetchError::Tool(format!("yt-dlp could not be run: {err}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(classify_yt_dlp_failure(&stderr, url));
        }

        match find_download(dest_dir, &token)? {
            Some(path) => {
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{token}.mp4"));
                debug!("Downloaded {}", path.display());
                Ok(FetchedMedia { path, filename })
            }
            None => {
                // yt-dlp reports a skipped oversize download on stdout and
                // still exits zero.
                let stdout = String::from_utf8_lossy(&output.stdout);
                if stdout.contains("max-filesize") || stderr.contains("max-filesize") {
                    return Err(FetchError::TooLarge { limit: max_bytes });
                }
                warn!("yt-dlp exited cleanly but produced no file");
                Err(FetchError::Tool(
                    "could not locate the downloaded media file".to_string(),
                ))
            }
        }
    }

    fn supports_url(&self, url: &str) -> bool {
        validate_instagram_url(url).is_ok()
    }

    fn platform_name(&self) -> &'static str {
        "Instagram"
    }
}
