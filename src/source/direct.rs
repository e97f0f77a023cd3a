//! Direct URL fetcher for plain media links

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::{validate_url, FetchError, FetchedMedia, SourceFetcher};
use crate::utils::sanitize_filename;

/// Extensions we are willing to hand to ffmpeg.
const MEDIA_EXTENSIONS: [&str; 12] = [
    ".mp3", ".m4a", ".wav", ".flac", ".ogg", ".aac", ".mp4", ".avi", ".mov", ".mkv", ".webm",
    ".m4v",
];

pub struct DirectFetcher {
    client: Client,
}

impl DirectFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Check if URL points to an audio or video file
    fn is_media_url(&self, url: &str) -> bool {
        let url_lower = url.to_lowercase();
        MEDIA_EXTENSIONS.iter().any(|ext| url_lower.contains(ext))
    }

    /// Get the declared size via HEAD request, if the server offers one.
    async fn content_length(&self, url: &Url) -> Option<u64> {
        let response = self.client.head(url.as_str()).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response
            .headers()
            .get("content-length")
            .and_then(|cl| cl.to_str().ok())
            .and_then(|cl| cl.parse::<u64>().ok())
    }
}

impl Default for DirectFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a local filename from the URL's last path segment.
fn filename_for(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "media.mp4".to_string());

    // Prefix with a token so repeated fetches never collide.
    let token = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("{token}_{segment}")
}

#[async_trait]
impl SourceFetcher for DirectFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> Result<FetchedMedia, FetchError> {
        let validated = validate_url(url)?;

        // Refuse early when the server already admits it is too big.
        if let Some(declared) = self.content_length(&validated).await {
            if declared > max_bytes {
                return Err(FetchError::TooLarge { limit: max_bytes });
            }
        }

        let response = self.client.get(validated.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 | 410 => FetchError::NotFound(url.to_string()),
                429 => FetchError::RateLimited,
                _ => FetchError::Tool(format!("server answered HTTP {status}")),
            });
        }

        let filename = filename_for(&validated);
        let dest = dest_dir.join(&filename);
        let mut file = fs_err::File::create(&dest)?;

        // Servers lie about content-length, so count as we go.
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            downloaded += chunk.len() as u64;
            if downloaded > max_bytes {
                drop(file);
                let _ = fs_err::remove_file(&dest);
                return Err(FetchError::TooLarge { limit: max_bytes });
            }
            file.write_all(&chunk)?;
        }

        debug!("Downloaded {downloaded} bytes to {}", dest.display());
        Ok(FetchedMedia {
            path: dest,
            filename,
        })
    }

    fn supports_url(&self, url: &str) -> bool {
        Url::parse(url).is_ok() && self.is_media_url(url)
    }

    fn platform_name(&self) -> &'static str {
        "Direct URL"
    }
}
