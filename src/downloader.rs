use std::{path::{Path, PathBuf}, sync::Arc, time::Duration};
use futures::{stream, StreamExt};
use indicatif::ProgressBar;
use log::{debug, warn};
use reqwest::{StatusCode, header::REFERER};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use crate::error::DownloadError;
use crate::extractor::Extractor;
use crate::models::PageAsset;

/// Per-attempt timeout for a single asset request.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Result of [`RetryingFetcher::fetch`]; `attempts` counts the Referer strategies tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { attempts: usize },
    Failure { attempts: usize },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

/// Downloads one binary asset, cycling through Referer strategies to get past
/// hotlink protection.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl RetryingFetcher {
    pub fn new(proxy: Option<&str>) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self { client: builder.build()?, timeout: ATTEMPT_TIMEOUT })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The Referer values tried in order: the hint, none at all, then the asset's own origin.
    pub fn referer_strategies(url: &str, referer_hint: Option<&str>) -> [Option<String>; 3] {
        let hint = referer_hint
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string);

        let origin = url::Url::parse(url.trim())
            .ok()
            .map(|u| u.origin())
            .filter(|o| o.is_tuple())
            .map(|o| format!("{}/", o.ascii_serialization()));

        [hint, None, origin]
    }

    pub async fn fetch(&self, url: &str, destination: &Path, referer_hint: Option<&str>) -> FetchOutcome {
        let url = url.trim();
        let strategies = Self::referer_strategies(url, referer_hint);

        for (i, referer) in strategies.iter().enumerate() {
            match self.attempt(url, destination, referer.as_deref()).await {
                Ok(size) => {
                    debug!("Fetched {} ({} bytes, strategy {})", url, size, i + 1);
                    return FetchOutcome::Success { attempts: i + 1 };
                }
                Err(e) => debug!("Strategy {} failed for {}: {}", i + 1, url, e),
            }
        }

        FetchOutcome::Failure { attempts: strategies.len() }
    }

    /// One request with one Referer. A file this attempt created is removed again on failure;
    /// an existing file is left alone unless the response actually carried bytes.
    async fn attempt(&self, url: &str, destination: &Path, referer: Option<&str>) -> Result<u64, DownloadError> {
        let mut created = false;
        let result = self.stream_to_file(url, destination, referer, &mut created).await;
        if result.is_err() && created {
            let _ = tokio::fs::remove_file(destination).await;
        }
        result
    }

    async fn stream_to_file(
        &self,
        url: &str,
        destination: &Path,
        referer: Option<&str>,
        created: &mut bool,
    ) -> Result<u64, DownloadError> {
        let mut request = self.client.get(url).timeout(self.timeout);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let mut response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(DownloadError::HttpStatus(response.status().as_u16(), url.to_string()));
        }

        // The file is only created once real bytes arrive so that empty
        // responses never leave a zero-length page behind.
        let mut file: Option<tokio::fs::File> = None;
        while let Some(chunk) = response.chunk().await? {
            if chunk.is_empty() {
                continue;
            }
            if file.is_none() {
                file = Some(tokio::fs::File::create(destination).await?);
                *created = true;
            }
            if let Some(writer) = file.as_mut() {
                writer.write_all(&chunk).await?;
            }
        }

        let Some(mut file) = file else {
            return Err(DownloadError::EmptyResponse(url.to_string()));
        };
        file.flush().await?;
        drop(file);

        let size = tokio::fs::metadata(destination).await?.len();
        if size == 0 {
            return Err(DownloadError::EmptyResponse(url.to_string()));
        }
        Ok(size)
    }
}

/// Outcome of one page in a chapter fan-out.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub page: PageAsset,
    pub path: PathBuf,
    pub downloaded: bool,
}

/// Downloads the pages of one chapter with at most `concurrency` requests in
/// flight. Every page yields an outcome; one failure never cancels the rest.
pub async fn download_pages(
    extractor: &dyn Extractor,
    pages: &[PageAsset],
    chapter_dir: &Path,
    referer: &str,
    concurrency: usize,
    progress: Option<&ProgressBar>,
) -> Vec<PageOutcome> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    stream::iter(pages.iter().cloned().map(|page| {
        let semaphore = Arc::clone(&semaphore);
        let path = chapter_dir.join(page.file_name());

        async move {
            // never closed
            let _permit = semaphore.acquire().await.ok();

            let downloaded = extractor.download_image(&page.source_url, &path, Some(referer)).await;
            if !downloaded {
                warn!("Giving up on page {} ({})", page.index + 1, page.source_url);
            }
            if let Some(pb) = progress {
                pb.inc(1);
            }

            PageOutcome { page, path, downloaded }
        }
    }))
    .buffer_unordered(concurrency)
    .collect::<Vec<_>>()
    .await
}

/// Builds a path for a series or chapter directory under `parent`.
pub fn build_chapter_path(parent: &Path, title: &str) -> PathBuf {
    parent.join(sanitize_filename(title))
}

/// Ensures a directory exists, creating it if necessary
pub fn ensure_dir_exists(path: &Path) -> Result<(), DownloadError> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .map_err(DownloadError::IoError)?;
    }
    Ok(())
}

/// Longest file name most filesystems accept, in bytes.
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// File name of a packaged chapter: the sanitized title, shortened so the
/// extension still fits within [`MAX_FILE_NAME_BYTES`].
pub fn packaged_file_name(title: &str, extension: &str) -> String {
    let mut stem = sanitize_filename(title);
    truncate_name(&mut stem, MAX_FILE_NAME_BYTES - extension.len() - 1);
    format!("{}.{}", stem, extension)
}

/// Keeps alphanumerics, spaces, hyphens and underscores, then trims.
pub fn sanitize_filename(input: &str) -> String {
    let mut result: String = input
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string();

    if result.is_empty() {
        return String::from("untitled");
    }

    truncate_name(&mut result, MAX_FILE_NAME_BYTES);
    result
}

fn truncate_name(name: &mut String, max_bytes: usize) {
    if name.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name.truncate(cut);
    let trimmed = name.trim_end().len();
    name.truncate(trimmed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referer_strategies_order() {
        let [first, second, third] = RetryingFetcher::referer_strategies(
            "https://cdn.example.com:8443/img/001.jpg?x=1",
            Some("https://site.example/manga/a/chapter-1/"),
        );
        assert_eq!(first.as_deref(), Some("https://site.example/manga/a/chapter-1/"));
        assert_eq!(second, None);
        assert_eq!(third.as_deref(), Some("https://cdn.example.com:8443/"));
    }

    #[test]
    fn test_blank_hint_means_no_referer() {
        let [first, _, third] = RetryingFetcher::referer_strategies("http://cdn.example/a.png", Some("  "));
        assert_eq!(first, None);
        assert_eq!(third.as_deref(), Some("http://cdn.example/"));
    }

    #[test]
    fn test_packaged_name_leaves_room_for_extension() {
        let title = format!("Chapter 1 {}", "é".repeat(200));
        let name = packaged_file_name(&title, "cbz");
        assert!(name.len() <= MAX_FILE_NAME_BYTES);
        assert!(name.ends_with("é.cbz"));
        assert_eq!(packaged_file_name("Chapter 2: Start", "pdf"), "Chapter 2 Start.pdf");
    }

    #[test]
    fn test_sanitize_keeps_allowed_characters() {
        assert_eq!(sanitize_filename("Chapter 1: Test/With?Invalid:Chars"), "Chapter 1 TestWithInvalidChars");
        assert_eq!(sanitize_filename("  my_series - vol.2  "), "my_series - vol2");
        assert_eq!(sanitize_filename("???"), "untitled");
    }
}
