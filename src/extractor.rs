//! Site-facing scraping: turns series and chapter pages into structured data.
//!
//! Every site implementation sits behind the [`Extractor`] trait. The
//! [`GenericExtractor`] covers the common WordPress manga themes and degrades to
//! plain heuristics (any `h1`, any chapter-looking link, every `img`) for
//! everything else. Site-specific implementations are registered by source key
//! in an [`ExtractorRegistry`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use scraper::{Html, Selector};
use url::Url;

use crate::downloader::{RetryingFetcher, USER_AGENT};
use crate::error::DownloadError;
use crate::models::{Chapter, MangaInfo};

const TITLE_SELECTORS: &[&str] = &[".post-title h1", "h1", "title"];
const CHAPTER_SELECTORS: &[&str] = &[".wp-manga-chapter a", ".chapter-list a", "a[href*='chapter']"];
const PAGE_SELECTORS: &[&str] = &[".page-break img", ".reading-content img", "img"];
// Lazy-loading themes keep a placeholder in `src`, so the data attributes win.
const IMAGE_ATTRIBUTES: &[&str] = &["data-src", "data-lazy-src", "data-cfsrc", "src"];

const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn get_manga_info(&self, url: &str) -> Result<MangaInfo, DownloadError>;

    /// Chapters in reading order (oldest first).
    async fn get_chapters(&self, url: &str) -> Result<Vec<Chapter>, DownloadError>;

    /// Absolute image URLs of one chapter, in page order.
    async fn get_pages(&self, chapter_url: &str) -> Result<Vec<String>, DownloadError>;

    /// Downloads one page image to `path`; `true` once a non-empty file is on disk.
    async fn download_image(&self, url: &str, path: &Path, referer: Option<&str>) -> bool;
}

/// Heuristic extractor for sites without a dedicated implementation.
pub struct GenericExtractor {
    client: reqwest::Client,
    fetcher: RetryingFetcher,
}

impl GenericExtractor {
    pub fn new(proxy: Option<&str>) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(PAGE_TIMEOUT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            fetcher: RetryingFetcher::new(proxy)?,
        })
    }

    async fn fetch_html(&self, url: &str) -> Result<String, DownloadError> {
        debug!("Fetching page {}", url);
        let response = self
            .client
            .get(url.trim())
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus(response.status().as_u16(), url.to_string()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Extractor for GenericExtractor {
    async fn get_manga_info(&self, url: &str) -> Result<MangaInfo, DownloadError> {
        let body = self.fetch_html(url).await?;
        let title = parse_title(&body)?;
        Ok(MangaInfo { title })
    }

    async fn get_chapters(&self, url: &str) -> Result<Vec<Chapter>, DownloadError> {
        let body = self.fetch_html(url).await?;
        parse_chapters(&body, url)
    }

    async fn get_pages(&self, chapter_url: &str) -> Result<Vec<String>, DownloadError> {
        let body = self.fetch_html(chapter_url).await?;
        parse_pages(&body, chapter_url)
    }

    async fn download_image(&self, url: &str, path: &Path, referer: Option<&str>) -> bool {
        self.fetcher.fetch(url, path, referer).await.is_success()
    }
}

/// Extractor lookup keyed by content source, with the generic heuristics as fallback.
pub struct ExtractorRegistry {
    fallback: Arc<dyn Extractor>,
    by_key: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new(fallback: Arc<dyn Extractor>) -> Self {
        Self { fallback, by_key: HashMap::new() }
    }

    pub fn register(&mut self, key: impl Into<String>, extractor: Arc<dyn Extractor>) {
        self.by_key.insert(key.into(), extractor);
    }

    pub fn select(&self, source_key: Option<&str>) -> Arc<dyn Extractor> {
        source_key
            .and_then(|key| self.by_key.get(key))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

fn selector(css: &str) -> Result<Selector, DownloadError> {
    Selector::parse(css).map_err(|_| DownloadError::SelectorError(format!("Failed to parse {} selector", css)))
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") || href.starts_with("javascript:") {
        return None;
    }
    match Url::parse(base) {
        Ok(base) => base.join(href).ok().map(String::from),
        Err(_) => Some(href.to_string()),
    }
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn parse_title(body: &str) -> Result<String, DownloadError> {
    let document = Html::parse_document(body.trim());

    for css in TITLE_SELECTORS {
        let sel = selector(css)?;
        if let Some(title) = document.select(&sel).map(element_text).find(|t| !t.is_empty()) {
            return Ok(title);
        }
    }

    Err(DownloadError::ElementNotFound(String::from("Manga title element not found")))
}

pub(crate) fn parse_chapters(body: &str, base_url: &str) -> Result<Vec<Chapter>, DownloadError> {
    let document = Html::parse_document(body.trim());

    for css in CHAPTER_SELECTORS {
        let sel = selector(css)?;
        let mut seen = HashSet::new();
        let mut chapters: Vec<Chapter> = document
            .select(&sel)
            .filter_map(|e| {
                let url = absolutize(base_url, e.attr("href")?)?;
                let title = element_text(e);
                if title.is_empty() || !seen.insert(url.clone()) {
                    return None;
                }
                Some(Chapter { title, url })
            })
            .collect();

        if chapters.is_empty() {
            continue;
        }

        // Most themes list the newest chapter first.
        if let (Some(first), Some(last)) = (chapters.first(), chapters.last()) {
            if first.numeric_ordinal() > last.numeric_ordinal() {
                chapters.reverse();
            }
        }

        debug!("Found {} chapters with selector {}", chapters.len(), css);
        return Ok(chapters);
    }

    Ok(Vec::new())
}

pub(crate) fn parse_pages(body: &str, chapter_url: &str) -> Result<Vec<String>, DownloadError> {
    let document = Html::parse_document(body.trim());

    for css in PAGE_SELECTORS {
        let sel = selector(css)?;
        let images: Vec<String> = document
            .select(&sel)
            .filter_map(|e| {
                IMAGE_ATTRIBUTES
                    .iter()
                    .filter_map(|attr| e.attr(attr))
                    .find_map(|src| absolutize(chapter_url, src))
            })
            .collect();

        if !images.is_empty() {
            return Ok(images);
        }
    }

    Ok(Vec::new())
}
