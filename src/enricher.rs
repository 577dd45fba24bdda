use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::json;

use crate::error::DownloadError;
use crate::metadata::SeriesMetadata;
use crate::similarity::ratio_ignore_case;

pub const ANILIST_API_URL: &str = "https://graphql.anilist.co";

/// Minimum title similarity for a catalog hit to be trusted.
const MATCH_THRESHOLD: f64 = 0.6;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const MEDIA_QUERY: &str = r#"
query ($search: String) {
  Media (search: $search, type: MANGA) {
    title { romaji english }
    staff {
      edges {
        role
        node { name { full } }
      }
    }
    startDate { year }
    genres
    description
  }
}
"#;

#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    /// Best-effort lookup; `None` when nothing trustworthy was found.
    async fn fetch_metadata(&self, series_title: &str) -> Option<SeriesMetadata>;
}

/// Enricher that never finds anything, used with `--no-metadata`.
#[derive(Debug, Default)]
pub struct NoopEnricher;

#[async_trait]
impl MetadataEnricher for NoopEnricher {
    async fn fetch_metadata(&self, _series_title: &str) -> Option<SeriesMetadata> {
        None
    }
}

/// Looks series up in the AniList GraphQL catalog.
pub struct AniListEnricher {
    client: reqwest::Client,
    api_url: String,
    cache: Mutex<HashMap<String, SeriesMetadata>>,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    data: Option<MediaData>,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    #[serde(rename = "Media")]
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    title: MediaTitle,
    staff: Option<Staff>,
    #[serde(rename = "startDate")]
    start_date: Option<StartDate>,
    #[serde(default)]
    genres: Vec<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaTitle {
    romaji: Option<String>,
    english: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Staff {
    #[serde(default)]
    edges: Vec<StaffEdge>,
}

#[derive(Debug, Deserialize)]
struct StaffEdge {
    role: String,
    node: StaffNode,
}

#[derive(Debug, Deserialize)]
struct StaffNode {
    name: StaffName,
}

#[derive(Debug, Deserialize)]
struct StaffName {
    full: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartDate {
    year: Option<i32>,
}

impl AniListEnricher {
    pub fn new(proxy: Option<&str>) -> Result<Self, DownloadError> {
        Self::with_api_url(ANILIST_API_URL, proxy)
    }

    pub fn with_api_url(api_url: impl Into<String>, proxy: Option<&str>) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            api_url: api_url.into(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn query(&self, series_title: &str) -> Result<Option<Media>, DownloadError> {
        let body = json!({ "query": MEDIA_QUERY, "variables": { "search": series_title } });
        let response = self.client.post(&self.api_url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus(response.status().as_u16(), self.api_url.clone()));
        }

        let parsed: MediaResponse = response.json().await?;
        Ok(parsed.data.and_then(|d| d.media))
    }

    fn cached(&self, series_title: &str) -> Option<SeriesMetadata> {
        self.cache.lock().ok()?.get(series_title).cloned()
    }
}

#[async_trait]
impl MetadataEnricher for AniListEnricher {
    async fn fetch_metadata(&self, series_title: &str) -> Option<SeriesMetadata> {
        if let Some(hit) = self.cached(series_title) {
            return Some(hit);
        }

        let media = match self.query(series_title).await {
            Ok(Some(media)) => media,
            Ok(None) => return None,
            Err(e) => {
                debug!("AniList lookup failed for '{}': {}", series_title, e);
                return None;
            }
        };

        let best = [&media.title.romaji, &media.title.english]
            .into_iter()
            .flatten()
            .map(|candidate| ratio_ignore_case(series_title, candidate))
            .fold(0.0_f64, f64::max);

        if best <= MATCH_THRESHOLD {
            debug!("AniList result for '{}' rejected (similarity {:.2})", series_title, best);
            return None;
        }

        let meta = format_media(media);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(series_title.to_string(), meta.clone());
        }
        Some(meta)
    }
}

fn format_media(media: Media) -> SeriesMetadata {
    let mut writer = String::new();
    let mut artist = String::new();

    for edge in media.staff.map(|s| s.edges).unwrap_or_default() {
        let role = edge.role.to_lowercase();
        let Some(name) = edge.node.name.full else { continue };
        if role.contains("story") || role.contains("writer") {
            writer = name.clone();
        }
        if role.contains("art") || role.contains("illustrator") {
            artist = name;
        }
    }

    let summary = media
        .description
        .map(|d| d.replace("<br>", "\n").trim().to_string())
        .unwrap_or_default();

    SeriesMetadata {
        writer: if writer.is_empty() { artist.clone() } else { writer.clone() },
        artist: if artist.is_empty() { writer } else { artist },
        year: media.start_date.and_then(|d| d.year).map(|y| y.to_string()).unwrap_or_default(),
        genres: media.genres.join(", "),
        summary,
    }
}
