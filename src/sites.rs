use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::DownloadError;
use crate::models::{ContentSource, SourceType};

/// Site database compiled into the binary, used when nothing else is reachable.
const BUNDLED_SITES: &str = include_str!("../assets/sites.json");

/// Community-maintained site database, fetched on every run.
pub const DEFAULT_SITES_URL: &str = "https://raw.githubusercontent.com/OmurEKiraz/yomi-core/main/yomi/sites.json";

const REMOTE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct SiteRecord {
    name: Option<String>,
    base_domain: Option<String>,
    #[serde(rename = "type", default)]
    source_type: SourceType,
    url_pattern: Option<String>,
    test_path: Option<String>,
    url: Option<String>,
}

/// Read-only table of content sources, in the order they were declared.
#[derive(Debug, Clone, Default)]
pub struct SiteTable {
    sources: Vec<ContentSource>,
}

impl SiteTable {
    pub fn new(sources: Vec<ContentSource>) -> Self {
        Self { sources }
    }

    /// Parses a JSON object of `key -> record`, keeping declaration order.
    pub fn from_json(json: &str) -> Result<Self, DownloadError> {
        let raw: Map<String, Value> = serde_json::from_str(json)?;
        let mut sources = Vec::with_capacity(raw.len());

        for (key, value) in raw {
            let record: SiteRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed site entry '{}': {}", key, e);
                    continue;
                }
            };
            sources.push(ContentSource {
                display_name: record.name.unwrap_or_else(|| key.clone()),
                key: key.to_lowercase(),
                base_domain: record.base_domain.unwrap_or_default(),
                source_type: record.source_type,
                url_pattern: record.url_pattern,
                test_path: record.test_path,
                direct_url: record.url,
            });
        }

        Ok(Self { sources })
    }

    /// Loads the table from the first source that yields entries:
    /// remote URL, then local file, then the bundled snapshot.
    pub async fn load(
        remote_url: Option<&str>,
        local_path: Option<&Path>,
        proxy: Option<&str>,
    ) -> Result<Self, DownloadError> {
        if let Some(url) = remote_url {
            match fetch_remote(url, proxy).await {
                Ok(table) if !table.is_empty() => {
                    info!("Loaded {} sites from {}", table.len(), url);
                    return Ok(table);
                }
                Ok(_) => warn!("Remote site database at {} is empty", url),
                Err(e) => warn!("Remote site database fetch failed: {}", e),
            }
        }

        if let Some(path) = local_path {
            match fs::read_to_string(path).map_err(DownloadError::from).and_then(|s| Self::from_json(&s)) {
                Ok(table) if !table.is_empty() => {
                    info!("Loaded {} sites from {}", table.len(), path.display());
                    return Ok(table);
                }
                Ok(_) => warn!("Local site database {} is empty", path.display()),
                Err(e) => warn!("Failed to load local site database {}: {}", path.display(), e),
            }
        }

        let table = Self::bundled()?;
        debug!("Using bundled site database ({} sites)", table.len());
        Ok(table)
    }

    pub fn bundled() -> Result<Self, DownloadError> {
        Self::from_json(BUNDLED_SITES)
    }

    pub fn get(&self, key: &str) -> Option<&ContentSource> {
        self.sources.iter().find(|s| s.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentSource> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Substring search used by the `available` command, best matches first.
    pub fn search(&self, query: &str) -> Vec<&ContentSource> {
        let query = query.trim().to_lowercase();
        let mut results: Vec<(u8, &ContentSource)> = self
            .sources
            .iter()
            .filter_map(|source| {
                let score = if source.key == query {
                    100
                } else if source.key.contains(&query) {
                    50
                } else if source.display_name.to_lowercase().contains(&query) {
                    40
                } else {
                    0
                };
                (score > 0).then_some((score, source))
            })
            .collect();

        results.sort_by(|a, b| b.0.cmp(&a.0));
        results.into_iter().map(|(_, source)| source).collect()
    }
}

async fn fetch_remote(url: &str, proxy: Option<&str>) -> Result<SiteTable, DownloadError> {
    let mut builder = reqwest::Client::builder().timeout(REMOTE_TIMEOUT);
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    let client = builder.build()?;
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus(response.status().as_u16(), url.to_string()));
    }

    let body = response.text().await?;
    SiteTable::from_json(&body)
}
