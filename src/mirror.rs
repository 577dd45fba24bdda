use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::debug;

use crate::downloader::USER_AGENT;
use crate::error::DownloadError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level domains tried, in order, when a base domain has none of its own.
const MIRROR_TLDS: &[&str] = &[
    "com", "net", "org", "io", "to", "cc", "co", "me", "tv", "xyz", "info", "online", "site", "live",
];

#[async_trait]
pub trait MirrorHunter: Send + Sync {
    /// Origin (`scheme://host`) of a mirror currently serving `test_path`, if any.
    async fn find_active_mirror(&self, base_domain: &str, test_path: &str) -> Option<String>;
}

/// Probes candidate origins over HTTP and keeps the first one that answers.
pub struct HttpMirrorHunter {
    client: reqwest::Client,
}

impl HttpMirrorHunter {
    pub fn new(proxy: Option<&str>) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(PROBE_TIMEOUT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self { client: builder.build()? })
    }

    /// Candidate origins for a base domain, in preference order.
    pub fn candidates(base_domain: &str) -> Vec<String> {
        let base = base_domain.trim().trim_end_matches('/');
        if base.is_empty() {
            return Vec::new();
        }
        if base.contains("://") {
            return vec![base.to_string()];
        }

        let host = base.trim_start_matches("www.");
        let mut candidates = Vec::new();
        if host.contains('.') {
            candidates.push(format!("https://{}", host));
        }

        let stem = host.split('.').next().unwrap_or(host);
        for tld in MIRROR_TLDS {
            let candidate = format!("https://{}.{}", stem, tld);
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        candidates
    }

    async fn probe(&self, origin: &str, test_path: &str) -> bool {
        let path = if test_path.starts_with('/') { test_path.to_string() } else { format!("/{}", test_path) };
        let url = format!("{}{}", origin, path);

        match self.client.get(&url).send().await {
            Ok(response) => {
                let alive = response.status().is_success();
                debug!("Mirror probe {} -> {}", url, response.status());
                alive
            }
            Err(e) => {
                debug!("Mirror probe {} failed: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl MirrorHunter for HttpMirrorHunter {
    async fn find_active_mirror(&self, base_domain: &str, test_path: &str) -> Option<String> {
        let candidates = Self::candidates(base_domain);
        let results = join_all(candidates.iter().map(|origin| self.probe(origin, test_path))).await;

        candidates
            .into_iter()
            .zip(results)
            .find_map(|(origin, alive)| alive.then_some(origin))
    }
}
