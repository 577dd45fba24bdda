use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use percent_encoding::percent_decode_str;

use crate::error::{DownloadError, ResolveError};
use crate::mirror::MirrorHunter;
use crate::models::{ContentSource, SourceType};
use crate::similarity::ratio;
use crate::sites::SiteTable;

/// Scores at or below this are not offered at all.
const MIN_SCORE: f64 = 40.0;
/// Scores at or above this are selected without asking.
const AUTO_SELECT_SCORE: f64 = 80.0;
/// How many candidates the prompt shows.
const MAX_CHOICES: usize = 5;

const MIRROR_PLACEHOLDER: &str = "{mirror}";

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub key: String,
    pub display_name: String,
    /// Similarity in percent
    pub score: f64,
}

/// Interaction surface used when an identifier is ambiguous.
#[async_trait]
pub trait CandidatePrompt: Send + Sync {
    /// Returns 0 to cancel, or the 1-based position of the chosen candidate.
    async fn choose(&self, input: &str, candidates: &[Candidate]) -> Result<usize, DownloadError>;
}

/// Where a run will fetch from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub url: String,
    /// Site database key, absent when the input was used as a literal URL.
    pub source_key: Option<String>,
}

impl Resolution {
    fn literal(url: &str) -> Self {
        Self { url: url.to_string(), source_key: None }
    }
}

pub struct SiteResolver {
    sites: Arc<SiteTable>,
    hunter: Option<Arc<dyn MirrorHunter>>,
}

impl SiteResolver {
    pub fn new(sites: Arc<SiteTable>, hunter: Option<Arc<dyn MirrorHunter>>) -> Self {
        Self { sites, hunter }
    }

    pub async fn resolve(&self, input: &str, prompt: &dyn CandidatePrompt) -> Result<Resolution, DownloadError> {
        if has_url_scheme(input) {
            return Ok(Resolution::literal(input));
        }

        let normalized = normalize(input);
        if let Some(source) = self.sites.get(&normalized) {
            debug!("Exact site match for '{}'", normalized);
            return self.finalize(source).await;
        }

        let candidates = self.rank_candidates(&normalized);
        let Some(top) = candidates.first() else {
            warn!("No matches found for '{}', treating it as a direct link", input);
            return Ok(Resolution::literal(input));
        };

        let chosen_key = if top.score >= AUTO_SELECT_SCORE {
            info!("Auto-match: {} (confidence {:.0}%)", top.display_name, top.score);
            top.key.clone()
        } else {
            let options = &candidates[..candidates.len().min(MAX_CHOICES)];
            let choice = prompt.choose(input, options).await?;
            if choice == 0 {
                return Err(ResolveError::UserCancelled.into());
            }
            options
                .get(choice - 1)
                .map(|c| c.key.clone())
                .ok_or_else(|| DownloadError::ParsingError(format!("Selection {} is out of range", choice)))?
        };

        match self.sites.get(&chosen_key) {
            Some(source) => self.finalize(source).await,
            None => Err(ResolveError::MissingUrl(chosen_key).into()),
        }
    }

    /// Every source scoring above the threshold, best first; ties keep table order.
    pub fn rank_candidates(&self, normalized: &str) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .sites
            .iter()
            .filter_map(|source| {
                let by_key = ratio(normalized, &source.key);
                let by_name = ratio(normalized, &source.display_name.to_lowercase());
                let score = by_key.max(by_name) * 100.0;
                (score > MIN_SCORE).then(|| Candidate {
                    key: source.key.clone(),
                    display_name: source.display_name.clone(),
                    score,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates
    }

    async fn finalize(&self, source: &ContentSource) -> Result<Resolution, DownloadError> {
        if source.source_type == SourceType::Dynamic {
            if let Some(hunter) = &self.hunter {
                info!("Resolving a live mirror for '{}'", source.key);
                let test_path = source.test_path.as_deref().unwrap_or("/");
                let Some(mirror) = hunter.find_active_mirror(&source.base_domain, test_path).await else {
                    return Err(ResolveError::MirrorUnreachable(source.key.clone()).into());
                };

                info!("Mirror locked: {}", mirror);
                let url = match &source.url_pattern {
                    Some(pattern) => pattern.replacen(MIRROR_PLACEHOLDER, &mirror, 1),
                    None => mirror,
                };
                return Ok(Resolution { url, source_key: Some(source.key.clone()) });
            }
            debug!("No mirror hunter configured, using the static URL of '{}'", source.key);
        }

        match &source.direct_url {
            Some(url) if !url.trim().is_empty() => Ok(Resolution {
                url: url.clone(),
                source_key: Some(source.key.clone()),
            }),
            _ => Err(ResolveError::MissingUrl(source.key.clone()).into()),
        }
    }
}

fn has_url_scheme(input: &str) -> bool {
    let input = input.trim_start();
    match input.find("://") {
        Some(end) if end > 0 => {
            let scheme = &input[..end];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn normalize(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().trim().to_lowercase()
}
