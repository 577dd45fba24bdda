//! End-to-end download pipeline for one target.
//!
//! A run resolves the target once, lists its chapters, and then walks the
//! chapters strictly one after another. Only the pages of a single chapter are
//! fetched concurrently. Each chapter ends in exactly one terminal state
//! (`Completed`, `Skipped` or `Failed`); a failing chapter never stops the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::archive::package_cbz;
use crate::console::Console;
use crate::downloader::{build_chapter_path, download_pages, ensure_dir_exists, packaged_file_name};
use crate::enricher::MetadataEnricher;
use crate::error::DownloadError;
use crate::extractor::{Extractor, ExtractorRegistry};
use crate::history::HistoryStore;
use crate::metadata::{ChapterMetadata, SeriesMetadata};
use crate::models::{Chapter, OutputFormat, PageAsset, RunConfiguration};
use crate::pdf::package_pdf;
use crate::resolver::{CandidatePrompt, SiteResolver};

/// Lifecycle of one chapter within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterState {
    Pending,
    /// Already recorded in the history store.
    Skipped,
    Fetching,
    Downloaded,
    Packaged,
    Completed,
    Failed(String),
}

impl ChapterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChapterState::Completed | ChapterState::Skipped | ChapterState::Failed(_))
    }
}

/// Aggregate outcome reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub series: String,
    pub series_dir: PathBuf,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failed_titles: Vec<String>,
}

impl RunSummary {
    fn record(&mut self, chapter: &Chapter, state: &ChapterState) {
        match state {
            ChapterState::Completed => self.completed += 1,
            ChapterState::Skipped => self.skipped += 1,
            _ => {
                self.failed += 1;
                self.failed_titles.push(chapter.title.clone());
            }
        }
    }
}

pub struct DownloadOrchestrator {
    config: RunConfiguration,
    resolver: SiteResolver,
    extractors: ExtractorRegistry,
    enricher: Arc<dyn MetadataEnricher>,
    history: Box<dyn HistoryStore>,
}

impl DownloadOrchestrator {
    pub fn new(
        config: RunConfiguration,
        resolver: SiteResolver,
        extractors: ExtractorRegistry,
        enricher: Arc<dyn MetadataEnricher>,
        history: Box<dyn HistoryStore>,
    ) -> Self {
        Self { config, resolver, extractors, enricher, history }
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Downloads `target` (URL, site key or fuzzy name) according to the run configuration.
    ///
    /// Only resolution and series/chapter listing failures are returned as
    /// errors; chapter failures are counted in the summary.
    pub async fn run(
        &mut self,
        target: &str,
        console: &Console,
        prompt: &dyn CandidatePrompt,
    ) -> Result<RunSummary, DownloadError> {
        let resolution = self.resolver.resolve(target, prompt).await?;
        let extractor = self.extractors.select(resolution.source_key.as_deref());
        let url = resolution.url;

        let spinner = console.spinner(format!("Analyzing {}...", url));
        let info = match extractor.get_manga_info(&url).await {
            Ok(info) => info,
            Err(e) => {
                spinner.finish_and_clear();
                return Err(e);
            }
        };

        spinner.set_message(format!("Fetching metadata for '{}'...", info.title));
        let series_meta = self.enricher.fetch_metadata(&info.title).await;
        if series_meta.is_none() {
            debug!("No supplemental metadata for '{}'", info.title);
        }

        spinner.set_message(format!("Listing chapters of '{}'...", info.title));
        let all_chapters = match extractor.get_chapters(&url).await {
            Ok(chapters) => chapters,
            Err(e) => {
                spinner.finish_and_clear();
                return Err(e);
            }
        };
        spinner.finish_and_clear();

        let series_dir = build_chapter_path(&self.config.output_dir, &info.title);
        ensure_dir_exists(&series_dir)?;

        let mut summary = RunSummary {
            series: info.title.clone(),
            series_dir: series_dir.clone(),
            ..Default::default()
        };

        let chapters = filter_chapters(all_chapters, self.config.chapter_range.as_deref());
        if chapters.is_empty() {
            console.println("No chapters found.");
            return Ok(summary);
        }

        console.println(format!("Target: {} ({} chapters queued)", info.title, chapters.len()));
        let chapters_bar = console.chapters_bar(chapters.len(), &info.title);

        for chapter in &chapters {
            let state = self
                .process_chapter(extractor.as_ref(), chapter, &series_dir, &info.title, series_meta.as_ref(), console)
                .await;

            match &state {
                ChapterState::Skipped => console.println(format!("Skipping {} (already downloaded)", chapter.title)),
                ChapterState::Completed => console.println(format!("Finished: {}", chapter.title)),
                ChapterState::Failed(reason) => console.println(format!("Failed {}: {}", chapter.title, reason)),
                _ => {}
            }
            summary.record(chapter, &state);
            chapters_bar.inc(1);
        }

        chapters_bar.finish_with_message(format!("Downloaded {}", info.title));
        info!(
            "Run finished for '{}': {} completed, {} skipped, {} failed",
            summary.series, summary.completed, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    /// Flushes and closes the history store.
    pub fn close(&mut self) -> Result<(), DownloadError> {
        self.history.close()
    }

    async fn process_chapter(
        &mut self,
        extractor: &dyn Extractor,
        chapter: &Chapter,
        series_dir: &Path,
        series_title: &str,
        series_meta: Option<&SeriesMetadata>,
        console: &Console,
    ) -> ChapterState {
        let mut state = ChapterState::Pending;

        if self.history.is_completed(series_title, &chapter.title) {
            debug!("{:?} -> Skipped: {}", state, chapter.title);
            return ChapterState::Skipped;
        }

        match self
            .fetch_and_package(extractor, chapter, series_dir, series_title, series_meta, console, &mut state)
            .await
        {
            Ok(()) => ChapterState::Completed,
            Err(e) => {
                warn!("Chapter '{}' failed while {:?}: {}", chapter.title, state, e);
                ChapterState::Failed(e.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_and_package(
        &mut self,
        extractor: &dyn Extractor,
        chapter: &Chapter,
        series_dir: &Path,
        series_title: &str,
        series_meta: Option<&SeriesMetadata>,
        console: &Console,
        state: &mut ChapterState,
    ) -> Result<(), DownloadError> {
        transition(state, ChapterState::Fetching, &chapter.title);

        let page_urls = extractor.get_pages(&chapter.url).await?;
        if page_urls.is_empty() {
            return Err(DownloadError::ChapterFetch(String::from("no pages found")));
        }

        let chapter_dir = build_chapter_path(series_dir, &chapter.title);
        ensure_dir_exists(&chapter_dir)?;

        let pages: Vec<PageAsset> = page_urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| PageAsset::new(url, index))
            .collect();

        let pages_bar = console.pages_bar(pages.len(), &chapter.title);
        let outcomes = download_pages(
            extractor,
            &pages,
            &chapter_dir,
            &chapter.url,
            self.config.worker_count,
            Some(&pages_bar),
        )
        .await;
        pages_bar.finish_and_clear();

        let downloaded = outcomes.iter().filter(|o| o.downloaded).count();
        if downloaded == 0 {
            return Err(DownloadError::ChapterFetch(format!("none of {} pages could be downloaded", pages.len())));
        }
        if downloaded < pages.len() {
            warn!("{}: only {}/{} pages downloaded", chapter.title, downloaded, pages.len());
        }
        transition(state, ChapterState::Downloaded, &chapter.title);

        let metadata = {
            let base = ChapterMetadata::from_chapter(&chapter.title, series_title, &chapter.url);
            match series_meta {
                Some(series) => base.merge_series(series),
                None => base,
            }
        };

        let format = self.config.output_format;
        if let Some(extension) = format.extension() {
            let output_path = series_dir.join(packaged_file_name(&chapter.title, extension));
            package_chapter(format, chapter_dir.clone(), output_path, metadata).await?;
            transition(state, ChapterState::Packaged, &chapter.title);

            if let Err(e) = tokio::fs::remove_dir_all(&chapter_dir).await {
                warn!("Could not remove {}: {}", chapter_dir.display(), e);
            }
        }

        self.history.mark_completed(series_title, &chapter.title)?;
        transition(state, ChapterState::Completed, &chapter.title);
        Ok(())
    }
}

fn transition(state: &mut ChapterState, next: ChapterState, title: &str) {
    debug!("{}: {:?} -> {:?}", title, state, next);
    *state = next;
}

/// Runs the blocking packager off the async workers.
async fn package_chapter(
    format: OutputFormat,
    source_dir: PathBuf,
    output_path: PathBuf,
    metadata: ChapterMetadata,
) -> Result<(), DownloadError> {
    let display = output_path.display().to_string();
    let packaged = tokio::task::spawn_blocking(move || match format {
        OutputFormat::Pdf => package_pdf(&source_dir, &output_path),
        OutputFormat::Cbz => package_cbz(&source_dir, &output_path, Some(&metadata)),
        OutputFormat::Folder => true,
    })
    .await
    .map_err(|e| DownloadError::ArchiveError(format!("packaging task failed: {}", e)))?;

    if packaged {
        Ok(())
    } else {
        Err(DownloadError::ArchiveError(format!("could not write {}", display)))
    }
}

/// Parses `"A-B"` or `"A"` into an inclusive range. `None` for anything else.
pub fn parse_range(range: &str) -> Option<(f64, f64)> {
    let parts: Vec<&str> = range.split('-').map(str::trim).collect();
    let parse = |s: &str| s.parse::<f64>().ok().filter(|v| v.is_finite());

    match parts.as_slice() {
        [single] => parse(single).map(|v| (v, v)),
        [start, end] => Some((parse(start)?, parse(end)?)),
        _ => None,
    }
}

/// Keeps chapters whose title number lies in `range`.
///
/// Without a range, or with one that does not parse, every chapter is kept.
/// With a valid range, chapters whose title carries no number are dropped.
pub fn filter_chapters(chapters: Vec<Chapter>, range: Option<&str>) -> Vec<Chapter> {
    let Some(range) = range.filter(|r| !r.trim().is_empty()) else {
        return chapters;
    };
    let Some((start, end)) = parse_range(range) else {
        warn!("Ignoring malformed chapter range '{}'", range);
        return chapters;
    };

    chapters
        .into_iter()
        .filter(|c| c.ordinal().is_some_and(|n| start <= n && n <= end))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("10-12"), Some((10.0, 12.0)));
        assert_eq!(parse_range(" 7 "), Some((7.0, 7.0)));
        assert_eq!(parse_range("1.5-2"), Some((1.5, 2.0)));
        assert_eq!(parse_range("abc"), None);
        assert_eq!(parse_range("1-"), None);
        assert_eq!(parse_range("1-2-3"), None);
        assert_eq!(parse_range("nan"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ChapterState::Completed.is_terminal());
        assert!(ChapterState::Skipped.is_terminal());
        assert!(ChapterState::Failed("x".into()).is_terminal());
        assert!(!ChapterState::Fetching.is_terminal());
        assert!(!ChapterState::Packaged.is_terminal());
    }
}
