use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use manga_harvest::console::Console;
use manga_harvest::downloader::RetryingFetcher;
use manga_harvest::enricher::{MetadataEnricher, NoopEnricher};
use manga_harvest::error::DownloadError;
use manga_harvest::extractor::{Extractor, ExtractorRegistry};
use manga_harvest::history::{HistoryStore, JsonHistoryStore};
use manga_harvest::metadata::SeriesMetadata;
use manga_harvest::models::{Chapter, MangaInfo, OutputFormat, RunConfiguration};
use manga_harvest::orchestrator::DownloadOrchestrator;
use manga_harvest::resolver::SiteResolver;
use manga_harvest::sites::SiteTable;

const SERIES: &str = "Test Series";
const TARGET: &str = "https://site.example/manga/test-series/";

/// Serves a fixed catalog and fetches images for real through a `RetryingFetcher`.
struct FakeExtractor {
    chapters: Vec<Chapter>,
    pages: HashMap<String, Vec<String>>,
    fail_info: bool,
    fetcher: RetryingFetcher,
    page_lookups: AtomicUsize,
    image_fetches: AtomicUsize,
}

impl FakeExtractor {
    fn new() -> Self {
        Self {
            chapters: Vec::new(),
            pages: HashMap::new(),
            fail_info: false,
            fetcher: RetryingFetcher::new(None).unwrap().with_timeout(Duration::from_secs(5)),
            page_lookups: AtomicUsize::new(0),
            image_fetches: AtomicUsize::new(0),
        }
    }

    fn with_chapter(mut self, title: &str, pages: Vec<String>) -> Self {
        let url = format!("{}{}/", TARGET, title.to_lowercase().replace(' ', "-"));
        self.pages.insert(url.clone(), pages);
        self.chapters.push(Chapter::new(title, url));
        self
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn get_manga_info(&self, _url: &str) -> Result<MangaInfo, DownloadError> {
        if self.fail_info {
            return Err(DownloadError::HttpStatus(503, TARGET.to_string()));
        }
        Ok(MangaInfo { title: SERIES.to_string() })
    }

    async fn get_chapters(&self, _url: &str) -> Result<Vec<Chapter>, DownloadError> {
        Ok(self.chapters.clone())
    }

    async fn get_pages(&self, chapter_url: &str) -> Result<Vec<String>, DownloadError> {
        self.page_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.get(chapter_url).cloned().unwrap_or_default())
    }

    async fn download_image(&self, url: &str, path: &Path, referer: Option<&str>) -> bool {
        self.image_fetches.fetch_add(1, Ordering::SeqCst);
        self.fetcher.fetch(url, path, referer).await.is_success()
    }
}

struct StaticEnricher;

#[async_trait]
impl MetadataEnricher for StaticEnricher {
    async fn fetch_metadata(&self, _series_title: &str) -> Option<SeriesMetadata> {
        Some(SeriesMetadata { writer: "Some Author".into(), ..Default::default() })
    }
}

fn orchestrator(
    output_dir: &Path,
    format: OutputFormat,
    extractor: Arc<FakeExtractor>,
    enricher: Arc<dyn MetadataEnricher>,
) -> DownloadOrchestrator {
    let config = RunConfiguration {
        output_dir: output_dir.to_path_buf(),
        worker_count: 4,
        output_format: format,
        ..Default::default()
    };
    let resolver = SiteResolver::new(Arc::new(SiteTable::new(Vec::new())), None);
    let history = JsonHistoryStore::open(history_path(output_dir)).unwrap();
    DownloadOrchestrator::new(config, resolver, ExtractorRegistry::new(extractor), enricher, Box::new(history))
}

fn history_path(output_dir: &Path) -> PathBuf {
    output_dir.join("history.json")
}

fn encoded_image(format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(40, 60, |x, y| image::Rgb([(x * 6) as u8, (y * 4) as u8, 90]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
}

fn cbz_entries(path: &Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

#[tokio::test]
async fn test_cbz_run_packages_each_chapter() {
    let mut server = mockito::Server::new_async().await;
    let images = server
        .mock("GET", mockito::Matcher::Regex(r"^/img/.*\.jpg$".into()))
        .with_status(200)
        .with_body(b"jpeg")
        .expect(5)
        .create_async()
        .await;

    let img = |name: &str| format!("{}/img/{}.jpg", server.url(), name);
    let extractor = Arc::new(
        FakeExtractor::new()
            .with_chapter("Chapter 1", vec![img("1-1"), img("1-2"), img("1-3")])
            .with_chapter("Chapter 2", vec![img("2-1"), img("2-2")]),
    );

    let dir = tempfile::tempdir().unwrap();
    let mut run = orchestrator(dir.path(), OutputFormat::Cbz, Arc::clone(&extractor), Arc::new(StaticEnricher));
    let console = Console::hidden();
    let summary = run.run(TARGET, &console, &console).await.unwrap();
    run.close().unwrap();

    assert_eq!((summary.completed, summary.skipped, summary.failed), (2, 0, 0));
    let series_dir = dir.path().join(SERIES);
    assert_eq!(summary.series_dir, series_dir);
    assert_eq!(cbz_entries(&series_dir.join("Chapter 1.cbz")), vec!["001.jpg", "002.jpg", "003.jpg", "ComicInfo.xml"]);
    assert_eq!(cbz_entries(&series_dir.join("Chapter 2.cbz")), vec!["001.jpg", "002.jpg", "ComicInfo.xml"]);
    assert!(!series_dir.join("Chapter 1").exists());
    assert!(!series_dir.join("Chapter 2").exists());

    let history = JsonHistoryStore::open(history_path(dir.path())).unwrap();
    assert!(history.is_completed(SERIES, "Chapter 1"));
    assert!(history.is_completed(SERIES, "Chapter 2"));
    images.assert_async().await;
}

#[tokio::test]
async fn test_pdf_run_replaces_page_folder() {
    let mut server = mockito::Server::new_async().await;
    let jpegs = server
        .mock("GET", mockito::Matcher::Regex(r"^/img/.*\.jpg$".into()))
        .with_status(200)
        .with_body(encoded_image(image::ImageFormat::Jpeg))
        .expect(2)
        .create_async()
        .await;
    let webps = server
        .mock("GET", mockito::Matcher::Regex(r"^/img/.*\.webp$".into()))
        .with_status(200)
        .with_body(encoded_image(image::ImageFormat::WebP))
        .expect(1)
        .create_async()
        .await;

    let base = server.url();
    let extractor = Arc::new(FakeExtractor::new().with_chapter(
        "Chapter 1",
        vec![format!("{}/img/1.jpg", base), format!("{}/img/2.webp", base), format!("{}/img/3.jpg", base)],
    ));

    let dir = tempfile::tempdir().unwrap();
    let mut run = orchestrator(dir.path(), OutputFormat::Pdf, extractor, Arc::new(NoopEnricher));
    let console = Console::hidden();
    let summary = run.run(TARGET, &console, &console).await.unwrap();
    run.close().unwrap();

    assert_eq!((summary.completed, summary.failed), (1, 0));
    let series_dir = dir.path().join(SERIES);
    let pdf = series_dir.join("Chapter 1.pdf");
    let bytes = fs::read(&pdf).unwrap();
    let pages = regex::bytes::Regex::new(r"/Type\s*/Page\b").unwrap();
    assert_eq!(pages.find_iter(&bytes).count(), 3);
    assert!(!series_dir.join("Chapter 1").exists());

    let leftovers: Vec<_> = fs::read_dir(&series_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".jpg") || name.ends_with(".webp"))
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    jpegs.assert_async().await;
    webps.assert_async().await;
}

#[tokio::test]
async fn test_completed_chapter_is_not_fetched_again() {
    let mut server = mockito::Server::new_async().await;
    let done = server.mock("GET", "/img/1-1.jpg").expect(0).create_async().await;
    let fresh = server
        .mock("GET", "/img/2-1.jpg")
        .with_status(200)
        .with_body(b"jpeg")
        .expect(1)
        .create_async()
        .await;

    let extractor = Arc::new(
        FakeExtractor::new()
            .with_chapter("Chapter 1", vec![format!("{}/img/1-1.jpg", server.url())])
            .with_chapter("Chapter 2", vec![format!("{}/img/2-1.jpg", server.url())]),
    );

    let dir = tempfile::tempdir().unwrap();
    let series_dir = dir.path().join(SERIES);
    fs::create_dir_all(&series_dir).unwrap();
    let existing = series_dir.join("Chapter 1.cbz");
    fs::write(&existing, b"previous archive").unwrap();

    let mut history = JsonHistoryStore::open(history_path(dir.path())).unwrap();
    history.mark_completed(SERIES, "Chapter 1").unwrap();
    history.close().unwrap();

    let mut run = orchestrator(dir.path(), OutputFormat::Cbz, Arc::clone(&extractor), Arc::new(NoopEnricher));
    let console = Console::hidden();
    let summary = run.run(TARGET, &console, &console).await.unwrap();
    run.close().unwrap();

    assert_eq!((summary.completed, summary.skipped, summary.failed), (1, 1, 0));
    assert_eq!(extractor.page_lookups.load(Ordering::SeqCst), 1);
    assert_eq!(extractor.image_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read(&existing).unwrap(), b"previous archive");
    assert!(series_dir.join("Chapter 2.cbz").exists());
    done.assert_async().await;
    fresh.assert_async().await;
}

#[tokio::test]
async fn test_failed_chapters_do_not_stop_the_run() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/img/gone.jpg").with_status(404).create_async().await;
    server
        .mock("GET", "/img/ok.png")
        .with_status(200)
        .with_body(b"png")
        .create_async()
        .await;

    let extractor = Arc::new(
        FakeExtractor::new()
            .with_chapter("Chapter 1", Vec::new())
            .with_chapter("Chapter 2", vec![format!("{}/img/gone.jpg", server.url())])
            .with_chapter("Chapter 3", vec![format!("{}/img/ok.png", server.url())]),
    );

    let dir = tempfile::tempdir().unwrap();
    let mut run = orchestrator(dir.path(), OutputFormat::Folder, Arc::clone(&extractor), Arc::new(NoopEnricher));
    let console = Console::hidden();
    let summary = run.run(TARGET, &console, &console).await.unwrap();
    run.close().unwrap();

    assert_eq!((summary.completed, summary.skipped, summary.failed), (1, 0, 2));
    assert_eq!(summary.failed_titles, vec!["Chapter 1", "Chapter 2"]);
    assert_eq!(extractor.image_fetches.load(Ordering::SeqCst), 2);
    assert_eq!(fs::read(dir.path().join(SERIES).join("Chapter 3").join("001.png")).unwrap(), b"png");

    let history = JsonHistoryStore::open(history_path(dir.path())).unwrap();
    assert!(!history.is_completed(SERIES, "Chapter 1"));
    assert!(!history.is_completed(SERIES, "Chapter 2"));
    assert!(history.is_completed(SERIES, "Chapter 3"));
}

#[tokio::test]
async fn test_range_limits_processed_chapters() {
    let extractor = Arc::new(
        FakeExtractor::new()
            .with_chapter("Chapter 9", Vec::new())
            .with_chapter("Chapter 10", Vec::new())
            .with_chapter("Chapter 11", Vec::new()),
    );

    let dir = tempfile::tempdir().unwrap();
    let config = RunConfiguration {
        output_dir: dir.path().to_path_buf(),
        chapter_range: Some("10-10".into()),
        ..Default::default()
    };
    let resolver = SiteResolver::new(Arc::new(SiteTable::new(Vec::new())), None);
    let history = JsonHistoryStore::open(history_path(dir.path())).unwrap();
    let registry = ExtractorRegistry::new(Arc::clone(&extractor) as Arc<dyn Extractor>);
    let mut run = DownloadOrchestrator::new(config, resolver, registry, Arc::new(NoopEnricher), Box::new(history));

    let console = Console::hidden();
    let summary = run.run(TARGET, &console, &console).await.unwrap();

    assert_eq!(summary.failed_titles, vec!["Chapter 10"]);
    assert_eq!(extractor.page_lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_info_failure_aborts_the_run() {
    let mut fake = FakeExtractor::new().with_chapter("Chapter 1", Vec::new());
    fake.fail_info = true;
    let extractor = Arc::new(fake);

    let dir = tempfile::tempdir().unwrap();
    let mut run = orchestrator(dir.path(), OutputFormat::Folder, Arc::clone(&extractor), Arc::new(NoopEnricher));
    let console = Console::hidden();
    let result = run.run(TARGET, &console, &console).await;

    assert!(matches!(result, Err(DownloadError::HttpStatus(503, _))));
    assert_eq!(extractor.page_lookups.load(Ordering::SeqCst), 0);
}
