use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(\.\d+)?)").expect("ordinal pattern is valid")
});

/// How a source's fetch URL is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// The configured URL is used as-is.
    #[default]
    Static,
    /// The domain moves around; a live mirror has to be discovered first.
    Dynamic,
}

/// One entry of the site database.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSource {
    pub key: String,
    pub display_name: String,
    pub base_domain: String,
    pub source_type: SourceType,
    pub url_pattern: Option<String>,
    pub test_path: Option<String>,
    pub direct_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub url: String,
}

impl Chapter {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self { title: title.into(), url: url.into() }
    }

    /// First decimal number in the title, if there is one.
    pub fn ordinal(&self) -> Option<f64> {
        ORDINAL_RE
            .captures(&self.title)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    }

    /// Ordinal used for display and sorting; chapters without a number sort as 0.
    pub fn numeric_ordinal(&self) -> f64 {
        self.ordinal().unwrap_or(0.0)
    }
}

/// Title information returned by an extractor for a series landing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangaInfo {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAsset {
    pub source_url: String,
    pub index: usize,
    pub extension: &'static str,
}

impl PageAsset {
    pub fn new(source_url: impl Into<String>, index: usize) -> Self {
        let source_url = source_url.into();
        let extension = infer_extension(&source_url);
        Self { source_url, index, extension }
    }

    /// Zero-padded, 1-based file name so that lexicographic order is page order.
    pub fn file_name(&self) -> String {
        format!("{:03}.{}", self.index + 1, self.extension)
    }
}

fn infer_extension(url: &str) -> &'static str {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();

    if path.ends_with(".png") {
        "png"
    } else if path.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Keep the downloaded pages in a plain directory
    #[default]
    Folder,
    /// One PDF document per chapter
    Pdf,
    /// One comic book zip archive per chapter
    Cbz,
}

impl OutputFormat {
    /// File extension of the packaged chapter, `None` for folders.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Folder => None,
            OutputFormat::Pdf => Some("pdf"),
            OutputFormat::Cbz => Some("cbz"),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Folder => "FOLDER",
            OutputFormat::Pdf => "PDF",
            OutputFormat::Cbz => "CBZ",
        };
        f.write_str(name)
    }
}

/// Settings fixed for the duration of one run.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub output_dir: PathBuf,
    pub worker_count: usize,
    pub output_format: OutputFormat,
    pub chapter_range: Option<String>,
    pub proxy: Option<String>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            worker_count: 8,
            output_format: OutputFormat::Folder,
            chapter_range: None,
            proxy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_takes_first_number() {
        assert_eq!(Chapter::new("Chapter 10.5 - Part 2", "u").ordinal(), Some(10.5));
        assert_eq!(Chapter::new("Vol 3 Chapter 21", "u").ordinal(), Some(3.0));
        assert_eq!(Chapter::new("Prologue", "u").ordinal(), None);
        assert_eq!(Chapter::new("Prologue", "u").numeric_ordinal(), 0.0);
    }

    #[test]
    fn test_page_extension_from_url_suffix() {
        assert_eq!(PageAsset::new("https://cdn.example/p/1.PNG", 0).extension, "png");
        assert_eq!(PageAsset::new("https://cdn.example/p/1.webp?token=abc", 0).extension, "webp");
        assert_eq!(PageAsset::new("https://cdn.example/p/1.jpeg", 0).extension, "jpg");
        assert_eq!(PageAsset::new("https://cdn.example/image?id=7", 0).extension, "jpg");
    }

    #[test]
    fn test_page_file_name_is_padded() {
        assert_eq!(PageAsset::new("https://x/a.png", 0).file_name(), "001.png");
        assert_eq!(PageAsset::new("https://x/a.jpg", 41).file_name(), "042.jpg");
    }
}
