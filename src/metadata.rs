use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TITLE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:chapter|ch\.?|no\.?|episode)\s*(\d+(\.\d+)?)").expect("title pattern is valid")
});

static TITLE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:chapter|ch\.?|no\.?|episode)\s*(\d+(\.\d+)?)[\s:-]*").expect("prefix pattern is valid")
});

static URL_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:chapter|ch|c)[-/_]?(\d+(\.\d+)?)(?:/|$)").expect("url pattern is valid")
});

/// Series-level fields supplied by a metadata provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub writer: String,
    pub artist: String,
    pub year: String,
    pub genres: String,
    pub summary: String,
}

/// Descriptor embedded into packaged chapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterMetadata {
    pub series: String,
    pub number: String,
    pub title: String,
    pub web: String,
    pub writer: Option<String>,
    pub artist: Option<String>,
    pub genres: Option<String>,
    pub summary: Option<String>,
    pub year: Option<String>,
}

impl ChapterMetadata {
    /// Derives number and subtitle from the chapter title, falling back to the URL for the number.
    pub fn from_chapter(chapter_title: &str, series_title: &str, url: &str) -> Self {
        let clean_title = chapter_title.trim();

        let mut number = String::new();
        let mut subtitle = String::new();

        if let Some(caps) = TITLE_NUMBER_RE.captures(clean_title) {
            number = caps[1].to_string();
            subtitle = TITLE_PREFIX_RE.replace(clean_title, "").trim().to_string();
        }

        if number.is_empty() {
            let decoded = percent_decode_str(url).decode_utf8_lossy();
            let clean_url = decoded.trim().to_lowercase();
            number = URL_NUMBER_RE
                .captures(&clean_url)
                .map(|caps| caps[1].to_string())
                .unwrap_or_else(|| "0".to_string());
        }

        if subtitle.is_empty() {
            subtitle = clean_title.to_string();
        }

        Self {
            series: series_title.to_string(),
            number,
            title: subtitle,
            web: url.to_string(),
            ..Default::default()
        }
    }

    /// Fills chapter fields that are still empty from series-level metadata.
    pub fn merge_series(mut self, series: &SeriesMetadata) -> Self {
        fill(&mut self.writer, &series.writer);
        fill(&mut self.artist, &series.artist);
        fill(&mut self.genres, &series.genres);
        fill(&mut self.summary, &series.summary);
        fill(&mut self.year, &series.year);
        self
    }

    /// Renders the ComicInfo.xml record read by comic book readers.
    pub fn to_comic_info_xml(&self) -> String {
        let opt = |v: &Option<String>| escape_xml(v.as_deref().unwrap_or(""));

        format!(
            r#"<?xml version="1.0"?>
<ComicInfo xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <Series>{}</Series>
  <Number>{}</Number>
  <Title>{}</Title>
  <Web>{}</Web>
  <Writer>{}</Writer>
  <Penciller>{}</Penciller>
  <Genre>{}</Genre>
  <Summary>{}</Summary>
  <Year>{}</Year>
</ComicInfo>"#,
            escape_xml(&self.series),
            escape_xml(&self.number),
            escape_xml(&self.title),
            escape_xml(&self.web),
            opt(&self.writer),
            opt(&self.artist),
            opt(&self.genres),
            opt(&self.summary),
            opt(&self.year),
        )
    }
}

fn fill(slot: &mut Option<String>, value: &str) {
    let empty = slot.as_deref().is_none_or(|s| s.trim().is_empty());
    if empty && !value.trim().is_empty() {
        *slot = Some(value.to_string());
    }
}

fn escape_xml(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
