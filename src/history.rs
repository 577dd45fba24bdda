use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::DownloadError;

/// Durable record of which (series, chapter) pairs are finished.
///
/// Keys are the literal titles reported by the extractor. A recorded pair is
/// never revalidated: presence alone means the chapter is done.
pub trait HistoryStore: Send {
    fn is_completed(&self, series: &str, chapter: &str) -> bool;

    fn mark_completed(&mut self, series: &str, chapter: &str) -> Result<(), DownloadError>;

    /// Flushes anything pending. The store must not be used afterwards.
    fn close(&mut self) -> Result<(), DownloadError>;
}

/// History kept as a JSON index of series title -> completed chapter titles.
#[derive(Debug)]
pub struct JsonHistoryStore {
    /// Location of the index file
    path: PathBuf,
    index: BTreeMap<String, BTreeSet<String>>,
}

impl JsonHistoryStore {
    /// Opens the index at `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DownloadError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let index = if path.exists() {
            let file = File::open(&path)?;
            serde_json::from_reader(file)
                .map_err(|e| DownloadError::ParsingError(format!("Failed to parse history index: {}", e)))?
        } else {
            BTreeMap::new()
        };

        debug!("Opened history at {} ({} series)", path.display(), index.len());
        Ok(Self { path, index })
    }

    /// Save the index to disk
    pub fn save_index(&self) -> Result<(), DownloadError> {
        // Write next to the index and rename so a crash never leaves half a file.
        let tmp_path = self.path.with_extension("json.tmp");
        let file = File::create(&tmp_path)?;
        serde_json::to_writer_pretty(file, &self.index)
            .map_err(|e| DownloadError::ParsingError(format!("Failed to write history index: {}", e)))?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Number of completed chapters recorded for `series`.
    pub fn completed_count(&self, series: &str) -> usize {
        self.index.get(series).map_or(0, BTreeSet::len)
    }
}

impl HistoryStore for JsonHistoryStore {
    fn is_completed(&self, series: &str, chapter: &str) -> bool {
        self.index.get(series).is_some_and(|chapters| chapters.contains(chapter))
    }

    fn mark_completed(&mut self, series: &str, chapter: &str) -> Result<(), DownloadError> {
        let inserted = self
            .index
            .entry(series.to_string())
            .or_default()
            .insert(chapter.to_string());

        if inserted {
            self.save_index()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DownloadError> {
        if let Err(e) = self.save_index() {
            warn!("Failed to flush history {}: {}", self.path.display(), e);
            return Err(e);
        }
        Ok(())
    }
}

/// In-memory history, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    completed: BTreeSet<(String, String)>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn is_completed(&self, series: &str, chapter: &str) -> bool {
        self.completed.contains(&(series.to_string(), chapter.to_string()))
    }

    fn mark_completed(&mut self, series: &str, chapter: &str) -> Result<(), DownloadError> {
        self.completed.insert((series.to_string(), chapter.to_string()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), DownloadError> {
        Ok(())
    }
}
