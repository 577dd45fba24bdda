use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::Path;

use log::{debug, error};
use zip::write::SimpleFileOptions;

use crate::error::DownloadError;
use crate::metadata::ChapterMetadata;

pub const COMIC_INFO_ENTRY: &str = "ComicInfo.xml";

/// Packs `source_dir` into a CBZ at `output_path`. Returns `false` on any failure.
///
/// The source directory is left in place; removing it is up to the caller.
pub fn package_cbz(source_dir: &Path, output_path: &Path, metadata: Option<&ChapterMetadata>) -> bool {
    match write_cbz(source_dir, output_path, metadata) {
        Ok(count) => {
            debug!("Wrote {} pages to {}", count, output_path.display());
            true
        }
        Err(e) => {
            error!("CBZ creation failed for {}: {}", output_path.display(), e);
            false
        }
    }
}

fn write_cbz(source_dir: &Path, output_path: &Path, metadata: Option<&ChapterMetadata>) -> Result<usize, DownloadError> {
    if !source_dir.is_dir() {
        return Err(DownloadError::IoError(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", source_dir.display()),
        )));
    }

    let file = File::create(output_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let count = add_dir_recursive(&mut zip, source_dir, "", options)?;

    if let Some(metadata) = metadata {
        zip.start_file(COMIC_INFO_ENTRY, options)?;
        zip.write_all(metadata.to_comic_info_xml().as_bytes())?;
    }

    zip.finish()?;
    Ok(count)
}

/// Adds every file below `dir`, sorted by name within each directory.
fn add_dir_recursive<W: Write + Seek>(
    zip: &mut zip::ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<usize, DownloadError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut count = 0;
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let entry_path = if prefix.is_empty() { name } else { format!("{}/{}", prefix, name) };

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            count += add_dir_recursive(zip, &entry.path(), &entry_path, options)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        zip.start_file(entry_path, options)?;
        let mut source = File::open(entry.path())?;
        io::copy(&mut source, zip)?;
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_nested_directories_use_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("chapter");
        fs::create_dir_all(source.join("extras")).unwrap();
        fs::write(source.join("002.jpg"), b"two").unwrap();
        fs::write(source.join("001.jpg"), b"one").unwrap();
        fs::write(source.join("extras").join("b.png"), b"b").unwrap();
        fs::write(source.join("extras").join("a.png"), b"a").unwrap();

        let out = dir.path().join("chapter.cbz");
        assert!(package_cbz(&source, &out, None));
        assert_eq!(entry_names(&out), vec!["001.jpg", "002.jpg", "extras/a.png", "extras/b.png"]);
        assert!(source.exists());
    }

    #[test]
    fn test_metadata_entry_is_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("chapter");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("001.jpg"), b"one").unwrap();

        let meta = ChapterMetadata::from_chapter("Chapter 7: Tom & Jerry", "Series", "https://x/chapter-7/");
        let out = dir.path().join("chapter.cbz");
        assert!(package_cbz(&source, &out, Some(&meta)));

        let mut archive = zip::ZipArchive::new(File::open(&out).unwrap()).unwrap();
        let mut xml = String::new();
        archive.by_name(COMIC_INFO_ENTRY).unwrap().read_to_string(&mut xml).unwrap();
        assert!(xml.contains("<Number>7</Number>"));
        assert!(xml.contains("<Title>Tom &amp; Jerry</Title>"));
    }

    #[test]
    fn test_missing_source_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!package_cbz(&dir.path().join("nope"), &dir.path().join("out.cbz"), None));
    }
}
