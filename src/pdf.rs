use std::path::{Path, PathBuf};
use std::env;
use std::fs;
use crate::error::DownloadError;
use image::{self, ImageFormat};
use log::{debug, error, info, warn, trace};

/// Environment variable naming a TTF file to use instead of the bundled font.
pub const FONT_ENV_VAR: &str = "MANGA_HARVEST_PDF_FONT";

/// DejaVu Sans, compiled in so PDF output works on hosts without fonts.
const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

const ACCEPTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

// A4 paper size is 210mm x 297mm
const PAGE_WIDTH_MM: f64 = 210.0;
const PAGE_HEIGHT_MM: f64 = 297.0;
const PAGE_MARGIN_MM: f64 = 12.0;
// genpdf places images at 300 DPI unless told otherwise
const IMAGE_DPI: f64 = 300.0;

/// Composes every image below `source_dir` into one PDF. Returns `false` when
/// no images are found or composition fails.
///
/// WebP pages (and anything with an alpha channel) are transcoded to JPEG
/// siblings first and the originals are deleted. The directory itself is left
/// for the caller to remove.
pub fn package_pdf(source_dir: &Path, output_path: &Path) -> bool {
    let images = match collect_images(source_dir) {
        Ok(images) => images,
        Err(e) => {
            error!("Failed to list images in {}: {}", source_dir.display(), e);
            return false;
        }
    };

    let mut pages = Vec::with_capacity(images.len());
    for path in images {
        match normalize_for_pdf(&path) {
            Ok(page) => pages.push(page),
            Err(e) => warn!("Skipping {} in PDF: {}", path.display(), e),
        }
    }

    if pages.is_empty() {
        warn!("No images found in {}", source_dir.display());
        return false;
    }

    match create_pdf_from_images(&pages, output_path) {
        Ok(()) => true,
        Err(e) => {
            error!("PDF creation failed for {}: {}", output_path.display(), e);
            false
        }
    }
}

/// Image files with an accepted extension, recursively, sorted by name within each directory.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>, DownloadError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut images = Vec::new();
    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            images.extend(collect_images(&path)?);
        } else if file_type.is_file() && has_accepted_extension(&path) {
            images.push(path);
        }
    }
    Ok(images)
}

fn has_accepted_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ACCEPTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Returns a path genpdf can embed, transcoding to an RGB JPEG sibling when needed.
fn normalize_for_pdf(path: &Path) -> Result<PathBuf, DownloadError> {
    let is_webp = path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("webp"));

    let img = image::open(path)?;
    if !is_webp && !img.color().has_alpha() {
        return Ok(path.to_path_buf());
    }

    let target = path.with_extension("jpg");
    trace!("Transcoding {} to {}", path.display(), target.display());
    img.to_rgb8().save_with_format(&target, ImageFormat::Jpeg)?;
    if target != path {
        fs::remove_file(path)?;
    }
    Ok(target)
}

/// Generates a PDF from a collection of image paths, one page per image
pub fn create_pdf_from_images(image_paths: &[impl AsRef<Path>], output_path: &Path) -> Result<(), DownloadError> {
    if image_paths.is_empty() {
        return Err(DownloadError::PdfGenerationError(String::from("Cannot create PDF: no images provided")));
    }

    debug!("Creating PDF from {} images", image_paths.len());
    trace!("Output path: {:?}", output_path);

    let font_family = find_font_family()
        .map_err(|e| DownloadError::PdfGenerationError(format!("Failed to load font: {}", e)))?;

    let mut doc = genpdf::Document::new(font_family);
    doc.set_title("Manga Chapter");
    doc.set_paper_size(genpdf::PaperSize::A4);

    let available_width = PAGE_WIDTH_MM - PAGE_MARGIN_MM;
    let available_height = PAGE_HEIGHT_MM - PAGE_MARGIN_MM;

    for (i, path) in image_paths.iter().enumerate() {
        let path = path.as_ref();
        trace!("Processing image {}/{}", i + 1, image_paths.len());

        let (width_px, height_px) = image::image_dimensions(path)?;
        if width_px == 0 || height_px == 0 {
            return Err(DownloadError::ImageProcessingError(format!("{} has no pixels", path.display())));
        }

        // Convert pixel size to mm and fit the whole image on one page.
        let width_mm = width_px as f64 * 25.4 / IMAGE_DPI;
        let height_mm = height_px as f64 * 25.4 / IMAGE_DPI;
        let scale_factor = (available_width / width_mm).min(available_height / height_mm);
        trace!("Image dimensions: {}x{}, scale factor: {:.2}", width_px, height_px, scale_factor);

        let img = genpdf::elements::Image::from_path(path)
            .map_err(|e| DownloadError::ImageProcessingError(format!("Failed to load image: {}", e)))?
            .with_alignment(genpdf::Alignment::Center)
            .with_scale(genpdf::Scale::new(scale_factor, scale_factor));

        doc.push(img);

        // Add a page break after each image except the last one
        if i < image_paths.len() - 1 {
            doc.push(genpdf::elements::PageBreak::new());
        }
    }

    debug!("Rendering PDF to file: {:?}", output_path);
    doc.render_to_file(output_path)?;
    info!("PDF created successfully with {} pages", image_paths.len());

    Ok(())
}

/// Whether a font for PDF layout can be loaded.
pub fn font_available() -> bool {
    find_font_family().is_ok()
}

type Family = genpdf::fonts::FontFamily<genpdf::fonts::FontData>;

/// Picks the font for genpdf's layout engine. Pages only hold images, but
/// genpdf needs a font family to build a document at all.
///
/// Order: the file named by [`FONT_ENV_VAR`], the bundled font, then the
/// usual platform font locations.
fn find_font_family() -> Result<Family, String> {
    debug!("Looking for suitable font");

    if let Ok(path) = env::var(FONT_ENV_VAR) {
        match load_font_family(Path::new(&path)) {
            Ok(family) => return Ok(family),
            Err(e) => warn!("{} is set but unusable: {}", FONT_ENV_VAR, e),
        }
    }

    match font_family_from_bytes(BUNDLED_FONT.to_vec(), "bundled font") {
        Ok(family) => return Ok(family),
        Err(e) => warn!("{}", e),
    }

    for path in get_platform_font_paths() {
        if !path.exists() {
            continue;
        }
        match load_font_family(&path) {
            Ok(family) => {
                info!("Using font {}", path.display());
                return Ok(family);
            }
            Err(e) => trace!("Failed to load font {}: {}", path.display(), e),
        }
    }

    warn!("Could not load any suitable font");
    Err(format!("no usable TTF font found; set {} to a .ttf file", FONT_ENV_VAR))
}

fn load_font_family(path: &Path) -> Result<Family, String> {
    let bytes = fs::read(path).map_err(|e| format!("could not read {}: {}", path.display(), e))?;
    font_family_from_bytes(bytes, &path.display().to_string())
}

fn font_family_from_bytes(bytes: Vec<u8>, label: &str) -> Result<Family, String> {
    let font_data = genpdf::fonts::FontData::new(bytes, None)
        .map_err(|e| format!("could not parse {}: {}", label, e))?;

    Ok(genpdf::fonts::FontFamily {
        regular: font_data.clone(),
        bold: font_data.clone(),
        italic: font_data.clone(),
        bold_italic: font_data,
    })
}

/// Returns a list of platform-specific font files to try
fn get_platform_font_paths() -> Vec<PathBuf> {
    let mut dirs_and_files: Vec<(PathBuf, &str)> = Vec::new();

    match env::consts::OS {
        "macos" => {
            dirs_and_files.push(("/System/Library/Fonts".into(), "Geneva.ttf"));
            dirs_and_files.push(("/System/Library/Fonts".into(), "Monaco.ttf"));
            dirs_and_files.push(("/Library/Fonts".into(), "Arial.ttf"));
        },
        "windows" => {
            dirs_and_files.push(("C:\\Windows\\Fonts".into(), "arial.ttf"));
            dirs_and_files.push(("C:\\Windows\\Fonts".into(), "verdana.ttf"));
            dirs_and_files.push(("C:\\Windows\\Fonts".into(), "tahoma.ttf"));
            dirs_and_files.push(("C:\\Windows\\Fonts".into(), "calibri.ttf"));
        },
        _ => {
            dirs_and_files.push(("/usr/share/fonts/truetype/dejavu".into(), "DejaVuSans.ttf"));
            dirs_and_files.push(("/usr/share/fonts/TTF".into(), "DejaVuSans.ttf"));
            dirs_and_files.push(("/usr/share/fonts/dejavu".into(), "DejaVuSans.ttf"));
            dirs_and_files.push(("/usr/share/fonts/dejavu-sans-fonts".into(), "DejaVuSans.ttf"));
            dirs_and_files.push(("/usr/share/fonts/truetype/liberation".into(), "LiberationSans-Regular.ttf"));
            dirs_and_files.push(("/usr/share/fonts/liberation".into(), "LiberationSans-Regular.ttf"));
            dirs_and_files.push(("/usr/share/fonts/truetype/ubuntu".into(), "Ubuntu-R.ttf"));
            dirs_and_files.push(("/usr/share/fonts/noto".into(), "NotoSans-Regular.ttf"));
            dirs_and_files.push(("/usr/share/fonts/truetype/noto".into(), "NotoSans-Regular.ttf"));
        }
    }

    // Also check user's home directory for fonts
    if let Some(home) = dirs::home_dir() {
        let user_fonts = match env::consts::OS {
            "macos" => Some(home.join("Library/Fonts")),
            "windows" => Some(home.join("AppData\\Local\\Microsoft\\Windows\\Fonts")),
            _ => Some(home.join(".local/share/fonts")),
        };
        if let Some(dir) = user_fonts {
            dirs_and_files.push((dir.clone(), "DejaVuSans.ttf"));
            dirs_and_files.push((dir, "LiberationSans-Regular.ttf"));
        }
    }
    if let Some(data_dir) = dirs::font_dir() {
        dirs_and_files.push((data_dir, "DejaVuSans.ttf"));
    }

    dirs_and_files.into_iter().map(|(dir, file)| dir.join(file)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_image(path: &Path, width: u32, height: u32) {
        let mut img = image::RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
        img.save(path).unwrap();
    }

    #[test]
    fn test_collect_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.PNG"), b"x").unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("c.webp"), b"x").unwrap();

        let names: Vec<String> = collect_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.webp"]);
    }

    #[test]
    fn test_webp_is_transcoded_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let webp = dir.path().join("004.webp");
        create_test_image(&webp, 20, 30);

        let page = normalize_for_pdf(&webp).unwrap();
        assert_eq!(page, dir.path().join("004.jpg"));
        assert!(!webp.exists());
        assert_eq!(image::image_dimensions(&page).unwrap(), (20, 30));
    }

    #[test]
    fn test_rgba_png_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("001.png");
        image::RgbaImage::new(8, 8).save(&png).unwrap();

        let page = normalize_for_pdf(&png).unwrap();
        assert_eq!(page, dir.path().join("001.jpg"));
        assert!(!png.exists());
    }

    #[test]
    fn test_bundled_font_loads() {
        assert!(font_family_from_bytes(BUNDLED_FONT.to_vec(), "bundled font").is_ok());
        assert!(font_available());
    }

    #[test]
    fn test_empty_directory_is_not_packaged() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!package_pdf(dir.path(), &dir.path().join("out.pdf")));
        assert!(!dir.path().join("out.pdf").exists());
    }
}
