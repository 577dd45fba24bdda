use std::error::Error;
use std::fmt;

/// Reasons a target identifier could not be turned into a fetchable URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The user answered 0 at the candidate prompt.
    UserCancelled,
    /// A dynamic source had no reachable mirror.
    MirrorUnreachable(String),
    /// A static source carries no direct URL.
    MissingUrl(String),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::UserCancelled => write!(f, "selection cancelled"),
            ResolveError::MirrorUnreachable(key) => write!(f, "could not resolve a live mirror for '{}'", key),
            ResolveError::MissingUrl(key) => write!(f, "source '{}' has no usable URL", key),
        }
    }
}

#[derive(Debug)]
pub enum DownloadError {
    RequestFailed(reqwest::Error),
    IoError(std::io::Error),
    ParsingError(String),
    SelectorError(String),
    ElementNotFound(String),
    ImageProcessingError(String),
    PdfGenerationError(String),
    ArchiveError(String),
    HttpStatus(u16, String),
    EmptyResponse(String),
    Resolution(ResolveError),
    ChapterFetch(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::RequestFailed(e) => write!(f, "Failed to make HTTP request: {}", e),
            DownloadError::IoError(e) => write!(f, "IO operation failed: {}", e),
            DownloadError::ParsingError(msg) => write!(f, "Failed to parse: {}", msg),
            DownloadError::SelectorError(msg) => write!(f, "Invalid CSS selector: {}", msg),
            DownloadError::ElementNotFound(msg) => write!(f, "Element not found: {}", msg),
            DownloadError::ImageProcessingError(msg) => write!(f, "Image processing error: {}", msg),
            DownloadError::PdfGenerationError(msg) => write!(f, "PDF generation error: {}", msg),
            DownloadError::ArchiveError(msg) => write!(f, "Archive error: {}", msg),
            DownloadError::HttpStatus(status, url) => write!(f, "HTTP error {} for URL {}", status, url),
            DownloadError::EmptyResponse(url) => write!(f, "Empty response body for URL {}", url),
            DownloadError::Resolution(e) => write!(f, "Target resolution failed: {}", e),
            DownloadError::ChapterFetch(msg) => write!(f, "Chapter fetch failed: {}", msg),
        }
    }
}

impl Error for DownloadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DownloadError::RequestFailed(e) => Some(e),
            DownloadError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::RequestFailed(err)
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::IoError(err)
    }
}

impl From<genpdf::error::Error> for DownloadError {
    fn from(err: genpdf::error::Error) -> Self {
        DownloadError::PdfGenerationError(err.to_string())
    }
}

impl From<zip::result::ZipError> for DownloadError {
    fn from(err: zip::result::ZipError) -> Self {
        DownloadError::ArchiveError(err.to_string())
    }
}

impl From<image::ImageError> for DownloadError {
    fn from(err: image::ImageError) -> Self {
        DownloadError::ImageProcessingError(err.to_string())
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(err: serde_json::Error) -> Self {
        DownloadError::ParsingError(err.to_string())
    }
}

impl From<ResolveError> for DownloadError {
    fn from(err: ResolveError) -> Self {
        DownloadError::Resolution(err)
    }
}
