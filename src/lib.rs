// Expose modules for the binary and integration tests
pub mod archive;
pub mod console;
pub mod downloader;
pub mod enricher;
pub mod error;
pub mod extractor;
pub mod history;
pub mod metadata;
pub mod mirror;
pub mod models;
pub mod orchestrator;
pub mod pdf;
pub mod resolver;
pub mod similarity;
pub mod sites;

// Re-export the types most callers need
pub use console::Console;
pub use downloader::RetryingFetcher;
pub use error::{DownloadError, ResolveError};
pub use extractor::{Extractor, ExtractorRegistry, GenericExtractor};
pub use history::{HistoryStore, JsonHistoryStore};
pub use models::{Chapter, ContentSource, OutputFormat, RunConfiguration};
pub use orchestrator::{DownloadOrchestrator, RunSummary};
pub use resolver::SiteResolver;
pub use sites::SiteTable;
