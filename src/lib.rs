/// JAV Meta Updater
///
/// Fills in Plex library metadata from the JavLibrary catalog: the catalog
/// code is read from each file name, the detail page is scraped through a
/// paced client, and the result is merged into the library item.

pub mod catalog;
pub mod code;
pub mod config;
pub mod error;
pub mod library;
pub mod processing;
pub mod reconcile;

// Re-export main types for easy access
pub use crate::catalog::{CatalogScraper, CoverCache, Metadata, MetadataSource, RateLimitedClient, ReqwestTransport};
pub use crate::code::{CatalogCode, CodeExtractor};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{CoverError, LibraryError, TransportError};
pub use crate::library::{LibraryItem, MediaLibrary, MemoryLibrary, PlexLibrary};
pub use crate::processing::{BatchProcessor, BatchSummary, ItemFilter, ItemReport, ProcessingMode};
pub use crate::reconcile::{ItemOutcome, ReconciliationDecision, Reconciler};
