/// Catalog site scraping
///
/// This module covers everything between a catalog code and a parsed
/// metadata record: the paced HTTP client, the search/detail flow against
/// the catalog site, the selector-chain page parser and the cover cache.

pub mod client;
pub mod covers;
pub mod parser;
pub mod search;
pub mod transport;

// Re-export main types
pub use client::{FetchOutcome, RateLimitedClient, RateState, RetryPolicy};
pub use covers::CoverCache;
pub use parser::DetailPageParser;
pub use search::CatalogScraper;
pub use transport::{FetchRequest, FetchResponse, HttpTransport, ReqwestTransport};

use crate::code::CatalogCode;
use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Scraped catalog record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub code: CatalogCode,
    pub title: String,
    pub genres: Vec<String>,
    /// Actor names in page order
    pub actors: Vec<String>,
    pub studio: String,
    /// `YYYY-MM-DD`, empty when unknown
    pub release_date: String,
    /// 0.0 means unknown
    pub rating: f64,
    pub cover_url: String,
}

impl Metadata {
    pub fn empty(code: CatalogCode) -> Self {
        Self {
            code,
            title: String::new(),
            genres: Vec::new(),
            actors: Vec::new(),
            studio: String::new(),
            release_date: String::new(),
            rating: 0.0,
            cover_url: String::new(),
        }
    }

    /// True when none of the primary fields were found
    pub fn is_blank(&self) -> bool {
        self.title.is_empty() && self.genres.is_empty() && self.actors.is_empty()
    }

    pub fn release_date(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::parse_from_str(&self.release_date, "%Y-%m-%d").ok()
    }
}

/// Anything that can look up metadata for a catalog code
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// `Ok(None)` when the catalog has no usable record; `Err` only for
    /// transport failures that survived every retry.
    async fn lookup(&self, code: &CatalogCode) -> Result<Option<Metadata>, TransportError>;
}
