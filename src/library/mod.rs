pub mod memory;
pub mod plex;

pub use memory::MemoryLibrary;
pub use plex::PlexLibrary;

use crate::error::LibraryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Snapshot of one video item as the library reports it
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LibraryItem {
    pub id: String,
    pub title: String,
    /// File path of the first media part
    pub file_path: Option<String>,
    pub genres: Vec<String>,
    /// Cast names in billing order
    pub cast: Vec<String>,
    pub studio: Option<String>,
    pub collections: Vec<String>,
    pub labels: Vec<String>,
    pub thumb: Option<String>,
    pub art: Option<String>,
}

impl LibraryItem {
    pub fn has_genres(&self) -> bool {
        !self.genres.is_empty()
    }

    pub fn has_cast_or_studio(&self) -> bool {
        !self.cast.is_empty() || self.studio.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn has_collections(&self) -> bool {
        !self.collections.is_empty()
    }

    /// Plex marks user-uploaded artwork with an `upload://` reference
    pub fn has_uploaded_poster(&self) -> bool {
        [&self.thumb, &self.art]
            .iter()
            .any(|r| r.as_deref().is_some_and(|r| r.contains("upload://")))
    }

    /// File name of the first media part, or the title when there is none
    pub fn file_name(&self) -> String {
        self.file_path
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.title.clone())
    }

    /// First media part's file name without extension
    pub fn file_stem(&self) -> Option<String> {
        let path = PathBuf::from(self.file_path.as_deref()?);
        path.file_stem().map(|s| s.to_string_lossy().into_owned())
    }
}

/// Ways of writing cast, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastStrategy {
    /// Ordered, locked cast list
    Structured,
    /// Names added one by one to the existing cast
    Incremental,
    /// `演员:{name}` labels
    Labels,
}

impl std::fmt::Display for CastStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CastStrategy::Structured => "structured cast",
            CastStrategy::Incremental => "incremental cast",
            CastStrategy::Labels => "cast labels",
        };
        f.write_str(name)
    }
}

/// What a library backend can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryCapabilities {
    pub structured_cast: bool,
    pub incremental_cast: bool,
    pub rating: bool,
    pub poster_url: bool,
    pub poster_upload: bool,
}

impl Default for LibraryCapabilities {
    fn default() -> Self {
        Self {
            structured_cast: true,
            incremental_cast: true,
            rating: true,
            poster_url: true,
            poster_upload: true,
        }
    }
}

impl LibraryCapabilities {
    /// Cast strategies to try in order. Labels are always available.
    pub fn cast_plan(&self) -> Vec<CastStrategy> {
        let mut plan = Vec::with_capacity(3);
        if self.structured_cast {
            plan.push(CastStrategy::Structured);
        }
        if self.incremental_cast {
            plan.push(CastStrategy::Incremental);
        }
        plan.push(CastStrategy::Labels);
        plan
    }
}

/// Cast change staged on an edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CastEdit {
    /// Replace the cast with this ordered list and lock it
    Replace(Vec<String>),
    /// Add these names to whatever cast exists
    Append(Vec<String>),
}

/// Field changes accumulated for a single commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemEdit {
    pub title: Option<String>,
    pub studio: Option<String>,
    pub genres: Vec<String>,
    pub collections: Vec<String>,
    pub labels: Vec<String>,
    pub cast: Option<CastEdit>,
    pub rating: Option<f64>,
    pub release_date: Option<chrono::NaiveDate>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

impl ItemEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_genre(&mut self, genre: &str) {
        push_unique(&mut self.genres, genre);
    }

    pub fn add_collection(&mut self, collection: &str) {
        push_unique(&mut self.collections, collection);
    }

    pub fn add_label(&mut self, label: &str) {
        push_unique(&mut self.labels, label);
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.studio.is_none()
            && self.genres.is_empty()
            && self.collections.is_empty()
            && self.labels.is_empty()
            && self.cast.is_none()
            && self.rating.is_none()
            && self.release_date.is_none()
    }
}

/// Stage `names` on `edit` if `caps` allow `strategy`
pub fn stage_cast_with(
    caps: LibraryCapabilities,
    item: &LibraryItem,
    edit: &mut ItemEdit,
    strategy: CastStrategy,
    names: &[String],
) -> Result<(), LibraryError> {
    match strategy {
        CastStrategy::Structured if caps.structured_cast => {
            edit.cast = Some(CastEdit::Replace(names.to_vec()));
        }
        CastStrategy::Incremental if caps.incremental_cast => {
            edit.cast = Some(CastEdit::Append(names.to_vec()));
        }
        CastStrategy::Labels => {
            for name in names {
                edit.add_label(&format!("演员:{}", name));
            }
        }
        _ => {
            return Err(LibraryError::Declined {
                strategy: strategy.to_string(),
                item: item.id.clone(),
            })
        }
    }
    Ok(())
}

/// A media server library that holds the items being reconciled
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    fn capabilities(&self) -> LibraryCapabilities;

    async fn list_items(&self) -> Result<Vec<LibraryItem>, LibraryError>;

    /// Fresh copy of one item
    async fn item(&self, id: &str) -> Result<LibraryItem, LibraryError>;

    /// Stage a cast write on `edit` using `strategy`.
    ///
    /// Returns `Unsupported` or `Declined` when this strategy cannot be used
    /// for the item; the caller moves on to the next strategy.
    fn stage_cast(
        &self,
        item: &LibraryItem,
        edit: &mut ItemEdit,
        strategy: CastStrategy,
        names: &[String],
    ) -> Result<(), LibraryError> {
        stage_cast_with(self.capabilities(), item, edit, strategy, names)
    }

    /// Apply every staged change in one write
    async fn commit(&self, id: &str, edit: &ItemEdit) -> Result<(), LibraryError>;

    async fn upload_poster_url(&self, id: &str, url: &str) -> Result<(), LibraryError>;

    async fn upload_poster_file(&self, id: &str, path: &Path) -> Result<(), LibraryError>;
}
