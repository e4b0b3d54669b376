/// In-process library backend
use super::{stage_cast_with, CastEdit, CastStrategy, ItemEdit, LibraryCapabilities, LibraryItem, MediaLibrary};
use crate::error::LibraryError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Poster upload recorded by [`MemoryLibrary`]
#[derive(Debug, Clone, PartialEq)]
pub enum PosterUpload {
    Url(String),
    File(PathBuf),
}

#[derive(Default)]
struct Inner {
    items: Vec<LibraryItem>,
    commits: Vec<(String, ItemEdit)>,
    posters: Vec<(String, PosterUpload)>,
}

/// Library held entirely in memory, with failure injection
pub struct MemoryLibrary {
    capabilities: LibraryCapabilities,
    inner: Mutex<Inner>,
    declines: HashSet<(String, CastStrategy)>,
    failing_commits: HashSet<String>,
    failing_poster_urls: bool,
    failing_reloads: bool,
}

impl MemoryLibrary {
    pub fn new(items: Vec<LibraryItem>) -> Self {
        Self {
            capabilities: LibraryCapabilities::default(),
            inner: Mutex::new(Inner {
                items,
                ..Default::default()
            }),
            declines: HashSet::new(),
            failing_commits: HashSet::new(),
            failing_poster_urls: false,
            failing_reloads: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: LibraryCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make `stage_cast` decline `strategy` for one item
    pub fn decline(mut self, id: &str, strategy: CastStrategy) -> Self {
        self.declines.insert((id.to_string(), strategy));
        self
    }

    /// Make every commit for one item fail
    pub fn fail_commits_for(mut self, id: &str) -> Self {
        self.failing_commits.insert(id.to_string());
        self
    }

    /// Make remote-URL poster uploads fail so the file path is used
    pub fn fail_poster_urls(mut self) -> Self {
        self.failing_poster_urls = true;
        self
    }

    /// Make single-item reloads fail; listing still works
    pub fn fail_reloads(mut self) -> Self {
        self.failing_reloads = true;
        self
    }

    pub fn commits(&self) -> Vec<(String, ItemEdit)> {
        self.lock().commits.clone()
    }

    pub fn posters(&self) -> Vec<(String, PosterUpload)> {
        self.lock().posters.clone()
    }

    pub fn snapshot(&self, id: &str) -> Option<LibraryItem> {
        self.lock().items.iter().find(|i| i.id == id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_poster(&self, id: &str, upload: PosterUpload) -> Result<(), LibraryError> {
        let mut inner = self.lock();
        let item = inner
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?;
        item.thumb = Some(format!("upload://posters/{}", id));
        inner.posters.push((id.to_string(), upload));
        Ok(())
    }
}

fn merge(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

#[async_trait]
impl MediaLibrary for MemoryLibrary {
    fn capabilities(&self) -> LibraryCapabilities {
        self.capabilities
    }

    async fn list_items(&self) -> Result<Vec<LibraryItem>, LibraryError> {
        Ok(self.lock().items.clone())
    }

    async fn item(&self, id: &str) -> Result<LibraryItem, LibraryError> {
        if self.failing_reloads {
            return Err(LibraryError::Api {
                status: 503,
                message: format!("injected reload failure for {}", id),
            });
        }
        self.snapshot(id).ok_or_else(|| LibraryError::NotFound(id.to_string()))
    }

    fn stage_cast(
        &self,
        item: &LibraryItem,
        edit: &mut ItemEdit,
        strategy: CastStrategy,
        names: &[String],
    ) -> Result<(), LibraryError> {
        if self.declines.contains(&(item.id.clone(), strategy)) {
            return Err(LibraryError::Declined {
                strategy: strategy.to_string(),
                item: item.id.clone(),
            });
        }
        stage_cast_with(self.capabilities, item, edit, strategy, names)
    }

    async fn commit(&self, id: &str, edit: &ItemEdit) -> Result<(), LibraryError> {
        if self.failing_commits.contains(id) {
            return Err(LibraryError::Api {
                status: 500,
                message: format!("injected commit failure for {}", id),
            });
        }
        if edit.rating.is_some() && !self.capabilities.rating {
            return Err(LibraryError::Unsupported("rating"));
        }

        let mut inner = self.lock();
        let item = inner
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?;

        if let Some(title) = &edit.title {
            item.title = title.clone();
        }
        if let Some(studio) = &edit.studio {
            item.studio = Some(studio.clone());
        }
        merge(&mut item.genres, &edit.genres);
        merge(&mut item.collections, &edit.collections);
        merge(&mut item.labels, &edit.labels);
        match &edit.cast {
            Some(CastEdit::Replace(names)) => item.cast = names.clone(),
            Some(CastEdit::Append(names)) => merge(&mut item.cast, names),
            None => {}
        }

        inner.commits.push((id.to_string(), edit.clone()));
        Ok(())
    }

    async fn upload_poster_url(&self, id: &str, url: &str) -> Result<(), LibraryError> {
        if !self.capabilities.poster_url {
            return Err(LibraryError::Unsupported("poster upload by url"));
        }
        if self.failing_poster_urls {
            return Err(LibraryError::Api {
                status: 400,
                message: format!("cannot fetch {}", url),
            });
        }
        self.record_poster(id, PosterUpload::Url(url.to_string()))
    }

    async fn upload_poster_file(&self, id: &str, path: &Path) -> Result<(), LibraryError> {
        if !self.capabilities.poster_upload {
            return Err(LibraryError::Unsupported("poster upload"));
        }
        self.record_poster(id, PosterUpload::File(path.to_path_buf()))
    }
}

/// Convenience for building items in tests and demos
impl From<(&str, &str)> for LibraryItem {
    fn from((id, file_path): (&str, &str)) -> Self {
        LibraryItem {
            id: id.to_string(),
            title: Path::new(file_path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_path: Some(file_path.to_string()),
            ..Default::default()
        }
    }
}
