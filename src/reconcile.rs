/// Per-item reconciliation between the library and the catalog
///
/// Each item is classified from what the library already holds, and only
/// items missing core metadata cost a catalog fetch. Items that have
/// metadata but were never grouped just get their collections.
use crate::catalog::{CoverCache, Metadata, MetadataSource};
use crate::code::CatalogCode;
use crate::config::RulesConfig;
use crate::library::{CastStrategy, ItemEdit, LibraryItem, MediaLibrary};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the library already holds for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemState {
    pub has_genres: bool,
    pub has_cast_or_studio: bool,
    pub has_collections: bool,
}

impl ItemState {
    pub fn observe(item: &LibraryItem) -> Self {
        Self {
            has_genres: item.has_genres(),
            has_cast_or_studio: item.has_cast_or_studio(),
            has_collections: item.has_collections(),
        }
    }
}

/// Action chosen for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationDecision {
    /// No catalog code in the filename
    Unresolved,
    Skip(CatalogCode),
    CollectionsOnly(CatalogCode),
    FullUpdate(CatalogCode),
}

impl ReconciliationDecision {
    pub fn decide(code: Option<CatalogCode>, state: ItemState) -> Self {
        let Some(code) = code else {
            return Self::Unresolved;
        };
        let has_metadata = state.has_genres && state.has_cast_or_studio;
        match (has_metadata, state.has_collections) {
            (true, true) => Self::Skip(code),
            (true, false) => Self::CollectionsOnly(code),
            _ => Self::FullUpdate(code),
        }
    }
}

/// Final result of processing one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemOutcome {
    Unresolved,
    Skipped,
    CollectionsOnly,
    Updated,
    /// Dry run found catalog metadata
    DryRun,
    NotFound,
    Failed,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Skipped | ItemOutcome::CollectionsOnly | ItemOutcome::Updated | ItemOutcome::DryRun
        )
    }
}

impl std::fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ItemOutcome::Unresolved => "unresolved",
            ItemOutcome::Skipped => "skipped",
            ItemOutcome::CollectionsOnly => "collections only",
            ItemOutcome::Updated => "updated",
            ItemOutcome::DryRun => "dry run",
            ItemOutcome::NotFound => "not found",
            ItemOutcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome plus what the worker needs for reporting and pacing
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub code: Option<CatalogCode>,
    pub outcome: ItemOutcome,
    /// Whether the catalog was contacted
    pub fetched: bool,
    pub error: Option<String>,
    pub metadata: Option<Metadata>,
}

impl Reconciled {
    fn new(code: Option<CatalogCode>, outcome: ItemOutcome, fetched: bool) -> Self {
        Self {
            code,
            outcome,
            fetched,
            error: None,
            metadata: None,
        }
    }

    fn failed(code: Option<CatalogCode>, fetched: bool, error: impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(code, ItemOutcome::Failed, fetched)
        }
    }
}

/// Text in the CJK Unified Ideographs block needs no translation
pub fn is_localized(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

pub fn localize_genre(genre: &str, mapping: &HashMap<String, String>) -> Option<String> {
    let genre = genre.trim();
    let localized = if is_localized(genre) {
        genre
    } else {
        mapping.get(genre).map(String::as_str).unwrap_or(genre)
    };
    let localized = localized.trim();
    (!localized.is_empty()).then(|| localized.to_string())
}

pub fn series_collection(code: &CatalogCode) -> String {
    format!("{}系列", code.prefix())
}

pub fn actor_collection(actor: &str) -> String {
    format!("{}作品集", actor)
}

/// `演员: a, b, c` with at most three names
pub fn cast_summary_label(actors: &[String]) -> String {
    let names: Vec<&str> = actors.iter().take(3).map(String::as_str).collect();
    format!("演员: {}", names.join(", "))
}

/// Applies catalog metadata to library items
pub struct Reconciler {
    library: Arc<dyn MediaLibrary>,
    source: Arc<dyn MetadataSource>,
    covers: Option<CoverCache>,
    rules: RulesConfig,
    genre_mapping: HashMap<String, String>,
    cast_plan: Vec<CastStrategy>,
}

impl Reconciler {
    pub fn new(
        library: Arc<dyn MediaLibrary>,
        source: Arc<dyn MetadataSource>,
        rules: RulesConfig,
        genre_mapping: HashMap<String, String>,
    ) -> Self {
        let cast_plan = library.capabilities().cast_plan();
        debug!("Cast write plan: {:?}", cast_plan);
        Self {
            library,
            source,
            covers: None,
            rules,
            genre_mapping,
            cast_plan,
        }
    }

    pub fn with_cover_cache(mut self, covers: CoverCache) -> Self {
        self.covers = Some(covers);
        self
    }

    pub fn cast_plan(&self) -> &[CastStrategy] {
        &self.cast_plan
    }

    /// Code from the media file name; parent directories are ignored
    fn extract_code(item: &LibraryItem) -> Option<CatalogCode> {
        CatalogCode::extract(&item.file_name())
    }

    /// Decide and apply the action for one item
    pub async fn reconcile(&self, item: &LibraryItem) -> Reconciled {
        let code = Self::extract_code(item);
        let decision = ReconciliationDecision::decide(code, ItemState::observe(item));

        match decision {
            ReconciliationDecision::Unresolved => {
                warn!("❓ No catalog code in {}", item.file_name());
                Reconciled::new(None, ItemOutcome::Unresolved, false)
            }
            ReconciliationDecision::Skip(code) => {
                debug!("⏭️ {} already has metadata and collections", code);
                Reconciled::new(Some(code), ItemOutcome::Skipped, false)
            }
            ReconciliationDecision::CollectionsOnly(code) => match self.add_collections(item, &code).await {
                Ok(()) => Reconciled::new(Some(code), ItemOutcome::CollectionsOnly, false),
                Err(e) => Reconciled::failed(Some(code), false, e),
            },
            ReconciliationDecision::FullUpdate(code) => self.full_update(item, code).await,
        }
    }

    /// Fetch and parse only, no library writes
    pub async fn preview(&self, item: &LibraryItem) -> Reconciled {
        let Some(code) = Self::extract_code(item) else {
            warn!("❓ No catalog code in {}", item.file_name());
            return Reconciled::new(None, ItemOutcome::Unresolved, false);
        };

        match self.source.lookup(&code).await {
            Ok(Some(metadata)) => {
                info!("🔎 Found {}: {}, genres: {}", code, metadata.title, metadata.genres.join(", "));
                Reconciled {
                    metadata: Some(metadata),
                    ..Reconciled::new(Some(code), ItemOutcome::DryRun, true)
                }
            }
            Ok(None) => {
                warn!("No catalog data for {}", code);
                Reconciled::new(Some(code), ItemOutcome::NotFound, true)
            }
            Err(e) => Reconciled::failed(Some(code), true, e),
        }
    }

    async fn add_collections(&self, item: &LibraryItem, code: &CatalogCode) -> Result<()> {
        let mut edit = ItemEdit::new();
        edit.add_collection(&series_collection(code));
        if let Some(actor) = item.cast.first() {
            edit.add_collection(&actor_collection(actor));
        }

        self.library.commit(&item.id, &edit).await?;
        info!("📁 {} added to collections: {}", code, edit.collections.join(", "));
        Ok(())
    }

    async fn full_update(&self, item: &LibraryItem, code: CatalogCode) -> Reconciled {
        let metadata = match self.source.lookup(&code).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                warn!("No catalog data for {}", code);
                return Reconciled::new(Some(code), ItemOutcome::NotFound, true);
            }
            Err(e) => return Reconciled::failed(Some(code), true, e),
        };

        let edit = self.build_edit(item, &metadata);
        if let Err(e) = self.library.commit(&item.id, &edit).await {
            return Reconciled {
                metadata: Some(metadata),
                ..Reconciled::failed(Some(code), true, e)
            };
        }
        info!(
            "✅ Updated {}: {} genres, {} cast, collections {}",
            code,
            edit.genres.len(),
            metadata.actors.len().min(self.rules.max_cast),
            edit.collections.join(", ")
        );

        self.apply_cover(item, &metadata).await;

        Reconciled {
            metadata: Some(metadata),
            ..Reconciled::new(Some(code), ItemOutcome::Updated, true)
        }
    }

    /// Stage every field change for a full update
    pub fn build_edit(&self, item: &LibraryItem, metadata: &Metadata) -> ItemEdit {
        let mut edit = ItemEdit::new();
        let code = &metadata.code;

        // Only replace titles that are missing or still the raw filename
        let title_is_placeholder = item.title.is_empty() || item.file_stem().as_deref() == Some(item.title.as_str());
        if !metadata.title.is_empty() && title_is_placeholder {
            edit.title = Some(metadata.title.clone());
        }

        for genre in &metadata.genres {
            if let Some(genre) = localize_genre(genre, &self.genre_mapping) {
                edit.add_genre(&genre);
            }
        }

        edit.add_collection(&series_collection(code));
        if let Some(actor) = metadata.actors.first() {
            edit.add_collection(&actor_collection(actor));
        }
        if self.rules.add_studio_collection && !metadata.studio.is_empty() {
            edit.add_collection(&metadata.studio);
        }

        if !metadata.studio.is_empty() {
            edit.studio = Some(metadata.studio.clone());
        }
        edit.release_date = metadata.release_date();

        if !metadata.actors.is_empty() {
            let names: Vec<String> = metadata.actors.iter().take(self.rules.max_cast).cloned().collect();
            self.stage_cast(item, &mut edit, &names);
            edit.add_label(&cast_summary_label(&metadata.actors));
        }

        edit.add_label(&code.to_string());

        if metadata.rating > 0.0 {
            if self.library.capabilities().rating {
                edit.rating = Some(metadata.rating);
            } else {
                debug!("Library cannot store ratings, skipping {} for {}", metadata.rating, code);
            }
        }

        edit
    }

    fn stage_cast(&self, item: &LibraryItem, edit: &mut ItemEdit, names: &[String]) {
        for strategy in &self.cast_plan {
            match self.library.stage_cast(item, edit, *strategy, names) {
                Ok(()) => {
                    debug!("Cast for item {} staged as {}", item.id, strategy);
                    return;
                }
                Err(e) => debug!("{} unavailable for item {}: {}", strategy, item.id, e),
            }
        }
        warn!("No cast strategy accepted item {}", item.id);
    }

    async fn apply_cover(&self, item: &LibraryItem, metadata: &Metadata) {
        if metadata.cover_url.is_empty() || !self.rules.download_covers {
            return;
        }

        let has_poster = match self.library.item(&item.id).await {
            Ok(fresh) => fresh.has_uploaded_poster(),
            Err(e) => {
                warn!("Could not reload item {} before cover upload, assuming no poster: {}", item.id, e);
                false
            }
        };
        if has_poster && !self.rules.overwrite_posters {
            debug!("Item {} already has an uploaded poster", item.id);
            return;
        }

        match self.library.upload_poster_url(&item.id, &metadata.cover_url).await {
            Ok(()) => {
                info!("🖼️ Poster set from {}", metadata.cover_url);
                return;
            }
            Err(e) => debug!("Poster upload by URL failed for {}: {}", metadata.code, e),
        }

        let Some(covers) = &self.covers else {
            warn!("Could not set poster for {}", metadata.code);
            return;
        };
        let key = if item.title.is_empty() { metadata.code.to_string() } else { item.title.clone() };
        let path = match covers.fetch(&metadata.cover_url, &key).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Cover download failed for {}: {}", metadata.code, e);
                return;
            }
        };
        match self.library.upload_poster_file(&item.id, &path).await {
            Ok(()) => info!("🖼️ Poster uploaded from {}", path.display()),
            Err(e) => warn!("Poster upload failed for {}: {}", metadata.code, e),
        }
    }
}
