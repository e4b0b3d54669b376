use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::library::{LibraryItem, MediaLibrary};
use crate::reconcile::{ItemOutcome, Reconciler};

/// What the batch does with each item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Reconcile and write to the library
    Update,
    /// Fetch and parse only
    DryRun,
}

/// Processing result for a single item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub filename: String,
    pub code: Option<String>,
    pub outcome: ItemOutcome,
    /// The catalog was contacted for this item
    pub fetched: bool,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Overall batch processing results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: HashMap<ItemOutcome, usize>,
    pub total_time: Duration,
    pub reports: Vec<ItemReport>,
}

impl BatchSummary {
    pub fn from_reports(reports: Vec<ItemReport>, total_time: Duration) -> Self {
        let mut outcomes = HashMap::new();
        for report in &reports {
            *outcomes.entry(report.outcome).or_insert(0) += 1;
        }
        let successful = reports.iter().filter(|r| r.outcome.is_success()).count();

        Self {
            total: reports.len(),
            successful,
            failed: reports.len() - successful,
            outcomes,
            total_time,
            reports,
        }
    }

    pub fn count(&self, outcome: ItemOutcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn fetched(&self) -> usize {
        self.reports.iter().filter(|r| r.fetched).count()
    }
}

/// Item selection applied before submission
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Keep only the first N items
    pub limit: Option<usize>,
    /// Keep items whose filename contains this code, ignoring case
    pub code: Option<String>,
}

impl ItemFilter {
    pub fn apply(&self, mut items: Vec<LibraryItem>) -> Vec<LibraryItem> {
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        if let Some(code) = self.code.as_deref().map(str::to_uppercase) {
            items.retain(|item| item.file_name().to_uppercase().contains(&code));
        }
        items
    }
}

/// Runs reconciliation over many items with bounded concurrency
pub struct BatchProcessor {
    reconciler: Arc<Reconciler>,
    mode: ProcessingMode,
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    item_delay: Duration,
}

impl BatchProcessor {
    pub fn new(reconciler: Reconciler, max_workers: usize, item_delay: Duration, mode: ProcessingMode) -> Self {
        let max_workers = max_workers.max(1);
        info!("🔧 Initializing BatchProcessor with {} workers ({:?})", max_workers, mode);

        Self {
            reconciler: Arc::new(reconciler),
            mode,
            worker_semaphore: Arc::new(Semaphore::new(max_workers)),
            max_concurrent: max_workers,
            item_delay,
        }
    }

    /// List the library, apply the filter and process what remains
    pub async fn process_library(&self, library: &dyn MediaLibrary, filter: &ItemFilter) -> Result<BatchSummary> {
        let items = library.list_items().await?;
        let listed = items.len();
        let items = filter.apply(items);
        info!("📹 Found {} items to process ({} in library)", items.len(), listed);
        if self.mode == ProcessingMode::DryRun {
            info!("🧪 Dry run: fetching metadata only, nothing is written");
        }

        Ok(self.process_items(items).await)
    }

    /// Process items in parallel with controlled concurrency
    pub async fn process_items(&self, items: Vec<LibraryItem>) -> BatchSummary {
        let start_time = Instant::now();
        let total_items = items.len();
        let (tx, mut rx) = mpsc::channel(self.max_concurrent);

        let mut workers = Vec::with_capacity(total_items);

        for (index, item) in items.into_iter().enumerate() {
            let reconciler = Arc::clone(&self.reconciler);
            let semaphore = Arc::clone(&self.worker_semaphore);
            let tx = tx.clone();
            let mode = self.mode;
            let item_delay = self.item_delay;
            let filename = item.file_name();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    error!("Worker pool closed before item {} ran", item.id);
                    return;
                };

                debug!("📹 Processing item {}/{}: {}", index + 1, total_items, item.file_name());
                let started = Instant::now();
                let result = match mode {
                    ProcessingMode::Update => reconciler.reconcile(&item).await,
                    ProcessingMode::DryRun => reconciler.preview(&item).await,
                };

                let report = ItemReport {
                    filename: item.file_name(),
                    code: result.code.as_ref().map(|c| c.to_string()),
                    outcome: result.outcome,
                    fetched: result.fetched,
                    error: result.error,
                    elapsed: started.elapsed(),
                };

                // Pace the catalog between items, holding the worker slot
                if report.fetched && !item_delay.is_zero() {
                    tokio::time::sleep(item_delay).await;
                }

                if let Err(e) = tx.send((index, report)).await {
                    error!("Failed to send result: {}", e);
                }
            });
            workers.push((index, filename, handle));
        }

        // Drop the original sender to close the channel when all tasks complete
        drop(tx);

        let mut results = Vec::with_capacity(total_items);
        while let Some((index, report)) = rx.recv().await {
            Self::log_report(&report);
            results.push((index, report));
        }

        // Workers that died without reporting still count as failed items
        let reported: HashSet<usize> = results.iter().map(|(index, _)| *index).collect();
        for (index, filename, handle) in workers {
            let joined = handle.await;
            if reported.contains(&index) {
                continue;
            }
            let reason = match joined {
                Err(e) => format!("worker failed: {}", e),
                Ok(()) => "worker exited without a report".to_string(),
            };
            let report = ItemReport {
                filename,
                code: None,
                outcome: ItemOutcome::Failed,
                fetched: false,
                error: Some(reason),
                elapsed: Duration::ZERO,
            };
            Self::log_report(&report);
            results.push((index, report));
        }
        results.sort_by_key(|(index, _)| *index);

        BatchSummary::from_reports(results.into_iter().map(|(_, r)| r).collect(), start_time.elapsed())
    }

    fn log_report(report: &ItemReport) {
        if report.outcome.is_success() {
            info!("✓ {} ({})", report.filename, report.outcome);
        } else {
            warn!(
                "✗ {} ({}){}",
                report.filename,
                report.outcome,
                report.error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default()
            );
        }
    }

    /// Get processing statistics
    pub fn get_stats(&self) -> ProcessingStats {
        ProcessingStats {
            max_workers: self.max_concurrent,
            available_permits: self.worker_semaphore.available_permits(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingStats {
    pub max_workers: usize,
    pub available_permits: usize,
}
