use async_trait::async_trait;
use jav_meta_updater::catalog::{CatalogScraper, CoverCache, FetchRequest, FetchResponse, HttpTransport};
use jav_meta_updater::config::{CatalogConfig, ConfigBuilder, RulesConfig};
use jav_meta_updater::library::memory::PosterUpload;
use jav_meta_updater::library::{LibraryItem, MemoryLibrary};
use jav_meta_updater::processing::{BatchProcessor, ItemFilter, ProcessingMode};
use jav_meta_updater::reconcile::{ItemOutcome, Reconciler};
use jav_meta_updater::TransportError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DETAIL_PAGE: &str = r#"
<html><body>
  <div id="video_title"><h3 class="post-title text"><a href="/cn/?v=javli6lhxq">CJOD-160 痴女ヘブン 特別編</a></h3></div>
  <div id="video_jacket"><img id="video_jacket_img" src="//pics.dmm.co.jp/mono/movie/adult/cjod160/cjod160pl.jpg"></div>
  <div id="video_info">
    <div id="video_date"><table><tr><td class="text">2018-09-07</td></tr></table></div>
    <div id="video_maker"><span class="maker"><a href="vl_maker.php?m=arlq">痴女ヘブン</a></span></div>
    <div id="video_review"><span class="score">(8.20)</span></div>
    <div id="video_genres">
      <span class="genre"><a href="vl_genre.php?g=ky" class="genre">Drama</a></span>
      <span class="genre"><a href="vl_genre.php?g=a4" class="genre">巨乳</a></span>
    </div>
    <div id="video_cast">
      <span class="star"><a href="vl_star.php?s=ayuqi">山田花子</a></span>
      <span class="star"><a href="vl_star.php?s=azcbe">鈴木一美</a></span>
    </div>
  </div>
</body></html>
"#;

/// Fake catalog site and image host
#[derive(Default)]
struct FakeSite {
    catalog_requests: AtomicUsize,
    image_requests: AtomicUsize,
}

#[async_trait]
impl HttpTransport for FakeSite {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        if request.url.ends_with(".jpg") {
            self.image_requests.fetch_add(1, Ordering::SeqCst);
            return Ok(FetchResponse {
                status: 200,
                url: request.url.clone(),
                body: b"\xFF\xD8cover".to_vec(),
            });
        }

        self.catalog_requests.fetch_add(1, Ordering::SeqCst);
        let keyword = request
            .params
            .iter()
            .find(|(k, _)| k == "keyword")
            .map(|(_, v)| v.as_str())
            .unwrap_or_default();

        if keyword == "CJOD-160" {
            // Exact hits redirect straight to the detail page
            Ok(FetchResponse {
                status: 200,
                url: "https://www.javlibrary.com/cn/?v=javli6lhxq".to_string(),
                body: DETAIL_PAGE.as_bytes().to_vec(),
            })
        } else {
            Ok(FetchResponse {
                status: 200,
                url: format!("https://www.javlibrary.com/cn/vl_searchbyid.php?keyword={}", keyword),
                body: b"<div class=\"videos\"></div>".to_vec(),
            })
        }
    }
}

fn catalog_config() -> CatalogConfig {
    CatalogConfig {
        rate_limit_seconds: 0.0,
        ..CatalogConfig::default()
    }
}

fn build(
    site: Arc<FakeSite>,
    library: Arc<MemoryLibrary>,
    rules: RulesConfig,
    cache_dir: &TempDir,
    mode: ProcessingMode,
) -> BatchProcessor {
    let config = ConfigBuilder::new().with_genre_mapping("Drama", "剧情").build();
    let scraper = CatalogScraper::new(site.clone(), &catalog_config());
    let reconciler = Reconciler::new(library, Arc::new(scraper), rules, config.genre_mapping)
        .with_cover_cache(CoverCache::new(cache_dir.path().to_path_buf(), site));
    BatchProcessor::new(reconciler, 2, Duration::ZERO, mode)
}

fn library_with(files: &[(&str, &str)]) -> Arc<MemoryLibrary> {
    Arc::new(MemoryLibrary::new(files.iter().map(|f| LibraryItem::from(*f)).collect()))
}

#[tokio::test]
async fn test_full_update_end_to_end() {
    let cache_dir = TempDir::new().unwrap();
    let site = Arc::new(FakeSite::default());
    let library = library_with(&[("100", "/data/jav/CJOD-160 Some Title.mp4")]);
    let processor = build(site.clone(), library.clone(), RulesConfig::default(), &cache_dir, ProcessingMode::Update);

    let summary = processor.process_library(library.as_ref(), &ItemFilter::default()).await.unwrap();
    assert_eq!(summary.count(ItemOutcome::Updated), 1);
    assert_eq!(summary.reports[0].code.as_deref(), Some("CJOD-160"));
    assert!(summary.reports[0].fetched);

    let item = library.snapshot("100").unwrap();
    assert_eq!(item.title, "CJOD-160 痴女ヘブン 特別編");
    assert_eq!(item.collections, vec!["CJOD系列", "山田花子作品集"]);
    assert_eq!(item.genres, vec!["剧情", "巨乳"]);
    assert_eq!(item.cast, vec!["山田花子", "鈴木一美"]);
    assert_eq!(item.studio.as_deref(), Some("痴女ヘブン"));
    assert!(item.labels.contains(&"CJOD-160".to_string()));
    assert!(item.labels.contains(&"演员: 山田花子, 鈴木一美".to_string()));

    assert_eq!(
        library.posters(),
        vec![(
            "100".to_string(),
            PosterUpload::Url("https://pics.dmm.co.jp/mono/movie/adult/cjod160/cjod160pl.jpg".to_string())
        )]
    );
}

#[tokio::test]
async fn test_rerun_is_skipped_without_fetching() {
    let cache_dir = TempDir::new().unwrap();
    let site = Arc::new(FakeSite::default());
    let library = library_with(&[("100", "/data/jav/CJOD-160 Some Title.mp4")]);
    let processor = build(site.clone(), library.clone(), RulesConfig::default(), &cache_dir, ProcessingMode::Update);

    processor.process_library(library.as_ref(), &ItemFilter::default()).await.unwrap();
    let requests_after_first_run = site.catalog_requests.load(Ordering::SeqCst);
    let commits_after_first_run = library.commits().len();

    let summary = processor.process_library(library.as_ref(), &ItemFilter::default()).await.unwrap();
    assert_eq!(summary.count(ItemOutcome::Skipped), 1);
    assert_eq!(summary.fetched(), 0);
    assert_eq!(site.catalog_requests.load(Ordering::SeqCst), requests_after_first_run);
    assert_eq!(library.commits().len(), commits_after_first_run);
}

#[tokio::test]
async fn test_cover_falls_back_to_cached_file() {
    let cache_dir = TempDir::new().unwrap();
    let site = Arc::new(FakeSite::default());
    let library = Arc::new(
        MemoryLibrary::new(vec![LibraryItem::from(("100", "/data/jav/CJOD-160 Some Title.mp4"))]).fail_poster_urls(),
    );
    let processor = build(site.clone(), library.clone(), RulesConfig::default(), &cache_dir, ProcessingMode::Update);

    processor.process_library(library.as_ref(), &ItemFilter::default()).await.unwrap();

    let expected = cache_dir.path().join("CJOD-160_Some_Title.jpg");
    assert_eq!(library.posters(), vec![("100".to_string(), PosterUpload::File(expected.clone()))]);
    assert_eq!(std::fs::read(expected).unwrap(), b"\xFF\xD8cover");
    assert_eq!(site.image_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mixed_library_batch() {
    let cache_dir = TempDir::new().unwrap();
    let site = Arc::new(FakeSite::default());

    let mut grouped = LibraryItem::from(("2", "/data/jav/ABP-123.mp4"));
    grouped.genres = vec!["剧情".to_string()];
    grouped.studio = Some("Prestige".to_string());
    let mut done = grouped.clone();
    done.id = "3".to_string();
    done.file_path = Some("/data/jav/ABP-456.mp4".to_string());
    done.collections = vec!["ABP系列".to_string()];

    let library = Arc::new(MemoryLibrary::new(vec![
        LibraryItem::from(("1", "/data/jav/CJOD-160 Some Title.mp4")),
        grouped,
        done,
        LibraryItem::from(("4", "/data/jav/family trip.mkv")),
        LibraryItem::from(("5", "/data/jav/ZZZ-999.mp4")),
    ]));
    let rules = RulesConfig {
        download_covers: false,
        ..RulesConfig::default()
    };
    let processor = build(site.clone(), library.clone(), rules, &cache_dir, ProcessingMode::Update);

    let summary = processor.process_library(library.as_ref(), &ItemFilter::default()).await.unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(summary.count(ItemOutcome::Updated), 1);
    assert_eq!(summary.count(ItemOutcome::CollectionsOnly), 1);
    assert_eq!(summary.count(ItemOutcome::Skipped), 1);
    assert_eq!(summary.count(ItemOutcome::Unresolved), 1);
    assert_eq!(summary.count(ItemOutcome::NotFound), 1);
    assert_eq!(summary.successful, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.fetched(), 2);

    assert_eq!(library.snapshot("2").unwrap().collections, vec!["ABP系列"]);
    assert!(library.posters().is_empty());
    assert_eq!(site.image_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dry_run_with_code_filter() {
    let cache_dir = TempDir::new().unwrap();
    let site = Arc::new(FakeSite::default());
    let library = library_with(&[
        ("1", "/data/jav/ABP-123.mp4"),
        ("2", "/data/jav/cjod-160 some title.mp4"),
    ]);
    let processor = build(site.clone(), library.clone(), RulesConfig::default(), &cache_dir, ProcessingMode::DryRun);

    let filter = ItemFilter {
        limit: None,
        code: Some("CJOD-160".to_string()),
    };
    let summary = processor.process_library(library.as_ref(), &filter).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.count(ItemOutcome::DryRun), 1);
    assert_eq!(site.catalog_requests.load(Ordering::SeqCst), 1);
    assert!(library.commits().is_empty());
    assert!(library.posters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_catalog_requests_are_spaced_across_workers() {
    let site = Arc::new(FakeSite::default());
    let library = library_with(&[
        ("1", "/data/jav/AAA-001.mp4"),
        ("2", "/data/jav/BBB-002.mp4"),
        ("3", "/data/jav/CCC-003.mp4"),
    ]);
    let config = CatalogConfig {
        rate_limit_seconds: 2.0,
        ..CatalogConfig::default()
    };
    let scraper = CatalogScraper::new(site.clone(), &config);
    let reconciler = Reconciler::new(library.clone(), Arc::new(scraper), RulesConfig::default(), HashMap::new());
    let processor = BatchProcessor::new(reconciler, 3, Duration::ZERO, ProcessingMode::DryRun);

    let start = tokio::time::Instant::now();
    let summary = processor.process_library(library.as_ref(), &ItemFilter::default()).await.unwrap();

    assert_eq!(summary.count(ItemOutcome::NotFound), 3);
    assert!(start.elapsed() >= Duration::from_secs(4));
}
