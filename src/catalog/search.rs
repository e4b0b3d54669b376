/// Search-by-code flow against the catalog site
use super::client::{FetchOutcome, RateLimitedClient, RetryPolicy};
use super::parser::DetailPageParser;
use super::transport::{FetchRequest, FetchResponse, HttpTransport, DEFAULT_USER_AGENT};
use super::{Metadata, MetadataSource};
use crate::code::CatalogCode;
use crate::config::CatalogConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const SEARCH_PAGE: &str = "vl_searchbyid.php";

/// JavLibrary scraper: search, follow, parse
pub struct CatalogScraper {
    client: RateLimitedClient,
    parser: DetailPageParser,
    base_url: String,
    language: String,
    headers: Vec<(String, String)>,
    debug_dir: Option<PathBuf>,
}

impl CatalogScraper {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &CatalogConfig) -> Self {
        let policy = RetryPolicy::new(
            Duration::from_secs_f64(config.rate_limit_seconds.max(0.0)),
            config.max_retries,
        );
        let base_url = config.base_url.trim_end_matches('/').to_string();

        Self {
            client: RateLimitedClient::new(transport, policy),
            parser: DetailPageParser::new(&base_url),
            base_url,
            language: config.language.clone(),
            headers: default_headers(config),
            debug_dir: None,
        }
    }

    /// Directory where pages without any primary field are saved
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    /// Base URL including the language path segment (`en` has none)
    fn site_root(&self) -> String {
        if self.language.is_empty() || self.language == "en" {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, self.language)
        }
    }

    /// Search the catalog for a code and parse its detail page
    pub async fn search_by_code(&self, code: &CatalogCode) -> Result<Option<Metadata>, TransportError> {
        let code_str = code.to_string();
        let search_url = format!("{}/{}", self.site_root(), SEARCH_PAGE);
        info!("🔍 Searching catalog for {}", code_str);

        let request = FetchRequest::get(&search_url)
            .with_param("keyword", &code_str)
            .with_headers(&self.headers);

        let response = match self.client.fetch(request).await? {
            FetchOutcome::Success(response) => response,
            FetchOutcome::Failure { status, attempts } => {
                warn!("Search for {} failed: HTTP {} after {} attempts", code_str, status, attempts);
                return Ok(None);
            }
        };
        debug!("Search response for {} resolved to {}", code_str, response.url);

        // The site jumps straight to the detail page on an exact hit
        if !response.url.contains(SEARCH_PAGE) {
            return Ok(Some(self.parse_detail(&response, code).await));
        }

        match self.find_result_link(&response.text(), code) {
            Some(detail_url) => self.fetch_detail(&detail_url, code).await,
            None => {
                warn!("No catalog entry found for {}", code_str);
                Ok(None)
            }
        }
    }

    async fn fetch_detail(&self, url: &str, code: &CatalogCode) -> Result<Option<Metadata>, TransportError> {
        debug!("📄 Fetching detail page: {}", url);
        let request = FetchRequest::get(url).with_headers(&self.headers);
        match self.client.fetch(request).await? {
            FetchOutcome::Success(response) => Ok(Some(self.parse_detail(&response, code).await)),
            FetchOutcome::Failure { status, .. } => {
                warn!("Detail page {} failed: HTTP {}", url, status);
                Ok(None)
            }
        }
    }

    /// First `?v=` result link whose text contains the code
    fn find_result_link(&self, html: &str, code: &CatalogCode) -> Option<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse(r#"a[href*="?v="]"#).ok()?;
        let needle = code.to_string();

        let href = document
            .select(&selector)
            .find(|link| link.text().collect::<String>().to_uppercase().contains(&needle))
            .and_then(|link| link.value().attr("href"))?;

        let root = format!("{}/", self.site_root());
        Url::parse(&root)
            .and_then(|base| base.join(href))
            .map(|u| u.to_string())
            .ok()
    }

    async fn parse_detail(&self, response: &FetchResponse, code: &CatalogCode) -> Metadata {
        let html = response.text();
        let metadata = self.parser.parse(&html, code);

        if metadata.is_blank() {
            warn!("⚠️ Detail page for {} had no title, genres or cast", code);
            if let Some(dir) = &self.debug_dir {
                let path = dir.join(format!("debug_page_{}.html", code));
                match tokio::fs::write(&path, html.as_bytes()).await {
                    Ok(()) => debug!("Saved page HTML to {}", path.display()),
                    Err(e) => debug!("Could not save page HTML to {}: {}", path.display(), e),
                }
            }
        }

        metadata
    }
}

#[async_trait]
impl MetadataSource for CatalogScraper {
    async fn lookup(&self, code: &CatalogCode) -> Result<Option<Metadata>, TransportError> {
        self.search_by_code(code).await
    }
}

fn default_headers(config: &CatalogConfig) -> Vec<(String, String)> {
    let mut headers = vec![
        (
            "User-Agent".to_string(),
            config.user_agent.clone().unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        ),
        ("Accept-Language".to_string(), "zh-CN,zh;q=0.9,en;q=0.8".to_string()),
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".to_string(),
        ),
        ("DNT".to_string(), "1".to_string()),
        ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
    ];
    if let Some(cookies) = config.cookies.as_ref().filter(|c| !c.trim().is_empty()) {
        headers.push(("Cookie".to_string(), cookies.trim().to_string()));
    }
    headers
}
