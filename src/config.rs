use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration for the JAV metadata updater
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Catalog site access
    pub catalog: CatalogConfig,

    /// Media library connection
    pub library: LibraryConfig,

    /// Update rules
    pub rules: RulesConfig,

    /// Worker pool and batch pacing
    pub processing: ProcessingConfig,

    /// Log output
    pub logging: LoggingConfig,

    /// Genre translations applied to non-CJK genres
    pub genre_mapping: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog site root
    pub base_url: String,

    /// Site language path segment (`en` has none)
    pub language: String,

    /// HTTP(S) proxy URL
    pub proxy: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_seconds: u64,

    /// Raw `Cookie` header value
    pub cookies: Option<String>,

    /// User agent override
    pub user_agent: Option<String>,

    /// Minimum spacing between catalog requests in seconds
    pub rate_limit_seconds: f64,

    /// Attempts per request, including the first
    pub max_retries: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.javlibrary.com".to_string(),
            language: "cn".to_string(),
            proxy: None,
            timeout_seconds: 10,
            cookies: None,
            user_agent: None,
            rate_limit_seconds: 1.0,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Plex server URL
    pub url: String,

    /// Plex auth token
    pub token: String,

    /// Library section name
    pub section: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:32400".to_string(),
            token: String::new(),
            section: String::new(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Also add the studio name as a collection
    pub add_studio_collection: bool,

    /// Upload the catalog cover as the poster
    pub download_covers: bool,

    /// Replace posters that were already uploaded
    pub overwrite_posters: bool,

    /// Maximum number of cast names written
    pub max_cast: usize,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            add_studio_collection: false,
            download_covers: true,
            overwrite_posters: false,
            max_cast: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Maximum number of concurrent workers
    pub workers: usize,

    /// Pause after each item that hit the catalog, in seconds
    pub item_delay_seconds: f64,

    /// Cover image cache directory
    pub cover_cache_dir: PathBuf,

    /// Where pages without any primary field are saved
    pub debug_dir: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().min(2),
            item_delay_seconds: 3.0,
            cover_cache_dir: std::env::temp_dir().join("jav_covers"),
            debug_dir: Some(PathBuf::from(".")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log file path, empty disables file logging
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: Some(PathBuf::from("jav_meta_updater.log")),
        }
    }
}

impl Config {
    /// Load configuration, trying the default locations when no path is given
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_from(
            explicit,
            &[Path::new("config.toml"), Path::new("config/jav-meta-updater.toml")],
        )
    }

    /// Load from `explicit`, or from the first candidate that parses.
    ///
    /// An explicit path must load. Candidates that exist but fail to parse
    /// are reported and skipped.
    pub fn load_from(explicit: Option<&Path>, candidates: &[&Path]) -> Result<Self> {
        if let Some(path) = explicit {
            let config = Self::from_file(path)?;
            tracing::info!("📄 Loaded configuration from: {}", path.display());
            return Ok(config.with_env_overrides());
        }

        for path in candidates {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::info!("No configuration file found, using defaults and environment");
        Ok(Self::from_env())
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        toml::from_str(&config_str).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("JAV_META_LIBRARY_URL") {
            self.library.url = url;
        }

        if let Ok(token) = std::env::var("JAV_META_LIBRARY_TOKEN") {
            self.library.token = token;
        }

        if let Ok(section) = std::env::var("JAV_META_LIBRARY_SECTION") {
            self.library.section = section;
        }

        if let Ok(proxy) = std::env::var("JAV_META_PROXY") {
            self.catalog.proxy = Some(proxy);
        }

        if let Ok(cookies) = std::env::var("JAV_META_COOKIES") {
            self.catalog.cookies = Some(cookies);
        }

        if let Ok(workers) = std::env::var("JAV_META_WORKERS") {
            match workers.parse() {
                Ok(n) => self.processing.workers = n,
                Err(_) => tracing::warn!("Ignoring invalid JAV_META_WORKERS value: {}", workers),
            }
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    ///
    /// Library credentials are only required when items will be written.
    pub fn validate(&self, dry_run: bool) -> Result<()> {
        if self.processing.workers == 0 {
            return Err(anyhow!("workers must be greater than 0"));
        }

        if self.catalog.max_retries == 0 {
            return Err(anyhow!("max_retries must be greater than 0"));
        }

        if self.catalog.rate_limit_seconds < 0.0 || !self.catalog.rate_limit_seconds.is_finite() {
            return Err(anyhow!("rate_limit_seconds must be a non-negative number"));
        }

        if self.processing.item_delay_seconds < 0.0 || !self.processing.item_delay_seconds.is_finite() {
            return Err(anyhow!("item_delay_seconds must be a non-negative number"));
        }

        if self.library.url.trim().is_empty() {
            return Err(anyhow!("library url is required"));
        }

        if !dry_run {
            if self.library.token.trim().is_empty() {
                return Err(anyhow!("library token is required"));
            }
            if self.library.section.trim().is_empty() {
                return Err(anyhow!("library section is required"));
            }
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "JAV Meta Updater Configuration:\n\
            - Catalog: {} ({})\n\
            - Proxy: {}\n\
            - Rate Limit: {:.1}s, {} attempts\n\
            - Library: {} / {}\n\
            - Workers: {}\n\
            - Item Delay: {:.1}s\n\
            - Covers: {} (cache {})\n\
            - Genre Mappings: {}",
            self.catalog.base_url,
            self.catalog.language,
            self.catalog.proxy.as_deref().unwrap_or("none"),
            self.catalog.rate_limit_seconds,
            self.catalog.max_retries,
            self.library.url,
            self.library.section,
            self.processing.workers,
            self.processing.item_delay_seconds,
            self.rules.download_covers,
            self.processing.cover_cache_dir.display(),
            self.genre_mapping.len()
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.processing.workers = workers;
        self
    }

    pub fn with_library(mut self, url: &str, token: &str, section: &str) -> Self {
        self.config.library.url = url.to_string();
        self.config.library.token = token.to_string();
        self.config.library.section = section.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.catalog.base_url = base_url.to_string();
        self
    }

    pub fn with_rate_limit(mut self, seconds: f64) -> Self {
        self.config.catalog.rate_limit_seconds = seconds;
        self
    }

    pub fn with_item_delay(mut self, seconds: f64) -> Self {
        self.config.processing.item_delay_seconds = seconds;
        self
    }

    pub fn with_cover_cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.processing.cover_cache_dir = dir;
        self
    }

    pub fn with_genre_mapping(mut self, from: &str, to: &str) -> Self {
        self.config.genre_mapping.insert(from.to_string(), to.to_string());
        self
    }

    pub fn add_studio_collection(mut self, enable: bool) -> Self {
        self.config.rules.add_studio_collection = enable;
        self
    }

    pub fn download_covers(mut self, enable: bool) -> Self {
        self.config.rules.download_covers = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.catalog.base_url, "https://www.javlibrary.com");
        assert_eq!(config.catalog.language, "cn");
        assert_eq!(config.catalog.max_retries, 3);
        assert_eq!(config.rules.max_cast, 5);
        assert!(config.rules.download_covers);
        assert!(!config.rules.overwrite_posters);
        assert!(config.processing.workers >= 1 && config.processing.workers <= 2);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_workers(4)
            .with_library("http://plex:32400", "abc", "JAV")
            .with_genre_mapping("Big Tits", "巨乳")
            .add_studio_collection(true)
            .build();

        assert_eq!(config.processing.workers, 4);
        assert_eq!(config.library.section, "JAV");
        assert_eq!(config.genre_mapping.get("Big Tits").map(String::as_str), Some("巨乳"));
        assert!(config.rules.add_studio_collection);
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[catalog]
language = "en"
rate_limit_seconds = 2.5

[library]
url = "http://plex:32400"
token = "secret"
section = "JAV"

[genre_mapping]
"Big Tits" = "巨乳"
Drama = "剧情"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.catalog.language, "en");
        assert_eq!(config.catalog.rate_limit_seconds, 2.5);
        assert_eq!(config.catalog.timeout_seconds, 10);
        assert_eq!(config.library.token, "secret");
        assert_eq!(config.genre_mapping.len(), 2);
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let config = ConfigBuilder::new()
            .with_library("http://plex:32400", "t", "JAV")
            .with_genre_mapping("Drama", "剧情")
            .with_workers(4)
            .build();
        config.save(&path).unwrap();

        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.processing.workers, 4);
        assert_eq!(reloaded.library.section, "JAV");
        assert_eq!(reloaded.genre_mapping.get("Drama").map(String::as_str), Some("剧情"));
    }

    #[test]
    fn test_malformed_candidate_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("config.toml");
        std::fs::write(&broken, "[catalog\nlanguage = ").unwrap();
        let good = dir.path().join("fallback.toml");
        std::fs::write(&good, "[library]\nsection = \"Fallback\"\n").unwrap();

        let config = Config::load_from(None, &[broken.as_path(), good.as_path()]).unwrap();
        assert_eq!(config.library.section, "Fallback");

        let config = Config::load_from(None, &[broken.as_path()]).unwrap();
        assert_eq!(config.catalog.language, "cn");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/jav.toml"))).is_err());
    }

    #[test]
    fn test_config_validation() {
        let config = ConfigBuilder::new().with_library("http://plex:32400", "t", "JAV").build();
        assert!(config.validate(false).is_ok());

        let no_workers = ConfigBuilder::new().with_library("http://p", "t", "s").with_workers(0).build();
        assert!(no_workers.validate(false).is_err());

        let negative_rate = ConfigBuilder::new().with_library("http://p", "t", "s").with_rate_limit(-1.0).build();
        assert!(negative_rate.validate(false).is_err());

        let mut no_retries = ConfigBuilder::new().with_library("http://p", "t", "s").build();
        no_retries.catalog.max_retries = 0;
        assert!(no_retries.validate(false).is_err());

        let no_token = ConfigBuilder::new().with_library("http://p", "", "s").build();
        assert!(no_token.validate(false).is_err());
        assert!(no_token.validate(true).is_ok());
    }
}
