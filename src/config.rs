//! Configuration management for recipe-adjust using the prefer crate.
//!
//! A config file (`recipe-adjust.{toml,yaml,json}`) is discovered with
//! prefer and parsed with serde. Every section has defaults, so running
//! without a file works; selected environment variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::ProvidersConfig;
use crate::pipeline::ValidatorConfig;
use crate::repository::DbContext;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "recipe-adjust.db";

/// Name prefer searches for.
const CONFIG_NAME: &str = "recipe-adjust";

/// Application settings resolved from config, flags and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    /// Set via DATABASE_URL env var or config.
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recipe-adjust");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
        }
    }
}

impl Settings {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        self.database_url.is_some() || self.database_path().exists()
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    pub fn create_db_context(&self) -> DbContext {
        DbContext::from_url(&self.database_url())
    }
}

/// Worker pool and stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent workers in `serve` and `worker`.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How often idle workers look for claimable requests.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lease length; renewed at every stage boundary.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_knowledge_top_k")]
    pub knowledge_top_k: usize,
    #[serde(default = "default_knowledge_timeout_secs")]
    pub knowledge_timeout_secs: u64,
    /// Extra planning rounds after a validation rejection.
    #[serde(default)]
    pub validation_replans: u32,
    /// Completion events delivered per outbox pass.
    #[serde(default = "default_outbox_batch")]
    pub outbox_batch: i64,
    #[serde(default)]
    pub validator: ValidatorConfig,
}

fn default_workers() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_knowledge_top_k() -> usize {
    3
}

fn default_knowledge_timeout_secs() -> u64 {
    10
}

fn default_outbox_batch() -> i64 {
    50
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_ttl_secs: default_lease_ttl_secs(),
            knowledge_top_k: default_knowledge_top_k(),
            knowledge_timeout_secs: default_knowledge_timeout_secs(),
            validation_replans: 0,
            outbox_batch: default_outbox_batch(),
            validator: ValidatorConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn knowledge_timeout(&self) -> Duration {
        Duration::from_secs(self.knowledge_timeout_secs)
    }

    /// Apply ADJUST_WORKERS.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(workers) = std::env::var("ADJUST_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.workers = workers;
        }
        self
    }
}

/// Where collaborator data comes from.
///
/// Each URL switches that collaborator to its HTTP client; anything left
/// unset is served from `fixtures` (or an empty in-memory store).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookbook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_url: Option<String>,
    /// Completion events are POSTed here; logged when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_webhook: Option<String>,
    /// JSON fixtures file for the in-memory collaborators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixtures: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CollaboratorsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    pub async fn load() -> Self {
        match prefer::load(CONFIG_NAME).await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("{}; using defaults", e);
                            Self::default_with_env()
                        }
                    }
                } else {
                    Self::default_with_env()
                }
            }
            // No config file found
            Err(_) => Self::default_with_env(),
        }
    }

    pub fn default_with_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        self.pipeline = self.pipeline.with_env_overrides();
        self.providers = self.providers.with_env_overrides();
        self
    }

    /// The config file's parent directory, if loaded from a file.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
    }

    /// Fixture path resolved against the config file location.
    pub fn fixtures_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.collaborators
            .fixtures
            .as_deref()
            .map(|p| self.resolve_path(p, base_dir))
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory or database file (--data flag).
    pub data: Option<PathBuf>,
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

fn is_db_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3")
        || (path.exists() && path.is_file())
}

/// Look for a config file next to the database.
fn find_config_next_to_db(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["toml", "yaml", "yml", "json"];
    let basenames = [CONFIG_NAME, "config"];

    for basename in basenames {
        for ext in extensions {
            let path = data_dir.join(format!("{}.{}", basename, ext));
            if path.exists() {
                return Some(path);
            }
        }
    }
    None
}

async fn load_file_config(options: &LoadOptions, data_dir: Option<&Path>) -> Config {
    // Priority 1: Explicit --config flag
    if let Some(ref config_path) = options.config_path {
        return match Config::load_from_path(config_path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                Config::default_with_env()
            }
        };
    }

    // Priority 2: Config next to data dir
    if let Some(data_dir) = data_dir {
        if let Some(config_path) = find_config_next_to_db(data_dir) {
            tracing::debug!("Found config next to data dir: {}", config_path.display());
            if let Ok(config) = Config::load_from_path(&config_path).await {
                return config;
            }
        }
    }

    // Priority 3: Auto-discover via prefer
    Config::load().await
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let data = options.data.as_deref().map(absolute);
    let (data_dir, database_filename) = match data {
        Some(ref path) if is_db_file(path) => (
            path.parent().map(Path::to_path_buf),
            path.file_name().and_then(|n| n.to_str()).map(str::to_string),
        ),
        Some(ref path) => (Some(path.clone()), None),
        None => (None, None),
    };

    let config = load_file_config(&options, data_dir.as_deref()).await;

    let mut settings = Settings::default();
    let base_dir = if options.use_cwd {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    } else {
        config
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    };
    config.apply_to_settings(&mut settings, &base_dir);

    // --data override takes precedence over the config file
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    if let Some(filename) = database_filename {
        settings.database_filename = filename;
    }

    // DATABASE_URL environment variable takes highest precedence
    if let Some(database_url) = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
        tracing::debug!("Using DATABASE_URL from environment: {}", database_url);
        settings.database_url = Some(database_url);
    }

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.knowledge_top_k, 3);
        assert_eq!(config.pipeline.validation_replans, 0);
        assert_eq!(config.pipeline.validator.max_spike_ratio, 3.0);
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.providers.retry.max_attempts_per_stage, 2);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "~/recipes"

            [pipeline]
            workers = 4
            validation_replans = 1

            [pipeline.validator]
            max_spike_ratio = 2.0

            [collaborators]
            fixtures = "fixtures.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.lease_ttl_secs, 300);
        assert_eq!(config.pipeline.validator.max_spike_ratio, 2.0);
        assert_eq!(config.pipeline.validator.max_dropped_fraction, 0.5);
        assert_eq!(
            config.fixtures_path(Path::new("/etc/recipe-adjust")),
            Some(PathBuf::from("/etc/recipe-adjust/fixtures.json"))
        );
    }

    #[test]
    fn test_yaml_config() {
        let config: Config = serde_yaml::from_str(
            "server:\n  bind: 0.0.0.0:9000\ncollaborators:\n  catalog_url: http://catalog\n",
        )
        .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(
            config.collaborators.catalog_url.as_deref(),
            Some("http://catalog")
        );
    }

    #[test]
    fn test_settings_database_url() {
        let settings = Settings::with_data_dir(PathBuf::from("/data"));
        assert_eq!(settings.database_url(), "sqlite:/data/recipe-adjust.db");

        let settings = Settings {
            database_url: Some("sqlite:/tmp/other.db".to_string()),
            ..Settings::with_data_dir(PathBuf::from("/data"))
        };
        assert_eq!(settings.database_url(), "sqlite:/tmp/other.db");
        assert!(settings.database_exists());
    }

    #[tokio::test]
    async fn test_load_from_path_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe-adjust.json");
        std::fs::write(&path, r#"{"pipeline": {"knowledge_top_k": 5}}"#).unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.pipeline.knowledge_top_k, 5);
        assert_eq!(config.base_dir(), Some(dir.path().to_path_buf()));
        assert!(Config::load_from_path(&dir.path().join("missing.toml"))
            .await
            .is_err());
    }
}
