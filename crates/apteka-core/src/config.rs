use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AptekaError, Result};

/// Top-level configuration for the apteka service.
///
/// Loaded from `~/.apteka/config.toml` by default. Secrets and endpoints can
/// be overridden from the environment after the file is read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AptekaConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub locations: LocationsConfig,
}

impl AptekaConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AptekaConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using an arbitrary variable lookup.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GOOGLE_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("GOOGLE_CHAT_MODEL_NAME") {
            self.llm.chat_model = v;
        }
        if let Some(v) = get("GOOGLE_EMBEDDING_MODEL_NAME") {
            self.index.embedding_model = v;
        }
        if let Some(v) = get("CHROMA_BASE_URL") {
            self.index.base_url = v;
        }
        if let Some(v) = get("CHROMA_COLLECTION_NAME") {
            self.index.collection = v;
        }
        if let Some(v) = get("APTEKA_API_TOKEN") {
            self.server.api_token = Some(v);
        }
    }

    /// Reject combinations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.session.history_cap == 0 {
            return Err(AptekaError::Config(
                "session.history_cap must be at least 1".to_string(),
            ));
        }
        for (key, secs) in [
            ("soft_ttl_secs", self.session.soft_ttl_secs),
            ("hard_ttl_secs", self.session.hard_ttl_secs),
        ] {
            if secs > MAX_SESSION_TTL_SECS {
                return Err(AptekaError::Config(format!(
                    "session.{} ({}) exceeds the maximum of {} seconds",
                    key, secs, MAX_SESSION_TTL_SECS
                )));
            }
        }
        if self.session.hard_ttl_secs <= self.session.soft_ttl_secs {
            return Err(AptekaError::Config(format!(
                "session.hard_ttl_secs ({}) must exceed session.soft_ttl_secs ({})",
                self.session.hard_ttl_secs, self.session.soft_ttl_secs
            )));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(AptekaError::Config(
                "session.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.index.top_n == 0 {
            return Err(AptekaError::Config(
                "index.top_n must be at least 1".to_string(),
            ));
        }
        if self.retrieval.summary_cap == 0 {
            return Err(AptekaError::Config(
                "retrieval.summary_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the locations database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.apteka/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Bearer token required on the chat endpoint. `None` leaves it open.
    pub api_token: Option<String>,
    /// Maximum accepted requests per second across all clients.
    pub rate_limit_per_sec: u64,
    /// Maximum multipart body size in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_token: None,
            rate_limit_per_sec: 50,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Upper bound for either session TTL (30 days).
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of history entries kept per session.
    pub history_cap: usize,
    /// Idle seconds after which history is reset on the next turn.
    pub soft_ttl_secs: u64,
    /// Idle seconds after which the sweeper deletes the session.
    pub hard_ttl_secs: u64,
    /// Seconds between sweeper runs.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_cap: 8,
            soft_ttl_secs: 15 * 60,
            hard_ttl_secs: 60 * 60,
            sweep_interval_secs: 30 * 60,
        }
    }
}

/// Language service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the generative language REST API.
    pub base_url: String,
    /// API key. Usually supplied through `GOOGLE_API_KEY`.
    pub api_key: String,
    /// Model used for classification and answer generation.
    pub chat_model: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: String::new(),
            chat_model: "gemini-2.0-flash".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Semantic index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base URL of the Chroma server.
    pub base_url: String,
    pub tenant: String,
    pub database: String,
    pub collection: String,
    /// Embedding model used for both ingestion and queries.
    pub embedding_model: String,
    /// Candidates requested per index query.
    pub top_n: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
            collection: "chatbot-pharmacies".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            top_n: 10,
            request_timeout_secs: 15,
        }
    }
}

/// Retrieval cascade tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum candidates summarized for the language service.
    pub summary_cap: usize,
    /// Maximum edit distance per field in the fuzzy post-filter.
    pub name_tolerance: usize,
    pub number_tolerance: usize,
    pub city_tolerance: usize,
    pub street_tolerance: usize,
    pub house_number_tolerance: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            summary_cap: 5,
            name_tolerance: 4,
            number_tolerance: 1,
            city_tolerance: 2,
            street_tolerance: 2,
            house_number_tolerance: 1,
        }
    }
}

/// Geospatial lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationsConfig {
    /// SQLite file holding the `locations` table. Relative paths resolve
    /// against `general.data_dir`.
    pub db_path: String,
    /// Number of nearby places reported per lookup.
    pub nearby_limit: usize,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            db_path: "locations.db".to_string(),
            nearby_limit: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = AptekaConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.server.port, 8080);
        assert!(config.server.api_token.is_none());
        assert_eq!(config.session.history_cap, 8);
        assert_eq!(config.session.soft_ttl_secs, 900);
        assert_eq!(config.session.hard_ttl_secs, 3600);
        assert_eq!(config.session.sweep_interval_secs, 1800);
        assert_eq!(config.index.top_n, 10);
        assert_eq!(config.retrieval.summary_cap, 5);
        assert_eq!(config.retrieval.name_tolerance, 4);
        assert_eq!(config.retrieval.city_tolerance, 2);
        assert_eq!(config.retrieval.number_tolerance, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[server]
port = 9090

[session]
history_cap = 4
"#;
        let file = create_temp_config(content);
        let config = AptekaConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.session.history_cap, 4);
        // Remaining fields use defaults
        assert_eq!(config.session.hard_ttl_secs, 3600);
        assert_eq!(config.index.collection, "chatbot-pharmacies");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(AptekaConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = AptekaConfig::load_or_default(Path::new("/nonexistent/apteka.toml"));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AptekaConfig::default();
        config.server.api_token = Some("secret".to_string());
        config.retrieval.name_tolerance = 3;
        config.save(&path).unwrap();

        let reloaded = AptekaConfig::load(&path).unwrap();
        assert_eq!(reloaded.server.api_token.as_deref(), Some("secret"));
        assert_eq!(reloaded.retrieval.name_tolerance, 3);
    }

    // ---- Environment overrides ----

    #[test]
    fn test_overrides_applied() {
        let vars: HashMap<&str, &str> = [
            ("GOOGLE_API_KEY", "key-123"),
            ("CHROMA_BASE_URL", "http://chroma:8000"),
            ("CHROMA_COLLECTION_NAME", "pharm"),
            ("APTEKA_API_TOKEN", "tok"),
        ]
        .into_iter()
        .collect();

        let mut config = AptekaConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key, "key-123");
        assert_eq!(config.index.base_url, "http://chroma:8000");
        assert_eq!(config.index.collection, "pharm");
        assert_eq!(config.server.api_token.as_deref(), Some("tok"));
        // Untouched
        assert_eq!(config.llm.chat_model, "gemini-2.0-flash");
    }

    #[test]
    fn test_blank_override_ignored() {
        let mut config = AptekaConfig::default();
        config.apply_overrides_from(|k| (k == "CHROMA_BASE_URL").then(|| "  ".to_string()));
        assert_eq!(config.index.base_url, "http://localhost:8000");
    }

    // ---- Validation ----

    #[test]
    fn test_validate_rejects_inverted_ttls() {
        let mut config = AptekaConfig::default();
        config.session.hard_ttl_secs = config.session.soft_ttl_secs;
        assert!(matches!(config.validate(), Err(AptekaError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_ttls() {
        let mut config = AptekaConfig::default();
        config.session.hard_ttl_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(AptekaError::Config(_))));

        let mut config = AptekaConfig::default();
        config.session.soft_ttl_secs = MAX_SESSION_TTL_SECS + 1;
        config.session.hard_ttl_secs = MAX_SESSION_TTL_SECS + 2;
        assert!(config.validate().is_err());

        let mut config = AptekaConfig::default();
        config.session.hard_ttl_secs = MAX_SESSION_TTL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut config = AptekaConfig::default();
        config.session.history_cap = 0;
        assert!(config.validate().is_err());

        let mut config = AptekaConfig::default();
        config.index.top_n = 0;
        assert!(config.validate().is_err());

        let mut config = AptekaConfig::default();
        config.retrieval.summary_cap = 0;
        assert!(config.validate().is_err());
    }
}
