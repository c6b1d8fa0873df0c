use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const JWT_SECRET_ENV: &str = "MEDIA_JANITOR_JWT_SECRET";
pub const ENCRYPTION_KEY_ENV: &str = "MEDIA_JANITOR_ENCRYPTION_KEY";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(rename = "maxConnections", default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(rename = "jwtSecret")]
    pub jwt_secret: Option<String>,
    /// Base64 encoded 32 byte key for the stored API keys
    #[serde(rename = "encryptionKey")]
    pub encryption_key: Option<String>,
    #[serde(rename = "tokenLifetimeHours")]
    pub token_lifetime_hours: Option<u64>,
    #[serde(rename = "bcryptCost")]
    pub bcrypt_cost: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Six-field cron expression (seconds first)
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(rename = "manualCooldownSeconds", default = "default_cooldown")]
    pub manual_cooldown_seconds: u64,
    #[serde(rename = "requestTimeoutSeconds", default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(rename = "fetchTimeoutSeconds", default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    #[serde(rename = "pageSize", default = "default_page_size")]
    pub page_size: u32,
    #[serde(rename = "pruneMissing", default)]
    pub prune_missing: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schedule: default_schedule(),
            manual_cooldown_seconds: default_cooldown(),
            request_timeout_seconds: default_request_timeout(),
            fetch_timeout_seconds: default_fetch_timeout(),
            page_size: default_page_size(),
            prune_missing: false,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> String {
    "media-janitor.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_schedule() -> String {
    "0 0 3 * * *".to_string()
}

fn default_cooldown() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_page_size() -> u32 {
    50
}

impl Configuration {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let mut config: Configuration = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(JWT_SECRET_ENV) {
            self.security.jwt_secret = Some(secret);
        }
        if let Ok(key) = std::env::var(ENCRYPTION_KEY_ENV) {
            self.security.encryption_key = Some(key);
        }
    }

    pub fn jwt_secret(&self) -> anyhow::Result<&str> {
        self.security
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("security.jwtSecret (or {}) must be set", JWT_SECRET_ENV))
    }

    pub fn encryption_key(&self) -> anyhow::Result<&str> {
        self.security
            .encryption_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("security.encryptionKey (or {}) must be set", ENCRYPTION_KEY_ENV)
            })
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.security.token_lifetime_hours.unwrap_or(24) * 60 * 60)
    }

    pub fn bcrypt_cost(&self) -> u32 {
        self.security.bcrypt_cost.unwrap_or(bcrypt::DEFAULT_COST)
    }

    pub fn manual_cooldown(&self) -> Duration {
        Duration::from_secs(self.sync.manual_cooldown_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.fetch_timeout_seconds)
    }

    pub fn database_url(&self) -> String {
        if self.database.path.starts_with("sqlite:") {
            self.database.path.clone()
        } else {
            format!("sqlite://{}?mode=rwc", self.database.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Configuration::from_yaml("{}").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.sync.schedule, "0 0 3 * * *");
        assert_eq!(config.manual_cooldown(), Duration::from_secs(300));
        assert_eq!(config.sync.page_size, 50);
        assert!(!config.sync.prune_missing);
        assert_eq!(config.database_url(), "sqlite://media-janitor.db?mode=rwc");
    }

    #[test]
    fn camel_case_keys_are_read() {
        let yaml = r#"
database:
  path: "sqlite::memory:"
  maxConnections: 1
security:
  jwtSecret: "s3cret"
  tokenLifetimeHours: 2
sync:
  manualCooldownSeconds: 60
  pageSize: 20
  pruneMissing: true
"#;
        let config = Configuration::from_yaml(yaml).unwrap();
        assert_eq!(config.database.max_connections, 1);
        assert_eq!(config.database_url(), "sqlite::memory:");
        assert_eq!(config.token_lifetime(), Duration::from_secs(7200));
        assert_eq!(config.manual_cooldown(), Duration::from_secs(60));
        assert_eq!(config.sync.page_size, 20);
        assert!(config.sync.prune_missing);
    }

    #[test]
    fn missing_encryption_key_is_reported() {
        let config = Configuration::default();
        if std::env::var(ENCRYPTION_KEY_ENV).is_err() {
            assert!(config.encryption_key().is_err());
        }
    }
}
