use serde::Deserialize;
use std::{fs, path::Path};
use usage_client::MeterPoint;

use crate::ingest::DEFAULT_BATCH_SIZE;

const DEFAULT_CONFIG_PATH: &str = "octo-usage.toml";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct OctopusConfig {
    pub base_url: String,
    pub api_key: String,
    pub mpan: String,
    pub meter_serial: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for OctopusConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.octopus.energy".to_string(),
            api_key: String::new(),
            mpan: String::new(),
            meter_serial: String::new(),
            page_size: 1000,
            request_timeout_secs: 30,
            max_retries: 0,
            retry_backoff_ms: 1000,
        }
    }
}

// Hand-written so the API key never ends up in logs.
impl std::fmt::Debug for OctopusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctopusConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("mpan", &self.mpan)
            .field("meter_serial", &self.meter_serial)
            .field("page_size", &self.page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

/// Either a full `uri` or the individual connection parts.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub uri: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub ensure_schema: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            uri: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "octopus".to_string(),
            password: "octopus".to_string(),
            database: "octopus_energy".to_string(),
            max_connections: 2,
            ensure_schema: true,
        }
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("uri", &self.uri.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("ensure_schema", &self.ensure_schema)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub batch_size: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub octopus: OctopusConfig,
    pub postgres: PostgresConfig,
    pub sink: SinkConfig,
}

impl AppConfig {
    /// Load from `path`, else `OCTO_USAGE_CONFIG`, else `octo-usage.toml` in
    /// the working directory (skipped when absent), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        use std::env;

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("OCTO_USAGE_CONFIG").map(Into::into));

        let mut cfg = match explicit {
            Some(path) => {
                let contents = fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
                Self::from_toml_str(&contents)?
            }
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_toml_str(&fs::read_to_string(DEFAULT_CONFIG_PATH)?)?
            }
            None => Self::default(),
        };

        cfg.apply_env(|key| env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    /// Overlay the variables the tool has always honoured. `DATABASE_URL`
    /// takes precedence over the `POSTGRES_*` parts.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("OCTOPUS_API_KEY") {
            self.octopus.api_key = v;
        }
        if let Some(v) = var("OCTOPUS_ELECTRICITY_MPAN") {
            self.octopus.mpan = v;
        }
        if let Some(v) = var("OCTOPUS_ELECTRICITY_SN") {
            self.octopus.meter_serial = v;
        }

        if let Some(v) = var("DATABASE_URL") {
            self.postgres.uri = Some(v);
        }
        if let Some(v) = var("POSTGRES_HOST") {
            self.postgres.host = v;
        }
        if let Some(port) = var("POSTGRES_PORT").and_then(|v| v.trim().parse().ok()) {
            self.postgres.port = port;
        }
        if let Some(v) = var("POSTGRES_USER") {
            self.postgres.user = v;
        }
        if let Some(v) = var("POSTGRES_PASSWORD") {
            self.postgres.password = v;
        }
        if let Some(v) = var("POSTGRES_DB") {
            self.postgres.database = v;
        }
    }

    pub fn meter_point(&self) -> anyhow::Result<MeterPoint> {
        Ok(MeterPoint::new(&self.octopus.mpan, &self.octopus.meter_serial)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.octopus.api_key.trim().is_empty() {
            anyhow::bail!("octopus.api_key (or OCTOPUS_API_KEY) must be set");
        }
        if self.octopus.page_size == 0 {
            anyhow::bail!("octopus.page_size must be at least 1");
        }
        if self.sink.batch_size == 0 {
            anyhow::bail!("sink.batch_size must be at least 1");
        }
        self.meter_point()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();

        assert_eq!(cfg.octopus.base_url, "https://api.octopus.energy");
        assert_eq!(cfg.octopus.page_size, 1000);
        assert_eq!(cfg.postgres.port, 5432);
        assert!(cfg.postgres.uri.is_none());
        assert_eq!(cfg.sink.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn toml_sections_override_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [octopus]
            api_key = "sk_live_abc"
            mpan = "1200012345678"
            meter_serial = "21L1234567"
            page_size = 250

            [postgres]
            uri = "postgres://octopus:secret@db:5432/octopus_energy"

            [sink]
            batch_size = 96
            "#,
        )
        .unwrap();

        assert_eq!(cfg.octopus.page_size, 250);
        assert_eq!(cfg.sink.batch_size, 96);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.meter_point().unwrap().mpan(), "1200012345678");
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut cfg = AppConfig::from_toml_str("[octopus]\napi_key = \"from-file\"").unwrap();
        cfg.apply_env(env(&[
            ("OCTOPUS_API_KEY", "from-env"),
            ("OCTOPUS_ELECTRICITY_MPAN", "1200012345678"),
            ("OCTOPUS_ELECTRICITY_SN", "21L1234567"),
            ("POSTGRES_HOST", "db.internal"),
            ("POSTGRES_PORT", "6543"),
        ]));

        assert_eq!(cfg.octopus.api_key, "from-env");
        assert_eq!(cfg.postgres.host, "db.internal");
        assert_eq!(cfg.postgres.port, 6543);
        assert!(cfg.postgres.uri.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn database_url_and_blank_values() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(env(&[
            ("DATABASE_URL", "postgres://u:p@h/db"),
            ("POSTGRES_USER", "  "),
        ]));

        assert_eq!(cfg.postgres.uri.as_deref(), Some("postgres://u:p@h/db"));
        assert_eq!(cfg.postgres.user, "octopus");
    }

    #[test]
    fn validate_requires_api_key_and_meter() {
        let mut cfg = AppConfig::default();
        assert!(cfg.validate().is_err());

        cfg.octopus.api_key = "sk_live_abc".to_string();
        cfg.octopus.mpan = "123".to_string();
        cfg.octopus.meter_serial = "21L1234567".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut cfg = AppConfig::default();
        cfg.octopus.api_key = "sk_live_abc".to_string();
        cfg.postgres.uri = Some("postgres://u:p@h/db".to_string());

        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("sk_live_abc"));
        assert!(!rendered.contains("u:p@h"));
    }
}
