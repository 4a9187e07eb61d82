use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

/// Fallbacks applied when neither a config file nor `APP__*` sets a key.
mod defaults {
    pub const RUN_ENV: &str = "development";
    pub const CONFIG_DIR: &str = "config";
    pub const DATABASE_URL: &str = "sqlite://storefront.db?mode=rwc";
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 8080;
    pub const LOG_LEVEL: &str = "info";
    pub const TOKEN_TTL_SECS: i64 = 3600;
    pub const JWT_ISSUER: &str = "saree-storefront";
    pub const JWT_AUDIENCE: &str = "saree-storefront-api";
    pub const DB_MAX_CONNECTIONS: u32 = 10;
    pub const DB_MIN_CONNECTIONS: u32 = 1;
    pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 8;
    pub const PAGE_SIZE: u64 = 20;
    pub const MAX_PAGE_SIZE: u64 = 100;
    pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

    /// Signing key shipped for local runs only.
    pub const DEV_JWT_SECRET: &str =
        "development_only_storefront_signing_key_replace_before_deploying";
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const WEAK_SECRET_FRAGMENTS: [&str; 3] = ["changeme", "password", "12345"];

/// Runtime settings for the storefront server and CLI.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Postgres or SQLite URL understood by sea-orm
    #[validate(length(min = 1))]
    pub database_url: String,

    /// JWT signing secret
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT lifetime in seconds (5min - 24h)
    #[validate(range(min = 300, max = 86400))]
    pub jwt_expiration: usize,

    /// Expected `iss` claim
    #[serde(default = "jwt_issuer_default")]
    pub jwt_issuer: String,

    /// Expected `aud` claim
    #[serde(default = "jwt_audience_default")]
    pub jwt_audience: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "port_default")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Deployment name; anything but `development` enforces a real signing key
    #[validate(length(min = 1))]
    pub environment: String,

    #[serde(default = "log_level_default")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit one JSON object per log line
    #[serde(default)]
    pub log_json: bool,

    /// Apply pending migrations before serving
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "db_max_connections_default")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    #[serde(default = "db_min_connections_default")]
    pub db_min_connections: u32,

    #[serde(default = "db_acquire_timeout_default")]
    pub db_acquire_timeout_secs: u64,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "page_size_default")]
    #[validate(range(min = 1))]
    pub default_page_size: u64,

    #[serde(default = "max_page_size_default")]
    #[validate(range(min = 1))]
    pub max_page_size: u64,

    #[serde(default = "event_channel_capacity_default")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            jwt_issuer: jwt_issuer_default(),
            jwt_audience: jwt_audience_default(),
            host,
            port,
            environment,
            log_level: log_level_default(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: db_max_connections_default(),
            db_min_connections: db_min_connections_default(),
            db_acquire_timeout_secs: db_acquire_timeout_default(),
            cors_allowed_origins: None,
            default_page_size: page_size_default(),
            max_page_size: max_page_size_default(),
            event_channel_capacity: event_channel_capacity_default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Parsed CORS origins; empty means permissive (development only).
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Cross-field rules the derive cannot express.
    fn check_consistency(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut reject = |field: &'static str, message: &'static str| {
            let mut err = ValidationError::new(field);
            err.message = Some(message.into());
            errors.add(field, err);
        };

        if !self.is_development() && self.jwt_secret.trim() == defaults::DEV_JWT_SECRET {
            reject(
                "jwt_secret",
                "the bundled development signing key cannot be used here; set APP__JWT_SECRET",
            );
        }
        if self.default_page_size > self.max_page_size {
            reject("default_page_size", "default_page_size is larger than max_page_size");
        }
        if self.db_min_connections > self.db_max_connections {
            reject("db_min_connections", "db_min_connections is larger than db_max_connections");
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("could not read configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn log_level_default() -> String {
    defaults::LOG_LEVEL.to_string()
}

fn port_default() -> u16 {
    defaults::PORT
}

fn jwt_issuer_default() -> String {
    defaults::JWT_ISSUER.to_string()
}

fn jwt_audience_default() -> String {
    defaults::JWT_AUDIENCE.to_string()
}

fn db_max_connections_default() -> u32 {
    defaults::DB_MAX_CONNECTIONS
}

fn db_min_connections_default() -> u32 {
    defaults::DB_MIN_CONNECTIONS
}

fn db_acquire_timeout_default() -> u64 {
    defaults::DB_ACQUIRE_TIMEOUT_SECS
}

fn page_size_default() -> u64 {
    defaults::PAGE_SIZE
}

fn max_page_size_default() -> u64 {
    defaults::MAX_PAGE_SIZE
}

fn event_channel_capacity_default() -> usize {
    defaults::EVENT_CHANNEL_CAPACITY
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if LOG_LEVELS.iter().any(|known| known.eq_ignore_ascii_case(level)) {
        return Ok(());
    }
    let mut err = ValidationError::new("log_level");
    err.message = Some(format!("expected one of {}", LOG_LEVELS.join(", ")).into());
    Err(err)
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let secret = secret.trim();
    let mut chars = secret.chars();
    let single_char = match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => false,
    };
    let lower = secret.to_ascii_lowercase();
    let guessable = WEAK_SECRET_FRAGMENTS.iter().any(|frag| lower.contains(frag));

    if single_char || guessable {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("signing key is too easy to guess".into());
        return Err(err);
    }
    Ok(())
}

/// Installs the global subscriber. `RUST_LOG`, when set, wins over `level`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match env::var("RUST_LOG") {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::new(directive),
        _ => EnvFilter::new(format!("saree_storefront={level},tower_http=debug")),
    };
    let builder = fmt().with_env_filter(filter).with_target(true);
    // Repeated init keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Reads `./config` for the environment named by `APP_ENV`.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("APP_ENV").unwrap_or_else(|_| defaults::RUN_ENV.to_string());
    let dir = Path::new(defaults::CONFIG_DIR);
    if !dir.is_dir() {
        warn!(dir = defaults::CONFIG_DIR, "no config directory; using defaults and APP__* variables");
    }
    load_config_from(dir, &run_env)
}

/// Later sources override earlier ones: built-in defaults, `{dir}/default.toml`,
/// `{dir}/{run_env}.toml`, then `APP__*` environment variables.
pub fn load_config_from(dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!(environment = run_env, "loading storefront configuration");

    let settings: AppConfig = Config::builder()
        .set_default("database_url", defaults::DATABASE_URL)?
        .set_default("jwt_secret", defaults::DEV_JWT_SECRET)?
        .set_default("jwt_expiration", defaults::TOKEN_TTL_SECS)?
        .set_default("host", defaults::HOST)?
        .set_default("port", i64::from(defaults::PORT))?
        .set_default("environment", run_env)?
        .set_default("log_level", defaults::LOG_LEVEL)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    if let Err(errors) = settings.validate().and_then(|()| settings.check_consistency()) {
        error!(%errors, "configuration rejected");
        return Err(AppConfigError::Validation(errors));
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "storefront_test_secret_with_enough_entropy_0987".into(),
            3600,
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    fn write_config(dir: &TempDir, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
        writeln!(file, "{}", content).unwrap();
    }

    #[test]
    fn base_config_passes_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.check_consistency().is_ok());
    }

    #[test]
    fn dev_secret_is_rejected_outside_development() {
        let mut cfg = base_config();
        cfg.jwt_secret = defaults::DEV_JWT_SECRET.into();
        assert!(cfg.check_consistency().is_err());

        cfg.environment = "development".into();
        assert!(cfg.check_consistency().is_ok());
    }

    #[test]
    fn page_size_must_not_exceed_max() {
        let mut cfg = base_config();
        cfg.default_page_size = 500;
        let errors = cfg.check_consistency().unwrap_err();
        assert!(errors.field_errors().contains_key("page_size_default"));
    }

    #[test]
    fn cors_origins_are_trimmed_and_split() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some(" https://shop.example , ,https://admin.example".into());
        assert_eq!(
            cfg.cors_origins(),
            vec!["https://shop.example", "https://admin.example"]
        );
    }

    #[test]
    fn load_config_layers_environment_file_over_default() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "default.toml",
            r#"
            database_url = "sqlite://default.db"
            jwt_secret = "storefront_test_secret_with_enough_entropy_0987"
            port = 9000
            "#,
        );
        write_config(
            &dir,
            "staging.toml",
            r#"
            database_url = "postgres://db.internal/storefront"
            log_json = true
            "#,
        );

        let config = load_config_from(dir.path(), "staging").unwrap();
        assert_eq!(config.database_url, "postgres://db.internal/storefront");
        assert_eq!(config.port, 9000);
        assert_eq!(config.environment, "staging");
        assert!(config.log_json);
    }

    #[test]
    fn load_config_rejects_invalid_log_level() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "default.toml", r#"log_level = "loud""#);

        let result = load_config_from(dir.path(), "development");
        match result {
            Err(AppConfigError::Validation(errors)) => {
                assert!(errors.field_errors().contains_key("log_level"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }
}
