use config::Environment;

use crate::error::ConfigError;

/// Minimum signing secret length in bytes (128 bits)
pub const MIN_SECRET_BYTES: usize = 16;

/// One year
pub const MAX_ACCESS_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// Used only when `application.hardened` is false
const DEVELOPMENT_SECRET: &str = "development-only-secret-change-me";

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Refuse to start without a strong signing secret
    #[serde(default = "default_true")]
    pub hardened: bool,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            username: "postgres".to_string(),
            password: "password".to_string(),
            port: 5432,
            host: "localhost".to_string(),
            database_name: "todolist".to_string(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// Token and credential settings
#[derive(serde::Deserialize, Clone)]
pub struct AuthSettings {
    /// HMAC signing secret for access tokens
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime_secs: i64,
    /// Applied uniformly to every identity store call
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_password_cost")]
    pub password_cost: u32,
}

impl AuthSettings {
    /// Check the signing secret before anything is served.
    ///
    /// A short or missing secret is fatal in a hardened deployment. Otherwise
    /// the development secret is substituted and a warning is logged.
    pub fn validate(mut self, hardened: bool) -> Result<Self, ConfigError> {
        self.access_token_lifetime()?;

        if self.secret.len() >= MIN_SECRET_BYTES {
            return Ok(self);
        }

        if hardened {
            return Err(ConfigError::MissingRequired(format!(
                "auth.secret must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }

        tracing::warn!("auth.secret is missing or too short, using the development secret");
        self.secret = DEVELOPMENT_SECRET.to_string();
        Ok(self)
    }

    pub fn access_token_lifetime(&self) -> Result<chrono::Duration, ConfigError> {
        if !(1..=MAX_ACCESS_TOKEN_LIFETIME_SECS).contains(&self.access_token_lifetime_secs) {
            return Err(ConfigError::InvalidValue(format!(
                "auth.access_token_lifetime_secs must be between 1 and {}",
                MAX_ACCESS_TOKEN_LIFETIME_SECS
            )));
        }
        Ok(chrono::Duration::seconds(self.access_token_lifetime_secs))
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub json: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: true,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    5
}

fn default_access_token_lifetime() -> i64 {
    24 * 60 * 60
}

fn default_store_timeout() -> u64 {
    5_000
}

fn default_password_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load settings from `configuration.{yaml,toml,json}` overlaid with
/// `APP_`-prefixed environment variables (`APP_AUTH__SECRET=...`).
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
