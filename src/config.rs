use secrecy::SecretString;
use serde::Deserialize;
use std::net::SocketAddr;

/// Main configuration for the siteward service.
///
/// Secrets (webhook secret, processor API key, content-store shared secret,
/// ops token) are held as [`secrecy::SecretString`] from the moment they are
/// read, so a derived `Debug` of the whole config prints them redacted. The
/// config deliberately does not implement `Serialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
    pub content_store: ContentStoreConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB; webhook payloads are small)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Payment processor settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Shared secret used to verify inbound webhook signatures.
    #[serde(default)]
    pub webhook_secret: SecretString,
    /// Processor API key used to fetch authoritative subscription state.
    #[serde(default)]
    pub api_key: SecretString,
    /// Processor API base URL (overridable for tests).
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// Edge content store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentStoreConfig {
    /// Endpoint of the edge worker holding published HTML.
    #[serde(default)]
    pub endpoint: String,
    /// Shared secret passed in the request body.
    #[serde(default)]
    pub shared_secret: SecretString,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Reconciliation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Bearer token required on the /ops/reconcile endpoints.
    #[serde(default)]
    pub ops_token: SecretString,
    /// Hours between scheduled passes; 0 disables the internal scheduler.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Timeout for each outbound processor call during a pass.
    #[serde(default = "default_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            billing: BillingConfig::default(),
            content_store: ContentStoreConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            webhook_secret: SecretString::default(),
            api_key: SecretString::default(),
            api_base: default_api_base(),
        }
    }
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            shared_secret: SecretString::default(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            ops_token: SecretString::default(),
            interval_hours: default_interval_hours(),
            request_timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    false
}

fn default_max_connections() -> u32 {
    10
}

fn default_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_interval_hours() -> u64 {
    24
}

impl ServerConfig {
    pub fn addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Builder for Config with environment variable support.
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = url.into();
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<SecretString>) -> Self {
        self.config.billing.webhook_secret = secret.into();
        self
    }

    pub fn with_processor_api_key(mut self, key: impl Into<SecretString>) -> Self {
        self.config.billing.api_key = key.into();
        self
    }

    pub fn with_content_store(
        mut self,
        endpoint: impl Into<String>,
        shared_secret: impl Into<SecretString>,
    ) -> Self {
        self.config.content_store.endpoint = endpoint.into();
        self.config.content_store.shared_secret = shared_secret.into();
        self
    }

    pub fn with_ops_token(mut self, token: impl Into<SecretString>) -> Self {
        self.config.reconcile.ops_token = token.into();
        self
    }

    /// Load settings from `SITEWARD_*` environment variables.
    ///
    /// Unset variables leave the current value in place, so `from_env()` can
    /// layer over programmatic defaults.
    pub fn from_env(mut self) -> Self {
        if let Ok(host) = std::env::var("SITEWARD_HOST") {
            self.config.server.host = host;
        }
        if let Ok(port) = std::env::var("SITEWARD_PORT") {
            if let Ok(port) = port.parse() {
                self.config.server.port = port;
            }
        }
        if let Ok(bytes) = std::env::var("SITEWARD_MAX_BODY_SIZE") {
            if let Ok(bytes) = bytes.parse() {
                self.config.server.max_body_size = bytes;
            }
        }
        if let Ok(level) = std::env::var("SITEWARD_LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Ok(json) = std::env::var("SITEWARD_LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }
        if let Ok(url) = std::env::var("SITEWARD_DATABASE_URL") {
            self.config.database.url = url;
        }
        if let Ok(n) = std::env::var("SITEWARD_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = n.parse() {
                self.config.database.max_connections = n;
            }
        }
        if let Ok(secret) = std::env::var("SITEWARD_WEBHOOK_SECRET") {
            self.config.billing.webhook_secret = secret.into();
        }
        if let Ok(key) = std::env::var("SITEWARD_PROCESSOR_API_KEY") {
            self.config.billing.api_key = key.into();
        }
        if let Ok(base) = std::env::var("SITEWARD_PROCESSOR_API_BASE") {
            self.config.billing.api_base = base;
        }
        if let Ok(endpoint) = std::env::var("SITEWARD_CONTENT_STORE_ENDPOINT") {
            self.config.content_store.endpoint = endpoint;
        }
        if let Ok(secret) = std::env::var("SITEWARD_CONTENT_STORE_SECRET") {
            self.config.content_store.shared_secret = secret.into();
        }
        if let Ok(token) = std::env::var("SITEWARD_OPS_TOKEN") {
            self.config.reconcile.ops_token = token.into();
        }
        if let Ok(hours) = std::env::var("SITEWARD_RECONCILE_INTERVAL_HOURS") {
            if let Ok(hours) = hours.parse() {
                self.config.reconcile.interval_hours = hours;
            }
        }
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
