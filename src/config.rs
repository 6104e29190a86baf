//! Configuration loading and types for the B2 edge proxy.
//!
//! Configuration is read from an optional YAML file into the [`Config`]
//! struct, then overlaid with the environment variables the proxy is
//! traditionally deployed with (`B2_ENDPOINT`, `BUCKET_NAME`, ...).  The
//! result is resolved once at startup into an immutable [`ProxySettings`]
//! value that every request borrows.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use crate::auth::Credentials;
use crate::errors::ProxyError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream B2 endpoint and signing credentials.
    #[serde(default)]
    pub b2: B2Config,

    /// Forwarding policy.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Backblaze B2 endpoint and application key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct B2Config {
    /// S3-compatible endpoint host, e.g. `s3.us-west-002.backblazeb2.com`.
    #[serde(default)]
    pub endpoint: String,

    /// Application key ID (`B2_APPLICATION_KEY_ID`).
    #[serde(alias = "key_id", default)]
    pub application_key_id: String,

    /// Application key secret (`B2_APPLICATION_KEY`).
    #[serde(alias = "key", default)]
    pub application_key: String,
}

/// Forwarding policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// `$path`, `$host`, or a literal bucket name.
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,

    /// Allow requests that would list a bucket.
    #[serde(default)]
    pub allow_list_bucket: bool,

    /// If set, only these request headers are forwarded.
    #[serde(default)]
    pub allowed_headers: Option<Vec<String>>,

    /// Timeout for a single upstream attempt, in seconds.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bucket_name: default_bucket_name(),
            allow_list_bucket: false,
            allowed_headers: None,
            upstream_timeout: default_upstream_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Metrics and the health probe live on a separate admin listener so that
/// the proxy listener forwards every path, including `/metrics`.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.  When off, the admin listener still
    /// serves `/health` but not `/metrics`.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Admin listener host.
    #[serde(default = "default_admin_host")]
    pub admin_host: String,

    /// Admin listener port.
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            admin_host: default_admin_host(),
            admin_port: default_admin_port(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_bucket_name() -> String {
    "$path".to_string()
}

fn default_upstream_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_admin_host() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    9091
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay values from `lookup`, which maps a variable name to its value.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("B2_ENDPOINT") {
            self.b2.endpoint = v;
        }
        if let Some(v) = lookup("B2_APPLICATION_KEY_ID") {
            self.b2.application_key_id = v;
        }
        if let Some(v) = lookup("B2_APPLICATION_KEY") {
            self.b2.application_key = v;
        }
        if let Some(v) = lookup("BUCKET_NAME") {
            self.proxy.bucket_name = v;
        }
        // Only the literal string "true" enables listing.
        if let Some(v) = lookup("ALLOW_LIST_BUCKET") {
            self.proxy.allow_list_bucket = v == "true";
        }
        if let Some(v) = lookup("ALLOWED_HEADERS") {
            self.proxy.allowed_headers = Some(parse_header_list(&v));
        }
    }
}

/// Parse an `ALLOWED_HEADERS` value: a JSON array of strings or a
/// comma-separated list.  Names are trimmed and lowercased.
fn parse_header_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let names: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|_| {
            raw.trim_matches(|c: char| c == '[' || c == ']')
                .split(',')
                .map(|s| s.trim().trim_matches('"').to_string())
                .collect()
        })
    } else {
        raw.split(',').map(str::to_string).collect()
    };

    names
        .into_iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// -- Resolved settings -------------------------------------------------------

/// How the upstream bucket is chosen for each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketMode {
    /// `$path`: the bucket is the first path segment; the host is the endpoint.
    PathStyle,
    /// `$host`: the bucket is the first label of the inbound host.
    HostStyle,
    /// A single bucket fixed by configuration.
    Fixed(String),
}

impl FromStr for BucketMode {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "$path" => Ok(BucketMode::PathStyle),
            "$host" => Ok(BucketMode::HostStyle),
            "" => Err(ProxyError::Config("BUCKET_NAME must not be empty".to_string())),
            name if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.') =>
            {
                Err(ProxyError::Config(format!(
                    "BUCKET_NAME '{name}' is not a valid bucket name"
                )))
            }
            name => Ok(BucketMode::Fixed(name.to_string())),
        }
    }
}

/// Extract the region from a B2 endpoint of the form
/// `s3.<region>.backblazeb2.com`.
pub fn extract_region(endpoint: &str) -> Result<String, ProxyError> {
    let region = endpoint
        .strip_prefix("s3.")
        .and_then(|rest| rest.strip_suffix(".backblazeb2.com"))
        .filter(|r| !r.is_empty() && r.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));

    match region {
        Some(r) => Ok(r.to_string()),
        None => Err(ProxyError::Config(format!(
            "B2_ENDPOINT '{endpoint}' does not match s3.<region>.backblazeb2.com"
        ))),
    }
}

/// Immutable per-process settings every request is served with.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Upstream endpoint host.
    pub endpoint: String,
    /// Signing region derived from the endpoint.
    pub region: String,
    /// Signing credentials.
    pub credentials: Credentials,
    /// Bucket-naming mode.
    pub bucket_mode: BucketMode,
    /// Whether listing-style requests are forwarded.
    pub allow_list_bucket: bool,
    /// Optional header allowlist (lowercase names).
    pub allowed_headers: Option<Vec<String>>,
}

impl ProxySettings {
    /// Validate `config` and resolve it into settings.  Fails on a malformed
    /// endpoint, a bad bucket name, or missing credentials.
    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        let region = extract_region(&config.b2.endpoint)?;
        let bucket_mode = config.proxy.bucket_name.parse::<BucketMode>()?;

        if config.b2.application_key_id.is_empty() || config.b2.application_key.is_empty() {
            return Err(ProxyError::Config(
                "B2_APPLICATION_KEY_ID and B2_APPLICATION_KEY must be set".to_string(),
            ));
        }

        let allowed_headers = config.proxy.allowed_headers.as_ref().map(|names| {
            names
                .iter()
                .map(|n| n.trim().to_ascii_lowercase())
                .collect::<Vec<_>>()
        });

        Ok(Self {
            endpoint: config.b2.endpoint.clone(),
            region,
            credentials: Credentials {
                access_key_id: config.b2.application_key_id.clone(),
                secret_access_key: config.b2.application_key.clone(),
            },
            bucket_mode,
            allow_list_bucket: config.proxy.allow_list_bucket,
            allowed_headers,
        })
    }
}
