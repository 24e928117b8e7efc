//! Configuration types and loading.
//!
//! TOML file on disk, overlaid with a fixed set of environment variables,
//! validated at load time rather than left for later calls to discover.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Inclusive bounds on `rotation.max_daily_rotations`.
const MAX_DAILY_ROTATIONS_BOUNDS: (u32, u32) = (1, 1000);
/// Inclusive bounds on `rotation.interval_minutes`.
const ROTATION_INTERVAL_MINUTES_BOUNDS: (i64, i64) = (1, 240);

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub oauth: OauthConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub token: TokenConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("valid default listen address")
}

/// OAuth2 identity-provider settings. `client_secret` is optional: the
/// reader API's refresh flow supports public clients.
#[derive(Debug, Deserialize)]
pub struct OauthConfig {
    pub client_id: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Which namespaced Secret the watcher polls for pushed credential updates.
#[derive(Debug, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_secret_name")]
    pub secret_name: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            secret_name: default_secret_name(),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_secret_name() -> String {
    "inoreader-oauth-token".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_max_daily_rotations")]
    pub max_daily_rotations: u32,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: i64,
    #[serde(default = "default_random_start_enabled")]
    pub random_start_enabled: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_daily_rotations: default_max_daily_rotations(),
            interval_minutes: default_interval_minutes(),
            random_start_enabled: default_random_start_enabled(),
            timezone: default_timezone(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_max_daily_rotations() -> u32 {
    4
}

fn default_interval_minutes() -> i64 {
    60
}

fn default_random_start_enabled() -> bool {
    true
}

fn default_timezone() -> String {
    "Asia/Tokyo".to_string()
}

fn default_batch_size() -> usize {
    1
}

#[derive(Debug, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_zone_limit")]
    pub zone1_limit: u32,
    #[serde(default = "default_zone_limit")]
    pub zone2_limit: u32,
    #[serde(default = "default_safety_buffer")]
    pub safety_buffer: u32,
    #[serde(default = "default_max_articles_per_fetch")]
    pub max_articles_per_fetch: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            zone1_limit: default_zone_limit(),
            zone2_limit: default_zone_limit(),
            safety_buffer: default_safety_buffer(),
            max_articles_per_fetch: default_max_articles_per_fetch(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.inoreader.com/reader/api/0".to_string()
}

fn default_zone_limit() -> u32 {
    reader_client::quota::DEFAULT_ZONE_LIMIT
}

fn default_safety_buffer() -> u32 {
    reader_client::quota::DEFAULT_SAFETY_BUFFER
}

fn default_max_articles_per_fetch() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_clock_skew_seconds")]
    pub clock_skew_seconds: i64,
    #[serde(default = "default_refresh_buffer_seconds")]
    pub refresh_buffer_seconds: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            clock_skew_seconds: default_clock_skew_seconds(),
            refresh_buffer_seconds: default_refresh_buffer_seconds(),
        }
    }
}

fn default_clock_skew_seconds() -> i64 {
    30
}

fn default_refresh_buffer_seconds() -> i64 {
    300
}

impl Config {
    /// Resolves the config file path: `--config` flag, else `CONFIG_PATH`,
    /// else `./config.toml`.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(path) = cli_path {
            return PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from("config.toml")
    }

    /// Loads configuration from `path`, overlays environment variables, and
    /// validates ranges. A missing or malformed file, or a value outside its
    /// valid range, fails at startup rather than surfacing as a confusing
    /// runtime error later.
    pub fn load(path: &Path) -> common::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)?;
        config.apply_env_overlay();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overlay(&mut self) {
        if let Ok(tz) = std::env::var("TZ") {
            if !tz.is_empty() {
                self.rotation.timezone = tz;
            }
        }
        if let Ok(v) = std::env::var("MAX_DAILY_ROTATIONS") {
            if let Ok(parsed) = v.parse() {
                self.rotation.max_daily_rotations = parsed;
            }
        }
        if let Ok(v) = std::env::var("ROTATION_INTERVAL_MINUTES") {
            if let Ok(parsed) = v.parse() {
                self.rotation.interval_minutes = parsed;
            }
        }
        if let Ok(v) = std::env::var("OAUTH2_CLOCK_SKEW_SECONDS") {
            if let Ok(parsed) = v.parse() {
                self.token.clock_skew_seconds = parsed;
            }
        }
        if let Ok(ns) = std::env::var("KUBERNETES_NAMESPACE") {
            if !ns.is_empty() {
                self.kubernetes.namespace = ns;
            }
        }
        if let Ok(name) = std::env::var("OAUTH2_TOKEN_SECRET_NAME") {
            if !name.is_empty() {
                self.kubernetes.secret_name = name;
            }
        }
        // HTTPS_PROXY and the fallback refresh-token variables are read
        // directly by `reqwest::Client` and `oauth_token::RecoveryManager`
        // respectively; nothing to overlay onto `Config` for them.
    }

    fn validate(&self) -> common::Result<()> {
        let (min, max) = MAX_DAILY_ROTATIONS_BOUNDS;
        if !(min..=max).contains(&self.rotation.max_daily_rotations) {
            return Err(common::Error::Config(format!(
                "rotation.max_daily_rotations must be in [{min}, {max}], got {}",
                self.rotation.max_daily_rotations
            )));
        }
        let (min, max) = ROTATION_INTERVAL_MINUTES_BOUNDS;
        if !(min..=max).contains(&self.rotation.interval_minutes) {
            return Err(common::Error::Config(format!(
                "rotation.interval_minutes must be in [{min}, {max}], got {}",
                self.rotation.interval_minutes
            )));
        }
        if self.rotation.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(common::Error::Config(format!(
                "rotation.timezone {:?} is not a recognized timezone",
                self.rotation.timezone
            )));
        }
        if self.oauth.client_id.is_empty() {
            return Err(common::Error::Config("oauth.client_id must be non-empty".into()));
        }
        if self.oauth.token_endpoint.is_empty() {
            return Err(common::Error::Config(
                "oauth.token_endpoint must be non-empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[oauth]
client_id = "client-123"
token_endpoint = "https://www.inoreader.com/oauth2/token"
"#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_config(MINIMAL);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.rotation.max_daily_rotations, 4);
        assert_eq!(config.rotation.timezone, "Asia/Tokyo");
        assert_eq!(config.kubernetes.namespace, "default");
    }

    #[test]
    fn rejects_out_of_range_max_daily_rotations() {
        let file = write_config(&format!(
            "{MINIMAL}\n[rotation]\nmax_daily_rotations = 0\n"
        ));
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
    }

    #[test]
    fn rejects_out_of_range_interval_minutes() {
        let file = write_config(&format!(
            "{MINIMAL}\n[rotation]\ninterval_minutes = 999\n"
        ));
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let file = write_config(&format!(
            "{MINIMAL}\n[rotation]\ntimezone = \"Not/AZone\"\n"
        ));
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
    }

    #[test]
    fn env_overlay_takes_precedence_over_file() {
        let file = write_config(&format!(
            "{MINIMAL}\n[rotation]\nmax_daily_rotations = 4\n"
        ));
        // SAFETY: test runs single-threaded within this process's test harness
        // for this var; scoped to this test only.
        unsafe {
            std::env::set_var("MAX_DAILY_ROTATIONS", "7");
        }
        let config = Config::load(file.path()).unwrap();
        unsafe {
            std::env::remove_var("MAX_DAILY_ROTATIONS");
        }
        assert_eq!(config.rotation.max_daily_rotations, 7);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let err = Config::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, common::Error::Io(_)));
    }

    #[test]
    fn rejects_missing_client_id() {
        let file = write_config("[oauth]\ntoken_endpoint = \"https://example.com\"\nclient_id = \"\"\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
    }
}
