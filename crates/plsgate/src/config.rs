//! Gateway configuration, loaded from a TOML file.
//!
//! Every section rejects unknown keys so a misspelled setting fails at
//! startup instead of silently falling back to its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    #[serde(default)]
    pub spool: SpoolConfig,
    #[serde(default)]
    pub procedures: ProcedureConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub listen_port: u16,
    /// Name of the database access descriptor; second path segment of every URL.
    pub dad: String,
    /// Portion of the URL that comes before the DAD.
    pub url_prefix: String,
    #[serde(default)]
    pub show_errors: bool,
    pub error_page: PathBuf,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub sid: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub username: String,
    /// Defaults to the username.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_charset")]
    pub charset: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub min_sessions: usize,
    pub max_sessions: usize,
    #[serde(default)]
    pub rollback_on_release: bool,
    #[serde(default = "default_true")]
    pub test_on_release: bool,
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: i64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: i64,
    #[serde(default = "default_test_interval")]
    pub test_interval_secs: u64,
    #[serde(default = "default_shutdown_wait")]
    pub shutdown_wait_secs: u64,
    /// Upper bound on concurrent release/probe/close work.
    #[serde(default = "default_io_workers")]
    pub io_workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpoolConfig {
    #[serde(default = "default_spool_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_spool_threshold")]
    pub threshold_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcedureConfig {
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_worker_threads() -> usize {
    6
}

fn default_db_port() -> u16 {
    1521
}

fn default_charset() -> String {
    "iso-8859-1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_test_timeout() -> u64 {
    15
}

fn default_busy_timeout() -> i64 {
    600
}

fn default_idle_timeout() -> i64 {
    600
}

fn default_test_interval() -> u64 {
    300
}

fn default_shutdown_wait() -> u64 {
    60
}

fn default_io_workers() -> usize {
    8
}

fn default_spool_directory() -> PathBuf {
    PathBuf::from("/var/spool/plsgate")
}

fn default_spool_threshold() -> usize {
    1024 * 1024
}

fn default_excluded_prefixes() -> Vec<String> {
    ["sys.", "owa", "dbms_", "htp."]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            directory: default_spool_directory(),
            threshold_bytes: default_spool_threshold(),
        }
    }
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            cache: true,
            excluded_prefixes: default_excluded_prefixes(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_sessions: 0,
            max_sessions: 10,
            rollback_on_release: false,
            test_on_release: true,
            test_timeout_secs: default_test_timeout(),
            busy_timeout_secs: default_busy_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            test_interval_secs: default_test_interval(),
            shutdown_wait_secs: default_shutdown_wait(),
            io_workers: default_io_workers(),
        }
    }
}

impl PoolConfig {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn test_interval(&self) -> Duration {
        Duration::from_secs(self.test_interval_secs)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.shutdown_wait_secs)
    }
}

impl DatabaseConfig {
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or(&self.username)
    }
}

impl ServerConfig {
    /// Directory part of every gateway URL, e.g. `/pls/web/`.
    pub fn dad_path(&self) -> String {
        format!("{}{}/", self.url_prefix, self.dad)
    }
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        config.check_paths()?;
        Ok(config)
    }

    /// Parse and validate values. Filesystem checks happen in [`GatewayConfig::load`].
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = toml::from_str(text)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        let prefix = &mut self.server.url_prefix;
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let pool = &self.pool;
        if pool.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_sessions must be at least 1".to_string(),
            ));
        }
        if pool.min_sessions > pool.max_sessions {
            return Err(ConfigError::Invalid(format!(
                "pool.min_sessions ({}) exceeds pool.max_sessions ({})",
                pool.min_sessions, pool.max_sessions
            )));
        }
        if pool.io_workers == 0 {
            return Err(ConfigError::Invalid(
                "pool.io_workers must be at least 1".to_string(),
            ));
        }
        if self.server.dad.is_empty() || self.server.dad.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "server.dad '{}' must be a single path segment",
                self.server.dad
            )));
        }
        Ok(())
    }

    fn check_paths(&self) -> Result<(), ConfigError> {
        if !self.spool.directory.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "spool.directory {} does not exist",
                self.spool.directory.display()
            )));
        }
        if !self.server.error_page.is_file() {
            return Err(ConfigError::Invalid(format!(
                "server.error_page {} does not exist",
                self.server.error_page.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(spool_dir: &Path, error_page: &Path) -> GatewayConfig {
    let text = format!(
        r#"
[server]
listen_port = 8080
dad = "web"
url_prefix = "/pls"
error_page = "{}"

[database]
host = "localhost"
sid = "ORCL"
username = "webuser"

[pool]
min_sessions = 0
max_sessions = 2

[spool]
directory = "{}"
"#,
        error_page.display(),
        spool_dir.display()
    );
    GatewayConfig::from_toml(&text).unwrap()
}
