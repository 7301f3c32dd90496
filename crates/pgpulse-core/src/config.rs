//! Database and monitor configuration.
//!
//! Credentials never live in code: [`DatabaseConfig::from_env`] reads the
//! standard libpq environment variables, and the embedding binary can
//! override any field through the `with_*` setters.

use std::time::Duration;

use crate::health::HealthThresholds;

/// Default polling interval, matching the monitoring page of the console.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_SIZE: usize = 4;

/// Error type for configuration loading.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Environment variable not set.
    EnvNotSet(String),
    /// Environment variable set to an unusable value.
    Invalid { var: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvNotSet(var) => write!(f, "{} not set", var),
            ConfigError::Invalid { var, value } => write!(f, "{} has invalid value {:?}", var, value),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Connection settings for the monitored database.
///
/// One timeout policy applies to every connection handed out by the pool:
/// `connect_timeout` bounds the handshake, `statement_timeout` is set
/// server-side on each session, and `acquire_timeout` bounds the wait for a
/// free pool slot.
#[derive(Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
    pub acquire_timeout: Duration,
    pub pool_max_size: usize,
}

// Keeps the password out of logs.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dbname", &self.dbname)
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("pool_max_size", &self.pool_max_size)
            .finish()
    }
}

impl DatabaseConfig {
    /// Creates a config with default host, port and timeouts.
    pub fn new(user: impl Into<String>, dbname: impl Into<String>) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: user.into(),
            password: None,
            dbname: dbname.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            pool_max_size: DEFAULT_POOL_SIZE,
        }
    }

    /// Reads connection settings from environment variables:
    /// - PGHOST (default: localhost)
    /// - PGPORT (default: 5432)
    /// - PGUSER (default: $USER)
    /// - PGPASSWORD (default: none)
    /// - PGDATABASE (default: same as PGUSER)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let user = lookup("PGUSER")
            .or_else(|| lookup("USER"))
            .ok_or_else(|| ConfigError::EnvNotSet("PGUSER or USER".to_string()))?;
        let dbname = lookup("PGDATABASE").unwrap_or_else(|| user.clone());

        let mut config = Self::new(user, dbname);
        if let Some(host) = lookup("PGHOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PGPORT") {
            config.port = port.parse().map_err(|_| ConfigError::Invalid {
                var: "PGPORT".to_string(),
                value: port.clone(),
            })?;
        }
        config.password = lookup("PGPASSWORD").filter(|p| !p.is_empty());
        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the server-side `statement_timeout` for every pooled session.
    /// `Duration::ZERO` disables it.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the pool size. Values below 1 are raised to 1.
    pub fn with_pool_max_size(mut self, size: usize) -> Self {
        self.pool_max_size = size.max(1);
        self
    }

    /// Builds the driver configuration.
    pub fn to_pg_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname)
            .application_name("pgpulse")
            .connect_timeout(self.connect_timeout);
        if let Some(ref password) = self.password {
            config.password(password);
        }
        if let Some(options) = self.session_options() {
            config.options(&options);
        }
        config
    }

    /// Startup options sent with each new session.
    fn session_options(&self) -> Option<String> {
        if self.statement_timeout.is_zero() {
            None
        } else {
            Some(format!(
                "-c statement_timeout={}",
                self.statement_timeout.as_millis()
            ))
        }
    }
}

/// Poller settings that are not tied to the database connection.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Interval used when `start_monitoring` is called without one.
    pub default_interval: Duration,
    pub thresholds: HealthThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_INTERVAL,
            thresholds: HealthThresholds::default(),
        }
    }
}

impl MonitorConfig {
    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn from_env_uses_defaults_and_user_fallback() {
        let config = DatabaseConfig::from_lookup(lookup(&[("USER", "admin")])).unwrap();
        assert_eq!(config.user, "admin");
        assert_eq!(config.dbname, "admin");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.password, None);
    }

    #[test]
    fn from_env_reads_all_variables() {
        let config = DatabaseConfig::from_lookup(lookup(&[
            ("PGUSER", "postgres"),
            ("PGHOST", "db.internal"),
            ("PGPORT", "6432"),
            ("PGPASSWORD", "secret"),
            ("PGDATABASE", "online_university"),
        ]))
        .unwrap();
        assert_eq!(config.user, "postgres");
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6432);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.dbname, "online_university");
    }

    #[test]
    fn from_env_requires_a_user() {
        let err = DatabaseConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::EnvNotSet("PGUSER or USER".to_string()));
    }

    #[test]
    fn from_env_rejects_bad_port() {
        let err =
            DatabaseConfig::from_lookup(lookup(&[("PGUSER", "u"), ("PGPORT", "abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "PGPORT"));
    }

    #[test]
    fn statement_timeout_becomes_session_option() {
        let config = DatabaseConfig::new("u", "d").with_statement_timeout(Duration::from_millis(2500));
        assert_eq!(
            config.session_options().as_deref(),
            Some("-c statement_timeout=2500")
        );
        let disabled = config.with_statement_timeout(Duration::ZERO);
        assert_eq!(disabled.session_options(), None);
    }

    #[test]
    fn debug_hides_password() {
        let config = DatabaseConfig::new("u", "d").with_password("hunter2");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn pool_size_has_floor_of_one() {
        assert_eq!(DatabaseConfig::new("u", "d").with_pool_max_size(0).pool_max_size, 1);
    }
}
