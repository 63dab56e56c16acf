use super::IsolationLevel;
use crate::core::{DbError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Name that selects a private in-memory database
pub const MEMORY_DATABASE: &str = ":memory:";

const URL_SCHEME: &str = "sqlite://";

/// Database connection configuration
///
/// # Examples
///
/// ```ignore
/// let config = ConnectionConfig::new("/var/lib/app/app.db")
///     .busy_timeout_ms(0)
///     .default_isolation(IsolationLevel::Serializable)
///     .retry(RetryPolicy::new(5).with_delay_ms(200));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Database file path, or `:memory:`
    pub database: String,

    /// How long the driver waits on a locked database before reporting a
    /// transient conflict (0 = report immediately)
    pub busy_timeout_ms: u64,

    /// Open without write access
    pub read_only: bool,

    /// Create the database file when it does not exist
    pub create_if_missing: bool,

    /// Level for transactions started without an explicit one
    pub default_isolation: Option<IsolationLevel>,

    /// Retry budget used by the database-level retry helpers
    pub retry: RetryPolicy,
}

impl ConnectionConfig {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            busy_timeout_ms: 5000,
            read_only: false,
            create_if_missing: true,
            default_isolation: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MEMORY_DATABASE)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database == MEMORY_DATABASE
    }

    /// Set the database path
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn busy_timeout_ms(mut self, millis: u64) -> Self {
        self.busy_timeout_ms = millis;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = Some(level);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Parse from connection string
    ///
    /// Format: `sqlite://<path>[?key=value&...]` with keys `busy_timeout_ms`,
    /// `read_only`, `create_if_missing`, `isolation`, `max_retries` and
    /// `retry_delay_ms`.
    ///
    /// ```ignore
    /// let config = ConnectionConfig::from_url(
    ///     "sqlite:///data/app.db?busy_timeout_ms=0&isolation=serializable&max_retries=5"
    /// )?;
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| DbError::ConfigError(format!("URL must start with '{}'", URL_SCHEME)))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        if path.is_empty() {
            return Err(DbError::ConfigError("Database path cannot be empty".into()));
        }

        let mut config = Self::new(path);

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| DbError::ConfigError(format!("Invalid option '{}'", pair)))?;

            match key {
                "busy_timeout_ms" => config.busy_timeout_ms = parse_option(key, value)?,
                "read_only" => config.read_only = parse_option(key, value)?,
                "create_if_missing" => config.create_if_missing = parse_option(key, value)?,
                "isolation" => {
                    config.default_isolation =
                        Some(value.parse().map_err(DbError::ConfigError)?);
                }
                "max_retries" => config.retry.max_retries = parse_option(key, value)?,
                "retry_delay_ms" => config.retry.delay_ms = parse_option(key, value)?,
                other => {
                    return Err(DbError::ConfigError(format!("Unknown option '{}'", other)));
                }
            }
        }

        Ok(config)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        let mut url = format!(
            "{}{}?busy_timeout_ms={}&read_only={}&create_if_missing={}",
            URL_SCHEME, self.database, self.busy_timeout_ms, self.read_only, self.create_if_missing
        );
        if let Some(level) = self.default_isolation {
            url.push_str(&format!("&isolation={}", level));
        }
        url.push_str(&format!(
            "&max_retries={}&retry_delay_ms={}",
            self.retry.max_retries, self.retry.delay_ms
        ));
        url
    }

    /// Load from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| DbError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(DbError::ConfigError("Database path cannot be empty".into()));
        }

        if self.read_only && self.is_in_memory() {
            return Err(DbError::ConfigError(
                "An in-memory database cannot be opened read-only".into(),
            ));
        }

        Ok(())
    }
}

fn parse_option<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| DbError::ConfigError(format!("Invalid value '{}' for '{}'", value, key)))
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert!(config.is_in_memory());
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConnectionConfig::new("app.db")
            .busy_timeout_ms(0)
            .read_only(true)
            .default_isolation(IsolationLevel::Serializable)
            .retry(RetryPolicy::new(7).with_delay_ms(10));

        assert_eq!(config.database, "app.db");
        assert_eq!(config.busy_timeout_ms, 0);
        assert!(config.read_only);
        assert_eq!(config.default_isolation, Some(IsolationLevel::Serializable));
        assert_eq!(config.retry.max_retries, 7);
    }

    #[test]
    fn test_from_url() {
        let config = ConnectionConfig::from_url(
            "sqlite:///data/app.db?busy_timeout_ms=0&isolation=repeatable_read&max_retries=5&retry_delay_ms=100",
        )
        .unwrap();

        assert_eq!(config.database, "/data/app.db");
        assert_eq!(config.busy_timeout_ms, 0);
        assert_eq!(config.default_isolation, Some(IsolationLevel::RepeatableRead));
        assert_eq!(config.retry, RetryPolicy::new(5).with_delay_ms(100));
    }

    #[test]
    fn test_url_round_trip() {
        let config = ConnectionConfig::new("x.db")
            .default_isolation(IsolationLevel::Snapshot)
            .retry(RetryPolicy::new(2).with_delay_ms(50));
        assert_eq!(ConnectionConfig::from_url(&config.to_url()).unwrap(), config);
    }

    #[test]
    fn test_invalid_url() {
        assert!(ConnectionConfig::from_url("postgres://localhost/db").is_err());
        assert!(ConnectionConfig::from_url("sqlite://").is_err());
        assert!(ConnectionConfig::from_url("sqlite://a.db?read_only=maybe").is_err());
        assert!(ConnectionConfig::from_url("sqlite://a.db?colour=blue").is_err());
        assert!(ConnectionConfig::from_url("sqlite://a.db?isolation=chaos").is_err());
    }

    #[test]
    fn test_from_json() {
        let config = ConnectionConfig::from_json(
            r#"{"database": "orders.db", "default_isolation": "serializable", "retry": {"max_retries": 1}}"#,
        )
        .unwrap();

        assert_eq!(config.database, "orders.db");
        assert_eq!(config.default_isolation, Some(IsolationLevel::Serializable));
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.delay_ms, 3000);
        assert!(config.create_if_missing);
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionConfig::new("a.db").validate().is_ok());
        assert!(ConnectionConfig::new("  ").validate().is_err());
        assert!(ConnectionConfig::in_memory().read_only(true).validate().is_err());
    }
}
