//! Orchestrator configuration
//!
//! Defines the bind address, store backend, task intervals and the simulated
//! provider settings. Everything is read from the environment with defaults
//! suitable for a local standalone run.

use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// PostgreSQL connection string; the in-memory store is used when unset
    pub database_url: Option<String>,

    /// Delay between two watches of the same cloud operation
    pub watch_interval: Duration,

    /// How often transient pipelines are reconciled
    pub refresh_interval: Duration,

    /// How often awake bases are tested for idleness
    pub pull_interval: Duration,

    /// Delay between two health checks of the same instance group
    pub health_check_interval: Duration,

    /// Polls the simulated provider answers before reporting an operation done
    pub simulated_polls: u32,

    /// Bearer token accepted on admin and task endpoints
    pub admin_token: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(bind_addr: String) -> Self {
        Self {
            bind_addr,
            database_url: None,
            watch_interval: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(300),
            pull_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(60),
            simulated_polls: 2,
            admin_token: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - FLOTILLA_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - DATABASE_URL (optional, in-memory store when unset)
    /// - FLOTILLA_WATCH_INTERVAL (optional, seconds, default: 60)
    /// - FLOTILLA_REFRESH_INTERVAL (optional, seconds, default: 300)
    /// - FLOTILLA_PULL_INTERVAL (optional, seconds, default: 60)
    /// - FLOTILLA_HEALTH_CHECK_INTERVAL (optional, seconds, default: 60)
    /// - FLOTILLA_SIMULATED_POLLS (optional, default: 2)
    /// - FLOTILLA_ADMIN_TOKEN (optional, admin endpoints are closed when unset)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::new(
            std::env::var("FLOTILLA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        );

        config.database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        config.admin_token = std::env::var("FLOTILLA_ADMIN_TOKEN")
            .ok()
            .filter(|s| !s.is_empty());

        if let Some(secs) = env_u64("FLOTILLA_WATCH_INTERVAL")? {
            config.watch_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("FLOTILLA_REFRESH_INTERVAL")? {
            config.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("FLOTILLA_PULL_INTERVAL")? {
            config.pull_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("FLOTILLA_HEALTH_CHECK_INTERVAL")? {
            config.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(polls) = env_u64("FLOTILLA_SIMULATED_POLLS")? {
            config.simulated_polls = u32::try_from(polls)
                .map_err(|_| anyhow::anyhow!("FLOTILLA_SIMULATED_POLLS is out of range"))?;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("DATABASE_URL must start with postgres:// or postgresql://");
            }
        }

        if self.refresh_interval.as_secs() == 0 {
            anyhow::bail!("refresh_interval must be greater than 0");
        }

        if self.pull_interval.as_secs() == 0 {
            anyhow::bail!("pull_interval must be greater than 0");
        }

        if self.health_check_interval.as_secs() == 0 {
            anyhow::bail!("health_check_interval must be greater than 0");
        }

        if let Some(token) = &self.admin_token {
            if token.len() < 16 {
                anyhow::bail!("admin token must be at least 16 characters");
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("0.0.0.0:8080".to_string())
    }
}

fn env_u64(name: &str) -> anyhow::Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer, got {:?}", name, value)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.watch_interval, Duration::from_secs(60));
        assert_eq!(config.pull_interval, Duration::from_secs(60));
        assert_eq!(config.health_check_interval, Duration::from_secs(60));
        assert!(config.database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.database_url = Some("mysql://localhost/flotilla".to_string());
        assert!(config.validate().is_err());

        config.database_url = Some("postgres://flotilla@localhost/flotilla".to_string());
        assert!(config.validate().is_ok());

        config.admin_token = Some("short".to_string());
        assert!(config.validate().is_err());

        config.admin_token = Some("0123456789abcdef".to_string());
        assert!(config.validate().is_ok());

        config.pull_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_watch_interval_is_allowed() {
        let mut config = Config::default();
        config.watch_interval = Duration::ZERO;
        assert!(config.validate().is_ok());
    }
}
