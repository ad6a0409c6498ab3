//! Configuration for the watcher.
//!
//! Everything is read from `WATCHER_*` environment variables. Only the
//! Rancher credentials are required; every other setting has a default.

use std::time::Duration;

use ipwatch_reconcile::{
    ManagedFilter, DEFAULT_ADDRESS_LABEL, DEFAULT_ENABLE_LABEL, DEFAULT_PASS_INTERVAL,
    DEFAULT_REBOOT_LABEL, DEFAULT_RECORD_TTL, DEFAULT_RESTART_TIMEOUT, DEFAULT_STORE_TIMEOUT,
};
use thiserror::Error;

use crate::engine::EngineConfig;
use crate::etcd::EtcdConfig;
use crate::rancher::RancherConfig;

/// Startup configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Log verbosity accepted by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Rancher API base URL (example: http://rancher:8080/v2-beta/projects/1a5).
    pub rancher_api_url: String,

    /// Rancher API access key.
    pub rancher_api_key: String,

    /// Rancher API secret key.
    pub rancher_api_secret: String,

    /// Label that opts a container into monitoring.
    pub enable_label: String,

    /// Label listing the dependents to restart.
    pub reboot_label: String,

    /// Label carrying the container address.
    pub address_label: String,

    /// etcd host.
    pub etcd_host: String,

    /// etcd client port.
    pub etcd_port: u16,

    /// Key prefix under which address records live.
    pub etcd_prefix: String,

    /// Interval between passes.
    pub pass_interval: Duration,

    /// TTL of stored address records.
    pub record_ttl: Duration,

    /// Upper bound for one dependent restart.
    pub restart_timeout: Duration,

    /// Upper bound for one store call.
    pub store_timeout: Duration,

    /// Run a single pass and exit.
    pub once: bool,

    pub log_level: LogLevel,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let rancher_api_url = required("WATCHER_RANCHER_API_URL")?
            .trim_end_matches('/')
            .to_string();
        let rancher_api_key = required("WATCHER_RANCHER_API_KEY")?;
        let rancher_api_secret = required("WATCHER_RANCHER_API_SECRET")?;

        let enable_label = or_default("WATCHER_DOCKER_LABEL_ENABLE", DEFAULT_ENABLE_LABEL);
        let reboot_label = or_default("WATCHER_DOCKER_LABEL_REBOOT", DEFAULT_REBOOT_LABEL);
        let address_label = or_default("WATCHER_DOCKER_LABEL_IP", DEFAULT_ADDRESS_LABEL);

        let etcd_host = or_default("WATCHER_ETCD_HOST", "etcd.hutter.local");
        let etcd_port = match var("WATCHER_ETCD_PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "WATCHER_ETCD_PORT",
                value: raw,
                expected: "a port number",
            })?,
            None => 2379,
        };
        let etcd_prefix = or_default("WATCHER_ETCD_PREFIX", "container")
            .trim_matches('/')
            .to_string();

        let pass_interval = seconds(&var, "WATCHER_SCHEDULE", DEFAULT_PASS_INTERVAL)?;
        let record_ttl = seconds(&var, "WATCHER_RECORD_TTL", DEFAULT_RECORD_TTL)?;
        let restart_timeout = seconds(&var, "WATCHER_RESTART_TIMEOUT", DEFAULT_RESTART_TIMEOUT)?;
        let store_timeout = seconds(&var, "WATCHER_STORE_TIMEOUT", DEFAULT_STORE_TIMEOUT)?;

        let once = var("WATCHER_ONCE")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let log_level = match var("WATCHER_LOGLEVEL").map(|v| v.to_lowercase()).as_deref() {
            None | Some("info") => LogLevel::Info,
            Some("debug") => LogLevel::Debug,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "WATCHER_LOGLEVEL",
                    value: other.to_string(),
                    expected: "\"info\" or \"debug\"",
                })
            }
        };

        Ok(Self {
            rancher_api_url,
            rancher_api_key,
            rancher_api_secret,
            enable_label,
            reboot_label,
            address_label,
            etcd_host,
            etcd_port,
            etcd_prefix,
            pass_interval,
            record_ttl,
            restart_timeout,
            store_timeout,
            once,
            log_level,
        })
    }

    /// Base URL of the etcd client API.
    pub fn etcd_endpoint(&self) -> String {
        format!("http://{}:{}", self.etcd_host, self.etcd_port)
    }

    pub fn rancher_config(&self) -> RancherConfig {
        let mut config = RancherConfig::new(
            &self.rancher_api_url,
            &self.rancher_api_key,
            &self.rancher_api_secret,
        );
        config.address_label = self.address_label.clone();
        // The client wait ends one poll interval before the engine's restart
        // deadline, so an exhausted wait is reported as such.
        let interval = config.restart_poll_interval.as_millis().max(1);
        let budget = self
            .restart_timeout
            .saturating_sub(config.restart_poll_interval * 2)
            .as_millis();
        config.restart_poll_attempts = (budget / interval).clamp(1, u32::MAX as u128) as u32;
        config
    }

    pub fn etcd_config(&self) -> EtcdConfig {
        EtcdConfig::new(self.etcd_endpoint(), &self.etcd_prefix)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            filter: ManagedFilter::new(&self.enable_label),
            reboot_label: self.reboot_label.clone(),
            record_ttl: self.record_ttl,
            restart_timeout: self.restart_timeout,
            store_timeout: self.store_timeout,
            ..EngineConfig::default()
        }
    }
}

fn seconds<F>(var: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(key) else {
        return Ok(default);
    };

    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid {
            var: key,
            value: raw,
            expected: "a positive number of seconds",
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const CREDENTIALS: [(&str, &str); 3] = [
        ("WATCHER_RANCHER_API_URL", "http://rancher:8080/v2-beta/"),
        ("WATCHER_RANCHER_API_KEY", "key"),
        ("WATCHER_RANCHER_API_SECRET", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&CREDENTIALS)).unwrap();

        assert_eq!(config.rancher_api_url, "http://rancher:8080/v2-beta");
        assert_eq!(config.enable_label, "cloud.hutter.watcher.ip.enable");
        assert_eq!(config.reboot_label, "cloud.hutter.watcher.ip.reboot");
        assert_eq!(config.address_label, "io.rancher.container.ip");
        assert_eq!(config.etcd_endpoint(), "http://etcd.hutter.local:2379");
        assert_eq!(config.etcd_prefix, "container");
        assert_eq!(config.pass_interval, Duration::from_secs(60));
        assert_eq!(config.record_ttl, Duration::from_secs(600));
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.once);
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let err = Config::from_lookup(lookup(&CREDENTIALS[..2])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WATCHER_RANCHER_API_SECRET")));

        let mut vars = CREDENTIALS.to_vec();
        vars[0].1 = "  ";
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WATCHER_RANCHER_API_URL")));
    }

    #[test]
    fn test_overrides() {
        let mut vars = CREDENTIALS.to_vec();
        vars.extend([
            ("WATCHER_SCHEDULE", "15"),
            ("WATCHER_ETCD_PORT", "4001"),
            ("WATCHER_ETCD_PREFIX", "/watch/"),
            ("WATCHER_LOGLEVEL", "DEBUG"),
            ("WATCHER_ONCE", "true"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.pass_interval, Duration::from_secs(15));
        assert_eq!(config.etcd_port, 4001);
        assert_eq!(config.etcd_prefix, "watch");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.once);
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("WATCHER_SCHEDULE", "soon"),
            ("WATCHER_SCHEDULE", "0"),
            ("WATCHER_ETCD_PORT", "70000"),
            ("WATCHER_LOGLEVEL", "trace"),
        ] {
            let mut vars = CREDENTIALS.to_vec();
            vars.push((key, value));
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var, .. } if var == key),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_engine_config_carries_labels() {
        let config = Config::from_lookup(lookup(&CREDENTIALS)).unwrap();
        let engine = config.engine_config();

        assert_eq!(engine.filter.enable_label, "cloud.hutter.watcher.ip.enable");
        assert_eq!(engine.filter.enable_value, "true");
        assert_eq!(engine.filter.state, "running");
        assert_eq!(engine.reboot_label, "cloud.hutter.watcher.ip.reboot");
    }

    #[test]
    fn test_engine_defaults_match_config_defaults() {
        let config = Config::from_lookup(lookup(&CREDENTIALS)).unwrap().engine_config();
        let default = EngineConfig::default();

        assert_eq!(config.filter, default.filter);
        assert_eq!(config.reboot_label, default.reboot_label);
        assert_eq!(config.record_ttl, default.record_ttl);
        assert_eq!(config.restart_timeout, default.restart_timeout);
    }

    #[test]
    fn test_rancher_wait_ends_before_engine_deadline() {
        for timeout in ["120", "5", "1"] {
            let mut vars = CREDENTIALS.to_vec();
            vars.push(("WATCHER_RESTART_TIMEOUT", timeout));
            let config = Config::from_lookup(lookup(&vars)).unwrap();
            let rancher = config.rancher_config();

            let wait = rancher.restart_poll_interval * (rancher.restart_poll_attempts + 1);
            assert!(rancher.restart_poll_attempts >= 1);
            if config.restart_timeout > rancher.restart_poll_interval * 2 {
                assert!(
                    wait < config.engine_config().restart_timeout,
                    "WATCHER_RESTART_TIMEOUT={timeout}: wait {wait:?}"
                );
            }
        }
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("WATCHER_RESTART_TIMEOUT", "120"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.rancher_config().restart_poll_attempts, 118);
    }
}
