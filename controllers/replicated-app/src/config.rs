//! Controller configuration
//!
//! All settings come from environment variables. `from_lookup` takes the
//! lookup function as a parameter so tests do not touch the process
//! environment.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where ReplicatedApp objects live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// In-process object graph (local runs, tests)
    Memory,
    /// Kubernetes API server
    Kube,
}

impl FromStr for StoreMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreMode::Memory),
            "kube" | "kubernetes" => Ok(StoreMode::Kube),
            other => Err(ControllerError::InvalidConfig(format!(
                "STORE_MODE must be 'memory' or 'kube', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_mode: StoreMode,
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Workload driver base URL; `None` uses the in-memory driver
    pub driver_url: Option<String>,
    pub driver_token: Option<String>,
    /// YAML file with ReplicatedApps loaded into the memory store at startup
    pub seed_file: Option<PathBuf>,
    pub worker_count: usize,
    pub resync_interval: Duration,
    pub progress_interval: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub probe_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_mode: StoreMode::Memory,
            namespace: None,
            driver_url: None,
            driver_token: None,
            seed_file: None,
            worker_count: 4,
            resync_interval: Duration::from_secs(300),
            progress_interval: Duration::from_secs(5),
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store_mode = match var("STORE_MODE") {
            Some(v) => v.parse()?,
            None => defaults.store_mode,
        };

        let worker_count = parse_or(&var, "WORKER_COUNT", defaults.worker_count)?;
        if worker_count == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }

        let resync_interval = secs_or(&var, "RESYNC_INTERVAL_SECS", defaults.resync_interval)?;
        let progress_interval = secs_or(&var, "PROGRESS_INTERVAL_SECS", defaults.progress_interval)?;
        for (key, interval) in [
            ("RESYNC_INTERVAL_SECS", resync_interval),
            ("PROGRESS_INTERVAL_SECS", progress_interval),
        ] {
            if interval.is_zero() {
                return Err(ControllerError::InvalidConfig(format!("{} must be at least 1", key)));
            }
        }

        let backoff_min = secs_or(&var, "BACKOFF_MIN_SECS", defaults.backoff_min)?;
        let backoff_max = secs_or(&var, "BACKOFF_MAX_SECS", defaults.backoff_max)?;
        if backoff_min.is_zero() || backoff_max < backoff_min {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff bounds must satisfy 0 < BACKOFF_MIN_SECS <= BACKOFF_MAX_SECS, got {:?}..{:?}",
                backoff_min, backoff_max
            )));
        }

        Ok(Self {
            store_mode,
            namespace: var("WATCH_NAMESPACE"),
            driver_url: var("WORKLOAD_DRIVER_URL"),
            driver_token: var("WORKLOAD_DRIVER_TOKEN"),
            seed_file: var("SEED_FILE").map(PathBuf::from),
            worker_count,
            resync_interval,
            progress_interval,
            backoff_min,
            backoff_max,
            probe_addr: parse_or(&var, "PROBE_ADDR", defaults.probe_addr)?,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}

fn secs_or(var: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration, ControllerError> {
    let fallback = default.as_secs();
    parse_or(var, key, fallback).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.store_mode, StoreMode::Memory);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert_eq!(config.backoff_min, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(60));
        assert_eq!(config.probe_addr.port(), 8080);
        assert!(config.driver_url.is_none());
        assert!(config.namespace.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("STORE_MODE", "Kube"),
            ("WATCH_NAMESPACE", "prod"),
            ("WORKLOAD_DRIVER_URL", "http://driver:8080"),
            ("WORKER_COUNT", "8"),
            ("PROGRESS_INTERVAL_SECS", "2"),
            ("PROBE_ADDR", "127.0.0.1:9090"),
        ])
        .unwrap();
        assert_eq!(config.store_mode, StoreMode::Kube);
        assert_eq!(config.namespace.as_deref(), Some("prod"));
        assert_eq!(config.driver_url.as_deref(), Some("http://driver:8080"));
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.progress_interval, Duration::from_secs(2));
        assert_eq!(config.probe_addr.to_string(), "127.0.0.1:9090");
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("WATCH_NAMESPACE", "  "), ("WORKER_COUNT", "")]).unwrap();
        assert!(config.namespace.is_none());
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(config_from(&[("STORE_MODE", "etcd")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(config_from(&[("WORKER_COUNT", "0")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(config_from(&[("WORKER_COUNT", "many")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(
            config_from(&[("BACKOFF_MIN_SECS", "30"), ("BACKOFF_MAX_SECS", "10")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(config_from(&[("PROBE_ADDR", "nowhere")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(config_from(&[("RESYNC_INTERVAL_SECS", "0")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(config_from(&[("PROGRESS_INTERVAL_SECS", "0")]), Err(ControllerError::InvalidConfig(_))));
    }
}
