//! Process configuration, read from `PARKD_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::clock::StorageZone;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub zone: StorageZone,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// HMAC key for bearer tokens.
    pub auth_secret: String,
    /// Required in `X-API-Key` for catalogue writes. Unset disables them.
    pub admin_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is required")]
    Missing { name: &'static str },
    #[error("{name}: invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = parse_or(&get, "PARKD_PORT", 3000)?;
        let sweep_secs: u64 = parse_or(&get, "PARKD_SWEEP_INTERVAL_SECS", 30)?;
        if sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "PARKD_SWEEP_INTERVAL_SECS",
                value: "0".into(),
            });
        }
        let compact_threshold = parse_or(&get, "PARKD_COMPACT_THRESHOLD", 1000)?;
        let metrics_port = match get("PARKD_METRICS_PORT") {
            Some(v) => Some(v.parse().map_err(|_| ConfigError::Invalid {
                name: "PARKD_METRICS_PORT",
                value: v,
            })?),
            None => None,
        };
        let zone = match get("PARKD_TIMEZONE") {
            Some(v) => StorageZone::parse(&v).map_err(|_| ConfigError::Invalid {
                name: "PARKD_TIMEZONE",
                value: v,
            })?,
            None => StorageZone::default(),
        };
        let auth_secret = get("PARKD_AUTH_SECRET").ok_or(ConfigError::Missing {
            name: "PARKD_AUTH_SECRET",
        })?;

        Ok(Self {
            bind: get("PARKD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            data_dir: PathBuf::from(get("PARKD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            zone,
            sweep_interval: Duration::from_secs(sweep_secs),
            compact_threshold,
            metrics_port,
            auth_secret,
            admin_key: get("PARKD_ADMIN_KEY"),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parkd.wal")
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[("PARKD_AUTH_SECRET", "s3cret")]).unwrap();
        assert_eq!(c.bind, "0.0.0.0");
        assert_eq!(c.port, 3000);
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.zone.name(), "Europe/Bucharest");
        assert_eq!(c.sweep_interval, Duration::from_secs(30));
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.admin_key, None);
        assert_eq!(c.wal_path(), PathBuf::from("./data/parkd.wal"));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("PARKD_AUTH_SECRET", "s3cret"),
            ("PARKD_PORT", "8080"),
            ("PARKD_TIMEZONE", "UTC"),
            ("PARKD_SWEEP_INTERVAL_SECS", "5"),
            ("PARKD_METRICS_PORT", "9100"),
            ("PARKD_ADMIN_KEY", "ops"),
        ])
        .unwrap();
        assert_eq!(c.port, 8080);
        assert_eq!(c.zone.name(), "UTC");
        assert_eq!(c.sweep_interval, Duration::from_secs(5));
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.admin_key.as_deref(), Some("ops"));
    }

    #[test]
    fn secret_is_required() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::Missing { name: "PARKD_AUTH_SECRET" })
        ));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = config(&[("PARKD_AUTH_SECRET", "x"), ("PARKD_PORT", "http")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PARKD_PORT", .. }));
        let err = config(&[("PARKD_AUTH_SECRET", "x"), ("PARKD_TIMEZONE", "Mars/Olympus")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PARKD_TIMEZONE", .. }));
        let err = config(&[("PARKD_AUTH_SECRET", "x"), ("PARKD_SWEEP_INTERVAL_SECS", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
