use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Daemon settings, read from `HALLSLOT_*` environment variables. Missing or
/// unparseable values fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub lock_timeout: Duration,
    /// Polling period, and so the staleness bound, of cached snapshots.
    pub refresh_period: Duration,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            lock_timeout: Duration::from_millis(2000),
            refresh_period: Duration::from_secs(30),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            data_dir: lookup("HALLSLOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "HALLSLOT_METRICS_PORT"),
            lock_timeout: parsed(&lookup, "HALLSLOT_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            refresh_period: parsed(&lookup, "HALLSLOT_REFRESH_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_period),
            compact_threshold: parsed(&lookup, "HALLSLOT_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("hallslot.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
    }

    #[test]
    fn reads_every_variable() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("HALLSLOT_DATA_DIR", "/var/lib/hallslot"),
            ("HALLSLOT_METRICS_PORT", "9100"),
            ("HALLSLOT_LOCK_TIMEOUT_MS", "250"),
            ("HALLSLOT_REFRESH_SECS", "5"),
            ("HALLSLOT_COMPACT_THRESHOLD", "42"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/hallslot"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.refresh_period, Duration::from_secs(5));
        assert_eq!(cfg.compact_threshold, 42);
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/hallslot/hallslot.wal"));
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("HALLSLOT_METRICS_PORT", "http"),
            ("HALLSLOT_LOCK_TIMEOUT_MS", "-1"),
            ("HALLSLOT_REFRESH_SECS", "0"),
        ]));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.lock_timeout, Config::default().lock_timeout);
        assert_eq!(cfg.refresh_period, Config::default().refresh_period);
    }
}
