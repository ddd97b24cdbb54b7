use std::path::PathBuf;
use std::time::Duration;

/// Server configuration, read once from `ROOMKEEP_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub reconcile_interval: Duration,
    pub notify_max_attempts: u32,
    /// Delay before the second delivery attempt; doubles for every attempt after that.
    pub notify_backoff: Duration,
    pub merchant_id: String,
    pub merchant_secret: String,
    pub currency: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            bind: lookup("ROOMKEEP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: lookup("ROOMKEEP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5433),
            data_dir: PathBuf::from(lookup("ROOMKEEP_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("ROOMKEEP_PASSWORD").unwrap_or_else(|| "roomkeep".into()),
            max_connections: parsed("ROOMKEEP_MAX_CONNECTIONS").map_or(256, |n| n as usize),
            compact_threshold: parsed("ROOMKEEP_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: lookup("ROOMKEEP_METRICS_PORT").and_then(|s| s.parse().ok()),
            reconcile_interval: Duration::from_secs(
                parsed("ROOMKEEP_RECONCILE_INTERVAL_SECS").unwrap_or(60).max(1),
            ),
            notify_max_attempts: parsed("ROOMKEEP_NOTIFY_MAX_ATTEMPTS")
                .map_or(3, |n| n.clamp(1, 10) as u32),
            notify_backoff: Duration::from_millis(parsed("ROOMKEEP_NOTIFY_BACKOFF_MS").unwrap_or(500)),
            merchant_id: lookup("ROOMKEEP_MERCHANT_ID").unwrap_or_default(),
            merchant_secret: lookup("ROOMKEEP_MERCHANT_SECRET").unwrap_or_default(),
            currency: lookup("ROOMKEEP_CURRENCY").unwrap_or_else(|| "LKR".into()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomkeep.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = from_pairs(&[]);
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.notify_max_attempts, 3);
        assert_eq!(cfg.notify_backoff, Duration::from_millis(500));
        assert_eq!(cfg.currency, "LKR");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/roomkeep.wal"));
    }

    #[test]
    fn overrides_applied() {
        let cfg = from_pairs(&[
            ("ROOMKEEP_PORT", "6000"),
            ("ROOMKEEP_DATA_DIR", "/var/lib/roomkeep"),
            ("ROOMKEEP_METRICS_PORT", "9100"),
            ("ROOMKEEP_NOTIFY_MAX_ATTEMPTS", "5"),
            ("ROOMKEEP_MERCHANT_ID", "1211149"),
            ("ROOMKEEP_CURRENCY", "USD"),
        ]);
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/roomkeep/roomkeep.wal"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.notify_max_attempts, 5);
        assert_eq!(cfg.merchant_id, "1211149");
        assert_eq!(cfg.currency, "USD");
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = from_pairs(&[
            ("ROOMKEEP_PORT", "not-a-port"),
            ("ROOMKEEP_NOTIFY_MAX_ATTEMPTS", "0"),
            ("ROOMKEEP_RECONCILE_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(cfg.port, 5433);
        // at least one attempt, at least one second between sweeps
        assert_eq!(cfg.notify_max_attempts, 1);
        assert_eq!(cfg.reconcile_interval, Duration::from_secs(1));
    }
}
