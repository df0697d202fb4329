use std::path::PathBuf;

/// Process configuration, read from `ZEROQ_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Shared platform database.
    pub database_url: String,
    pub api_key: Option<String>,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable numbers fall back
    /// to their defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = PathBuf::from(var("ZEROQ_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let database_url = var("ZEROQ_DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| format!("file://{}", data_dir.join("shared.wal").display()));
        Self {
            bind: var("ZEROQ_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: var("ZEROQ_PORT").and_then(|s| s.parse().ok()).unwrap_or(8080),
            data_dir,
            database_url,
            api_key: var("ZEROQ_API_KEY").filter(|k| !k.is_empty()),
            compact_threshold: var("ZEROQ_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            metrics_port: var("ZEROQ_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.addr(), "0.0.0.0:8080");
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.database_url, "file://./data/shared.wal");
        assert_eq!(c.api_key, None);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("ZEROQ_BIND", "127.0.0.1"),
            ("ZEROQ_PORT", "9000"),
            ("ZEROQ_DATA_DIR", "/var/lib/zeroq"),
            ("ZEROQ_API_KEY", "s3cret"),
            ("ZEROQ_COMPACT_THRESHOLD", "50"),
            ("ZEROQ_METRICS_PORT", "9100"),
        ]);
        assert_eq!(c.addr(), "127.0.0.1:9000");
        assert_eq!(c.database_url, "file:///var/lib/zeroq/shared.wal");
        assert_eq!(c.api_key.as_deref(), Some("s3cret"));
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.metrics_port, Some(9100));

        let c = config(&[("ZEROQ_DATABASE_URL", "memory://dev"), ("ZEROQ_PORT", "http")]);
        assert_eq!(c.database_url, "memory://dev");
        assert_eq!(c.port, 8080);
    }

    #[test]
    fn empty_api_key_means_open() {
        assert_eq!(config(&[("ZEROQ_API_KEY", "")]).api_key, None);
    }
}
