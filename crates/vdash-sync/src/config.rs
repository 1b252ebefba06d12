use std::path::PathBuf;
use std::time::Duration;

use crate::resolver::DEFAULT_RESOLVE_CONCURRENCY;

pub const CAMPAIGN_CACHE_FILE: &str = "campaign_name_cache.json";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub remote_base_url: String,
    pub remote_user: Option<String>,
    pub remote_pass: Option<String>,
    pub listen_port: u16,
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub campaign_map_paths: Vec<PathBuf>,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub http_timeout_secs: u64,
    pub roster_days: i64,
    pub pace_every: usize,
    pub pace_delay: Duration,
    pub resolve_concurrency: usize,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parsed = |key: &str| get(key).and_then(|v| v.parse::<u64>().ok());

        let data_dir = get("VICI_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./vicidial"));
        let campaign_map_paths = get("VICI_CAMPAIGN_MAP_PATHS")
            .map(|v| {
                v.split(':')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_else(|| vec![data_dir.join("campaigns.json"), PathBuf::from("./campaigns.json")]);

        Self {
            remote_base_url: get("VICIDIAL_URL").unwrap_or_default(),
            remote_user: get("VICIDIAL_USER"),
            remote_pass: get("VICIDIAL_PASS"),
            listen_port: get("PORT").and_then(|v| v.parse().ok()).unwrap_or(3000),
            database_url: get("DATABASE_URL"),
            campaign_map_paths,
            data_dir,
            scheduler_enabled: get("VDASH_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron_1: get("SYNC_CRON_1").unwrap_or_else(|| "0 0 8 * * *".to_string()),
            sync_cron_2: get("SYNC_CRON_2").unwrap_or_else(|| "0 0 23 * * *".to_string()),
            http_timeout_secs: parsed("VDASH_HTTP_TIMEOUT_SECS").unwrap_or(120),
            roster_days: parsed("VDASH_ROSTER_DAYS").map(|d| d as i64).unwrap_or(90),
            pace_every: parsed("VDASH_PACE_EVERY").map(|n| n as usize).unwrap_or(5),
            pace_delay: Duration::from_millis(parsed("VDASH_PACE_DELAY_MS").unwrap_or(100)),
            resolve_concurrency: parsed("VDASH_RESOLVE_CONCURRENCY")
                .map(|n| n as usize)
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_RESOLVE_CONCURRENCY),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CAMPAIGN_CACHE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> SyncConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.listen_port, 3000);
        assert_eq!(config.roster_days, 90);
        assert_eq!(config.pace_every, 5);
        assert_eq!(config.pace_delay, Duration::from_millis(100));
        assert_eq!(config.resolve_concurrency, 6);
        assert!(config.remote_user.is_none());
        assert!(config.database_url.is_none());
        assert!(!config.scheduler_enabled);
        assert_eq!(config.cache_path(), PathBuf::from("./vicidial/campaign_name_cache.json"));
        assert_eq!(config.campaign_map_paths[0], PathBuf::from("./vicidial/campaigns.json"));
    }

    #[test]
    fn values_are_read_and_blank_is_unset() {
        let config = config_from(&[
            ("VICIDIAL_URL", "https://dialer.example.com/api.php"),
            ("VICIDIAL_USER", "api"),
            ("VICIDIAL_PASS", "  "),
            ("PORT", "8088"),
            ("VICI_DATA_DIR", "/tmp/vd"),
            ("VICI_CAMPAIGN_MAP_PATHS", "/a.json: /b.json"),
            ("VDASH_SCHEDULER_ENABLED", "true"),
            ("VDASH_RESOLVE_CONCURRENCY", "0"),
        ]);
        assert_eq!(config.remote_base_url, "https://dialer.example.com/api.php");
        assert_eq!(config.remote_user.as_deref(), Some("api"));
        assert!(config.remote_pass.is_none());
        assert_eq!(config.listen_port, 8088);
        assert_eq!(config.cache_path(), PathBuf::from("/tmp/vd/campaign_name_cache.json"));
        assert_eq!(
            config.campaign_map_paths,
            vec![PathBuf::from("/a.json"), PathBuf::from("/b.json")]
        );
        assert!(config.scheduler_enabled);
        assert_eq!(config.resolve_concurrency, 6);
    }
}
