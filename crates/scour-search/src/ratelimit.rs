use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Process-wide registry of search providers that must be skipped until an
/// expiry passes. Backed by a single JSON file mapping
/// `provider → ISO-8601 expiry (UTC)` so that other processes can honour the
/// same format.
pub struct RateLimitRegistry {
    file_path: PathBuf,
    default_duration: Duration,
    lock: Mutex<()>,
}

impl RateLimitRegistry {
    pub fn new(file_path: PathBuf, default_duration_secs: u64) -> Self {
        Self {
            file_path,
            default_duration: Duration::seconds(default_duration_secs as i64),
            lock: Mutex::new(()),
        }
    }

    /// Mark a provider as ignored until `now + duration` (default duration
    /// when none given). Short durations suit transient 4xx signals; long
    /// ones suit fatal provider errors.
    pub async fn mark(&self, provider: &str, duration_secs: Option<u64>) {
        if provider.is_empty() {
            warn!("attempted to mark provider with empty name");
            return;
        }
        let duration = duration_secs
            .map(|s| Duration::seconds(s as i64))
            .unwrap_or(self.default_duration);
        let expiry = Utc::now() + duration;

        let _guard = self.lock.lock().await;
        let mut entries = self.load_raw();
        entries.insert(provider.to_string(), expiry.to_rfc3339());
        self.save_raw(&entries);
        info!(provider, expiry = %expiry, "provider added to rate-limit ignore list");
    }

    /// Providers currently ignored, with their expiry times. Expired and
    /// malformed entries are pruned from the file as a side effect.
    pub async fn active_ignored(&self) -> HashMap<String, DateTime<Utc>> {
        let _guard = self.lock.lock().await;
        let raw = self.load_raw();
        let now = Utc::now();

        let mut active = HashMap::new();
        let mut kept = HashMap::new();
        let mut pruned = Vec::new();

        for (provider, expiry_iso) in raw {
            match DateTime::parse_from_rfc3339(&expiry_iso) {
                Ok(expiry) if expiry.with_timezone(&Utc) > now => {
                    active.insert(provider.clone(), expiry.with_timezone(&Utc));
                    kept.insert(provider, expiry_iso);
                }
                Ok(_) => pruned.push(provider),
                Err(_) => {
                    warn!(provider = %provider, expiry = %expiry_iso, "invalid expiry timestamp, pruning");
                    pruned.push(provider);
                }
            }
        }

        if !pruned.is_empty() {
            self.save_raw(&kept);
            info!(?pruned, "cleaned up expired/invalid rate-limit entries");
        }
        active
    }

    pub async fn is_ignored(&self, provider: &str) -> bool {
        self.active_ignored().await.contains_key(provider)
    }

    pub async fn remove(&self, provider: &str) {
        let _guard = self.lock.lock().await;
        let mut entries = self.load_raw();
        if entries.remove(provider).is_some() {
            self.save_raw(&entries);
            info!(provider, "provider removed from ignore list");
        }
    }

    pub async fn clear(&self) {
        let _guard = self.lock.lock().await;
        self.save_raw(&HashMap::new());
        info!("rate-limit ignore list cleared");
    }

    fn load_raw(&self) -> HashMap<String, String> {
        if !self.file_path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(&self.file_path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(error = %e, path = ?self.file_path, "ignore list is not a valid map, treating as empty");
                    HashMap::new()
                }
            },
            Err(e) => {
                warn!(error = %e, path = ?self.file_path, "failed to read ignore list");
                HashMap::new()
            }
        }
    }

    fn save_raw(&self, entries: &HashMap<String, String>) {
        if let Some(dir) = self.file_path.parent() {
            if !dir.exists() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    warn!(error = %e, ?dir, "failed to create ignore-list directory");
                    return;
                }
            }
        }
        match serde_json::to_string_pretty(entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    warn!(error = %e, path = ?self.file_path, "failed to write ignore list");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize ignore list"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &tempfile::TempDir) -> RateLimitRegistry {
        RateLimitRegistry::new(dir.path().join("ignore.json"), 1800)
    }

    #[tokio::test]
    async fn mark_then_ignored_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);

        reg.mark("duckduckgo", Some(60)).await;
        assert!(reg.is_ignored("duckduckgo").await);
        assert!(!reg.is_ignored("brave").await);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ignore.json");
        let past = (Utc::now() - Duration::seconds(5)).to_rfc3339();
        let future = (Utc::now() + Duration::seconds(600)).to_rfc3339();
        std::fs::write(
            &path,
            serde_json::json!({"stale": past, "fresh": future}).to_string(),
        )
        .unwrap();

        let reg = RateLimitRegistry::new(path.clone(), 1800);
        let active = reg.active_ignored().await;
        assert!(active.contains_key("fresh"));
        assert!(!active.contains_key("stale"));

        let on_disk: HashMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(!on_disk.contains_key("stale"));
        assert!(on_disk.contains_key("fresh"));
    }

    #[tokio::test]
    async fn malformed_timestamps_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ignore.json");
        std::fs::write(&path, r#"{"broken": "not-a-timestamp"}"#).unwrap();

        let reg = RateLimitRegistry::new(path.clone(), 1800);
        assert!(reg.active_ignored().await.is_empty());
        let on_disk: HashMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(on_disk.is_empty());
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.mark("bing", None).await;
        reg.mark("brave", None).await;

        reg.remove("bing").await;
        assert!(!reg.is_ignored("bing").await);
        assert!(reg.is_ignored("brave").await);

        reg.clear().await;
        assert!(reg.active_ignored().await.is_empty());
    }

    #[tokio::test]
    async fn non_map_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ignore.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let reg = RateLimitRegistry::new(path, 1800);
        assert!(reg.active_ignored().await.is_empty());
    }
}
