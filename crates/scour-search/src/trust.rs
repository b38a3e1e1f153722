use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use scour_core::TrustSignals;
use scour_config::schema::TrustConfig;

/// SQLite-backed trust profiles for registered domains. Lookups fall back
/// from exact domain rows to wildcard `*.tld` rows; unseen domains get a
/// provisional score and are inserted with `reference_count = 1`.
///
/// Never raises: when the database is unavailable the provisional profile is
/// returned without being persisted.
pub struct DomainTrustStore {
    db_path: PathBuf,
    config: TrustConfig,
    /// domain → (age_days, resolved_at). WHOIS answers are cached for 24h.
    whois_cache: Mutex<HashMap<String, (Option<i64>, Instant)>>,
}

impl DomainTrustStore {
    pub fn new(config: TrustConfig) -> Self {
        Self {
            db_path: config.db_path.clone(),
            config,
            whois_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Create the `domain_trust_profiles` table when it does not exist.
    /// Called once at startup; the table is shared with the background
    /// rescoring job.
    pub fn ensure_schema(&self) -> scour_core::Result<()> {
        if let Some(dir) = self.db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS domain_trust_profiles (
                domain TEXT PRIMARY KEY,
                trust_score REAL NOT NULL,
                is_https BOOLEAN,
                domain_age_days INTEGER,
                tld_type_bonus REAL DEFAULT 0.0,
                reference_count INTEGER DEFAULT 0,
                last_scanned_date TIMESTAMP,
                created_at TIMESTAMP,
                updated_at TIMESTAMP
            );",
        )
        .map_err(|e| scour_core::ScourError::Trust(e.to_string()))?;
        Ok(())
    }

    /// Fetch or create the trust profile for a domain. An existing row gets
    /// its `reference_count` incremented; an unseen domain is scored
    /// provisionally and inserted.
    pub async fn get_or_create(&self, domain: &str, sample_url: &str) -> TrustSignals {
        let is_https = sample_url.starts_with("https://");
        let age_days = self.domain_age(domain).await;

        // SQLite work happens off the async executor.
        let db_path = self.db_path.clone();
        let domain_owned = domain.to_string();
        let privileged = self.config.privileged_tlds.clone();
        let result = tokio::task::spawn_blocking(move || {
            lookup_and_update(&db_path, &domain_owned, is_https, age_days, &privileged)
        })
        .await;

        match result {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, domain, "trust lookup task panicked, returning provisional");
                provisional_signals(
                    domain,
                    is_https,
                    age_days,
                    &self.config.privileged_tlds,
                    "provisional_exception",
                )
            }
        }
    }

    async fn domain_age(&self, domain: &str) -> Option<i64> {
        if self.config.disable_whois || domain.is_empty() {
            return None;
        }
        let ttl = Duration::from_secs(self.config.whois_cache_secs);
        {
            let cache = self.whois_cache.lock();
            if let Some((age, at)) = cache.get(domain) {
                if at.elapsed() < ttl {
                    return *age;
                }
            }
        }
        let age = crate::whois::domain_age_days(domain).await;
        self.whois_cache
            .lock()
            .insert(domain.to_string(), (age, Instant::now()));
        age
    }

    fn open(&self) -> scour_core::Result<Connection> {
        Connection::open(&self.db_path).map_err(|e| scour_core::ScourError::Trust(e.to_string()))
    }
}

/// Provisional score for a domain with no database row:
/// 0.4 base, +0.05 for https, +0.10/-0.05 by age, +0.10 for privileged TLDs,
/// clamped to [0.05, 0.95] and rounded to 3 decimals.
pub fn provisional_score(
    domain: &str,
    is_https: bool,
    age_days: Option<i64>,
    privileged_tlds: &[String],
) -> f64 {
    let mut score: f64 = 0.4;
    if is_https {
        score += 0.05;
    }
    match age_days {
        Some(age) if age > 730 => score += 0.10,
        Some(age) if age < 180 => score -= 0.05,
        _ => {}
    }
    if privileged_tlds.iter().any(|tld| domain.ends_with(tld.as_str())) {
        score += 0.10;
    }
    (score.clamp(0.05, 0.95) * 1000.0).round() / 1000.0
}

fn provisional_signals(
    domain: &str,
    is_https: bool,
    age_days: Option<i64>,
    privileged_tlds: &[String],
    kind: &str,
) -> TrustSignals {
    TrustSignals {
        domain: domain.to_string(),
        trust_score: provisional_score(domain, is_https, age_days, privileged_tlds),
        is_https,
        domain_age_days: age_days,
        reference_count: 0,
        tld_type_bonus: 0.0,
        source_trust_type: kind.to_string(),
    }
}

fn lookup_and_update(
    db_path: &PathBuf,
    domain: &str,
    is_https: bool,
    age_days: Option<i64>,
    privileged_tlds: &[String],
) -> TrustSignals {
    let conn = match Connection::open(db_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, domain, "trust db unavailable, returning provisional score");
            return provisional_signals(domain, is_https, age_days, privileged_tlds, "provisional_no_db_conn");
        }
    };

    match find_profile(&conn, domain) {
        Some(row) => {
            let from_wildcard = row.domain.starts_with("*.");
            let new_count = row.reference_count + 1;
            if let Err(e) = conn.execute(
                "UPDATE domain_trust_profiles
                 SET reference_count = ?1, updated_at = CURRENT_TIMESTAMP WHERE domain = ?2",
                rusqlite::params![new_count, row.domain],
            ) {
                debug!(error = %e, domain, "reference_count update failed");
            }
            TrustSignals {
                domain: domain.to_string(),
                trust_score: row.trust_score.clamp(0.0, 1.0),
                // Wildcard rows describe the TLD class, not this host.
                is_https: if from_wildcard { is_https } else { row.is_https.unwrap_or(is_https) },
                domain_age_days: if from_wildcard { age_days } else { row.domain_age_days.or(age_days) },
                reference_count: new_count,
                tld_type_bonus: row.tld_type_bonus,
                source_trust_type: if from_wildcard {
                    "tld_pattern".into()
                } else {
                    "specific_db_entry".into()
                },
            }
        }
        None => {
            let score = provisional_score(domain, is_https, age_days, privileged_tlds);
            let insert = conn.execute(
                "INSERT INTO domain_trust_profiles
                 (domain, trust_score, is_https, domain_age_days, last_scanned_date,
                  reference_count, tld_type_bonus, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, 1, 0.0, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)",
                rusqlite::params![domain, score, is_https, age_days],
            );
            let kind = match insert {
                Ok(_) => "newly_discovered",
                Err(e) => {
                    warn!(error = %e, domain, "trust profile insert failed");
                    "provisional_insert_failed"
                }
            };
            TrustSignals {
                domain: domain.to_string(),
                trust_score: score,
                is_https,
                domain_age_days: age_days,
                reference_count: 1,
                tld_type_bonus: 0.0,
                source_trust_type: kind.to_string(),
            }
        }
    }
}

struct ProfileRow {
    domain: String,
    trust_score: f64,
    is_https: Option<bool>,
    domain_age_days: Option<i64>,
    tld_type_bonus: f64,
    reference_count: i64,
}

/// Exact domain row first, then wildcard `*.suffix` rows with a positive
/// `tld_type_bonus` walking up the label chain (`*.ac.uk`, `*.uk`).
fn find_profile(conn: &Connection, domain: &str) -> Option<ProfileRow> {
    let select = "SELECT domain, trust_score, is_https, domain_age_days, tld_type_bonus, reference_count
                  FROM domain_trust_profiles WHERE domain = ?1";
    let select_wildcard = "SELECT domain, trust_score, is_https, domain_age_days, tld_type_bonus, reference_count
                           FROM domain_trust_profiles WHERE domain = ?1 AND tld_type_bonus > 0";

    let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ProfileRow> {
        Ok(ProfileRow {
            domain: row.get(0)?,
            trust_score: row.get(1)?,
            is_https: row.get(2)?,
            domain_age_days: row.get(3)?,
            tld_type_bonus: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
            reference_count: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        })
    };

    if let Ok(row) = conn.query_row(select, [domain], map) {
        return Some(row);
    }
    let parts: Vec<&str> = domain.split('.').collect();
    for i in 1..parts.len() {
        let pattern = format!("*.{}", parts[i..].join("."));
        if let Ok(row) = conn.query_row(select_wildcard, [pattern.as_str()], map) {
            return Some(row);
        }
    }
    None
}
