//! Resolution of settings that live in the application database rather than
//! the config file: the active embedding model and per-provider credentials.

use rusqlite::Connection;
use std::path::Path;
use tracing::{info, warn};

use scour_core::{ApiCredentials, Result, ScourError};

/// Resolve the active embedding model identifier (repository id or local
/// path) from the application database.
///
/// Order: the `preferred_local_embedding_model_id` system setting, when it
/// names an active embedding model row; otherwise the `models` table scan
/// preferring the default flag and the highest id. Returns `None` when the
/// database is missing or holds no active embedding model.
pub fn resolve_embedding_model(db_path: &Path) -> Option<String> {
    if !db_path.exists() {
        warn!(?db_path, "app database not found, no embedding model configured");
        return None;
    }
    let conn = match Connection::open(db_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "could not open app database for embedding model");
            return None;
        }
    };

    // Preferred model from the settings table, validated against `models`.
    let preferred: Option<String> = conn
        .query_row(
            "SELECT value FROM system_settings WHERE key = 'preferred_local_embedding_model_id'",
            [],
            |row| row.get(0),
        )
        .ok();
    if let Some(pref) = preferred {
        if let Ok(id) = pref.parse::<i64>() {
            if let Some(ident) = model_identifier(
                &conn,
                "SELECT huggingface_repo, model_path FROM models
                 WHERE id = ?1 AND is_embedding_model = 1 AND is_active = 1 LIMIT 1",
                Some(id),
            ) {
                info!(model = %ident, "using preferred embedding model from app database");
                return Some(ident);
            }
            warn!(preferred = %pref, "preferred embedding model missing or inactive, using fallback");
        } else {
            warn!(preferred = %pref, "preferred_local_embedding_model_id is not a numeric id");
        }
    }

    let fallback = model_identifier(
        &conn,
        "SELECT huggingface_repo, model_path FROM models
         WHERE is_embedding_model = 1 AND is_active = 1
         ORDER BY is_default DESC, id DESC LIMIT 1",
        None,
    );
    match &fallback {
        Some(ident) => info!(model = %ident, "using fallback embedding model from app database"),
        None => warn!("no active embedding model found in app database"),
    }
    fallback
}

fn model_identifier(conn: &Connection, sql: &str, id: Option<i64>) -> Option<String> {
    let row: rusqlite::Result<(Option<String>, Option<String>)> = match id {
        Some(id) => conn.query_row(sql, [id], |row| Ok((row.get(0)?, row.get(1)?))),
        None => conn.query_row(sql, [], |row| Ok((row.get(0)?, row.get(1)?))),
    };
    let (repo, path) = row.ok()?;
    repo.filter(|s| !s.trim().is_empty())
        .or(path.filter(|s| !s.trim().is_empty()))
        .map(|s| s.trim().to_string())
}

/// Load the merged `{api_key, ...endpoints}` view for the search providers
/// the service knows about. Providers absent from the database are simply
/// left unset.
pub fn load_provider_credentials(db_path: &Path) -> Result<ApiCredentials> {
    if !db_path.exists() {
        return Err(ScourError::Config(format!(
            "app database not found at {}",
            db_path.display()
        )));
    }
    let conn = Connection::open(db_path).map_err(|e| ScourError::Config(e.to_string()))?;

    let mut creds = ApiCredentials::default();
    creds.brave_api_key = provider_api_key(&conn, "brave");
    creds.bing_api_key = provider_api_key(&conn, "bing");
    creds.courtlistener_api_key = provider_api_key(&conn, "courtlistener");

    // Google carries its custom-search engine id in the endpoints JSON.
    if let Some((key, endpoints)) = provider_row(&conn, "google") {
        creds.google_api_key = key;
        if let Some(cx) = endpoints.get("cx").and_then(|v| v.as_str()) {
            creds.google_cx = Some(cx.to_string());
        }
    }

    Ok(creds)
}

fn provider_api_key(conn: &Connection, name: &str) -> Option<String> {
    provider_row(conn, name).and_then(|(key, _)| key)
}

fn provider_row(conn: &Connection, name: &str) -> Option<(Option<String>, serde_json::Value)> {
    let (provider_id, endpoints_json): (i64, Option<String>) = conn
        .query_row(
            "SELECT id, endpoints FROM api_providers WHERE name = ?1 AND is_active = 1 LIMIT 1",
            [name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok()?;

    let endpoints = endpoints_json
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .unwrap_or_else(|| serde_json::json!({}));

    let key: Option<String> = conn
        .query_row(
            "SELECT key_value FROM api_keys
             WHERE provider_id = ?1 AND is_global = 1 AND is_active = 1 LIMIT 1",
            [provider_id],
            |row| row.get(0),
        )
        .ok();

    Some((key, endpoints))
}

/// Merge database credentials with config/env ones. Database values win for
/// search providers when present, mirroring the settings-resolution order.
pub fn merge_credentials(db: ApiCredentials, fallback: ApiCredentials) -> ApiCredentials {
    ApiCredentials {
        brave_api_key: db.brave_api_key.or(fallback.brave_api_key),
        google_api_key: db.google_api_key.or(fallback.google_api_key),
        google_cx: db.google_cx.or(fallback.google_cx),
        bing_api_key: db.bing_api_key.or(fallback.bing_api_key),
        courtlistener_api_key: db.courtlistener_api_key.or(fallback.courtlistener_api_key),
        llm: fallback.llm,
    }
}
