use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::ScourConfig;

/// Loads the scour configuration: file, then environment overrides, then
/// validation. Configuration is fixed for the process lifetime; only the
/// embedding model and provider credentials may additionally come from the
/// application database (see [`crate::appdb`]).
pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve the config path: explicit path > SCOUR_CONFIG env > ~/.scour/scour.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("SCOUR_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".scour")
            .join("scour.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> scour_core::Result<ScourConfig> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<ScourConfig>(&raw).map_err(|e| {
                scour_core::ScourError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            ScourConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(scour_core::ScourError::Config(e));
            }
        }

        Ok(config)
    }

    /// Apply env var overrides. Server address pieces and internal endpoints
    /// use the historical variable names; API keys fill in when the config
    /// file doesn't set them (file wins, env is the fallback).
    fn apply_env_overrides(mut config: ScourConfig) -> ScourConfig {
        if let Ok(host) = std::env::var("LIVE_SEARCH_SERVER_HOST") {
            let port = config
                .server
                .listen
                .rsplit_once(':')
                .map(|(_, p)| p.to_string())
                .unwrap_or_else(|| "8001".into());
            config.server.listen = format!("{host}:{port}");
        }
        if let Ok(port) = std::env::var("LIVE_SEARCH_SERVER_PORT") {
            let host = config
                .server
                .listen
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "0.0.0.0".into());
            config.server.listen = format!("{host}:{port}");
        }
        if let Ok(v) = std::env::var("LOCAL_LLM_API_BASE") {
            config.llm.local_api_base = v;
        }
        if let Ok(v) = std::env::var("INTERNAL_NODE_API_BASE_URL") {
            config.llm.internal_node_api_base_url = v;
        }
        if let Ok(v) = std::env::var("INTERNAL_NODE_API_ENDPOINT_PATH") {
            config.llm.internal_node_api_endpoint_path = v;
        }
        if let Ok(v) = std::env::var("UPLOAD_DIR") {
            config.server.upload_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("SCOUR_LOG_LEVEL") {
            config.logging.level = v;
        }

        // API keys: env var fills in when config file doesn't have the key set.
        if config.credentials.brave_api_key.is_none() {
            if let Ok(v) = std::env::var("BRAVE_SEARCH_API_KEY") {
                config.credentials.brave_api_key = Some(v);
            }
        }
        if config.credentials.google_api_key.is_none() {
            if let Ok(v) = std::env::var("GOOGLE_API_KEY") {
                config.credentials.google_api_key = Some(v);
            }
        }
        if config.credentials.google_cx.is_none() {
            if let Ok(v) = std::env::var("GOOGLE_CX") {
                config.credentials.google_cx = Some(v);
            }
        }
        if config.credentials.bing_api_key.is_none() {
            if let Ok(v) = std::env::var("BING_API_KEY") {
                config.credentials.bing_api_key = Some(v);
            }
        }
        if config.credentials.courtlistener_api_key.is_none() {
            if let Ok(v) = std::env::var("COURTLISTENER_API_KEY") {
                config.credentials.courtlistener_api_key = Some(v);
            }
        }
        if config.credentials.xai_api_key.is_none() {
            if let Ok(v) = std::env::var("XAI_API_KEY") {
                config.credentials.xai_api_key = Some(v);
            }
        }

        config
    }
}

/// True when the endpoint host is loopback or a private address. Used to
/// refuse remote embedding endpoints unless explicitly allowed.
pub fn is_local_endpoint(endpoint: &str) -> bool {
    let host = endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .split(['/', ':'])
        .next()
        .unwrap_or("");
    if host == "localhost" {
        return true;
    }
    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private(),
        Ok(std::net::IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

/// Build the merged per-provider credential view handed to each task.
/// Request-level overrides are applied by the server on top of this.
pub fn resolve_credentials(config: &ScourConfig) -> scour_core::ApiCredentials {
    let mut creds = scour_core::ApiCredentials {
        brave_api_key: config.credentials.brave_api_key.clone(),
        google_api_key: config.credentials.google_api_key.clone(),
        google_cx: config.credentials.google_cx.clone(),
        bing_api_key: config.credentials.bing_api_key.clone(),
        courtlistener_api_key: config.credentials.courtlistener_api_key.clone(),
        ..Default::default()
    };

    // The application database is the preferred source when configured.
    if let Some(ref db_path) = config.credentials.app_db_path {
        match crate::appdb::load_provider_credentials(db_path) {
            Ok(db_creds) => creds = crate::appdb::merge_credentials(db_creds, creds),
            Err(e) => warn!(error = %e, "app database credential load failed, using config/env"),
        }
    }

    creds.llm.insert(
        "xai".into(),
        scour_core::LlmCredential {
            api_key: config.credentials.xai_api_key.clone(),
            api_base: config.credentials.xai_api_base.clone(),
        },
    );
    creds.llm.insert(
        "google".into(),
        scour_core::LlmCredential {
            api_key: config.credentials.google_llm_api_key.clone(),
            api_base: None,
        },
    );
    creds.llm.insert(
        "mistral".into(),
        scour_core::LlmCredential {
            api_key: config.credentials.mistral_api_key.clone(),
            api_base: config.credentials.mistral_api_base.clone(),
        },
    );

    creds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_endpoint_detection() {
        assert!(is_local_endpoint("http://127.0.0.1:11434"));
        assert!(is_local_endpoint("http://localhost:8080/embed"));
        assert!(is_local_endpoint("http://192.168.1.50:9000"));
        assert!(!is_local_endpoint("https://api.openai.com/v1"));
        assert!(!is_local_endpoint("http://8.8.8.8"));
    }
}
