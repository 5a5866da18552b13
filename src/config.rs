//! Environment configuration.
//!
//! Everything comes from the process environment, optionally seeded from a
//! `.env` file in the working directory. Nothing is written back.

use crate::llm::prompts::DEFAULT_MODEL;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const MODEL_VAR: &str = "OPENAI_MODEL";
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    /// Bearer credential. Missing is not fatal here; the first request reports it.
    pub api_key: Option<String>,
    /// Deployment-wide model override.
    pub model: Option<String>,
    /// API root, without the `/chat/completions` suffix.
    pub base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl Settings {
    /// Load `.env` (if any), then read the process environment.
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => log::info!("[CONFIG] Loaded {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("[CONFIG] Ignoring unreadable .env: {}", e),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty or whitespace values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let settings = Self {
            api_key: read(API_KEY_VAR),
            model: read(MODEL_VAR),
            base_url: read(BASE_URL_VAR)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };

        match &settings.api_key {
            Some(key) => log::info!("[CONFIG] API key found ({} chars)", key.len()),
            None => log::warn!("[CONFIG] {} is not set; requests will fail", API_KEY_VAR),
        }
        log::info!("[CONFIG] Model: {}", settings.default_model());
        settings
    }

    /// Model to use when the caller does not override it.
    pub fn default_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let s = Settings::from_lookup(lookup(&[]));
        assert_eq!(s, Settings::default());
        assert_eq!(s.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn reads_all_values() {
        let s = Settings::from_lookup(lookup(&[
            (API_KEY_VAR, "sk-test"),
            (MODEL_VAR, "gpt-4o-mini"),
            (BASE_URL_VAR, "http://localhost:8080/v1/"),
        ]));
        assert_eq!(s.api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.default_model(), "gpt-4o-mini");
        assert_eq!(s.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn blank_values_are_unset() {
        let s = Settings::from_lookup(lookup(&[(API_KEY_VAR, "  "), (MODEL_VAR, "")]));
        assert!(s.api_key.is_none());
        assert!(s.model.is_none());
    }

    #[test]
    fn debug_hides_key() {
        let s = Settings::from_lookup(lookup(&[(API_KEY_VAR, "sk-secret")]));
        assert!(!format!("{:?}", s).contains("sk-secret"));
    }
}
