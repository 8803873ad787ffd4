//! Persisted settings and remote connection configuration.
//!
//! # Responsibility
//! - Describe the settings blob stored next to records and tags.
//! - Validate remote connection input before any network work starts.
//!
//! # Invariants
//! - Missing fields fall back to defaults field-by-field.
//! - A `RemoteConfig` accepted by `validate()` has a non-blank access key and
//!   a well-formed project identifier.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Provider id used when configuration omits one.
pub const DEFAULT_PROVIDER_ID: &str = "firestore";

static PROJECT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$").expect("valid project id regex"));

/// Full settings blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Remote store configuration; `None` keeps the local store authoritative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    pub preferences: Preferences,
}

/// User preferences carried along with the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub theme: Theme,
    pub auto_generate_title: bool,
    pub auto_suggest_tags: bool,
    pub ai_provider: AiProvider,
    pub ai_api_key: String,
    pub feedback_prompt: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            auto_generate_title: true,
            auto_suggest_tags: true,
            ai_provider: AiProvider::OpenAi,
            ai_api_key: String::new(),
            feedback_prompt: "Give short, constructive feedback on this idea: what works, \
                              how it could grow, and a concrete next step."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

/// Remote document store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(default = "default_provider_id")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    /// Persistent identity credential returned by the identity provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl RemoteConfig {
    /// Creates a config for the default provider.
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            provider: default_provider_id(),
            api_key: api_key.into(),
            project_id: project_id.into(),
            auth_domain: None,
            app_id: None,
            request_timeout_ms: None,
            poll_interval_ms: None,
            refresh_token: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Checks required fields; runs before any state change.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let api_key_blank = self.api_key.trim().is_empty();
        let project_id = self.project_id.trim();
        if api_key_blank && project_id.is_empty() {
            return Err(ConfigError::MissingField("apiKey and projectId"));
        }
        if api_key_blank {
            return Err(ConfigError::MissingField("apiKey"));
        }
        if project_id.is_empty() {
            return Err(ConfigError::MissingField("projectId"));
        }
        if !PROJECT_ID_RE.is_match(project_id) {
            return Err(ConfigError::InvalidProjectId(project_id.to_string()));
        }
        Ok(())
    }

    /// Provider id with surrounding whitespace removed.
    pub fn provider_id(&self) -> &str {
        self.provider.trim()
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

/// User-facing configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingField(&'static str),
    InvalidProjectId(String),
    UnknownProvider(String),
    NothingPersisted,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "{field} is required"),
            Self::InvalidProjectId(value) => write!(
                f,
                "project id `{value}` must be 6-30 lowercase letters, digits or hyphens"
            ),
            Self::UnknownProvider(value) => write!(f, "remote provider `{value}` is not available"),
            Self::NothingPersisted => write!(f, "no remote configuration has been saved"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{AiProvider, ConfigError, RemoteConfig, Settings, Theme};

    #[test]
    fn validate_rejects_blank_required_fields() {
        assert_eq!(
            RemoteConfig::new("", "my-project").validate(),
            Err(ConfigError::MissingField("apiKey"))
        );
        assert_eq!(
            RemoteConfig::new("key", "   ").validate(),
            Err(ConfigError::MissingField("projectId"))
        );
        assert_eq!(
            RemoteConfig::new(" ", "").validate(),
            Err(ConfigError::MissingField("apiKey and projectId"))
        );
    }

    #[test]
    fn validate_rejects_malformed_project_id() {
        let err = RemoteConfig::new("key", "My Project")
            .validate()
            .expect_err("uppercase and spaces are invalid");
        assert!(matches!(err, ConfigError::InvalidProjectId(_)));
        RemoteConfig::new("key", "my-project-42")
            .validate()
            .expect("well-formed id should pass");
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"preferences":{"theme":"dark"}}"#).unwrap();
        assert_eq!(settings.preferences.theme, Theme::Dark);
        assert!(settings.preferences.auto_generate_title);
        assert_eq!(settings.preferences.ai_provider, AiProvider::OpenAi);
        assert!(settings.remote.is_none());
    }

    #[test]
    fn remote_config_defaults_provider() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{"apiKey":"k","projectId":"demo-app"}"#).unwrap();
        assert_eq!(config.provider_id(), "firestore");
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("refreshToken").is_none());
    }

    #[test]
    fn ai_provider_uses_lowercase_names() {
        assert_eq!(
            serde_json::to_string(&AiProvider::OpenAi).unwrap(),
            "\"openai\""
        );
        assert_eq!(
            serde_json::to_string(&AiProvider::Anthropic).unwrap(),
            "\"anthropic\""
        );
    }
}
