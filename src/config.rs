use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::util::{env_flag, env_nonempty, env_parse};

/// Default upstream when neither `UPSTREAM_BASE_URL` nor `OPENAI_BASE_URL` is set.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Upstream naming convention, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// api.openai.com: reasoning models take `max_completion_tokens`.
    #[default]
    OpenAi,
    /// Generic OpenAI-compatible servers: always `max_tokens`.
    Compat,
}

impl std::str::FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(DialectKind::OpenAi),
            "compat" | "openai-compatible" | "openai_compatible" => Ok(DialectKind::Compat),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTokensField {
    MaxTokens,
    MaxCompletionTokens,
}

/// Field-naming differences between upstream flavors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub kind: DialectKind,
    /// Environment variable holding the upstream bearer credential.
    pub credential_env: &'static str,
    /// Token-limit field used for the reasoning model class.
    pub reasoning_max_tokens_field: MaxTokensField,
}

impl Dialect {
    pub fn openai() -> Self {
        Self {
            kind: DialectKind::OpenAi,
            credential_env: "OPENAI_API_KEY",
            reasoning_max_tokens_field: MaxTokensField::MaxCompletionTokens,
        }
    }

    pub fn compat() -> Self {
        Self {
            kind: DialectKind::Compat,
            credential_env: "UPSTREAM_API_KEY",
            reasoning_max_tokens_field: MaxTokensField::MaxTokens,
        }
    }

    pub fn from_kind(kind: DialectKind) -> Self {
        match kind {
            DialectKind::OpenAi => Self::openai(),
            DialectKind::Compat => Self::compat(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            DialectKind::OpenAi => "openai",
            DialectKind::Compat => "compat",
        }
    }

    pub fn max_tokens_field(&self, class: ModelClass) -> MaxTokensField {
        match class {
            ModelClass::Reasoning => self.reasoning_max_tokens_field,
            ModelClass::Completion => MaxTokensField::MaxTokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Reasoning,
    Completion,
}

/// Model selection for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub class: ModelClass,
    /// `None` keeps the model name the client sent.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
}

/// Resolved proxy configuration.
///
/// Loaded from environment variables ([`ProxyConfig::from_env`]) or a JSON file
/// ([`ProxyConfig::load_from_file`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub reasoning_model: Option<String>,
    #[serde(default)]
    pub completion_model: Option<String>,
    #[serde(default)]
    pub reasoning_max_tokens: Option<u32>,
    #[serde(default)]
    pub completion_max_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Dump translated payloads at info level.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub dialect: DialectKind,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            reasoning_model: None,
            completion_model: None,
            reasoning_max_tokens: None,
            completion_max_tokens: None,
            reasoning_effort: None,
            debug: false,
            dialect: DialectKind::default(),
        }
    }
}

impl ProxyConfig {
    /// Build the configuration from environment variables.
    ///
    /// Environment:
    /// - MESSAGES2CHAT_DIALECT      -> openai (default) | compat
    /// - UPSTREAM_BASE_URL          -> upstream base URL (fallback OPENAI_BASE_URL)
    /// - OPENAI_API_KEY / UPSTREAM_API_KEY -> credential, per dialect
    /// - REASONING_MODEL, COMPLETION_MODEL
    /// - REASONING_MAX_TOKENS, COMPLETION_MAX_TOKENS
    /// - REASONING_EFFORT
    /// - DEBUG                      -> 1,true,yes,on
    pub fn from_env() -> Self {
        let dialect = env_nonempty("MESSAGES2CHAT_DIALECT")
            .and_then(|d| match d.parse::<DialectKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    tracing::warn!("{e}; falling back to the openai dialect");
                    None
                }
            })
            .unwrap_or_default();

        let base_url = env_nonempty("UPSTREAM_BASE_URL")
            .or_else(|| env_nonempty("OPENAI_BASE_URL"))
            .unwrap_or_else(default_base_url);

        Self {
            base_url,
            api_key: credential_from_env(&Dialect::from_kind(dialect)),
            reasoning_model: env_nonempty("REASONING_MODEL"),
            completion_model: env_nonempty("COMPLETION_MODEL"),
            reasoning_max_tokens: env_parse("REASONING_MAX_TOKENS"),
            completion_max_tokens: env_parse("COMPLETION_MAX_TOKENS"),
            reasoning_effort: env_nonempty("REASONING_EFFORT"),
            debug: env_flag("DEBUG"),
            dialect,
        }
    }

    /// Load the configuration from a JSON file. The credential is never read from the
    /// file; it comes from the dialect's environment variable.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read proxy config file: {}", path.as_ref().display())
        })?;

        let mut config: ProxyConfig = serde_json::from_str(&content)
            .with_context(|| "Failed to parse proxy config JSON")?;
        config.api_key = credential_from_env(&config.dialect());

        Ok(config)
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::from_kind(self.dialect)
    }

    /// Select the model class from the request's thinking flag.
    pub fn route(&self, thinking: bool) -> Route {
        if thinking {
            Route {
                class: ModelClass::Reasoning,
                model: self.reasoning_model.clone(),
                max_tokens: self.reasoning_max_tokens,
                reasoning_effort: self.reasoning_effort.clone(),
            }
        } else {
            Route {
                class: ModelClass::Completion,
                model: self.completion_model.clone(),
                max_tokens: self.completion_max_tokens,
                reasoning_effort: None,
            }
        }
    }

    /// `{base_url}/chat/completions`, tolerating a trailing slash.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn credential_from_env(dialect: &Dialect) -> Option<String> {
    env_nonempty(dialect.credential_env).or_else(|| match dialect.kind {
        DialectKind::Compat => env_nonempty("OPENAI_API_KEY"),
        DialectKind::OpenAi => None,
    })
}
