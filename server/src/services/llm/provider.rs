//! Provider selection
//!
//! Providers are tried in a fixed priority order (deepseek, openai, gemini);
//! the first one with a credential in the environment wins. Absence of all
//! keys disables the adapter entirely.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    DeepSeek,
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

/// A resolved provider: endpoint, model, credential.
#[derive(Debug, Clone)]
pub struct Provider {
    pub kind: ProviderKind,
    pub api_base: String,
    pub model: String,
    pub api_key: String,
}

/// Env keys per provider, first match wins within a provider.
const PROVIDERS: &[(ProviderKind, &[&str], &str, &str)] = &[
    (
        ProviderKind::DeepSeek,
        &["DEEPSEEK_API_KEY", "DEEPSEEK_KEY"],
        "https://api.deepseek.com/v1",
        "deepseek-chat",
    ),
    (
        ProviderKind::OpenAi,
        &["OPENAI_API_KEY"],
        "https://api.openai.com/v1",
        "gpt-4o-mini",
    ),
    (
        ProviderKind::Gemini,
        &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "gemini-2.0-flash",
    ),
];

/// Pick the highest-priority provider with a configured credential.
pub fn detect_provider() -> Option<Provider> {
    for (kind, env_keys, api_base, model) in PROVIDERS {
        for key in *env_keys {
            if let Ok(value) = env::var(key)
                && !value.trim().is_empty()
            {
                tracing::debug!(provider = kind.as_str(), "LLM provider selected");
                return Some(Provider {
                    kind: *kind,
                    api_base: api_base.to_string(),
                    model: model.to_string(),
                    api_key: value,
                });
            }
        }
    }
    None
}
