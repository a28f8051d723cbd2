//! LLM provider implementations for HookClaw.
//!
//! All providers implement the `hookclaw_core::Provider` trait.

pub mod openai_compat;

use hookclaw_config::AppConfig;
use hookclaw_core::error::ProviderError;
use hookclaw_core::provider::Provider;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatProvider;

/// Build the configured provider.
///
/// Fails with [`ProviderError::NotConfigured`] when no API key is set.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            ProviderError::NotConfigured(
                "no API key; set api_key in ~/.hookclaw/config.toml or HOOKCLAW_API_KEY".into(),
            )
        })?;

    let name = if config.api_base.contains("openrouter") {
        "openrouter"
    } else {
        "openai_compat"
    };
    let provider = OpenAiCompatProvider::new(name, &config.api_base, api_key, &config.default_model)?;
    Ok(Arc::new(provider))
}
