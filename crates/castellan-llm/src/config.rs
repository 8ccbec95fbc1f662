//! Client configuration. The core never reads environment variables
//! directly (SPEC_FULL.md §6); a fully-materialized [`Config`] is handed
//! to [`crate::LlmClient::new`] by the embedding application.

use secrecy::Secret;
use std::time::Duration;

/// Default request timeout, enforced by [`crate::LlmClient::analyze`]
/// (§4.5: "the client MUST enforce a request timeout").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-provider connection settings.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// OpenAI-compatible chat completions endpoint.
    OpenAi {
        /// Bearer API key, held as a [`Secret`] so it never appears in
        /// `Debug`/log output.
        api_key: Secret<String>,
        /// Model identifier (e.g. `"gpt-4o-mini"`).
        model: String,
        /// Base URL, e.g. `"https://api.openai.com"`.
        base_url: String,
    },
    /// Anthropic-compatible messages endpoint.
    Anthropic {
        /// API key.
        api_key: Secret<String>,
        /// Model identifier.
        model: String,
        /// Base URL, e.g. `"https://api.anthropic.com"`.
        base_url: String,
    },
    /// Locally hosted OpenAI-compatible endpoint (no auth).
    Local {
        /// Endpoint URL.
        endpoint: String,
        /// Model identifier as understood by the local server.
        model: String,
    },
}

/// Fully-materialized client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which provider and credentials to use.
    pub provider: ProviderConfig,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum requests per second sent to the provider.
    pub rate_limit_per_second: u32,
}

impl Config {
    /// Construct a configuration pointing at a local, unauthenticated
    /// OpenAI-compatible server — convenient for tests and the `local`
    /// feature.
    #[must_use]
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: ProviderConfig::Local { endpoint: endpoint.into(), model: model.into() },
            timeout: DEFAULT_TIMEOUT,
            rate_limit_per_second: 5,
        }
    }
}
