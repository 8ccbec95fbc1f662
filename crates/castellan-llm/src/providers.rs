//! Provider-specific HTTP clients. Each implements [`LlmProvider`], the
//! single seam the rest of the crate depends on.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;

use crate::config::ProviderConfig;
use crate::LlmError;

/// Abstract completion backend. Mirrors the reference workspace's `Llm`
/// trait: one method, one seam, swappable per provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete `prompt`, returning the raw text response.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Build the concrete provider implementation for `config`.
#[must_use]
pub fn build_provider(config: &ProviderConfig) -> Box<dyn LlmProvider> {
    match config {
        ProviderConfig::OpenAi { api_key, model, base_url } => Box::new(OpenAiProvider {
            api_key: api_key.expose_secret().clone(),
            model: model.clone(),
            base_url: base_url.clone(),
            http: Client::new(),
        }),
        ProviderConfig::Anthropic { api_key, model, base_url } => Box::new(AnthropicProvider {
            api_key: api_key.expose_secret().clone(),
            model: model.clone(),
            base_url: base_url.clone(),
            http: Client::new(),
        }),
        ProviderConfig::Local { endpoint, model } => Box::new(LocalProvider {
            endpoint: endpoint.clone(),
            model: model.clone(),
            http: Client::new(),
        }),
    }
}

struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    http: Client,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        #[derive(serde::Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: [Message<'a>; 2],
            temperature: f32,
        }

        let req = Req {
            model: &self.model,
            messages: [
                Message { role: "system", content: "You are a security event triage assistant. Respond with a single JSON object only." },
                Message { role: "user", content: prompt },
            ],
            temperature: 0.1,
        };

        let resp: serde_json::Value = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        resp["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::Unavailable("missing choices[0].message.content".to_string()))
    }
}

struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    http: Client,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        #[derive(serde::Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            messages: [Message<'a>; 1],
        }

        let req = Req {
            model: &self.model,
            max_tokens: 512,
            messages: [Message { role: "user", content: prompt }],
        };

        let resp: serde_json::Value = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&req)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        resp["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::Unavailable("missing content[0].text".to_string()))
    }
}

struct LocalProvider {
    endpoint: String,
    model: String,
    http: Client,
}

#[async_trait]
impl LlmProvider for LocalProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            prompt: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            text: String,
        }

        let resp: Resp = self
            .http
            .post(&self.endpoint)
            .json(&Req { model: &self.model, prompt })
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        Ok(resp.text)
    }
}
