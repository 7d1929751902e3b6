//! OpenAI-compatible chat completions client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chatbot::message::Turn;
use crate::chatbot::provider::{CompletionProvider, ProviderError};

pub struct Client {
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl Client {
    pub fn new(
        api_key: String,
        api_base: String,
        model: String,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self {
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            max_tokens,
            temperature,
            http,
        })
    }

    fn request_body<'a>(&'a self, system_prompt: &'a str, history: &'a [Turn]) -> ApiRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ApiMessage {
            role: "system",
            content: system_prompt,
        });
        messages.extend(history.iter().map(|t| ApiMessage {
            role: t.role.as_str(),
            content: &t.content,
        }));

        ApiRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            presence_penalty: 0.3,
            frequency_penalty: 0.3,
        }
    }

    pub async fn chat(&self, system_prompt: &str, history: &[Turn]) -> Result<String, ProviderError> {
        let request = self.request_body(system_prompt, history);
        debug!("🧠 Sending {} message(s) to {}", request.messages.len(), self.model);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            match status.as_u16() {
                401 | 403 => warn!("🔑 API key rejected, check openai_api_key in the config"),
                429 => warn!("⏰ Rate limit or quota exceeded"),
                _ => {}
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_reply(api_response)
    }
}

fn parse_reply(response: ApiResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(ProviderError::Empty)
}

impl CompletionProvider for Client {
    async fn generate(&self, system_prompt: &str, history: &[Turn]) -> Result<String, ProviderError> {
        self.chat(system_prompt, history).await
    }
}
