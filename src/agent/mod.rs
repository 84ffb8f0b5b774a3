//! Downstream reasoning step
//!
//! The pipeline only produces transcripts and speaks replies. What sits in
//! between is a [`Responder`]: a chat model in normal use, an echo for
//! offline checks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{AgentConfig, ApiKeys};
use crate::{Error, Result};

/// Conversation turns kept for context, excluding the system prompt
const MAX_HISTORY_MESSAGES: usize = 20;

/// Turns a user transcript into the text to speak back
#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce a reply to one transcript
    async fn respond(&self, transcript: &str) -> Result<String>;

    /// Responder name for logs
    fn name(&self) -> &'static str;
}

/// Build the configured responder
///
/// A disabled agent echoes transcripts back.
///
/// # Errors
///
/// Returns `Error::Agent` if the chat model is enabled without an API key
pub fn from_config(agent: &AgentConfig, keys: &ApiKeys) -> Result<Arc<dyn Responder>> {
    if !agent.enabled {
        tracing::info!("agent disabled, echoing transcripts");
        return Ok(Arc::new(EchoResponder));
    }

    let Some(key) = keys.openai.clone().filter(|k| !k.is_empty()) else {
        return Err(Error::Agent(
            "OpenAI API key required for the agent (or set agent.enabled = false)".to_string(),
        ));
    };

    tracing::info!(model = %agent.model, base_url = %agent.base_url, "agent ready");
    Ok(Arc::new(ChatResponder::new(agent.clone(), key)))
}

/// Speaks the transcript back
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, transcript: &str) -> Result<String> {
        Ok(format!("You said: {transcript}"))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Any OpenAI-compatible chat-completions endpoint
pub struct ChatResponder {
    client: reqwest::Client,
    config: AgentConfig,
    api_key: String,
    history: Mutex<Vec<ChatMessage>>,
}

impl ChatResponder {
    /// Create a responder with an empty conversation
    #[must_use]
    pub fn new(config: AgentConfig, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_key,
            history: Mutex::new(Vec::new()),
        }
    }

    fn messages(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.config.system_prompt.is_empty() {
            messages.push(ChatMessage::new("system", &self.config.system_prompt));
        }
        messages.extend_from_slice(history);
        messages
    }
}

#[async_trait]
impl Responder for ChatResponder {
    async fn respond(&self, transcript: &str) -> Result<String> {
        let mut history = self.history.lock().await;
        history.push(ChatMessage::new("user", transcript));

        let request = ChatRequest {
            model: &self.config.model,
            messages: self.messages(&history),
            max_tokens: self.config.max_tokens,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let reply: Result<String> = async {
            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Agent(format!("chat API error {status}: {body}")));
            }

            let parsed: ChatResponse = response.json().await?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content.trim().to_string())
                .ok_or_else(|| Error::Agent("chat API returned no choices".to_string()))
        }
        .await;

        match reply {
            Ok(text) => {
                history.push(ChatMessage::new("assistant", &text));
                let excess = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
                history.drain(..excess);
                tracing::debug!(response_len = text.len(), "agent responded");
                Ok(text)
            }
            Err(e) => {
                // Keep history alternating user/assistant
                history.pop();
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "chat"
    }
}
