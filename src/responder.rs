//! Response pipeline: maps a message body to an outbound reply body.
//!
//! Two interchangeable strategies sit behind the `Responder` trait: fixed
//! command responses and generative completions. Both run their long
//! network call on a spawned worker task so the dispatch loop can keep
//! draining the transport while a response is in flight; failures never
//! propagate upward, a fixed apology is returned instead.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::error::ProviderError;
use crate::history::{ConversationHistory, Role};

const PROCESSING_NOTICE: &str = "Processing message...";
const COMMAND_FALLBACK: &str = "I only respond to commands starting with '/ask' or '/fact'.";
const FACT_APOLOGY: &str = "Sorry, I couldn't fetch a fact at the moment.";
const GENERATIVE_APOLOGY: &str = "Sorry, I encountered an error generating a response.";
const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant in a group chat. Keep responses concise and friendly.";

const DEFAULT_FACT_URL: &str = "https://catfact.ninja/fact?max_length=20";
const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.openai.com/v1";
const PROVIDER_MODEL: &str = "gpt-3.5-turbo";
const PROVIDER_TEMPERATURE: f64 = 0.7;

/// One response strategy. `respond` always yields a reply body; errors are
/// contained inside the strategy.
#[async_trait]
pub trait Responder: Send {
    /// Room greeting sent once after joining.
    fn welcome(&self, bot_name: &str) -> String;

    /// Interim notice sent to the room before the answer is produced.
    fn processing_notice(&self) -> Option<&str> {
        None
    }

    async fn respond(&mut self, body: &str, from: &str) -> String;
}

/// Fixed command responses: `/fact` and `/ask`.
pub struct CommandResponder {
    client: reqwest::Client,
    fact_url: String,
}

impl CommandResponder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            fact_url: DEFAULT_FACT_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_fact_url(mut self, url: impl Into<String>) -> Self {
        self.fact_url = url.into();
        self
    }
}

async fn fetch_fact(client: reqwest::Client, url: String) -> String {
    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            let fact = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("fact").and_then(|f| f.as_str()).map(str::to_string))
                .unwrap_or_else(|| "No fact found.".to_string());
            format!("Here’s a cat fact: {fact}")
        }
        Ok(response) => {
            warn!(status = %response.status(), "fact provider returned non-success");
            FACT_APOLOGY.to_string()
        }
        Err(e) => {
            error!(error = %e, "fact request failed");
            FACT_APOLOGY.to_string()
        }
    }
}

#[async_trait]
impl Responder for CommandResponder {
    fn welcome(&self, bot_name: &str) -> String {
        format!(
            "👋 Hello! I'm {bot_name}, your assistant. I'm here to help answer your \
             questions and participate in discussions. Feel free to chat with me!"
        )
    }

    fn processing_notice(&self) -> Option<&str> {
        Some(PROCESSING_NOTICE)
    }

    async fn respond(&mut self, body: &str, from: &str) -> String {
        debug!(from, "handling command");
        if body.starts_with("/fact") {
            let client = self.client.clone();
            let url = self.fact_url.clone();
            match tokio::spawn(fetch_fact(client, url)).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "fact task failed");
                    FACT_APOLOGY.to_string()
                }
            }
        } else if let Some(question) = body.strip_prefix("/ask ") {
            format!("You sent message: '{question}'")
        } else {
            COMMAND_FALLBACK.to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: String,
}

async fn complete(
    client: reqwest::Client,
    url: String,
    api_key: String,
    payload: serde_json::Value,
) -> Result<String, ProviderError> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(ProviderError::Status(response.status()));
    }

    let completion: ChatCompletion = response.json().await?;
    completion
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(ProviderError::EmptyResponse)
}

/// Replies produced by the chat-completions provider over a bounded
/// conversation history.
pub struct GenerativeResponder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    history: ConversationHistory,
}

impl GenerativeResponder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            history: ConversationHistory::new(SYSTEM_PROMPT),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl Responder for GenerativeResponder {
    fn welcome(&self, bot_name: &str) -> String {
        format!(
            "👋 Hello! I'm {bot_name}, an AI assistant powered by OpenAI. I'm here to \
             help answer your questions and participate in discussions. Feel free to \
             chat with me!"
        )
    }

    async fn respond(&mut self, body: &str, from: &str) -> String {
        self.history.push(Role::User, body);
        debug!(from, turns = self.history.len(), "requesting completion");

        let payload = serde_json::json!({
            "model": PROVIDER_MODEL,
            "messages": self.history.snapshot(),
            "temperature": PROVIDER_TEMPERATURE,
        });
        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.base_url);
        let api_key = self.api_key.clone();

        // The provider call runs off the dispatch path; its result rejoins
        // here before the history is touched again.
        match tokio::spawn(complete(client, url, api_key, payload)).await {
            Ok(Ok(reply)) => {
                self.history.push(Role::Assistant, reply.clone());
                reply
            }
            Ok(Err(e)) => {
                error!(error = %e, "completion failed");
                GENERATIVE_APOLOGY.to_string()
            }
            Err(e) => {
                error!(error = %e, "completion task failed");
                GENERATIVE_APOLOGY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn ask_echoes_the_remainder() {
        let mut responder = CommandResponder::new();
        let reply = responder.respond("/ask weather", "room@conf/alice").await;
        assert_eq!(reply, "You sent message: 'weather'");
    }

    #[tokio::test]
    async fn unrecognized_text_gets_the_fallback() {
        let mut responder = CommandResponder::new();
        let reply = responder.respond("hello bot", "room@conf/alice").await;
        assert_eq!(
            reply,
            "I only respond to commands starting with '/ask' or '/fact'."
        );
    }

    #[tokio::test]
    async fn fact_success_quotes_the_fact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fact"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"fact": "Cats sleep a lot."})),
            )
            .mount(&server)
            .await;

        let mut responder =
            CommandResponder::new().with_fact_url(format!("{}/fact", server.uri()));
        let reply = responder.respond("/fact", "room@conf/alice").await;
        assert_eq!(reply, "Here’s a cat fact: Cats sleep a lot.");
    }

    #[tokio::test]
    async fn fact_missing_field_uses_the_default_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fact"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let mut responder =
            CommandResponder::new().with_fact_url(format!("{}/fact", server.uri()));
        let reply = responder.respond("/fact", "room@conf/alice").await;
        assert_eq!(reply, "Here’s a cat fact: No fact found.");
    }

    #[tokio::test]
    async fn fact_non_success_status_apologizes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fact"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut responder =
            CommandResponder::new().with_fact_url(format!("{}/fact", server.uri()));
        let reply = responder.respond("/fact", "room@conf/alice").await;
        assert_eq!(reply, FACT_APOLOGY);
    }

    #[tokio::test]
    async fn command_mode_announces_processing() {
        let responder = CommandResponder::new();
        assert_eq!(responder.processing_notice(), Some("Processing message..."));
        assert!(responder.welcome("Bot DxBot").contains("I'm Bot DxBot"));
    }

    #[tokio::test]
    async fn generative_reply_extends_the_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-3.5-turbo",
                "temperature": 0.7,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Hi there!"}}]
            })))
            .mount(&server)
            .await;

        let mut responder = GenerativeResponder::new("sk-test").with_base_url(server.uri());
        let reply = responder.respond("hello", "room@conf/alice").await;
        assert_eq!(reply, "Hi there!");
        // system + user + assistant
        assert_eq!(responder.history.len(), 3);
        assert_eq!(responder.history.snapshot()[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn provider_failure_apologizes_without_polluting_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut responder = GenerativeResponder::new("sk-test").with_base_url(server.uri());
        let reply = responder.respond("hello", "room@conf/alice").await;
        assert_eq!(reply, GENERATIVE_APOLOGY);
        // The user turn stays (source behavior); no assistant turn is added.
        assert_eq!(responder.history.len(), 2);
        assert_eq!(responder.history.snapshot()[1].role, Role::User);
    }

    #[tokio::test]
    async fn generative_mode_sends_no_processing_notice() {
        let responder = GenerativeResponder::new("sk-test");
        assert_eq!(responder.processing_notice(), None);
        assert!(responder.welcome("Ava").contains("powered by OpenAI"));
    }
}
