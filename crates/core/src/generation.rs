use crate::embeddings::OllamaConfig;
use crate::error::SearchError;
use crate::http::{endpoint_url, transport_error};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_OLLAMA_GENERATION_MODEL: &str = "llama3.1:8b-instruct";

const SYSTEM_PROMPT: &str =
    "You are a rigorous assistant. Respond in the indicated language and cite sources at the end.";

/// Sends a prompt to a language model and returns its text.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, SearchError>;
}

fn generation_error(backend: &str, error: reqwest::Error) -> SearchError {
    match transport_error(backend, error) {
        SearchError::BackendResponse { backend, details } => {
            SearchError::Generation(format!("{backend}: {details}"))
        }
        other => other,
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Non-streaming `POST /api/generate` against a local Ollama server.
pub struct OllamaGenerator {
    client: Client,
    url: Url,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &OllamaConfig) -> Result<Self, SearchError> {
        let url = endpoint_url(&config.endpoint, "api/generate")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            model: config.model.clone(),
        })
    }
}

impl Generator for OllamaGenerator {
    fn generate(&self, prompt: &str) -> Result<String, SearchError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .map_err(|error| generation_error("ollama", error))?;

        if !response.status().is_success() {
            return Err(SearchError::Generation(format!(
                "ollama returned {}",
                response.status()
            )));
        }

        let payload: GenerateResponse = response
            .json()
            .map_err(|error| SearchError::Generation(format!("ollama response: {error}")))?;
        Ok(payload.response.trim().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    pub(crate) fn client(&self) -> Result<Client, SearchError> {
        if self.api_key.trim().is_empty() {
            return Err(SearchError::CapabilityUnavailable(
                "OpenAI API key not configured".to_string(),
            ));
        }
        Ok(Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?)
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Hosted chat completions.
pub struct OpenAiGenerator {
    client: Client,
    url: Url,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(config: &OpenAiConfig) -> Result<Self, SearchError> {
        Ok(Self {
            client: config.client()?,
            url: endpoint_url(&config.base_url, "chat/completions")?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

impl Generator for OpenAiGenerator {
    fn generate(&self, prompt: &str) -> Result<String, SearchError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|error| generation_error("openai", error))?;

        if !response.status().is_success() {
            return Err(SearchError::Generation(format!(
                "openai returned {}",
                response.status()
            )));
        }

        let payload: ChatResponse = response
            .json()
            .map_err(|error| SearchError::Generation(format!("openai response: {error}")))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| SearchError::Generation("openai returned no choices".to_string()))
    }
}

/// Generation backend chosen once at startup.
#[derive(Debug, Clone)]
pub enum GenerationBackend {
    Local(OllamaConfig),
    Hosted(OpenAiConfig),
}

impl GenerationBackend {
    pub fn into_generator(self) -> Result<Box<dyn Generator>, SearchError> {
        Ok(match self {
            GenerationBackend::Local(config) => Box::new(OllamaGenerator::new(&config)?),
            GenerationBackend::Hosted(config) => Box::new(OpenAiGenerator::new(&config)?),
        })
    }
}
