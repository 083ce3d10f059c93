//! Answer generation over retrieved context.
//!
//! A [`Generator`] turns one prompt into one completion. The prompt is
//! assembled by [`build_prompt`], which also reports exactly which chunk
//! ids made it into the context block; those ids become the answer's
//! citations. Citations are never parsed out of the model's text.
//!
//! When retrieval comes back empty, [`answer`] returns a fixed fallback
//! message without calling the backend at all.
//!
//! # Backends
//!
//! - `ollama`: local Ollama `/api/generate`
//! - `openai`: OpenAI chat completions
//! - `echo`: returns the prompt unchanged; deterministic, for offline runs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::PipelineError;
use crate::models::{Answer, RetrievalResult};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Answer returned when retrieval produced no context. The backend is not
/// consulted in that case, and the citation list stays empty.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant information found. Please try a different search type or refine your question.";

/// A text-completion backend.
#[async_trait]
pub trait Generator: Send + Sync {
    fn provider(&self) -> &'static str;
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String, PipelineError>;
}

/// Instantiate the generation backend named in the configuration.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "echo" => Ok(Arc::new(EchoGenerator {
            model: config.model.clone(),
        })),
        other => anyhow::bail!(
            "Unknown generation provider: {}. Use ollama, openai, or echo.",
            other
        ),
    }
}

fn gen_err(provider: &str, reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::GenerationBackend {
        provider: provider.to_string(),
        reason: reason.to_string(),
    }
}

/// Produce an [`Answer`] for `question` from the retrieved context.
pub async fn answer(
    generator: &dyn Generator,
    question: &str,
    retrieval: &RetrievalResult,
    max_context_chars: usize,
) -> Result<Answer, PipelineError> {
    if retrieval.is_empty() {
        return Ok(Answer {
            text: NO_CONTEXT_ANSWER.to_string(),
            citations: Vec::new(),
            model: generator.model_name().to_string(),
        });
    }

    let (prompt, citations) = build_prompt(question, retrieval, max_context_chars);
    tracing::debug!(
        provider = generator.provider(),
        context_chunks = citations.len(),
        prompt_chars = prompt.chars().count(),
        "requesting completion"
    );
    let text = generator.complete(&prompt).await?;
    Ok(Answer {
        text,
        citations,
        model: generator.model_name().to_string(),
    })
}

/// Assemble the grounding prompt and return it together with the chunk ids
/// whose content was placed in it.
///
/// Entries are taken in rank order until the context budget is spent.
/// Whole entries are preferred; only when the very first entry alone
/// exceeds the budget is it cut at a character boundary, so the context
/// block is never empty for a non-empty retrieval.
pub fn build_prompt(
    question: &str,
    retrieval: &RetrievalResult,
    max_context_chars: usize,
) -> (String, Vec<String>) {
    let mut entries: Vec<String> = Vec::new();
    let mut citations: Vec<String> = Vec::new();
    let mut used_chars = 0usize;

    for (rank, item) in retrieval.items.iter().enumerate() {
        let chunk = &item.chunk;
        let mut entry = format!(
            "[{} - {}] (chunk {})",
            rank + 1,
            chunk.modality.as_str(),
            chunk.id
        );
        entry.push('\n');
        entry.push_str(&chunk.content);

        let entry_chars = entry.chars().count();
        if used_chars + entry_chars > max_context_chars {
            if entries.is_empty() {
                let cut = truncate_chars(&entry, max_context_chars);
                entries.push(cut.to_string());
                citations.push(chunk.id.clone());
            }
            break;
        }
        used_chars += entry_chars;
        entries.push(entry);
        citations.push(chunk.id.clone());
    }

    let context = entries.join("\n\n---\n\n");
    let prompt = format!(
        "Answer the question using only the retrieved context below. \
         If the context does not contain the answer, say so.\n\n\
         RETRIEVED CONTEXT:\n{context}\n\n\
         USER QUESTION:\n{question}\n\n\
         YOUR ANSWER:"
    );
    (prompt, citations)
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ============ Ollama ============

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Generation backend for a local Ollama daemon.
pub struct OllamaGenerator {
    model: String,
    base_url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn provider(&self) -> &'static str {
        "ollama"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, PipelineError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| gen_err("ollama", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(gen_err("ollama", format!("HTTP {status}: {body_text}")));
        }
        let parsed: OllamaGenerateResponse =
            resp.json().await.map_err(|e| gen_err("ollama", e))?;
        Ok(parsed.response)
    }
}

// ============ OpenAI ============

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Deserialize)]
struct OpenAiChoiceMessage {
    content: String,
}

/// Generation backend for the OpenAI chat completions API.
pub struct OpenAiGenerator {
    model: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "OpenAI generation requires an API key; set the {} environment variable",
                config.api_key_env
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn provider(&self) -> &'static str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, PipelineError> {
        let body = OpenAiChatRequest {
            model: &self.model,
            messages: vec![OpenAiMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };
        let resp = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| gen_err("openai", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(gen_err("openai", format!("HTTP {status}: {body_text}")));
        }
        let parsed: OpenAiChatResponse =
            resp.json().await.map_err(|e| gen_err("openai", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| gen_err("openai", "response contained no choices"))
    }
}

// ============ Echo ============

/// Offline backend that returns its prompt unchanged. Useful for tests and
/// for exercising the pipeline without a model server.
pub struct EchoGenerator {
    model: String,
}

#[async_trait]
impl Generator for EchoGenerator {
    fn provider(&self) -> &'static str {
        "echo"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, PipelineError> {
        Ok(prompt.to_string())
    }
}
