//! Language model abstraction
//!
//! Two implementations ship with the crate:
//! - [`OpenAiChatModel`] talks to any OpenAI-compatible chat-completions endpoint
//! - [`ExtractiveModel`] answers offline by quoting context sentences, used when
//!   no API key is configured
//!
//! [`ScriptedModel`] replays canned completions for tests.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::text::{split_sentences, terms};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// What the prompt asks the model to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTask {
    /// Cited answer over numbered passages
    Answer,
    /// Structured entity extraction as JSON
    ExtractEntities,
}

/// A numbered context passage, as shown to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPassage {
    pub index: usize,
    pub title: String,
    pub text: String,
}

/// A fully rendered prompt plus the structured parts it was built from
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub task: PromptTask,
    pub system: String,
    pub user: String,
    pub question: String,
    pub passages: Vec<PromptPassage>,
    /// Entity values the answer should address (party names, concern tags)
    pub hints: Vec<String>,
    pub max_tokens: usize,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    /// Provider content policy blocked the output
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

impl Completion {
    pub fn stop(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        }
    }

    pub fn refused() -> Self {
        Self {
            text: String::new(),
            finish_reason: FinishReason::ContentFilter,
            usage: TokenUsage::default(),
        }
    }

    pub fn is_refusal(&self) -> bool {
        self.finish_reason == FinishReason::ContentFilter
    }
}

/// Trait for text generation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Build the configured model: remote when an API key is set, offline otherwise
pub fn from_config(config: &LlmConfig) -> Result<std::sync::Arc<dyn LanguageModel>> {
    match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(_) => Ok(std::sync::Arc::new(OpenAiChatModel::new(config.clone())?)),
        None => {
            tracing::warn!("No LLM API key configured, using the offline extractive model");
            Ok(std::sync::Arc::new(ExtractiveModel::default()))
        }
    }
}

/// OpenAI-compatible chat-completions client
pub struct OpenAiChatModel {
    config: LlmConfig,
    client: reqwest::Client,
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
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

impl OpenAiChatModel {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: prompt.max_tokens,
            temperature: prompt.temperature,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| AppError::GenerationUnavailable {
            message: format!("LLM API request failed: {}", e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(&body) {
                if parsed.error.code.as_deref() == Some("content_policy_violation")
                    || parsed.error.code.as_deref() == Some("content_filter")
                {
                    tracing::warn!(message = %parsed.error.message, "LLM refused the prompt");
                    return Ok(Completion::refused());
                }
            }
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(AppError::GenerationUnavailable {
                    message: format!("LLM API error {}", status),
                });
            }
            return Err(AppError::Internal {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| AppError::GenerationUnavailable {
            message: format!("Failed to parse LLM response: {}", e),
        })?;

        let usage = chat_response.usage;
        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::GenerationUnavailable {
                message: "LLM returned no choices".to_string(),
            })?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("content_filter") => FinishReason::ContentFilter,
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            finish_reason,
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Offline model that answers by quoting context sentences
///
/// Every output sentence is copied verbatim from a passage and tagged with
/// that passage's marker. Entity extraction returns an empty object, leaving
/// the deterministic extractors in charge.
#[derive(Debug, Clone)]
pub struct ExtractiveModel {
    max_sentences: usize,
}

impl Default for ExtractiveModel {
    fn default() -> Self {
        Self { max_sentences: 6 }
    }
}

impl ExtractiveModel {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    fn answer(&self, prompt: &Prompt) -> String {
        let wanted: HashSet<String> = terms(&prompt.question).into_iter().collect();
        let hints: Vec<String> = prompt
            .hints
            .iter()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        // (score, passage order, sentence start, marker, sentence)
        let mut scored: Vec<(usize, usize, usize, usize, &str)> = Vec::new();
        for (order, passage) in prompt.passages.iter().enumerate() {
            for (start, end) in split_sentences(&passage.text) {
                let sentence = passage.text[start..end].trim();
                if sentence.is_empty() {
                    continue;
                }
                let overlap = terms(sentence).iter().filter(|t| wanted.contains(*t)).count();
                let lowered = sentence.to_lowercase();
                let hinted = hints.iter().filter(|h| lowered.contains(h.as_str())).count();
                scored.push((overlap + 2 * hinted, order, start, passage.index, sentence));
            }
        }

        // best score first, then passage order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut seen_passages = HashSet::new();
        let mut picked: Vec<(usize, usize, usize, &str)> = Vec::new();
        for (score, order, start, index, sentence) in &scored {
            if picked.len() >= self.max_sentences {
                break;
            }
            if *score == 0 && seen_passages.contains(index) {
                continue;
            }
            seen_passages.insert(*index);
            picked.push((*order, *start, *index, sentence));
        }
        picked.sort_by_key(|(order, start, _, _)| (*order, *start));

        picked
            .iter()
            .map(|(_, _, index, sentence)| {
                let sentence = sentence.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
                format!("{} [{}].", sentence, index)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl LanguageModel for ExtractiveModel {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let text = match prompt.task {
            PromptTask::Answer => self.answer(prompt),
            PromptTask::ExtractEntities => "{}".to_string(),
        };
        Ok(Completion::stop(text))
    }

    fn model_name(&self) -> &str {
        "extractive"
    }
}

/// Replays queued completions in order; records every prompt it receives
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<Completion>>>,
    prompts: Mutex<Vec<Prompt>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<Completion>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answer texts, each completing normally
    pub fn answers<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(Completion::stop(t))).collect())
    }

    /// Wait before every completion
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(result) => result,
            None if prompt.task == PromptTask::ExtractEntities => Ok(Completion::stop("{}")),
            None => Err(AppError::GenerationUnavailable {
                message: "scripted model has no more responses".to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
