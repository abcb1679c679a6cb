//! OpenAI-compatible chat completion backend
//!
//! One client serves both ends of the pipeline: turning a question into a
//! query and turning the query's rows into an answer.

use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{
    AnswerSynthesizer, GeneratedQuery, Identity, QueryGenerator, SynthesizedAnswer,
};
use crate::memory::ConversationEntry;
use crate::memory_db::Row;
use crate::utils::TextUtils;

/// Prior exchanges included in the generation prompt
const HISTORY_IN_PROMPT: usize = 2;
/// Rows included in the synthesis prompt
const ROWS_IN_PROMPT: usize = 20;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LlmBackendConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Free-text description of the data schema for the generation prompt
    pub schema_hint: String,
    pub request_timeout: Duration,
}

pub struct LlmBackend {
    config: LlmBackendConfig,
    http_client: reqwest::Client,
}

impl LlmBackend {
    pub fn new(config: LlmBackendConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        debug!("LLM backend initialized: {} ({})", config.base_url, config.model);
        Ok(Self { config, http_client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Content of the first choice and the reported token usage
    async fn complete(&self, messages: Vec<ChatMessage>, max_tokens: u32, temperature: f32) -> anyhow::Result<(String, u32)> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens,
            temperature,
            stream: false,
        };
        let mut builder = self.http_client.post(self.completions_url()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("LLM backend request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("LLM backend returned {}: {}", status, body));
        }
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {}", e))?;

        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow::anyhow!("LLM backend returned no content"))?;
        let tokens = completion.usage.map(|u| u.total_tokens).unwrap_or(0);
        Ok((content, tokens))
    }

    fn generation_prompt(&self, question: &str, history: &[ConversationEntry], identity: &Identity) -> Vec<ChatMessage> {
        let mut system = String::from(
            "You translate questions into a single read-only SQL SELECT statement. \
             Reply with the SQL only, no explanation.",
        );
        if !self.config.schema_hint.trim().is_empty() {
            system.push_str("\n\nSchema:\n");
            system.push_str(self.config.schema_hint.trim());
        }

        let mut user = String::new();
        let start = history.len().saturating_sub(HISTORY_IN_PROMPT);
        if start < history.len() {
            user.push_str("Recent conversation:\n");
            for entry in &history[start..] {
                user.push_str(&format!(
                    "Q: {}\nSQL: {}\nA: {}\n",
                    entry.question_text,
                    entry.generated_query,
                    TextUtils::truncate_with_ellipsis(&entry.answer_text, 200)
                ));
            }
            user.push('\n');
        }
        user.push_str(&format!("Asked by: {}\nQuestion: {}", identity.display_name, question));

        vec![
            ChatMessage { role: "system".into(), content: system },
            ChatMessage { role: "user".into(), content: user },
        ]
    }

    fn synthesis_prompt(question: &str, query: &str, rows: &[Row]) -> anyhow::Result<Vec<ChatMessage>> {
        let shown = &rows[..rows.len().min(ROWS_IN_PROMPT)];
        let rows_json = serde_json::to_string(shown)?;
        let content = format!(
            "Answer the question in plain language using only these query results.\n\
             Question: {}\nSQL: {}\nRows ({} total, first {} shown): {}",
            question,
            query,
            rows.len(),
            shown.len(),
            rows_json
        );
        Ok(vec![ChatMessage { role: "user".into(), content }])
    }
}

/// Remove a surrounding Markdown code fence, with or without a language tag
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = match rest.find('\n') {
                Some(newline) => &rest[newline + 1..],
                None => rest,
            };
            body.trim_end().strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    }
}

#[async_trait]
impl QueryGenerator for LlmBackend {
    async fn generate(
        &self,
        question: &str,
        history: &[ConversationEntry],
        identity: &Identity,
    ) -> anyhow::Result<GeneratedQuery> {
        let messages = self.generation_prompt(question, history, identity);
        let (content, tokens_used) = self.complete(messages, 512, 0.1).await?;
        Ok(GeneratedQuery {
            query: strip_code_fences(&content).to_string(),
            tokens_used,
        })
    }
}

#[async_trait]
impl AnswerSynthesizer for LlmBackend {
    async fn synthesize(&self, question: &str, query: &str, rows: &[Row]) -> anyhow::Result<SynthesizedAnswer> {
        let messages = Self::synthesis_prompt(question, query, rows)?;
        let (answer, tokens_used) = self.complete(messages, 800, 0.3).await?;
        Ok(SynthesizedAnswer { answer, tokens_used })
    }
}
