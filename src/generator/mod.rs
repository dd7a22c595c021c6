//! Generator 모듈 - LLM 답변 생성
//!
//! 프롬프트 메시지 목록을 받아 답변 텍스트 1개를 반환합니다.
//! 기본 구현은 OpenAI Chat Completions API입니다.
//!
//! ref: https://platform.openai.com/docs/api-reference/chat/create

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;
use crate::embedding::{backoff_delay, get_api_key, is_retryable_status, OpenAiError};

// ============================================================================
// Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 채팅 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// ChatModel Trait
// ============================================================================

/// 답변 생성 모델 트레이트
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 메시지 목록으로 답변 1개 생성
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Chat
// ============================================================================

/// OpenAI Chat Completions 엔드포인트
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI 채팅 모델 구현체
#[derive(Debug)]
pub struct OpenAiChat {
    api_key: String,
    client: reqwest::Client,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn new(api_key: String, config: &GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(config: &GeneratorConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key, config)
    }

    fn request<'a>(&'a self, messages: &'a [ChatMessage]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// 요청 본문
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

/// 응답 본문 (필요한 필드만)
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn extract_answer(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow::anyhow!("Empty response from chat model"))
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = self.request(messages);
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=self.max_retries {
            let response = match self
                .client
                .post(OPENAI_CHAT_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send chat request: {}", e));
                    if attempt < self.max_retries {
                        let backoff = backoff_delay(attempt);
                        tracing::warn!(
                            "Chat request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: ChatResponse =
                    serde_json::from_str(&body).context("Failed to parse chat response")?;
                return extract_answer(parsed);
            }

            if is_retryable_status(status) {
                let backoff = backoff_delay(attempt);
                tracing::warn!(
                    "Chat API returned {}, backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    self.max_retries
                );
                last_error = Some(anyhow::anyhow!("OpenAI chat API error ({})", status));

                if attempt < self.max_retries {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                if let Ok(error) = serde_json::from_str::<OpenAiError>(&body) {
                    anyhow::bail!("OpenAI chat API error ({}): {}", status, error.error.message);
                }
                anyhow::bail!("OpenAI chat API error ({}): {}", status, body);
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Chat completion failed after {} retries", self.max_retries)
        }))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
