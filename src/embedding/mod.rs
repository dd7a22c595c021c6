//! 임베딩 모듈 - OpenAI API를 통한 텍스트 벡터화
//!
//! 위스키 문서와 질문을 같은 차원의 벡터로 변환합니다.
//! 시맨틱 인덱스 빌드와 쿼리 모두 이 프로바이더를 사용합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::from_env(&EmbeddingConfig::default())?;
//! let embedding = embedder.embed("smoky islay whisky").await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::EmbeddingConfig;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름 (모델 식별자)
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI 임베딩 API 엔드포인트
/// source: https://platform.openai.com/docs/api-reference/embeddings
const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

/// API 키 환경변수
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Rate Limiter 설정
const RATE_LIMIT_RPM: u32 = 500;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이
const MIN_DELAY_MS: u64 = 50;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;

/// OpenAI 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    client: reqwest::Client,
    model: String,
    dimension: usize,
    batch_size: usize,
    max_retries: u32,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
pub(crate) struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    pub(crate) async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();

        // 2. 윈도우 밖의 오래된 요청 제거
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. Rate limit 초과 시 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

/// 재시도 대상 HTTP 상태 (429, 5xx)
pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// 지수 백오프 대기 시간
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt.min(5)))
}

impl OpenAiEmbedding {
    /// 새 OpenAI 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API 키
    /// * `config` - 모델/차원/재시도 설정
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        if config.dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            RATE_LIMIT_RPM,
            RATE_LIMIT_WINDOW,
            Duration::from_millis(MIN_DELAY_MS),
        )));

        Ok(Self {
            api_key,
            client,
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            rate_limiter,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key, config)
    }

    /// 요청 1회 (배치 1개) - 429/5xx/네트워크 에러 시 재시도
    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
            dimensions: self.supports_dimensions().then_some(self.dimension),
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=self.max_retries {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            let response = match self
                .client
                .post(OPENAI_EMBED_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < self.max_retries {
                        let backoff = backoff_delay(attempt);
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
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

            // 성공
            if status.is_success() {
                let embed_response: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return collect_embeddings(embed_response, texts.len(), self.dimension);
            }

            if is_retryable_status(status) {
                let backoff = backoff_delay(attempt);
                tracing::warn!(
                    "Embedding API returned {}, backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    self.max_retries
                );
                last_error = Some(anyhow::anyhow!("OpenAI embedding API error ({})", status));

                if attempt < self.max_retries {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 다른 에러 - 즉시 실패
                if let Ok(error) = serde_json::from_str::<OpenAiError>(&body) {
                    anyhow::bail!(
                        "OpenAI embedding API error ({}): {}",
                        status,
                        error.error.message
                    );
                }
                anyhow::bail!("OpenAI embedding API error ({}): {}", status, body);
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Embedding failed after {} retries", self.max_retries)
        }))
    }

    /// `dimensions` 파라미터는 text-embedding-3 계열만 지원
    fn supports_dimensions(&self) -> bool {
        self.model.starts_with("text-embedding-3")
    }
}

/// OpenAI API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// OpenAI API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI API 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiError {
    pub(crate) error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorDetail {
    pub(crate) message: String,
}

/// 응답을 입력 순서대로 정렬하고 개수/차원 검증
fn collect_embeddings(
    response: EmbedResponse,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        anyhow::bail!(
            "Embedding count mismatch: expected {}, got {}",
            expected,
            response.data.len()
        );
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        if item.embedding.len() != dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                dimension,
                item.embedding.len()
            );
        }
        let slot = slots
            .get_mut(item.index)
            .ok_or_else(|| anyhow::anyhow!("Embedding index {} out of range", item.index))?;
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| anyhow::anyhow!("Missing embedding for input {}", i)))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // OpenAI는 빈 문자열 입력을 거부함
        if texts.iter().any(|t| t.trim().is_empty()) {
            anyhow::bail!("Cannot embed empty text");
        }

        let mut results = Vec::with_capacity(texts.len());
        let total_batches = texts.len().div_ceil(self.batch_size);

        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            tracing::debug!("Embedding batch {}/{}", i + 1, total_batches);
            results.extend(self.request_batch(batch).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (`OPENAI_API_KEY` 환경변수)
pub fn get_api_key() -> Result<String> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.is_empty() => {
            tracing::debug!("Using API key from {}", API_KEY_ENV);
            Ok(key)
        }
        _ => anyhow::bail!(
            "API key not found. Set {} environment variable.\n\
             Get your API key at: https://platform.openai.com/api-keys",
            API_KEY_ENV
        ),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var(API_KEY_ENV)
        .map(|key| !key.is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn response(items: Vec<(usize, Vec<f32>)>) -> EmbedResponse {
        EmbedResponse {
            data: items
                .into_iter()
                .map(|(index, embedding)| EmbeddingData { index, embedding })
                .collect(),
        }
    }

    #[test]
    fn test_invalid_dimension() {
        let config = EmbeddingConfig {
            dimension: 0,
            ..Default::default()
        };
        let result = OpenAiEmbedding::new("fake_key".to_string(), &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_request_serialization() {
        let input = vec!["peat".to_string()];
        let request = EmbedRequest {
            model: "text-embedding-3-small",
            input: &input,
            dimensions: Some(256),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][0], "peat");
        assert_eq!(json["dimensions"], 256);

        let request = EmbedRequest {
            model: "text-embedding-ada-002",
            input: &input,
            dimensions: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("dimensions").is_none());
    }

    #[test]
    fn test_supports_dimensions() {
        let small = OpenAiEmbedding::new("k".into(), &EmbeddingConfig::default()).unwrap();
        assert!(small.supports_dimensions());

        let ada = OpenAiEmbedding::new(
            "k".into(),
            &EmbeddingConfig {
                model: "text-embedding-ada-002".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!ada.supports_dimensions());
    }

    #[test]
    fn test_collect_embeddings_reorders_by_index() {
        let resp = response(vec![(1, vec![0.0, 1.0]), (0, vec![1.0, 0.0])]);
        let vectors = collect_embeddings(resp, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_collect_embeddings_rejects_wrong_dimension() {
        let resp = response(vec![(0, vec![1.0, 0.0, 0.0])]);
        let err = collect_embeddings(resp, 1, 2).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_collect_embeddings_rejects_missing_item() {
        let resp = response(vec![(0, vec![1.0, 0.0])]);
        assert!(collect_embeddings(resp, 2, 2).is_err());
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(reqwest::StatusCode::UNAUTHORIZED));
        assert!(backoff_delay(1) > backoff_delay(0));
        assert_eq!(backoff_delay(10), backoff_delay(5));
    }

    #[tokio::test]
    async fn test_empty_text_rejected_without_request() {
        let embedder = OpenAiEmbedding::new("k".into(), &EmbeddingConfig::default()).unwrap();
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(err.to_string().contains("empty text"));
    }
}
