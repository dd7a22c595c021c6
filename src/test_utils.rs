//! Test utilities - 네트워크 없이 동작하는 결정적 가짜 구현체
//!
//! 테스트 빌드에서만 컴파일됩니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result, RetrieverKind};
use crate::generator::{ChatMessage, ChatModel};
use crate::knowledge::{Document, RankedResult, Retriever};

/// 키워드 축 (축마다 1차원, 마지막 차원은 바이어스)
pub const KEYWORD_AXES: [&str; 4] = ["peat", "sherry", "fruit", "floral"];

// ============================================================================
// Embedding fakes
// ============================================================================

/// 키워드 출현 횟수를 벡터로 쓰는 임베더
///
/// 영벡터를 피하려고 마지막 차원에 0.1을 둡니다.
#[derive(Debug, Default)]
pub struct KeywordEmbedder {
    calls: AtomicUsize,
    texts: AtomicUsize,
    reported_dimension: Option<usize>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 실제와 다른 차원을 보고하는 임베더 (차원 검증 테스트용)
    pub fn misreporting(dimension: usize) -> Self {
        Self {
            reported_dimension: Some(dimension),
            ..Self::default()
        }
    }

    /// `embed_batch` 호출 횟수
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 임베딩한 텍스트 수
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = KEYWORD_AXES
            .iter()
            .map(|k| lower.matches(k).count() as f32)
            .collect();
        v.push(0.1);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = self.embed_batch(&[text.to_string()]).await?;
        v.pop().ok_or_else(|| anyhow::anyhow!("no vector"))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.reported_dimension.unwrap_or(KEYWORD_AXES.len() + 1)
    }

    fn name(&self) -> &str {
        "keyword-test"
    }
}

/// 항상 실패하는 임베더
#[derive(Debug, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding service unreachable")
    }

    fn dimension(&self) -> usize {
        KEYWORD_AXES.len() + 1
    }

    fn name(&self) -> &str {
        "failing-test"
    }
}

// ============================================================================
// Retriever fakes
// ============================================================================

pub fn doc(record_id: i64, content: &str) -> Document {
    Document {
        record_id,
        content: content.to_string(),
    }
}

/// 고정된 순위 목록을 반환하는 리트리버
pub struct StaticRetriever {
    kind: RetrieverKind,
    documents: Vec<Document>,
}

impl StaticRetriever {
    pub fn new(kind: RetrieverKind, documents: Vec<Document>) -> Self {
        Self { kind, documents }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str, k: usize) -> Result<Vec<RankedResult>> {
        Ok(self
            .documents
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, d)| RankedResult {
                document: d.clone(),
                score: 1.0 / (i as f32 + 1.0),
                source: self.kind,
            })
            .collect())
    }

    fn kind(&self) -> RetrieverKind {
        self.kind
    }
}

/// 항상 실패하는 리트리버
pub struct FailingRetriever {
    kind: RetrieverKind,
}

impl FailingRetriever {
    pub fn new(kind: RetrieverKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Retriever for FailingRetriever {
    async fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<RankedResult>> {
        Err(Error::index_unavailable(
            self.kind,
            anyhow::anyhow!("{} backend down", self.kind),
        ))
    }

    fn kind(&self) -> RetrieverKind {
        self.kind
    }
}

// ============================================================================
// Chat model fakes
// ============================================================================

/// 고정 답변(또는 고정 실패)을 반환하고 받은 프롬프트를 기록하는 모델
#[derive(Debug, Default)]
pub struct ScriptedChat {
    reply: Option<String>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    /// 마지막으로 받은 프롬프트
    pub fn last_prompt(&self) -> Option<Vec<ChatMessage>> {
        self.prompts.lock().ok().and_then(|p| p.last().cloned())
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        self.reply
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model quota exceeded"))
    }

    fn name(&self) -> &str {
        "scripted-test"
    }
}
