//! Retriever 트레이트 - 키워드/벡터 리트리버 공통 인터페이스

use async_trait::async_trait;

use crate::error::{Result, RetrieverKind};

use super::projector::Document;

/// 리트리버 검색 결과 1건
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub document: Document,
    /// 리트리버 고유 스코어 (높을수록 좋음)
    pub score: f32,
    /// 결과를 만든 리트리버
    pub source: RetrieverKind,
}

/// 리트리버 트레이트 (async)
#[async_trait]
pub trait Retriever: Send + Sync {
    /// 상위 k개 문서를 관련도 순으로 반환
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RankedResult>>;

    /// 리트리버 종류
    fn kind(&self) -> RetrieverKind;
}
