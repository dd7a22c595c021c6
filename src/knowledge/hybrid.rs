//! 하이브리드 검색 - 키워드(BM25) + 벡터 검색 가중 RRF 통합
//!
//! 두 리트리버의 순위 목록을 가중 RRF (Reciprocal Rank Fusion)로 합칩니다.
//! 한쪽이 실패하면 남은 쪽 결과만으로 답하고 `degraded`로 표시합니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result, RetrieverKind};

use super::lance::{BuildOutcome, SemanticIndex};
use super::lexical::LexicalIndex;
use super::projector::{project_all, Document};
use super::retriever::{RankedResult, Retriever};
use super::store::RecordStore;

// ============================================================================
// Types
// ============================================================================

/// 리트리버별 가중치
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub lexical: f32,
    pub semantic: f32,
}

impl FusionWeights {
    /// 음수 불가, 둘 다 0 불가
    pub fn new(lexical: f32, semantic: f32) -> Result<Self> {
        if !(lexical >= 0.0 && semantic >= 0.0) {
            return Err(Error::Config(format!(
                "Fusion weights must be non-negative (lexical={}, semantic={})",
                lexical, semantic
            )));
        }
        if lexical == 0.0 && semantic == 0.0 {
            return Err(Error::Config("Fusion weights cannot both be zero".into()));
        }
        Ok(Self { lexical, semantic })
    }

    fn weight(&self, kind: RetrieverKind) -> f32 {
        match kind {
            RetrieverKind::Lexical => self.lexical,
            RetrieverKind::Semantic => self.semantic,
        }
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            semantic: 0.5,
        }
    }
}

/// 통합 결과 문서 1건
#[derive(Debug, Clone, PartialEq)]
pub struct FusedDocument {
    pub document: Document,
    /// 가중 RRF 스코어 (높을수록 좋음)
    pub score: f32,
    /// 이 문서를 반환한 리트리버 (발견 순서)
    pub sources: Vec<RetrieverKind>,
}

/// 한쪽 리트리버 실패 정보
#[derive(Debug, Clone, PartialEq)]
pub struct Degradation {
    pub failed: RetrieverKind,
    pub reason: String,
}

/// 프롬프트에 들어갈 검색 컨텍스트
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusedContext {
    pub documents: Vec<FusedDocument>,
    /// 한쪽 리트리버가 실패한 경우 `Some`
    pub degraded: Option<Degradation>,
}

impl FusedContext {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// 가중 RRF (Reciprocal Rank Fusion)
///
/// 목록 i의 1-based 순위 r에 있는 문서는 `w_i / (c + r)`를 받습니다.
/// 문서는 본문으로 식별하고, 한 목록 안의 중복은 첫 순위만 셉니다.
/// 동점은 처음 나온 순서(키워드 목록 먼저)를 유지합니다.
pub fn fuse(
    lexical: &[RankedResult],
    semantic: &[RankedResult],
    weights: FusionWeights,
    rrf_constant: f32,
    k: usize,
) -> Vec<FusedDocument> {
    let mut fused: Vec<FusedDocument> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    let lists = [
        (RetrieverKind::Lexical, lexical),
        (RetrieverKind::Semantic, semantic),
    ];

    for (kind, results) in lists {
        let weight = weights.weight(kind);
        let mut seen: HashSet<&str> = HashSet::new();

        for (rank, result) in results.iter().enumerate() {
            let content = result.document.content.as_str();
            if !seen.insert(content) {
                continue;
            }

            let contribution = weight / (rrf_constant + rank as f32 + 1.0);

            match position.get(content) {
                Some(&i) => {
                    fused[i].score += contribution;
                    fused[i].sources.push(kind);
                }
                None => {
                    position.insert(content.to_string(), fused.len());
                    fused.push(FusedDocument {
                        document: result.document.clone(),
                        score: contribution,
                        sources: vec![kind],
                    });
                }
            }
        }
    }

    // sort_by는 stable → 동점은 발견 순서 유지
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(k);
    fused
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 키워드 리트리버 + 벡터 리트리버를 가중 RRF로 통합합니다.
pub struct HybridRetriever {
    lexical: Box<dyn Retriever>,
    semantic: Box<dyn Retriever>,
    weights: FusionWeights,
    rrf_constant: f32,
    top_k: usize,
}

impl HybridRetriever {
    /// 리트리버 두 개로 생성
    pub fn new(
        lexical: Box<dyn Retriever>,
        semantic: Box<dyn Retriever>,
        config: &RetrievalConfig,
    ) -> Result<Self> {
        let weights = FusionWeights::new(config.lexical_weight, config.semantic_weight)?;
        if config.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".into()));
        }

        Ok(Self {
            lexical,
            semantic,
            weights,
            rrf_constant: config.rrf_constant,
            top_k: config.top_k,
        })
    }

    /// 레코드 저장소에서 두 인덱스를 빌드
    ///
    /// 레코드 로드, 문서 변환, 키워드 인덱스, 벡터 인덱스 순으로 진행합니다.
    /// 어느 단계든 실패하면 `Error::Bootstrap`입니다.
    pub async fn bootstrap(
        store: &RecordStore,
        data_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Result<(Self, BuildOutcome)> {
        let records = store
            .all()
            .map_err(bootstrap_error("Failed to load records"))?;
        let documents = project_all(&records);
        tracing::info!("Bootstrapping indexes for {} documents", documents.len());

        let semantic = SemanticIndex::open_in(data_dir, embedder, config.embedding.batch_size)
            .await
            .map_err(bootstrap_error("Failed to open semantic index"))?;
        let outcome = semantic
            .build(&documents)
            .await
            .map_err(bootstrap_error("Failed to build semantic index"))?;

        let lexical = LexicalIndex::build(documents)
            .map_err(bootstrap_error("Failed to build lexical index"))?;

        let retriever = Self::new(Box::new(lexical), Box::new(semantic), &config.retrieval)?;
        Ok((retriever, outcome))
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// 하이브리드 검색
    ///
    /// - 둘 다 성공: 전체 통합
    /// - 한쪽 실패: 남은 쪽만 통합, `degraded` 설정
    /// - 둘 다 실패: `Error::IndexUnavailable`
    pub async fn retrieve(&self, query: &str) -> Result<FusedContext> {
        let (lexical, semantic) = tokio::join!(
            self.lexical.retrieve(query, self.top_k),
            self.semantic.retrieve(query, self.top_k),
        );

        let (lexical, semantic, degraded) = match (lexical, semantic) {
            (Ok(l), Ok(s)) => (l, s, None),
            (Ok(l), Err(e)) => (l, vec![], Some(self.degrade(self.semantic.kind(), &e))),
            (Err(e), Ok(s)) => (vec![], s, Some(self.degrade(self.lexical.kind(), &e))),
            (Err(lexical_err), Err(semantic_err)) => {
                tracing::error!("Both retrievers failed (semantic: {})", semantic_err);
                return Err(lexical_err);
            }
        };

        let documents = fuse(
            &lexical,
            &semantic,
            self.weights,
            self.rrf_constant,
            self.top_k,
        );

        tracing::debug!(
            "Fused {} lexical + {} semantic hits into {} documents",
            lexical.len(),
            semantic.len(),
            documents.len()
        );

        Ok(FusedContext {
            documents,
            degraded,
        })
    }

    fn degrade(&self, failed: RetrieverKind, error: &Error) -> Degradation {
        tracing::warn!("{} retriever failed, continuing degraded: {}", failed, error);
        Degradation {
            failed,
            reason: error.to_string(),
        }
    }
}

fn bootstrap_error(context: &'static str) -> impl FnOnce(Error) -> Error {
    move |e| Error::Bootstrap(anyhow::Error::new(e).context(context))
}

// ============================================================================
// Tests
// ============================================================================
