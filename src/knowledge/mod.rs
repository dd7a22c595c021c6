//! Knowledge 모듈 - 위스키 하이브리드 검색
//!
//! - SQLite: 위스키 레코드 저장
//! - Projector: 레코드 → 검색용 문서
//! - Lexical: 단어 분할 + FTS5 BM25 키워드 검색
//! - LanceDB: 임베딩 벡터 검색
//! - Hybrid: 가중 RRF로 두 검색 결과 통합

mod hybrid;
mod lance;
mod lexical;
mod projector;
mod retriever;
mod segmenter;
mod store;
mod vector;

// Re-exports
pub use hybrid::{fuse, Degradation, FusedContext, FusedDocument, FusionWeights, HybridRetriever};
pub use lance::{
    corpus_fingerprint, BuildOutcome, IndexManifest, LanceVectorStore, SemanticIndex,
    INDEX_DIR_NAME, MANIFEST_FILE_NAME,
};
pub use lexical::LexicalIndex;
pub use projector::{project, project_all, Document, FIELD_LABELS};
pub use retriever::{RankedResult, Retriever};
pub use segmenter::{default_segmenter, tokenize, IpadicSegmenter, ScriptSegmenter, Segmenter};
pub use store::{RecordStore, StoreStats, WhiskyRecord, DB_FILE_NAME};
pub use vector::{SearchResult, VectorEntry, VectorStore};
