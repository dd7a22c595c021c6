//! whisky-rag - 위스키 추천 하이브리드 RAG 어시스턴트
//!
//! SQLite FTS5 키워드 검색 + LanceDB 벡터 검색을 가중 RRF로 결합하고,
//! 검색된 위스키 레코드와 대화 기록으로 LLM 답변을 생성합니다.
//!
//! ```text
//! RecordStore → projector → {LexicalIndex, SemanticIndex}
//!             → HybridRetriever → prompt → ChatModel
//! ```

pub mod chat;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod knowledge;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports
pub use chat::{Assistant, ConversationTurn, Session, TurnOutcome};
pub use config::{get_data_dir, Config};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, OpenAiEmbedding};
pub use error::{Error, Result, RetrieverKind};
pub use generator::{ChatMessage, ChatModel, OpenAiChat, Role};
pub use ingest::{parse_whiskies, WhiskyApiClient};
pub use knowledge::{
    BuildOutcome, Document, FusedContext, FusedDocument, FusionWeights, HybridRetriever,
    LexicalIndex, RankedResult, RecordStore, Retriever, SemanticIndex, WhiskyRecord,
};
