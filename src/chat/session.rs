//! 대화 세션 - 세션 id, 대화 기록, 캐시된 검색기

use std::future::Future;

use crate::error::Result;
use crate::knowledge::HybridRetriever;

/// 대화 턴 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

/// 대화 턴 1개
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// 대화 세션
///
/// 기록은 추가만 가능하고, 지우려면 [`Session::reset`]으로 새 세션을 시작합니다.
pub struct Session {
    id: String,
    history: Vec<ConversationTurn>,
    retriever: Option<HybridRetriever>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: new_session_id(),
            history: Vec::new(),
            retriever: None,
        }
    }

    /// 세션 id (uuid v4, 하이픈 없는 hex)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// 새 세션 시작 (id 교체, 기록 삭제, 검색기는 유지)
    pub fn reset(&mut self) {
        let old = std::mem::replace(&mut self.id, new_session_id());
        self.history.clear();
        tracing::info!("Session {} reset to {}", old, self.id);
    }

    /// 성공한 턴 기록 (질문 → 답변 순)
    pub fn commit_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.history.push(ConversationTurn::user(question));
        self.history.push(ConversationTurn::assistant(answer));
    }

    pub fn retriever(&self) -> Option<&HybridRetriever> {
        self.retriever.as_ref()
    }

    /// 검색기가 없을 때만 `init`을 실행하여 캐시
    pub async fn ensure_retriever<F, Fut>(&mut self, init: F) -> Result<&HybridRetriever>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<HybridRetriever>>,
    {
        let retriever = match self.retriever.take() {
            Some(retriever) => retriever,
            None => init().await?,
        };
        Ok(&*self.retriever.insert(retriever))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ============================================================================
// Tests
// ============================================================================
