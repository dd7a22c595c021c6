//! Chat 모듈 - 질문 1개 처리 (검색 → 프롬프트 → 답변 생성)
//!
//! [`Assistant::answer`]는 대화 기록을 건드리지 않습니다.
//! 기록은 [`run_turn`]이 답변 출력까지 성공한 뒤에만 추가합니다.

mod prompt;
mod session;

use std::io::Write;
use std::sync::Arc;

use tracing::Instrument;

use crate::error::{Error, Result};
use crate::generator::ChatModel;
use crate::knowledge::FusedContext;

pub use prompt::{compose, render_context, EMPTY_CONTEXT_MARKER, SYSTEM_TEMPLATE};
pub use session::{ConversationTurn, Session, TurnRole};

/// 모든 에러 메시지 뒤에 붙는 안내 문구
pub const COMMON_ERROR_MESSAGE: &str =
    "문제가 계속되면 관리자에게 문의해 주세요. (If the problem persists, please contact the administrator.)";

/// 턴 처리 결과
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    pub context: FusedContext,
}

/// 답변 생성기 (검색 결과 + 기록 → LLM)
pub struct Assistant {
    model: Arc<dyn ChatModel>,
}

impl Assistant {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// 질문 1개에 답변 (세션 기록은 읽기만 함)
    pub async fn answer(&self, session: &Session, question: &str) -> Result<TurnOutcome> {
        let retriever = session.retriever().ok_or_else(|| {
            Error::Bootstrap(anyhow::anyhow!("Retriever has not been initialized"))
        })?;

        let context = retriever.retrieve(question).await?;
        if let Some(degraded) = &context.degraded {
            tracing::warn!(
                "Answering with {} retriever unavailable: {}",
                degraded.failed,
                degraded.reason
            );
        }

        let messages = compose(&context, question, session.history());
        tracing::debug!(
            "Prompt: {} messages, {} context documents",
            messages.len(),
            context.len()
        );

        let answer = self
            .model
            .complete(&messages)
            .await
            .map_err(Error::Generation)?;

        Ok(TurnOutcome { answer, context })
    }
}

/// 질문 1개 처리: 답변 생성 → 출력 → 기록
///
/// 생성과 출력이 모두 성공해야 기록에 추가됩니다.
pub async fn run_turn<W: Write>(
    session: &mut Session,
    assistant: &Assistant,
    question: &str,
    out: &mut W,
) -> Result<TurnOutcome> {
    let span = tracing::info_span!("session", session_id = %session.id());

    async {
        let outcome = assistant.answer(session, question).await.map_err(|e| {
            tracing::error!("Failed to answer question: {}", e);
            e
        })?;

        render_answer(out, &outcome.answer).map_err(|e| {
            tracing::error!("Failed to display answer: {}", e);
            e
        })?;

        session.commit_turn(question, outcome.answer.clone());
        tracing::info!("Turn committed ({} turns in history)", session.history().len());
        Ok(outcome)
    }
    .instrument(span)
    .await
}

/// 답변 출력
pub fn render_answer<W: Write>(out: &mut W, answer: &str) -> Result<()> {
    writeln!(out, "{}", answer)
        .and_then(|_| out.flush())
        .map_err(Error::Display)
}

/// 사용자에게 보여줄 에러 메시지 (메시지 + 공통 안내)
pub fn build_error_message(message: &str) -> String {
    format!("{}\n{}", message, COMMON_ERROR_MESSAGE)
}

/// 에러 종류별 사용자 메시지
pub fn user_message(error: &Error) -> String {
    let message = match error {
        Error::Config(_) => "설정 파일을 확인해 주세요.",
        Error::Malformed(_) => "위스키 데이터 형식이 올바르지 않습니다.",
        Error::StoreUnavailable(_) => "위스키 데이터베이스에 접근할 수 없습니다.",
        Error::IngestUnavailable(_) => "위스키 데이터를 가져오지 못했습니다.",
        Error::IndexUnavailable { .. } => "검색 인덱스를 사용할 수 없습니다.",
        Error::Bootstrap(_) => "초기화에 실패했습니다.",
        Error::Generation(_) => "추천 답변 생성에 실패했습니다.",
        Error::Display(_) => "답변을 표시하지 못했습니다.",
    };
    build_error_message(message)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::error::RetrieverKind;
    use crate::generator::Role;
    use crate::knowledge::HybridRetriever;
    use crate::test_utils::{doc, FailingRetriever, ScriptedChat, StaticRetriever};

    fn retriever(lexical: Vec<crate::knowledge::Document>) -> HybridRetriever {
        HybridRetriever::new(
            Box::new(StaticRetriever::new(RetrieverKind::Lexical, lexical)),
            Box::new(StaticRetriever::new(RetrieverKind::Semantic, vec![])),
            &RetrievalConfig::default(),
        )
        .unwrap()
    }

    async fn session_with(retriever: HybridRetriever) -> Session {
        let mut session = Session::new();
        session.ensure_retriever(|| async { Ok(retriever) }).await.unwrap();
        session
    }

    /// 항상 실패하는 출력
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_turn_commits_history() {
        let model = Arc::new(ScriptedChat::replying("Try Ardbeg 10."));
        let assistant = Assistant::new(model.clone());
        let mut session = session_with(retriever(vec![doc(1, "Name: Ardbeg 10")])).await;

        let mut out = Vec::new();
        let outcome = run_turn(&mut session, &assistant, "Smoky?", &mut out)
            .await
            .unwrap();

        assert_eq!(outcome.answer, "Try Ardbeg 10.");
        assert_eq!(outcome.context.len(), 1);
        assert_eq!(String::from_utf8(out).unwrap(), "Try Ardbeg 10.\n");
        assert_eq!(
            session.history(),
            &[
                ConversationTurn::user("Smoky?"),
                ConversationTurn::assistant("Try Ardbeg 10.")
            ]
        );

        // 두 번째 턴은 이전 기록을 프롬프트에 포함
        run_turn(&mut session, &assistant, "Cheaper?", &mut Vec::new())
            .await
            .unwrap();
        let prompt = model.last_prompt().unwrap();
        let roles: Vec<Role> = prompt.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(session.history().len(), 4);
    }

    #[tokio::test]
    async fn test_generation_failure_does_not_commit() {
        let assistant = Assistant::new(Arc::new(ScriptedChat::failing()));
        let mut session = session_with(retriever(vec![doc(1, "Name: A")])).await;

        let mut out = Vec::new();
        let err = run_turn(&mut session, &assistant, "Smoky?", &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Generation(_)));
        assert!(session.history().is_empty());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_display_failure_does_not_commit() {
        let assistant = Assistant::new(Arc::new(ScriptedChat::replying("ok")));
        let mut session = session_with(retriever(vec![])).await;

        let err = run_turn(&mut session, &assistant, "Smoky?", &mut BrokenPipe)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Display(_)));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_empty_context_still_answers() {
        let model = Arc::new(ScriptedChat::replying("No records, but try a peated malt."));
        let assistant = Assistant::new(model.clone());
        let session = session_with(retriever(vec![])).await;

        let outcome = assistant.answer(&session, "Any rum?").await.unwrap();
        assert!(outcome.context.is_empty());

        let prompt = model.last_prompt().unwrap();
        assert!(prompt[0].content.contains(EMPTY_CONTEXT_MARKER));
        assert_eq!(prompt.last().unwrap().content, "Any rum?");
    }

    #[tokio::test]
    async fn test_degraded_retrieval_still_answers() {
        let retriever = HybridRetriever::new(
            Box::new(StaticRetriever::new(
                RetrieverKind::Lexical,
                vec![doc(1, "Name: A")],
            )),
            Box::new(FailingRetriever::new(RetrieverKind::Semantic)),
            &RetrievalConfig::default(),
        )
        .unwrap();
        let assistant = Assistant::new(Arc::new(ScriptedChat::replying("A")));
        let session = session_with(retriever).await;

        let outcome = assistant.answer(&session, "q").await.unwrap();
        assert!(outcome.context.is_degraded());
        assert_eq!(outcome.context.len(), 1);
    }

    #[tokio::test]
    async fn test_answer_without_retriever() {
        let model = Arc::new(ScriptedChat::replying("x"));
        let assistant = Assistant::new(model.clone());

        let err = assistant.answer(&Session::new(), "q").await.unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[test]
    fn test_build_error_message() {
        let msg = build_error_message("추천 답변 생성에 실패했습니다.");
        let lines: Vec<&str> = msg.lines().collect();
        assert_eq!(lines, vec!["추천 답변 생성에 실패했습니다.", COMMON_ERROR_MESSAGE]);

        let err = Error::Generation(anyhow::anyhow!("429"));
        assert!(user_message(&err).ends_with(COMMON_ERROR_MESSAGE));
    }
}
