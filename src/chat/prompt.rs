//! Prompt Composer - 검색 컨텍스트 + 대화 기록 → 채팅 메시지 목록
//!
//! 메시지 순서:
//! 1. System: 지시문 템플릿 (`{context}`, `{question}` 치환)
//! 2. 대화 기록 (원래 순서, 원래 역할)
//! 3. User: 질문 원문
//!
//! 질문은 System 템플릿과 마지막 User 메시지에 두 번 들어갑니다.

use crate::generator::ChatMessage;
use crate::knowledge::FusedContext;

use super::session::{ConversationTurn, TurnRole};

/// 시스템 프롬프트 템플릿
pub const SYSTEM_TEMPLATE: &str = "\
You are a whisky sommelier who recommends whiskies to the user.
Answer the question using the whisky records in the context below.
Recommend concrete bottles from the context, and for each one explain why it fits,
citing its region, tasting notes, rating and price where they are available.
Do not invent records or details that are not in the context.
Answer in the same language as the question.

# Context
{context}

# Question
{question}";

/// 검색 결과가 없을 때 컨텍스트 자리에 들어가는 표시
pub const EMPTY_CONTEXT_MARKER: &str = "(no matching whisky records)";

/// 검색 결과가 없을 때 추가되는 지시
const EMPTY_CONTEXT_INSTRUCTION: &str = "\
No whisky record matched this question. Say so briefly, then answer from general \
whisky knowledge without naming specific records as if they came from the collection.";

/// 컨텍스트 블록 렌더링 (문서 사이 빈 줄)
pub fn render_context(context: &FusedContext) -> String {
    if context.is_empty() {
        return format!("{}\n\n{}", EMPTY_CONTEXT_MARKER, EMPTY_CONTEXT_INSTRUCTION);
    }

    context
        .documents
        .iter()
        .map(|d| d.document.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 프롬프트 메시지 목록 생성
pub fn compose(
    context: &FusedContext,
    question: &str,
    history: &[ConversationTurn],
) -> Vec<ChatMessage> {
    // 템플릿의 {context}가 {question}보다 앞에 있으므로 첫 번째만 치환
    let system = SYSTEM_TEMPLATE
        .replacen("{question}", question, 1)
        .replacen("{context}", &render_context(context), 1);

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));

    for turn in history {
        messages.push(match turn.role {
            TurnRole::User => ChatMessage::user(turn.content.clone()),
            TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
        });
    }

    messages.push(ChatMessage::user(question));
    messages
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrieverKind;
    use crate::generator::Role;
    use crate::knowledge::FusedDocument;
    use crate::test_utils::doc;

    fn context(contents: &[&str]) -> FusedContext {
        FusedContext {
            documents: contents
                .iter()
                .enumerate()
                .map(|(i, c)| FusedDocument {
                    document: doc(i as i64 + 1, c),
                    score: 0.01,
                    sources: vec![RetrieverKind::Lexical],
                })
                .collect(),
            degraded: None,
        }
    }

    #[test]
    fn test_message_order() {
        let history = vec![
            ConversationTurn::user("Something smoky?"),
            ConversationTurn::assistant("Try Laphroaig 10."),
        ];
        let messages = compose(&context(&["Name: Ardbeg 10"]), "Cheaper?", &history);

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages[1].content, "Something smoky?");
        assert_eq!(messages[2].content, "Try Laphroaig 10.");
        assert_eq!(messages[3].content, "Cheaper?");
    }

    #[test]
    fn test_odd_length_history_reproduced_exactly() {
        let history = vec![
            ConversationTurn::user("Something smoky?"),
            ConversationTurn::assistant("Try Laphroaig 10."),
            ConversationTurn::user("Anything from Japan?"),
        ];
        let messages = compose(&context(&["Name: 白州 12"]), "Under 10000 yen?", &history);

        let turns: Vec<(Role, &str)> = messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            turns[1..],
            [
                (Role::User, "Something smoky?"),
                (Role::Assistant, "Try Laphroaig 10."),
                (Role::User, "Anything from Japan?"),
                (Role::User, "Under 10000 yen?"),
            ]
        );
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn test_system_contains_context_and_question() {
        let messages = compose(&context(&["Name: A", "Name: B"]), "Peaty?", &[]);
        let system = &messages[0].content;

        assert!(system.contains("Name: A\n\nName: B"));
        assert!(system.contains("# Question\nPeaty?"));
        assert!(!system.contains("{context}"));
        assert!(!system.contains("{question}"));
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_empty_context_marker() {
        let messages = compose(&FusedContext::default(), "Any rum?", &[]);
        let system = &messages[0].content;

        assert!(system.contains(EMPTY_CONTEXT_MARKER));
        assert!(system.contains("general"));
        assert_eq!(messages.last().unwrap().content, "Any rum?");
    }

    #[test]
    fn test_braces_in_question_left_alone() {
        let messages = compose(&context(&["Name: A"]), "what is {context}?", &[]);
        assert!(messages[0].content.contains("# Question\nwhat is {context}?"));
        assert_eq!(messages[0].content.matches("Name: A").count(), 1);
    }
}
