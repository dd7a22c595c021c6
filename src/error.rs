//! 에러 타입
//!
//! 파이프라인 각 단계(저장소, 인덱스, 생성기)는 이 타입으로 실패를 반환합니다.
//! "사용 불가"(외부 자원 문제)와 "잘못된 입력"을 구분합니다.
//! 사용자에게 보여줄 메시지로 바꾸는 곳은 최상위 핸들러(CLI) 한 곳뿐입니다.

use std::fmt;

/// 리트리버 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrieverKind {
    /// 형태소 분할 + BM25 키워드 검색
    Lexical,
    /// 임베딩 벡터 유사도 검색
    Semantic,
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrieverKind::Lexical => write!(f, "lexical"),
            RetrieverKind::Semantic => write!(f, "semantic"),
        }
    }
}

/// whisky-rag 에러
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 설정 값 오류
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 수집 페이로드 또는 저장된 행의 형식 오류
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// SQLite 레코드 저장소 접근 실패
    #[error("Record store unavailable: {0:#}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// 위스키 데이터 API 접근 실패
    #[error("Whisky data source unavailable: {0:#}")]
    IngestUnavailable(#[source] anyhow::Error),

    /// 검색 인덱스 사용 불가
    #[error("{kind} index unavailable: {source:#}")]
    IndexUnavailable {
        kind: RetrieverKind,
        #[source]
        source: anyhow::Error,
    },

    /// 부트스트랩(수집/인덱스 빌드) 실패
    #[error("Bootstrap failed: {0:#}")]
    Bootstrap(#[source] anyhow::Error),

    /// 답변 생성 실패
    #[error("Answer generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),

    /// 답변 출력 실패
    #[error("Failed to display answer: {0}")]
    Display(#[source] std::io::Error),
}

impl Error {
    /// 인덱스 사용 불가 에러 생성
    pub fn index_unavailable(kind: RetrieverKind, source: impl Into<anyhow::Error>) -> Self {
        Error::IndexUnavailable {
            kind,
            source: source.into(),
        }
    }

    /// 외부 자원(저장소, API, 인덱스, 생성기) 문제인지 여부
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_)
                | Error::IngestUnavailable(_)
                | Error::IndexUnavailable { .. }
                | Error::Bootstrap(_)
                | Error::Generation(_)
        )
    }

    /// 입력 형식 문제인지 여부
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Malformed(_) | Error::Config(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::StoreUnavailable(e.into())
    }
}

/// whisky-rag Result
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Malformed("missing id".into()).is_malformed());
        assert!(!Error::Malformed("missing id".into()).is_unavailable());

        let err = Error::index_unavailable(RetrieverKind::Semantic, anyhow::anyhow!("timeout"));
        assert!(err.is_unavailable());
        assert!(err.to_string().starts_with("semantic index unavailable"));
    }

    #[test]
    fn test_rusqlite_error_is_unavailable() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(err.is_unavailable());
    }
}
