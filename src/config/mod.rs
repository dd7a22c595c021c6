//! 설정 모듈
//!
//! `config.toml`(선택)에서 검색/임베딩/생성/수집 설정을 읽습니다.
//! 모든 항목에 기본값이 있으므로 파일이 없어도 동작합니다.
//! API 키는 설정 파일이 아닌 환경변수(`OPENAI_API_KEY`)에서만 읽습니다.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// 데이터 디렉토리 환경변수
pub const DATA_DIR_ENV: &str = "WHISKY_RAG_DATA_DIR";

/// 설정 파일 이름
pub const CONFIG_FILE_NAME: &str = "config.toml";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.whisky-rag/)
///
/// `WHISKY_RAG_DATA_DIR`가 설정되어 있으면 그 경로를 사용합니다.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".whisky-rag")
}

// ============================================================================
// Config
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generator: GeneratorConfig,
    pub ingest: IngestConfig,
}

/// 하이브리드 검색 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 리트리버별 후보 수이자 최종 컨텍스트 문서 수
    pub top_k: usize,
    /// 키워드(BM25) 리트리버 가중치
    pub lexical_weight: f32,
    /// 벡터 리트리버 가중치
    pub semantic_weight: f32,
    /// RRF 상수 c (score = w / (c + rank))
    pub rrf_constant: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            lexical_weight: 0.5,
            semantic_weight: 0.5,
            rrf_constant: 60.0,
        }
    }
}

/// 임베딩 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            batch_size: 64,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

/// 답변 생성 모델 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.5,
            max_tokens: 1024,
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

/// 위스키 데이터 수집 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 위스키 목록 JSON을 반환하는 API 주소 (미설정 시 수집 불가)
    pub api_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// TOML 문자열에서 파싱 (검증 포함)
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(s).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 파일에서 로드
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 설정 파일 탐색 후 로드
    ///
    /// 우선순위: 명시한 경로 > `<data_dir>/config.toml` > 기본값
    pub fn resolve(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = data_dir.join(CONFIG_FILE_NAME);
        if default_path.exists() {
            tracing::debug!("Loading config from {:?}", default_path);
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be at least 1".into()));
        }
        if !(r.lexical_weight >= 0.0 && r.semantic_weight >= 0.0) {
            return Err(Error::Config("retrieval weights must be non-negative".into()));
        }
        if r.lexical_weight + r.semantic_weight <= 0.0 {
            return Err(Error::Config("retrieval weights must not both be zero".into()));
        }
        if !(r.rrf_constant >= 0.0) {
            return Err(Error::Config("retrieval.rrf_constant must be non-negative".into()));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be at least 1".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be at least 1".into()));
        }

        if let Some(ref api_url) = self.ingest.api_url {
            let parsed = url::Url::parse(api_url)
                .map_err(|e| Error::Config(format!("ingest.api_url is not a valid URL: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "ingest.api_url must be http(s), got {}",
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
