//! 단어 분할 모듈
//!
//! 키워드 인덱스와 쿼리에 같은 분할 함수를 적용합니다.
//! 문자 n-gram이 아닌 단어 단위 토큰을 만듭니다.
//!
//! 기본 구현 [`IpadicSegmenter`]는 lindera + 내장 IPADIC 사전으로 형태소 분석합니다.
//! 복합어도 단어 단위로 나뉩니다 (白州蒸留所 → 白州 / 蒸留 / 所).
//!
//! 사전을 로드할 수 없으면 [`ScriptSegmenter`]로 대체합니다.
//! Unicode 문자 체계(script) 경계로만 나눕니다:
//! - 한자 연속 구간 (蒸溜所, 熟成)
//! - 히라가나 연속 구간 (조사/어미: の, が, ような)
//! - 가타카나 + 장음 기호 구간 (スモーキー, ウイスキー)
//! - 그 외 문자/숫자 구간 (islay, 16) - 소문자로 정규화
//!
//! ref: https://github.com/lindera/lindera

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use lindera::{DictionaryConfig, DictionaryKind, Mode, Tokenizer, TokenizerConfig};
use regex::Regex;

/// 문자 체계별 토큰 패턴
///
/// 마지막 구간은 한자/가나를 제외한 문자+숫자입니다.
const SEGMENT_PATTERN: &str = r"\p{Han}+|\p{Hiragana}+|[\p{Katakana}\x{30FC}\x{FF70}]+|[[\p{L}\p{N}]--[\p{Han}\p{Hiragana}\p{Katakana}\x{30FC}\x{FF70}]]+";

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SEGMENT_PATTERN).expect("segment pattern is a valid regex"))
}

// ============================================================================
// Segmenter Trait
// ============================================================================

/// 단어 분할 전략 트레이트
pub trait Segmenter: Send + Sync {
    /// 텍스트를 단어 단위로 분할 (중복 포함, 출현 순서)
    fn segment(&self, text: &str) -> Vec<String>;

    /// 분할기 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// ScriptSegmenter
// ============================================================================

/// 문자 체계 경계 기반 분할기
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptSegmenter;

impl Segmenter for ScriptSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        segment_regex()
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }

    fn name(&self) -> &'static str {
        "script"
    }
}

// ============================================================================
// IpadicSegmenter
// ============================================================================

/// IPADIC 형태소 분석 기반 분할기
///
/// 형태소 표층형을 소문자로 정규화하고 공백/기호 토큰은 버립니다.
#[derive(Clone)]
pub struct IpadicSegmenter {
    tokenizer: Arc<Tokenizer>,
}

impl IpadicSegmenter {
    /// 내장 IPADIC 사전 로드 (프로세스당 한 번)
    pub fn new() -> anyhow::Result<Self> {
        static TOKENIZER: OnceLock<std::result::Result<Arc<Tokenizer>, String>> = OnceLock::new();

        TOKENIZER
            .get_or_init(load_ipadic)
            .clone()
            .map(|tokenizer| Self { tokenizer })
            .map_err(|e| anyhow::anyhow!("Failed to load IPADIC dictionary: {}", e))
    }
}

fn load_ipadic() -> std::result::Result<Arc<Tokenizer>, String> {
    let config = TokenizerConfig {
        dictionary: DictionaryConfig {
            kind: Some(DictionaryKind::IPADIC),
            path: None,
        },
        user_dictionary: None,
        mode: Mode::Normal,
    };

    Tokenizer::from_config(config)
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

impl Segmenter for IpadicSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        match self.tokenizer.tokenize(text) {
            Ok(tokens) => tokens
                .iter()
                .map(|token| token.text.trim().to_lowercase())
                .filter(|token| token.chars().any(char::is_alphanumeric))
                .collect(),
            Err(e) => {
                tracing::warn!("Morphological analysis failed, using script runs: {}", e);
                ScriptSegmenter.segment(text)
            }
        }
    }

    fn name(&self) -> &'static str {
        "ipadic"
    }
}

/// 기본 분할기 생성 (IPADIC, 로드 실패 시 문자 체계 분할)
pub fn default_segmenter() -> Box<dyn Segmenter> {
    match IpadicSegmenter::new() {
        Ok(segmenter) => Box::new(segmenter),
        Err(e) => {
            tracing::warn!("{}; falling back to script segmenter", e);
            Box::new(ScriptSegmenter)
        }
    }
}

/// 분할 후 중복 제거 (첫 출현 순서 유지)
///
/// 문서 안에서 여러 번 나온 토큰도 한 번만 셉니다.
pub fn tokenize(segmenter: &dyn Segmenter, text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    segmenter
        .segment(text)
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_latin() {
        let tokens = ScriptSegmenter.segment("Name: Lagavulin 16, Islay single-malt!");
        assert_eq!(tokens, vec!["name", "lagavulin", "16", "islay", "single", "malt"]);
    }

    #[test]
    fn test_segment_japanese_script_runs() {
        let tokens = ScriptSegmenter.segment("スモーキーなウイスキーを探しています");
        assert_eq!(tokens, vec!["スモーキー", "な", "ウイスキー", "を", "探", "しています"]);
    }

    #[test]
    fn test_segment_mixed_scripts() {
        let tokens = ScriptSegmenter.segment("Islay産の12年");
        assert_eq!(tokens, vec!["islay", "産", "の", "12", "年"]);
    }

    #[test]
    fn test_segment_empty_and_punctuation() {
        assert!(ScriptSegmenter.segment("").is_empty());
        assert!(ScriptSegmenter.segment("  ... !!! 、。").is_empty());
    }

    #[test]
    fn test_tokenize_dedup_keeps_first_order() {
        let tokens = tokenize(&ScriptSegmenter, "peat smoke PEAT sherry smoke");
        assert_eq!(tokens, vec!["peat", "smoke", "sherry"]);
    }

    #[test]
    fn test_default_segmenter() {
        assert_eq!(default_segmenter().name(), "ipadic");
    }

    #[test]
    fn test_ipadic_splits_compound_nouns() {
        let segmenter = IpadicSegmenter::new().unwrap();

        let tokens = segmenter.segment("白州蒸留所");
        assert!(tokens.len() > 1, "compound kept whole: {:?}", tokens);
        assert!(tokens.contains(&"白州".to_string()));
    }

    #[test]
    fn test_ipadic_splits_inflected_hiragana() {
        let segmenter = IpadicSegmenter::new().unwrap();

        let tokens = segmenter.segment("すっきりした味わい");
        assert!(tokens.contains(&"すっきり".to_string()));
        assert!(!tokens.contains(&"すっきりした".to_string()));
    }

    #[test]
    fn test_ipadic_latin_and_punctuation() {
        let segmenter = IpadicSegmenter::new().unwrap();

        let tokens = segmenter.segment("Name: Lagavulin 16, Islay!");
        assert!(tokens.contains(&"lagavulin".to_string()));
        assert!(tokens.contains(&"islay".to_string()));
        assert!(tokens.contains(&"16".to_string()));
        assert!(tokens.iter().all(|t| t.chars().any(char::is_alphanumeric)));
        assert!(segmenter.segment("  、。 !!").is_empty());
    }
}
