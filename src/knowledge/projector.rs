//! Document Projector - 위스키 레코드를 검색용 텍스트 문서로 변환
//!
//! 키워드 인덱스와 임베딩 모델이 같은 텍스트를 보도록
//! 고정된 필드 순서와 `"Label: value"` 형식을 사용합니다.

use std::fmt::Display;

use super::store::WhiskyRecord;

/// 검색용 문서 (레코드 1개 = 문서 1개)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// 원본 레코드 id
    pub record_id: i64,
    /// 평탄화된 본문
    pub content: String,
}

/// 필드 라벨 (출력 순서)
pub const FIELD_LABELS: [&str; 17] = [
    "Name",
    "Published",
    "Image URL",
    "Type",
    "Country",
    "Region",
    "Distillery",
    "Bottler",
    "Age",
    "ABV",
    "Price",
    "Nose",
    "Palate",
    "Finish",
    "Conclusion",
    "Rating",
    "Value for Money",
];

/// 레코드 1개를 문서로 변환
///
/// 값이 없는 필드는 `"Label: "`로 출력됩니다.
pub fn project(record: &WhiskyRecord) -> Document {
    // 평점은 텍스트 우선, 없으면 점수
    let rating = text_or_number(&record.rating_text, record.rating_average);
    let value_for_money = text_or_number(&record.value_for_money_text, record.value_for_money);

    let values: [String; 17] = [
        text(&record.name),
        text(&record.published),
        text(&record.image_url),
        text(&record.whisky_type),
        text(&record.country),
        text(&record.region),
        text(&record.distillery),
        text(&record.bottler),
        number(record.age),
        number(record.abv),
        number(record.price),
        text(&record.nose),
        text(&record.palate),
        text(&record.finish),
        text(&record.conclusion),
        rating,
        value_for_money,
    ];

    let content = FIELD_LABELS
        .iter()
        .zip(values.iter())
        .map(|(label, value)| format!("{}: {}", label, value))
        .collect::<Vec<_>>()
        .join("\n");

    Document {
        record_id: record.id,
        content,
    }
}

/// 레코드 목록을 문서 목록으로 변환 (순서 유지)
pub fn project_all(records: &[WhiskyRecord]) -> Vec<Document> {
    records.iter().map(project).collect()
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn number<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn text_or_number(text_value: &Option<String>, number_value: Option<i64>) -> String {
    match text_value.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => number(number_value),
    }
}

// ============================================================================
// Tests
// ============================================================================
