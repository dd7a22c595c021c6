//! Ingest 모듈 - 위스키 데이터 API 수집
//!
//! API는 위스키 객체의 JSON 배열을 반환합니다.
//! 객체는 최상위 필드 + `metadata` / `tasting_notes` / `rating` 그룹으로 나뉘며,
//! 숫자 필드는 숫자 또는 숫자 문자열로 올 수 있습니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let client = WhiskyApiClient::new(&config.ingest)?;
//! let report = ingest(&store, &client, IngestMode::Upsert).await?;
//! ```

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::knowledge::{RecordStore, WhiskyRecord};

// ============================================================================
// Raw API model
// ============================================================================

/// 숫자/문자열 어느 쪽으로든 올 수 있는 값
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Loose {
    Int(i64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl Loose {
    fn text(value: Option<Loose>) -> Option<String> {
        match value? {
            Loose::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Loose::Int(i) => Some(i.to_string()),
            Loose::Float(f) => Some(f.to_string()),
            Loose::Other(_) => None,
        }
    }

    fn float(value: Option<Loose>) -> Option<f64> {
        match value? {
            Loose::Int(i) => Some(i as f64),
            Loose::Float(f) => Some(f),
            Loose::Text(s) => parse_number(&s),
            Loose::Other(_) => None,
        }
    }

    fn int(value: Option<Loose>) -> Option<i64> {
        match value? {
            Loose::Int(i) => Some(i),
            Loose::Float(f) => Some(f.round() as i64),
            Loose::Text(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| parse_number(&s).map(|f| f.round() as i64)),
            Loose::Other(_) => None,
        }
    }
}

/// 숫자 문자열 파싱 ("46", "46.0", "46,0", "49.90 €")
fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// API 위스키 객체
#[derive(Debug, Clone, Deserialize)]
pub struct RawWhisky {
    pub id: i64,
    #[serde(default)]
    pub name: Option<Loose>,
    #[serde(default)]
    pub description: Option<Loose>,
    #[serde(default)]
    pub url: Option<Loose>,
    #[serde(default)]
    pub lang: Option<Loose>,
    #[serde(default)]
    pub published: Option<Loose>,
    #[serde(default)]
    pub author: Option<Loose>,
    #[serde(default)]
    pub image_url: Option<Loose>,
    #[serde(default)]
    pub foto_url: Option<Loose>,
    #[serde(default)]
    pub affiliate_url: Option<Loose>,
    #[serde(default)]
    pub metadata: Option<RawMetadata>,
    #[serde(default)]
    pub tasting_notes: Option<RawTastingNotes>,
    #[serde(default)]
    pub rating: Option<RawRating>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawMetadata {
    #[serde(rename = "type")]
    pub whisky_type: Option<Loose>,
    pub country: Option<Loose>,
    pub region: Option<Loose>,
    pub distillery: Option<Loose>,
    pub bottler: Option<Loose>,
    pub age: Option<Loose>,
    pub abv: Option<Loose>,
    pub price: Option<Loose>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTastingNotes {
    pub nose: Option<Loose>,
    pub palate: Option<Loose>,
    pub finish: Option<Loose>,
    pub conclusion: Option<Loose>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRating {
    pub marcel: Option<Loose>,
    pub sascha: Option<Loose>,
    pub average: Option<Loose>,
    pub rating_text: Option<Loose>,
    pub value_for_money: Option<Loose>,
    pub value_for_money_text: Option<Loose>,
}

impl From<RawWhisky> for WhiskyRecord {
    fn from(raw: RawWhisky) -> Self {
        let metadata = raw.metadata.unwrap_or_default();
        let tasting = raw.tasting_notes.unwrap_or_default();
        let rating = raw.rating.unwrap_or_default();

        WhiskyRecord {
            id: raw.id,
            name: Loose::text(raw.name),
            description: Loose::text(raw.description),
            url: Loose::text(raw.url),
            lang: Loose::text(raw.lang),
            published: Loose::text(raw.published),
            author: Loose::text(raw.author),
            image_url: Loose::text(raw.image_url),
            foto_url: Loose::text(raw.foto_url),
            affiliate_url: Loose::text(raw.affiliate_url),
            whisky_type: Loose::text(metadata.whisky_type),
            country: Loose::text(metadata.country),
            region: Loose::text(metadata.region),
            distillery: Loose::text(metadata.distillery),
            bottler: Loose::text(metadata.bottler),
            age: Loose::int(metadata.age),
            abv: Loose::float(metadata.abv),
            price: Loose::float(metadata.price),
            nose: Loose::text(tasting.nose),
            palate: Loose::text(tasting.palate),
            finish: Loose::text(tasting.finish),
            conclusion: Loose::text(tasting.conclusion),
            rating_marcel: Loose::int(rating.marcel),
            rating_sascha: Loose::int(rating.sascha),
            rating_average: Loose::int(rating.average),
            rating_text: Loose::text(rating.rating_text),
            value_for_money: Loose::int(rating.value_for_money),
            value_for_money_text: Loose::text(rating.value_for_money_text),
        }
    }
}

/// API 응답 본문 파싱
///
/// 배열이 아니거나 정수 `id`가 없는 원소가 있으면 전체를 거부합니다.
pub fn parse_whiskies(json: &str) -> Result<Vec<WhiskyRecord>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::Malformed(format!("Response is not valid JSON: {}", e)))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        other => {
            return Err(Error::Malformed(format!(
                "Expected a JSON array of whiskies, got {}",
                json_kind(&other)
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<RawWhisky>(item)
                .map(WhiskyRecord::from)
                .map_err(|e| Error::Malformed(format!("Whisky at index {}: {}", i, e)))
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ============================================================================
// API client
// ============================================================================

/// 위스키 데이터 API 클라이언트
#[derive(Debug, Clone)]
pub struct WhiskyApiClient {
    client: reqwest::Client,
    url: String,
}

impl WhiskyApiClient {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let url = config.api_url.clone().ok_or_else(|| {
            Error::Config("ingest.api_url is not set; add it to config.toml".into())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("whisky-rag/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")
            .map_err(Error::IngestUnavailable)?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 전체 위스키 목록 가져오기
    pub async fn fetch(&self) -> Result<Vec<WhiskyRecord>> {
        tracing::info!("Fetching whiskies from {}", self.url);

        let body = self.fetch_body().await.map_err(Error::IngestUnavailable)?;
        let records = parse_whiskies(&body)?;

        tracing::info!("Fetched {} whiskies", records.len());
        Ok(records)
    }

    async fn fetch_body(&self) -> anyhow::Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to reach whisky API")?
            .error_for_status()
            .context("Whisky API returned an error status")?;

        response
            .text()
            .await
            .context("Failed to read whisky API response")
    }
}

// ============================================================================
// Ingest
// ============================================================================

/// 저장 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// 전체 upsert (기존 레코드 갱신)
    Upsert,
    /// 저장소에 없는 id만 추가
    OnlyNew,
}

/// 수집 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub written: usize,
}

/// API에서 가져와 저장소에 기록
pub async fn ingest(
    store: &RecordStore,
    client: &WhiskyApiClient,
    mode: IngestMode,
) -> Result<IngestReport> {
    let records = client.fetch().await?;
    store_records(store, &records, mode)
}

/// 레코드를 저장 방식에 맞게 기록
pub fn store_records(
    store: &RecordStore,
    records: &[WhiskyRecord],
    mode: IngestMode,
) -> Result<IngestReport> {
    let written = match mode {
        IngestMode::Upsert => store.upsert(records)?,
        IngestMode::OnlyNew => store.insert_new(records)?,
    };

    tracing::info!(
        "Stored {} of {} whiskies ({:?})",
        written,
        records.len(),
        mode
    );

    Ok(IngestReport {
        fetched: records.len(),
        written,
    })
}

// ============================================================================
// Tests
// ============================================================================
