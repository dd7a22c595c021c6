//! Record Store - rusqlite 기반 위스키 레코드 저장소
//!
//! 위스키 API에서 수집한 레코드를 id 기준으로 저장합니다 (upsert).
//! 저장 위치: ~/.whisky-rag/whisky.db

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// DB 파일 이름
pub const DB_FILE_NAME: &str = "whisky.db";

// ============================================================================
// Types
// ============================================================================

/// 위스키 레코드 (제품 1개 = 1행)
///
/// `id` 외의 모든 필드는 선택값입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhiskyRecord {
    pub id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub lang: Option<String>,
    pub published: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub foto_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub whisky_type: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub distillery: Option<String>,
    pub bottler: Option<String>,
    /// 숙성 연수
    pub age: Option<i64>,
    /// 알코올 도수 (%)
    pub abv: Option<f64>,
    pub price: Option<f64>,
    pub nose: Option<String>,
    pub palate: Option<String>,
    pub finish: Option<String>,
    pub conclusion: Option<String>,
    pub rating_marcel: Option<i64>,
    pub rating_sascha: Option<i64>,
    /// 종합 평점
    pub rating_average: Option<i64>,
    pub rating_text: Option<String>,
    /// 가성비 점수
    pub value_for_money: Option<i64>,
    pub value_for_money_text: Option<String>,
}

impl WhiskyRecord {
    /// id만 가진 빈 레코드
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub record_count: usize,
    pub db_path: PathBuf,
}

const COLUMNS: &str = "id, name, description, url, lang, published, author, image_url, \
     foto_url, affiliate_url, type, country, region, distillery, bottler, age, abv, price, \
     nose, palate, finish, conclusion, rating_marcel, rating_sascha, rating_average, \
     rating_text, value_for_money, value_for_money_text";

// ============================================================================
// RecordStore
// ============================================================================

/// Record Store - 동기 위스키 레코드 저장소
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl RecordStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")
                    .map_err(Error::StoreUnavailable)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")
        .map_err(Error::StoreUnavailable)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 데이터 디렉토리에서 열기 (<data_dir>/whisky.db)
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open(&data_dir.join(DB_FILE_NAME))
    }

    /// 저장소 초기화 여부 (DB 파일과 whisky 테이블이 모두 존재)
    pub fn exists(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .context("Failed to open SQLite database")
            .map_err(Error::StoreUnavailable)?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'whisky'",
            [],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::StoreUnavailable(anyhow::anyhow!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS whisky (
                id INTEGER PRIMARY KEY,
                name TEXT,
                description TEXT,
                url TEXT,
                lang TEXT,
                published TEXT,
                author TEXT,
                image_url TEXT,
                foto_url TEXT,
                affiliate_url TEXT,
                type TEXT,
                country TEXT,
                region TEXT,
                distillery TEXT,
                bottler TEXT,
                age INTEGER,
                abv REAL,
                price REAL,
                nose TEXT,
                palate TEXT,
                finish TEXT,
                conclusion TEXT,
                rating_marcel INTEGER,
                rating_sascha INTEGER,
                rating_average INTEGER,
                rating_text TEXT,
                value_for_money INTEGER,
                value_for_money_text TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create whisky table")
        .map_err(Error::StoreUnavailable)?;

        tracing::debug!("Record store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 레코드 upsert (id가 같으면 교체)
    ///
    /// 하나의 트랜잭션으로 처리합니다. 같은 배치를 여러 번 적용해도 결과는 동일합니다.
    pub fn upsert(&self, records: &[WhiskyRecord]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO whisky ({}, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)",
                COLUMNS
            ))?;

            for r in records {
                stmt.execute(params![
                    r.id,
                    r.name,
                    r.description,
                    r.url,
                    r.lang,
                    r.published,
                    r.author,
                    r.image_url,
                    r.foto_url,
                    r.affiliate_url,
                    r.whisky_type,
                    r.country,
                    r.region,
                    r.distillery,
                    r.bottler,
                    r.age,
                    r.abv,
                    r.price,
                    r.nose,
                    r.palate,
                    r.finish,
                    r.conclusion,
                    r.rating_marcel,
                    r.rating_sascha,
                    r.rating_average,
                    r.rating_text,
                    r.value_for_money,
                    r.value_for_money_text,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        tracing::info!("Upserted {} whisky records", records.len());

        Ok(records.len())
    }

    /// 아직 저장되지 않은 id의 레코드만 추가
    ///
    /// # Returns
    /// 새로 추가된 레코드 수
    pub fn insert_new(&self, records: &[WhiskyRecord]) -> Result<usize> {
        let existing = self.existing_ids()?;
        let new_records: Vec<WhiskyRecord> = records
            .iter()
            .filter(|r| !existing.contains(&r.id))
            .cloned()
            .collect();

        if new_records.is_empty() {
            tracing::info!("No new whisky records to insert");
            return Ok(0);
        }

        self.upsert(&new_records)
    }

    /// 저장된 id 목록
    pub fn existing_ids(&self) -> Result<BTreeSet<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM whisky")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<BTreeSet<i64>>>()
            .map_err(row_error)?;
        Ok(ids)
    }

    /// id로 레코드 조회
    pub fn get(&self, id: i64) -> Result<Option<WhiskyRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM whisky WHERE id = ?1", COLUMNS))?;

        let mut rows = stmt.query_map(params![id], record_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(row_error)?)),
            None => Ok(None),
        }
    }

    /// 전체 레코드 (id 오름차순)
    pub fn all(&self) -> Result<Vec<WhiskyRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM whisky ORDER BY id ASC", COLUMNS))?;

        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(row_error)?;

        Ok(records)
    }

    /// 레코드 목록 (id 오름차순, 최대 limit개)
    pub fn list(&self, limit: usize) -> Result<Vec<WhiskyRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM whisky ORDER BY id ASC LIMIT ?1",
            COLUMNS
        ))?;

        let records = stmt
            .query_map(params![limit as i64], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(row_error)?;

        Ok(records)
    }

    /// 레코드 수
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM whisky", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            record_count: self.count()?,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<WhiskyRecord> {
    Ok(WhiskyRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        url: row.get(3)?,
        lang: row.get(4)?,
        published: row.get(5)?,
        author: row.get(6)?,
        image_url: row.get(7)?,
        foto_url: row.get(8)?,
        affiliate_url: row.get(9)?,
        whisky_type: row.get(10)?,
        country: row.get(11)?,
        region: row.get(12)?,
        distillery: row.get(13)?,
        bottler: row.get(14)?,
        age: row.get(15)?,
        abv: row.get(16)?,
        price: row.get(17)?,
        nose: row.get(18)?,
        palate: row.get(19)?,
        finish: row.get(20)?,
        conclusion: row.get(21)?,
        rating_marcel: row.get(22)?,
        rating_sascha: row.get(23)?,
        rating_average: row.get(24)?,
        rating_text: row.get(25)?,
        value_for_money: row.get(26)?,
        value_for_money_text: row.get(27)?,
    })
}

/// 행 디코딩 에러는 Malformed, 그 외는 StoreUnavailable
fn row_error(e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::InvalidColumnType(idx, ref name, ty) => Error::Malformed(format!(
            "whisky row column {} ({}) has unexpected type {}",
            idx, name, ty
        )),
        rusqlite::Error::FromSqlConversionFailure(idx, ty, ref source) => Error::Malformed(
            format!("whisky row column {} ({}) could not be decoded: {}", idx, ty, source),
        ),
        rusqlite::Error::IntegralValueOutOfRange(idx, value) => Error::Malformed(format!(
            "whisky row column {} value {} out of range",
            idx, value
        )),
        other => Error::from(other),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open_in(dir.path()).unwrap();
        (dir, store)
    }

    fn sample(id: i64, name: &str) -> WhiskyRecord {
        WhiskyRecord {
            name: Some(name.to_string()),
            distillery: Some("Lagavulin".to_string()),
            age: Some(16),
            abv: Some(43.0),
            nose: Some("peat smoke, iodine".to_string()),
            ..WhiskyRecord::new(id)
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let (_dir, store) = create_test_store();

        let inserted = store.upsert(&[sample(1, "Lagavulin 16")]).unwrap();
        assert_eq!(inserted, 1);

        let record = store.get(1).unwrap().unwrap();
        assert_eq!(record.name.as_deref(), Some("Lagavulin 16"));
        assert_eq!(record.age, Some(16));
        assert_eq!(record.abv, Some(43.0));
        assert_eq!(record.region, None);

        assert!(store.get(999).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing_id() {
        let (_dir, store) = create_test_store();

        store.upsert(&[sample(1, "Old name")]).unwrap();
        store.upsert(&[sample(1, "New name")]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(1).unwrap().unwrap().name.as_deref(), Some("New name"));
    }

    #[test]
    fn test_upsert_idempotent() {
        let (_dir, store) = create_test_store();
        let batch = vec![sample(3, "C"), sample(1, "A"), sample(2, "B")];

        store.upsert(&batch).unwrap();
        let once = store.all().unwrap();

        store.upsert(&batch).unwrap();
        let twice = store.all().unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 3);
    }

    #[test]
    fn test_all_sorted_by_id() {
        let (_dir, store) = create_test_store();
        store
            .upsert(&[sample(30, "C"), sample(10, "A"), sample(20, "B")])
            .unwrap();

        let ids: Vec<i64> = store.all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);

        let ids: Vec<i64> = store.list(2).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 20]);
    }

    #[test]
    fn test_insert_new_skips_existing() {
        let (_dir, store) = create_test_store();
        store.upsert(&[sample(1, "Original")]).unwrap();

        let inserted = store
            .insert_new(&[sample(1, "Changed"), sample(2, "Second")])
            .unwrap();
        assert_eq!(inserted, 1);

        assert_eq!(store.get(1).unwrap().unwrap().name.as_deref(), Some("Original"));
        assert_eq!(store.existing_ids().unwrap().into_iter().collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(store.insert_new(&[sample(2, "Again")]).unwrap(), 0);
    }

    #[test]
    fn test_exists() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join(DB_FILE_NAME);

        assert!(!RecordStore::exists(&db_path).unwrap());

        let _store = RecordStore::open(&db_path).unwrap();
        assert!(RecordStore::exists(&db_path).unwrap());
    }

    #[test]
    fn test_malformed_row() {
        let (_dir, store) = create_test_store();
        store.upsert(&[sample(1, "A")]).unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute("UPDATE whisky SET age = 'sixteen' WHERE id = 1", [])
                .unwrap();
        }

        let err = store.all().unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();
        store.upsert(&[sample(1, "A"), sample(2, "B")]).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.record_count, 2);
        assert!(stats.db_path.ends_with(DB_FILE_NAME));
    }
}
