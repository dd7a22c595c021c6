//! Lexical Index - 단어 분할 + FTS5 BM25 키워드 검색
//!
//! 문서마다 분할/중복 제거한 토큰 집합을 인메모리 SQLite FTS5 테이블에 적재하고
//! `bm25()`로 순위를 매깁니다. 프로세스마다 레코드 저장소에서 다시 빌드합니다.
//!
//! ref: https://www.sqlite.org/fts5.html#the_bm25_function

use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::error::{Error, Result, RetrieverKind};

use super::projector::Document;
use super::retriever::{RankedResult, Retriever};
use super::segmenter::{default_segmenter, tokenize, Segmenter};

/// 키워드 검색기
///
/// rowid = 원본 문서 순서 + 1
pub struct LexicalIndex {
    conn: Mutex<Connection>,
    documents: Vec<Document>,
    segmenter: Box<dyn Segmenter>,
}

impl LexicalIndex {
    /// 기본 분할기로 빌드
    pub fn build(documents: Vec<Document>) -> Result<Self> {
        Self::with_segmenter(documents, default_segmenter())
    }

    /// 분할기를 지정하여 빌드
    pub fn with_segmenter(documents: Vec<Document>, segmenter: Box<dyn Segmenter>) -> Result<Self> {
        Self::create(&documents, segmenter.as_ref())
            .map(|conn| Self {
                conn: Mutex::new(conn),
                documents,
                segmenter,
            })
            .map_err(|e| Error::index_unavailable(RetrieverKind::Lexical, e))
    }

    fn create(documents: &[Document], segmenter: &dyn Segmenter) -> anyhow::Result<Connection> {
        let mut conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;

        // 토큰은 이미 분할되어 있으므로 unicode61은 공백 분리 + 소문자화만 담당
        conn.execute(
            "CREATE VIRTUAL TABLE lexical USING fts5(
                tokens,
                tokenize = 'unicode61 remove_diacritics 0'
            )",
            [],
        )
        .context("Failed to create FTS5 table (FTS5 not available?)")?;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO lexical(rowid, tokens) VALUES (?1, ?2)")?;
            for (i, doc) in documents.iter().enumerate() {
                let tokens = tokenize(segmenter, &doc.content).join(" ");
                stmt.execute(params![i as i64 + 1, tokens])
                    .with_context(|| format!("Failed to index document {}", doc.record_id))?;
            }
        }
        tx.commit()?;

        tracing::info!(
            "Built lexical index: {} documents (segmenter: {})",
            documents.len(),
            segmenter.name()
        );

        Ok(conn)
    }

    /// 인덱스된 문서 수
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// 빈 인덱스 여부
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            Error::index_unavailable(RetrieverKind::Lexical, anyhow::anyhow!("Lock error: {}", e))
        })
    }

    /// BM25 키워드 검색
    ///
    /// 동점은 원본 문서 순서로 정렬합니다. 인덱스를 변경하지 않습니다.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<RankedResult>> {
        let tokens = tokenize(self.segmenter.as_ref(), text);
        if tokens.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let match_expr = build_match_expr(&tokens);
        let conn = self.lock()?;

        let hits = Self::search(&conn, &match_expr, k)
            .map_err(|e| Error::index_unavailable(RetrieverKind::Lexical, e))?;

        let mut results = Vec::with_capacity(hits.len());
        for (rowid, bm25) in hits {
            let document = usize::try_from(rowid - 1)
                .ok()
                .and_then(|i| self.documents.get(i))
                .ok_or_else(|| {
                    Error::index_unavailable(
                        RetrieverKind::Lexical,
                        anyhow::anyhow!("FTS5 returned unknown rowid {}", rowid),
                    )
                })?;

            results.push(RankedResult {
                document: document.clone(),
                // FTS5 bm25()는 음수 (작을수록 좋음)
                score: -bm25 as f32,
                source: RetrieverKind::Lexical,
            });
        }

        tracing::debug!("Lexical query matched {} documents", results.len());
        Ok(results)
    }

    fn search(conn: &Connection, match_expr: &str, k: usize) -> anyhow::Result<Vec<(i64, f64)>> {
        let mut stmt = conn.prepare_cached(
            "SELECT rowid, bm25(lexical) FROM lexical
             WHERE lexical MATCH ?1
             ORDER BY bm25(lexical), rowid
             LIMIT ?2",
        )?;

        let hits = stmt
            .query_map(params![match_expr, k as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to execute FTS5 query")?;

        Ok(hits)
    }
}

#[async_trait]
impl Retriever for LexicalIndex {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RankedResult>> {
        self.query(query, k)
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Lexical
    }
}

/// 토큰 OR 매치식 생성 (각 토큰은 따옴표로 감쌈)
///
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn build_match_expr(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(record_id: i64, content: &str) -> Document {
        Document {
            record_id,
            content: content.to_string(),
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            doc(1, "Name: Glenlivet 12\nRegion: Speyside\nNose: apple, honey, floral"),
            doc(2, "Name: Laphroaig 10\nRegion: Islay\nNose: peaty, medicinal, smoke"),
            doc(3, "Name: Macallan 12\nRegion: Speyside\nNose: sherry, dried fruit"),
            doc(4, "Name: 白州 12年\nRegion: 山梨\nNose: スモーキー, 青りんご"),
        ]
    }

    #[test]
    fn test_exact_term_match() {
        let index = LexicalIndex::build(corpus()).unwrap();
        assert_eq!(index.len(), 4);

        let results = index.query("something peaty please", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.record_id, 2);
        assert_eq!(results[0].source, RetrieverKind::Lexical);
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_ranking_prefers_more_matching_terms() {
        let index = LexicalIndex::build(corpus()).unwrap();

        let results = index.query("speyside sherry", 5).unwrap();
        let ids: Vec<i64> = results.iter().map(|r| r.document.record_id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_ties_broken_by_document_order() {
        let docs = vec![doc(10, "islay malt"), doc(20, "islay malt"), doc(30, "islay malt")];
        let index = LexicalIndex::build(docs).unwrap();

        let ids: Vec<i64> = index
            .query("islay", 3)
            .unwrap()
            .iter()
            .map(|r| r.document.record_id)
            .collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_japanese_query() {
        let index = LexicalIndex::build(corpus()).unwrap();

        let results = index.query("スモーキーなウイスキー", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.record_id, 4);
    }

    #[test]
    fn test_word_inside_compound_matches() {
        let docs = vec![
            doc(1, "Name: Yamazaki 12\nDistillery: 山崎蒸留所"),
            doc(2, "Name: Hakushu 12\nDistillery: 白州蒸留所\nPalate: すっきりした味わい"),
        ];
        let index = LexicalIndex::build(docs).unwrap();

        let results = index.query("白州", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.record_id, 2);

        let results = index.query("すっきり", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.record_id, 2);
    }

    #[test]
    fn test_query_deterministic() {
        let index = LexicalIndex::build(corpus()).unwrap();

        let first = index.query("speyside 12 smoke", 3).unwrap();
        let second = index.query("speyside 12 smoke", 3).unwrap();
        assert_eq!(first, second);
        assert!(first.len() <= 3);
    }

    #[test]
    fn test_empty_query_and_k() {
        let index = LexicalIndex::build(corpus()).unwrap();
        assert!(index.query("", 5).unwrap().is_empty());
        assert!(index.query("!!!", 5).unwrap().is_empty());
        assert!(index.query("islay", 0).unwrap().is_empty());
        assert!(index.query("bourbon", 5).unwrap().is_empty());
    }

    #[test]
    fn test_empty_corpus() {
        let index = LexicalIndex::build(vec![]).unwrap();
        assert!(index.is_empty());
        assert!(index.query("peat", 5).unwrap().is_empty());
    }

    #[test]
    fn test_build_match_expr() {
        let tokens = vec!["peat".to_string(), "smoke".to_string()];
        assert_eq!(build_match_expr(&tokens), "\"peat\" OR \"smoke\"");
    }

    #[tokio::test]
    async fn test_retriever_trait() {
        let index = LexicalIndex::build(corpus()).unwrap();
        let retriever: &dyn Retriever = &index;

        assert_eq!(retriever.kind(), RetrieverKind::Lexical);
        let results = retriever.retrieve("islay", 2).await.unwrap();
        assert_eq!(results[0].document.record_id, 2);
    }
}
