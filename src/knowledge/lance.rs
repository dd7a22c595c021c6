//! LanceDB Vector Store + Semantic Index
//!
//! 문서 임베딩을 LanceDB 테이블에 저장하고 코사인 거리로 검색합니다.
//! 인덱스 디렉토리의 `manifest.json`으로 코퍼스가 바뀌지 않았으면 재빌드를 건너뜁니다.
//!
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, RetrieverKind};

use super::projector::Document;
use super::retriever::{RankedResult, Retriever};
use super::vector::{SearchResult, VectorEntry, VectorStore};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "whisky_vectors";

/// 인덱스 디렉토리 이름 (`<data_dir>/vectors.lance`)
pub const INDEX_DIR_NAME: &str = "vectors.lance";

/// 매니페스트 파일 이름
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// Apache Arrow 기반 columnar 데이터베이스입니다.
/// 테이블의 벡터 차원은 열 때 고정됩니다.
pub struct LanceVectorStore {
    db: Connection,
    dimension: usize,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        tokio::fs::create_dir_all(path)
            .await
            .context("Failed to create LanceDB directory")?;

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("record_id", DataType::Int64, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch for record {}: expected {}, got {}",
                bad.record_id,
                self.dimension,
                bad.embedding.len()
            );
        }

        let record_ids: Vec<i64> = entries.iter().map(|e| e.record_id).collect();
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(Int64Array::from(record_ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open vector table")
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await? {
            // 기존 테이블에 추가
            self.open_table()
                .await?
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            // 새 테이블 생성
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        if query_embedding.len() != self.dimension {
            anyhow::bail!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimension,
                query_embedding.len()
            );
        }

        if !self.table_exists().await? {
            anyhow::bail!("Vector table '{}' not found", TABLE_NAME);
        }

        let table = self.open_table().await?;

        let results = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        // RecordBatch 스트림에서 결과 추출
        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .context("Failed to read search results")?;

        let mut search_results = Vec::new();

        for batch in batches {
            let record_ids = batch
                .column_by_name("record_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing record_id column"))?;

            let contents = batch
                .column_by_name("content")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing content column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                search_results.push(SearchResult {
                    record_id: record_ids.value(i),
                    content: contents.value(i).to_string(),
                    // 코사인 거리 = 1 - 코사인 유사도
                    similarity: 1.0 - distances.value(i),
                });
            }
        }

        // 배치 경계를 넘어서도 거리 순서 유지, 동점은 record_id 순
        search_results.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.record_id.cmp(&b.record_id))
        });
        search_results.truncate(limit);

        Ok(search_results)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await? {
            return Ok(0);
        }

        let count = self
            .open_table()
            .await?
            .count_rows(None)
            .await
            .context("Failed to count rows")?;
        Ok(count)
    }

    async fn reset(&self) -> Result<()> {
        if self.table_exists().await? {
            self.db
                .drop_table(TABLE_NAME)
                .await
                .context("Failed to drop vector table")?;
            tracing::debug!("Dropped vector table '{}'", TABLE_NAME);
        }
        Ok(())
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// 빌드 기록 (`manifest.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// 모델 + 차원 + 문서 목록의 SHA-256
    pub fingerprint: String,
    pub model: String,
    pub dimension: usize,
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    /// 인덱스 디렉토리의 매니페스트 읽기 (임베더 없이 상태 확인용)
    pub async fn read(index_dir: &Path) -> crate::Result<Option<Self>> {
        Self::load(&index_dir.join(MANIFEST_FILE_NAME))
            .await
            .map_err(|e| Error::index_unavailable(RetrieverKind::Semantic, e))
    }

    async fn load(path: &Path) -> Result<Option<Self>> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }

        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        // 깨진 매니페스트는 없는 것으로 취급 (다음 빌드에서 덮어씀)
        match serde_json::from_str(&raw) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// 매니페스트 삭제 (없으면 무시)
    async fn remove(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// 코퍼스 지문 계산
///
/// 문서 순서, 모델, 차원 중 하나라도 바뀌면 값이 달라집니다.
pub fn corpus_fingerprint(model: &str, dimension: usize, documents: &[Document]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(dimension.to_le_bytes());
    for doc in documents {
        hasher.update(doc.record_id.to_le_bytes());
        hasher.update(doc.content.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// SemanticIndex
// ============================================================================

/// 빌드 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// 새로 임베딩하여 저장
    Built { documents: usize },
    /// 기존 인덱스 재사용 (임베딩 호출 없음)
    Reused { documents: usize },
    /// 빈 코퍼스
    Empty,
}

/// 벡터 검색기
///
/// 문서 임베딩은 LanceDB에, 빌드 기록은 `manifest.json`에 저장합니다.
pub struct SemanticIndex {
    store: LanceVectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    manifest_path: PathBuf,
    batch_size: usize,
}

impl SemanticIndex {
    /// 인덱스 디렉토리 열기 (없으면 생성)
    pub async fn open(
        dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> crate::Result<Self> {
        let store = LanceVectorStore::open(dir, embedder.dimension())
            .await
            .map_err(|e| Error::index_unavailable(RetrieverKind::Semantic, e))?;

        Ok(Self {
            store,
            embedder,
            manifest_path: dir.join(MANIFEST_FILE_NAME),
            batch_size: batch_size.max(1),
        })
    }

    /// `<data_dir>/vectors.lance` 열기
    pub async fn open_in(
        data_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> crate::Result<Self> {
        Self::open(&data_dir.join(INDEX_DIR_NAME), embedder, batch_size).await
    }

    /// 저장된 매니페스트 조회
    pub async fn manifest(&self) -> crate::Result<Option<IndexManifest>> {
        IndexManifest::load(&self.manifest_path)
            .await
            .map_err(|e| Error::index_unavailable(RetrieverKind::Semantic, e))
    }

    /// 코퍼스를 임베딩하여 인덱스 빌드
    ///
    /// 같은 코퍼스로 이미 빌드된 인덱스가 있으면 아무것도 하지 않습니다.
    pub async fn build(&self, documents: &[Document]) -> crate::Result<BuildOutcome> {
        self.build_inner(documents)
            .await
            .map_err(|e| Error::index_unavailable(RetrieverKind::Semantic, e))
    }

    async fn build_inner(&self, documents: &[Document]) -> Result<BuildOutcome> {
        let model = self.embedder.name().to_string();
        let dimension = self.embedder.dimension();
        let fingerprint = corpus_fingerprint(&model, dimension, documents);

        if let Some(manifest) = IndexManifest::load(&self.manifest_path).await? {
            if manifest.fingerprint == fingerprint
                && manifest.document_count == documents.len()
                && self.store.count().await? == documents.len()
            {
                tracing::info!(
                    "Semantic index up to date ({} documents), skipping embedding",
                    documents.len()
                );
                return Ok(if documents.is_empty() {
                    BuildOutcome::Empty
                } else {
                    BuildOutcome::Reused {
                        documents: documents.len(),
                    }
                });
            }
        }

        // 재빌드 도중 실패하면 "빌드 안 됨" 상태로 남도록 매니페스트부터 삭제
        IndexManifest::remove(&self.manifest_path).await?;
        self.store.reset().await?;

        if !documents.is_empty() {
            let total_batches = documents.len().div_ceil(self.batch_size);
            for (i, batch) in documents.chunks(self.batch_size).enumerate() {
                let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
                let embeddings = self
                    .embedder
                    .embed_batch(&texts)
                    .await
                    .context("Failed to embed documents")?;

                if embeddings.len() != batch.len() {
                    anyhow::bail!(
                        "Embedding count mismatch: expected {}, got {}",
                        batch.len(),
                        embeddings.len()
                    );
                }

                let entries: Vec<VectorEntry> = batch
                    .iter()
                    .zip(embeddings)
                    .map(|(doc, embedding)| VectorEntry {
                        record_id: doc.record_id,
                        content: doc.content.clone(),
                        embedding,
                    })
                    .collect();

                self.store.insert_batch(&entries).await?;
                tracing::debug!("Indexed batch {}/{}", i + 1, total_batches);
            }
        }

        let manifest = IndexManifest {
            fingerprint,
            model,
            dimension,
            document_count: documents.len(),
            built_at: Utc::now(),
        };
        manifest.save(&self.manifest_path).await?;

        if documents.is_empty() {
            tracing::info!("Semantic index is empty (no documents)");
            return Ok(BuildOutcome::Empty);
        }

        tracing::info!("Built semantic index: {} documents", documents.len());
        Ok(BuildOutcome::Built {
            documents: documents.len(),
        })
    }

    /// 질문과 가까운 상위 k개 문서
    pub async fn query(&self, text: &str, k: usize) -> crate::Result<Vec<RankedResult>> {
        self.query_inner(text, k)
            .await
            .map_err(|e| Error::index_unavailable(RetrieverKind::Semantic, e))
    }

    async fn query_inner(&self, text: &str, k: usize) -> Result<Vec<RankedResult>> {
        let manifest = IndexManifest::load(&self.manifest_path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Semantic index has not been built"))?;

        if manifest.document_count == 0 || k == 0 || text.trim().is_empty() {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed(text)
            .await
            .context("Failed to embed query")?;

        let hits = self.store.search(&query_embedding, k).await?;
        tracing::debug!("Semantic query matched {} documents", hits.len());

        Ok(hits
            .into_iter()
            .map(|hit| RankedResult {
                document: Document {
                    record_id: hit.record_id,
                    content: hit.content,
                },
                score: hit.similarity,
                source: RetrieverKind::Semantic,
            })
            .collect())
    }

    /// 저장된 벡터 수
    pub async fn count(&self) -> crate::Result<usize> {
        self.store
            .count()
            .await
            .map_err(|e| Error::index_unavailable(RetrieverKind::Semantic, e))
    }
}

#[async_trait]
impl Retriever for SemanticIndex {
    async fn retrieve(&self, query: &str, k: usize) -> crate::Result<Vec<RankedResult>> {
        self.query(query, k).await
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Semantic
    }
}

// ============================================================================
// Tests
// ============================================================================
