//! CLI 모듈
//!
//! whisky-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{run_turn, user_message, Assistant, Session, TurnOutcome};
use crate::config::{get_data_dir, Config, CONFIG_FILE_NAME};
use crate::embedding::{has_api_key, OpenAiEmbedding, API_KEY_ENV};
use crate::error::{Error, RetrieverKind};
use crate::generator::OpenAiChat;
use crate::ingest::{ingest, IngestMode, WhiskyApiClient};
use crate::knowledge::{
    BuildOutcome, HybridRetriever, IndexManifest, RecordStore, WhiskyRecord, INDEX_DIR_NAME,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "whisky-rag")]
#[command(version, about = "위스키 추천 하이브리드 RAG 어시스턴트", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: WHISKY_RAG_DATA_DIR 또는 ~/.local/share/.whisky-rag)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// 설정 파일 경로 (기본: <data_dir>/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 위스키 데이터 API에서 레코드 수집
    Ingest {
        /// 저장소에 없는 id만 추가 (기존 레코드 유지)
        #[arg(long)]
        only_new: bool,
    },

    /// 키워드/벡터 인덱스 빌드 (변경 없으면 재사용)
    Index,

    /// 질문 1개에 답변
    Ask {
        /// 질문
        question: String,
    },

    /// 대화 모드 (/reset: 새 대화, /exit: 종료)
    Chat,

    /// 저장된 위스키 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

/// 명령 실행 환경
struct AppContext {
    data_dir: PathBuf,
    config: Config,
}

impl AppContext {
    fn load(cli: &Cli) -> Result<Self> {
        let data_dir = cli.data_dir.clone().unwrap_or_else(get_data_dir);
        let config =
            Config::resolve(cli.config.as_deref(), &data_dir).context("설정 로드 실패")?;
        Ok(Self { data_dir, config })
    }

    fn open_store(&self) -> Result<RecordStore> {
        RecordStore::open_in(&self.data_dir).context("RecordStore 열기 실패")
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let ctx = AppContext::load(&cli)?;

    match cli.command {
        Commands::Ingest { only_new } => cmd_ingest(&ctx, only_new).await,
        Commands::Index => cmd_index(&ctx).await,
        Commands::Ask { question } => cmd_ask(&ctx, &question).await,
        Commands::Chat => cmd_chat(&ctx).await,
        Commands::List { limit } => cmd_list(&ctx, limit),
        Commands::Status => cmd_status(&ctx).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
async fn cmd_ingest(ctx: &AppContext, only_new: bool) -> Result<()> {
    let client = WhiskyApiClient::new(&ctx.config.ingest)?;
    let store = ctx.open_store()?;
    let mode = if only_new {
        IngestMode::OnlyNew
    } else {
        IngestMode::Upsert
    };

    println!("[*] 위스키 데이터 수집 중: {}", client.url());
    let report = ingest(&store, &client, mode).await.context("수집 실패")?;

    println!(
        "[OK] 가져온 레코드 {} 건, 저장 {} 건",
        report.fetched, report.written
    );
    println!("     저장소: {} 건", store.count()?);
    Ok(())
}

/// 인덱스 명령어 (index)
async fn cmd_index(ctx: &AppContext) -> Result<()> {
    println!("[*] 인덱스 빌드 중...");
    let (_, outcome) = bootstrap(ctx).await.map_err(report_error)?;

    match outcome {
        BuildOutcome::Built { documents } => {
            println!("[OK] 벡터 인덱스 빌드 완료: {} 문서", documents)
        }
        BuildOutcome::Reused { documents } => {
            println!("[OK] 벡터 인덱스 최신 상태: {} 문서 (재사용)", documents)
        }
        BuildOutcome::Empty => println!("[!] 저장된 위스키가 없습니다. 먼저 ingest를 실행하세요."),
    }
    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(ctx: &AppContext, question: &str) -> Result<()> {
    let mut session = Session::new();
    let assistant = create_assistant(ctx).map_err(report_error)?;
    session
        .ensure_retriever(|| async { bootstrap(ctx).await.map(|(r, _)| r) })
        .await
        .map_err(report_error)?;

    let mut out = std::io::stdout();
    let outcome = run_turn(&mut session, &assistant, question, &mut out)
        .await
        .map_err(report_error)?;

    print_sources(&outcome);
    Ok(())
}

/// 대화 명령어 (chat)
async fn cmd_chat(ctx: &AppContext) -> Result<()> {
    let mut session = Session::new();
    let assistant = create_assistant(ctx).map_err(report_error)?;

    println!("[*] 초기화 중...");
    session
        .ensure_retriever(|| async { bootstrap(ctx).await.map(|(r, _)| r) })
        .await
        .map_err(report_error)?;

    println!("[OK] 어떤 위스키를 찾으시나요? (/reset: 새 대화, /exit: 종료)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = std::io::stdout();

    loop {
        print_prompt();
        let Some(line) = lines.next_line().await.context("입력 읽기 실패")? else {
            break;
        };

        let question = line.trim();
        match question {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                session.reset();
                println!("[OK] 새 대화를 시작합니다.");
                continue;
            }
            _ => {}
        }

        // 실패한 턴은 기록에 남지 않으며 대화는 계속됨
        match run_turn(&mut session, &assistant, question, &mut out).await {
            Ok(outcome) => print_degraded(&outcome),
            Err(e) => eprintln!("[!] {}", user_message(&e)),
        }
    }

    println!("[*] 대화를 종료합니다.");
    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(ctx: &AppContext, limit: usize) -> Result<()> {
    let store = ctx.open_store()?;
    let records = store.list(limit).context("위스키 목록 조회 실패")?;

    if records.is_empty() {
        println!("[!] 저장된 위스키가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 위스키 ({} / {} 건):\n", records.len(), store.count()?);
    for record in &records {
        println!("{}", format_record_line(record));
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(ctx: &AppContext) -> Result<()> {
    println!("whisky-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    // 데이터 디렉토리
    println!("[*] 데이터 디렉토리: {}", ctx.data_dir.display());
    if ctx.data_dir.join(CONFIG_FILE_NAME).exists() {
        println!("[*] 설정 파일: {}", ctx.data_dir.join(CONFIG_FILE_NAME).display());
    }
    match ctx.config.ingest.api_url {
        Some(ref url) => println!("[*] 데이터 API: {}", url),
        None => println!("[!] 데이터 API: 미설정 (config.toml의 [ingest] api_url)"),
    }

    // API 키 상태
    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export {}=your-key", API_KEY_ENV);
    }

    // 레코드 저장소
    let db_path = ctx.data_dir.join(crate::knowledge::DB_FILE_NAME);
    match RecordStore::exists(&db_path) {
        Ok(true) => match ctx.open_store().and_then(|s| s.stats().map_err(Into::into)) {
            Ok(stats) => {
                let size = std::fs::metadata(&stats.db_path)
                    .map(|m| m.len() as usize)
                    .unwrap_or(0);
                println!(
                    "[OK] 저장된 위스키: {} 건 ({})",
                    stats.record_count,
                    format_bytes(size)
                );
            }
            Err(e) => println!("[!] 통계 조회 실패: {}", e),
        },
        Ok(false) => println!("[!] 저장된 위스키: 없음 (ingest 필요)"),
        Err(e) => println!("[!] 저장소 확인 실패: {}", e),
    }

    // 벡터 인덱스
    match IndexManifest::read(&ctx.data_dir.join(INDEX_DIR_NAME)).await {
        Ok(Some(manifest)) => {
            println!(
                "[OK] 벡터 인덱스: {} 문서 ({}, {}차원)",
                manifest.document_count, manifest.model, manifest.dimension
            );
            println!(
                "     빌드 시각: {}",
                manifest.built_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(None) => println!("[!] 벡터 인덱스: 없음 (index 필요)"),
        Err(e) => tracing::debug!("매니페스트 읽기 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Bootstrap
// ============================================================================

/// 저장소 준비 + 인덱스 빌드
///
/// 저장소가 비어 있고 데이터 API가 설정되어 있으면 먼저 수집합니다.
async fn bootstrap(ctx: &AppContext) -> crate::Result<(HybridRetriever, BuildOutcome)> {
    if !has_api_key() {
        return Err(Error::Bootstrap(anyhow::anyhow!(
            "{} is not set (required for embeddings)",
            API_KEY_ENV
        )));
    }

    let store = RecordStore::open_in(&ctx.data_dir)
        .map_err(|e| Error::Bootstrap(anyhow::Error::new(e).context("Failed to open record store")))?;

    let count = store
        .count()
        .map_err(|e| Error::Bootstrap(anyhow::Error::new(e).context("Failed to count records")))?;

    if count == 0 {
        let client = WhiskyApiClient::new(&ctx.config.ingest).map_err(|e| {
            Error::Bootstrap(anyhow::Error::new(e).context("Record store is empty"))
        })?;
        println!("[*] 저장된 위스키가 없어 데이터를 수집합니다: {}", client.url());
        ingest(&store, &client, IngestMode::Upsert)
            .await
            .map_err(|e| Error::Bootstrap(anyhow::Error::new(e).context("Initial ingest failed")))?;
    }

    let embedder = OpenAiEmbedding::from_env(&ctx.config.embedding).map_err(Error::Bootstrap)?;
    HybridRetriever::bootstrap(&store, &ctx.data_dir, Arc::new(embedder), &ctx.config).await
}

fn create_assistant(ctx: &AppContext) -> crate::Result<Assistant> {
    let model = OpenAiChat::from_env(&ctx.config.generator).map_err(Error::Bootstrap)?;
    tracing::info!("Using chat model {}", ctx.config.generator.model);
    Ok(Assistant::new(Arc::new(model)))
}

/// 사용자 메시지 출력 후 상세 에러로 변환
fn report_error(error: Error) -> anyhow::Error {
    tracing::error!("{}", error);
    eprintln!("[!] {}", user_message(&error));
    anyhow::Error::new(error)
}

// ============================================================================
// Output
// ============================================================================

fn print_prompt() {
    use std::io::Write;
    print!("\n> ");
    // 프롬프트 출력 실패는 입력 처리에 영향 없음
    let _ = std::io::stdout().flush();
}

fn print_degraded(outcome: &TurnOutcome) {
    if let Some(ref degraded) = outcome.context.degraded {
        let name = match degraded.failed {
            RetrieverKind::Lexical => "키워드",
            RetrieverKind::Semantic => "벡터",
        };
        println!("[!] {} 검색을 사용할 수 없어 일부 결과만 참고했습니다.", name);
    }
}

fn print_sources(outcome: &TurnOutcome) {
    print_degraded(outcome);

    if outcome.context.is_empty() {
        println!("\n[!] 일치하는 위스키 레코드가 없습니다.");
        return;
    }

    println!("\n[*] 참고한 위스키 ({} 건):", outcome.context.len());
    for (i, fused) in outcome.context.documents.iter().enumerate() {
        let sources = fused
            .sources
            .iter()
            .map(|s| match s {
                RetrieverKind::Lexical => "LEX",
                RetrieverKind::Semantic => "SEM",
            })
            .collect::<Vec<_>>()
            .join("+");

        println!(
            "  {}. [{}] [점수: {:.4}] #{} {}",
            i + 1,
            sources,
            fused.score,
            fused.document.record_id,
            truncate_text(document_title(&fused.document.content), 60)
        );
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문서 첫 줄("Name: ...")에서 이름 추출
fn document_title(content: &str) -> &str {
    let first = content.lines().next().unwrap_or_default();
    match first.strip_prefix("Name:").map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => "-",
    }
}

/// 목록 한 줄 포맷
fn format_record_line(record: &WhiskyRecord) -> String {
    let name = record
        .name
        .as_deref()
        .map(|n| truncate_text(n, 40))
        .unwrap_or_else(|| "-".to_string());

    let mut details = Vec::new();
    if let Some(ref region) = record.region {
        details.push(region.clone());
    }
    if let Some(age) = record.age {
        details.push(format!("{}년", age));
    }
    if let Some(abv) = record.abv {
        details.push(format!("{}%", abv));
    }
    if let Some(rating) = record.rating_average {
        details.push(format!("평점 {}", rating));
    }

    if details.is_empty() {
        format!("  #{:<6} {}", record.id, name)
    } else {
        format!("  #{:<6} {} | {}", record.id, name, details.join(" | "))
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
