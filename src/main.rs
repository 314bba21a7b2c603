/// binlog2sql 실행 진입점
///
/// 설정 검증 → 서버 사전 점검 → 이벤트 소스 선택 → 파이프라인 실행 순서로 진행합니다.
use binlog2sql::cdc_engine::{CdcEngine, PipelineOptions, RunSummary};
use binlog2sql::connection::MySqlConnection;
use binlog2sql::filter::EventFilter;
use binlog2sql::offset::eligible_binlog_files;
use binlog2sql::sql::SqlEngine;
use binlog2sql::{BinlogClient, CdcError, CliArgs, Config, LocalBinlogReader, Result};
use clap::{CommandFactory, Parser};
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // 로깅 초기화 (stdout 은 SQL 출력 전용)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let config = match Config::from_args(CliArgs::parse()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{}", e);
            let _ = CliArgs::command().print_help();
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(summary) => {
            info!(
                "Done: {:?}, {} event(s) read, {} line(s) written",
                summary.reason, summary.events_seen, summary.lines_written
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Arc<Config>) -> Result<RunSummary> {
    debug!("Effective configuration: {}", serde_json::to_string(config.as_ref())?);

    let conn = MySqlConnection::connect(config.connection.clone())
        .await
        .map_err(|e| CdcError::PreflightError(e.to_string()))?;
    conn.server_variables().await?.check()?;

    let (events, eligible_files) = match &config.local_file {
        Some(path) => (LocalBinlogReader::new(path).start(config.threads)?, None),
        None => {
            let files = conn.list_binlog_files().await?;
            let eligible = eligible_binlog_files(&files, &config.start_file, &config.stop_file)?;
            debug!("Eligible binlog files: {:?}", eligible);

            let client = BinlogClient::new(
                config.connection.clone(),
                config.start_file.clone(),
                config.start_position,
            );
            (client.start_streaming(config.threads).await?, Some(eligible))
        }
    };

    let lookup = Arc::new(conn);
    let sql = Arc::new(SqlEngine::new(config.sql_options(), Arc::clone(&lookup)));
    let mut engine = CdcEngine::new(
        EventFilter::from_config(&config),
        sql,
        PipelineOptions::for_config(&config, eligible_files),
    );

    let result = engine.run(events, io::stdout(), shutdown_signal()).await;

    if let Err(e) = lookup.close().await {
        warn!("Failed to close metadata connections: {}", e);
    }
    result
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // 시그널 등록 실패 시 종료 요청 없이 계속
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining");
}
