//! MySQL Binlog 기반 SQL 재구성 (binlog2sql)
//!
//! 이 라이브러리는 MySQL 바이너리 로그를 읽어 원본 SQL 또는 되돌리기 SQL 을 만듭니다.
//! 주요 기능:
//! - 서버 스트리밍 / 로컬 파일 읽기
//! - 위치, 시간, 스키마 기준 이벤트 선별
//! - 행 이미지 → INSERT / UPDATE / DELETE 재구성 (flashback 포함)
//! - 병렬 재구성과 입력 순서 그대로의 출력

pub mod binlog;
pub mod binlog_client;
pub mod cdc_engine;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod filter;
pub mod metadata;
pub mod offset;
pub mod output;
pub mod sql;

pub use binlog::LocalBinlogReader;
pub use binlog_client::BinlogClient;
pub use cdc_engine::{CdcEngine, PipelineOptions, RunSummary, TerminationReason};
pub use config::{CliArgs, Config};
pub use connection::MySqlConnection;
pub use error::{CdcError, Result};
pub use events::{BinlogEvent, CellValue, SqlType};
pub use filter::EventFilter;
pub use sql::{SqlEngine, SqlOptions};
