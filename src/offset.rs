//! Binlog 처리 위치 추적
//!
//! Binlog 파일명 + 위치로 스캔 구간을 관리합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치

use crate::error::{CdcError, Result};
use crate::events::EventHeader;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binlog 파일은 4 바이트 매직 헤더 뒤에서 시작
pub const BINLOG_HEADER_LEN: u64 = 4;

/// Binlog 파일 위치 정보
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(filename: String, position: u64) -> Self {
        BinlogPosition { filename, position }
    }

    /// 파일명에서 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        file_sequence(&self.filename)
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// "mysql-bin.000123" → 123
pub fn file_sequence(filename: &str) -> Option<u64> {
    filename.rsplit('.').next().and_then(|s| s.parse().ok())
}

/// 서버의 binlog 목록에서 [start_file, stop_file] 구간에 속하는 파일들을 고릅니다.
///
/// start_file 이 목록에 없으면 에러. start_file 이전에 나온 파일은 번호와 관계없이 제외합니다.
pub fn eligible_binlog_files(all: &[String], start_file: &str, stop_file: &str) -> Result<Vec<String>> {
    let Some(start_idx) = all.iter().position(|f| f == start_file) else {
        return Err(CdcError::PreflightError(format!(
            "--start-file {} not in mysql server",
            start_file
        )));
    };

    let start_seq = file_sequence(start_file)
        .ok_or_else(|| CdcError::ConfigError(format!("invalid binlog file name: {}", start_file)))?;
    let stop_seq = file_sequence(stop_file)
        .ok_or_else(|| CdcError::ConfigError(format!("invalid binlog file name: {}", stop_file)))?;

    Ok(all[start_idx..]
        .iter()
        .filter(|f| matches!(file_sequence(f), Some(seq) if start_seq <= seq && seq <= stop_seq))
        .cloned()
        .collect())
}

/// 출력 주석에 붙는 위치 구간 (worker 에 전달되는 불변 스냅샷)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionWindow {
    /// 직전 이벤트의 log position
    pub start: u32,
    /// 현재 이벤트의 log position
    pub end: u32,
    /// 이벤트 타임스탬프 (초)
    pub timestamp: u32,
}

/// 스캔 커서 (현재 파일 + 직전 위치)
///
/// 입력 순서대로 producer 단계에서만 갱신합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor {
    current_file: String,
    previous_pos: Option<u32>,
}

impl ScanCursor {
    pub fn new(start_file: impl Into<String>) -> Self {
        ScanCursor {
            current_file: start_file.into(),
            previous_pos: None,
        }
    }

    pub fn current_file(&self) -> &str {
        &self.current_file
    }

    /// 이벤트 위치 기록 후 [직전, 현재] 구간 반환
    ///
    /// 첫 이벤트는 start == end.
    pub fn observe(&mut self, header: &EventHeader) -> PositionWindow {
        let start = self.previous_pos.unwrap_or(header.log_pos);
        self.previous_pos = Some(header.log_pos);
        PositionWindow {
            start,
            end: header.log_pos,
            timestamp: header.timestamp,
        }
    }

    /// 파일이 바뀌면 true
    pub fn rotate(&mut self, next_file: &str) -> bool {
        if self.current_file == next_file {
            return false;
        }
        self.current_file = next_file.to_string();
        true
    }
}
