//! 이벤트 선별
//!
//! 스캔 순서대로 producer 에서 호출되며, 판정 순서는 다음과 같습니다.
//! 1. 이벤트 종류 (행 이벤트, flashback 이 아니면 쿼리 이벤트)
//! 2. 시간 범위
//! 3. 위치 범위 (stop-file 의 stop-position 초과 / start-file 의 start-position 미만)
//! 4. 데이터베이스, 테이블 목록 (행 이벤트만)

use crate::config::Config;
use crate::events::{BinlogEvent, BinlogEventData};
use crate::offset::ScanCursor;

/// 제외 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 재구성 대상이 아닌 이벤트 종류
    NotReconstructable,
    /// --only-dml 로 제외된 쿼리 이벤트
    QueryExcluded,
    BeforeStartTime,
    AfterStopTime,
    BeforeStartPosition,
    /// stop-file 의 stop-position 을 넘어섬 (bounded 모드에서는 스캔 종료)
    PastStopPosition,
    DatabaseExcluded,
    TableExcluded,
}

/// 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Drop(DropReason),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

/// 이벤트 필터 설정
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub flashback: bool,
    pub only_dml: bool,
    pub start_time: Option<i64>,
    pub stop_time: Option<i64>,
    pub start_file: String,
    pub start_position: u64,
    pub stop_file: String,
    pub stop_position: Option<u64>,
    /// 비어 있으면 전체 허용
    pub databases: Vec<String>,
    pub tables: Vec<String>,
}

impl EventFilter {
    pub fn from_config(config: &Config) -> Self {
        EventFilter {
            flashback: config.flashback,
            only_dml: config.only_dml,
            start_time: config.start_time,
            stop_time: config.stop_time,
            start_file: config.start_file.clone(),
            start_position: config.start_position,
            stop_file: config.stop_file.clone(),
            stop_position: config.stop_position,
            databases: config.databases.clone(),
            tables: config.tables.clone(),
        }
    }

    pub fn check(&self, cursor: &ScanCursor, event: &BinlogEvent) -> Verdict {
        match &event.data {
            BinlogEventData::Rows(_) => {}
            BinlogEventData::Query(_) if !self.flashback => {
                if self.only_dml {
                    return Verdict::Drop(DropReason::QueryExcluded);
                }
            }
            _ => return Verdict::Drop(DropReason::NotReconstructable),
        }

        let timestamp = i64::from(event.header.timestamp);
        if matches!(self.start_time, Some(start) if timestamp < start) {
            return Verdict::Drop(DropReason::BeforeStartTime);
        }
        if matches!(self.stop_time, Some(stop) if timestamp > stop) {
            return Verdict::Drop(DropReason::AfterStopTime);
        }

        let log_pos = u64::from(event.header.log_pos);
        if cursor.current_file() == self.stop_file
            && matches!(self.stop_position, Some(stop) if log_pos > stop)
        {
            return Verdict::Drop(DropReason::PastStopPosition);
        }
        if cursor.current_file() == self.start_file && log_pos < self.start_position {
            return Verdict::Drop(DropReason::BeforeStartPosition);
        }

        if let BinlogEventData::Rows(rows) = &event.data {
            if !self.databases.is_empty() && !self.databases.contains(&rows.database) {
                return Verdict::Drop(DropReason::DatabaseExcluded);
            }
            if !self.tables.is_empty() && !self.tables.contains(&rows.table) {
                return Verdict::Drop(DropReason::TableExcluded);
            }
        }

        Verdict::Admit
    }
}
