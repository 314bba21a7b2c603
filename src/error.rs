//! binlog2sql 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    #[error("설정 에러: {0}")]
    ConfigError(String),

    #[error("사전 점검 실패: {0}")]
    PreflightError(String),

    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParseError(String),

    #[error("유효하지 않은 이벤트: {0}")]
    InvalidEvent(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("예상치 못한 에러: {0}")]
    Other(String),
}

impl CdcError {
    /// 이벤트 하나만 건너뛰면 되는 에러인지 여부
    pub fn is_per_event(&self) -> bool {
        matches!(self, CdcError::QueryError(_) | CdcError::InvalidEvent(_))
    }
}

impl From<io::Error> for CdcError {
    fn from(err: io::Error) -> Self {
        CdcError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;
