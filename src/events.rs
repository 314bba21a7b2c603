//! 디코딩된 Binlog 이벤트 타입 및 데이터 구조 정의
//!
//! 프로토콜 디코딩 결과를 엔진이 필요로 하는 최소 형태로 표현합니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 직후의 위치 (log position)
    pub log_pos: u32,
}

/// 셀 값
///
/// 문자열 계열은 SQL에서 작은따옴표로 감싸고, UTF-8 이 아닌 바이트열은 `X'..'` 16진 리터럴,
/// 나머지는 그대로 출력합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(String),
    DateTime(String),
    Time(String),
    Decimal(String),
    Json(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int64(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Double(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

/// SQL 리터럴 형식. 문자열 내부의 따옴표는 이스케이프하지 않습니다.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int64(i) => write!(f, "{}", i),
            CellValue::UInt64(u) => write!(f, "{}", u),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Double(v) => write!(f, "{}", v),
            CellValue::Bytes(b) => {
                f.write_str("X'")?;
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                f.write_str("'")
            }
            CellValue::String(s)
            | CellValue::Date(s)
            | CellValue::DateTime(s)
            | CellValue::Time(s)
            | CellValue::Decimal(s)
            | CellValue::Json(s) => write!(f, "'{}'", s),
        }
    }
}

/// 한 행의 컬럼 값들 (테이블 컬럼 순서와 동일)
pub type Row = Vec<CellValue>;

/// 원본 DML 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Insert,
    Update,
    Delete,
}

impl SqlType {
    pub const ALL: [SqlType; 3] = [SqlType::Insert, SqlType::Update, SqlType::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Insert => "INSERT",
            SqlType::Update => "UPDATE",
            SqlType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SqlType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(SqlType::Insert),
            "UPDATE" => Ok(SqlType::Update),
            "DELETE" => Ok(SqlType::Delete),
            other => Err(format!("unsupported sql type: {}", other)),
        }
    }
}

/// 행 이미지 묶음
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowImages {
    /// WRITE_ROWS: 삽입된 행들
    Write(Vec<Row>),
    /// UPDATE_ROWS: (변경 전, 변경 후) 쌍들
    Update(Vec<(Row, Row)>),
    /// DELETE_ROWS: 삭제된 행들
    Delete(Vec<Row>),
}

/// ROWS 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowsEventData {
    /// 테이블 ID
    pub table_id: u64,
    /// 데이터베이스명
    pub database: String,
    /// 테이블명
    pub table: String,
    /// 행 데이터들
    pub rows: RowImages,
}

impl RowsEventData {
    pub fn sql_type(&self) -> SqlType {
        match self.rows {
            RowImages::Write(_) => SqlType::Insert,
            RowImages::Update(_) => SqlType::Update,
            RowImages::Delete(_) => SqlType::Delete,
        }
    }

    pub fn row_count(&self) -> usize {
        match &self.rows {
            RowImages::Write(rows) | RowImages::Delete(rows) => rows.len(),
            RowImages::Update(pairs) => pairs.len(),
        }
    }
}

/// 쿼리 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEventData {
    /// 기본 데이터베이스 (없으면 빈 문자열)
    pub database: String,
    /// 쿼리 문자열
    pub query: String,
}

/// 회전 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 새 바이너리 로그 파일명
    pub next_binlog_name: String,
    /// 새 파일의 시작 위치
    pub position: u64,
}

/// 엔진이 다루는 Binlog 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BinlogEventData {
    Rows(RowsEventData),
    Query(QueryEventData),
    Rotate(RotateEventData),
    TableMap,
    Heartbeat,
    /// FORMAT_DESCRIPTION, XID, GTID 등 그 밖의 이벤트
    Other,
}

/// 완성된 Binlog 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinlogEvent {
    /// 이벤트 헤더
    pub header: EventHeader,
    /// 이벤트 데이터
    pub data: BinlogEventData,
}

impl BinlogEvent {
    pub fn new(timestamp: u32, log_pos: u32, data: BinlogEventData) -> Self {
        BinlogEvent {
            header: EventHeader { timestamp, log_pos },
            data,
        }
    }
}
