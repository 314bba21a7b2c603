//! Binlog 이벤트 디코딩 및 로컬 Binlog 파일 읽기
//!
//! 바이너리 형식 파싱은 mysql_async 의 binlog 모듈에 맡기고, 여기서는 그 결과를
//! 엔진이 쓰는 [`BinlogEvent`] 로 옮깁니다.
//! 로컬 파일 헤더: 4 바이트 매직 넘버 (0xfe 0x62 0x69 0x6e)

use crate::error::{CdcError, Result};
use crate::events::{
    BinlogEvent, BinlogEventData, CellValue, QueryEventData, RotateEventData, Row, RowImages,
    RowsEventData,
};
use mysql_async::binlog::events::{Event, EventData, RowsEventData as RawRowsEvent, TableMapEvent};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::binlog::BinlogVersion;
use mysql_async::Value;
use mysql_common::binlog::BinlogFile;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const BINLOG_MAGIC: &[u8] = &[0xfe, 0x62, 0x69, 0x6e]; // ".bin" in ASCII

/// Binlog 파일 헤더 검증
pub fn verify_magic(data: &[u8]) -> Result<()> {
    if data.len() >= BINLOG_MAGIC.len() && data[..BINLOG_MAGIC.len()] == BINLOG_MAGIC[..] {
        Ok(())
    } else {
        Err(CdcError::BinlogParseError(
            "file header is not match, file may be damaged".to_string(),
        ))
    }
}

/// mysql_async 이벤트 → [`BinlogEvent`] 변환기
///
/// ROWS 이벤트를 풀려면 앞서 나온 TABLE_MAP 이 필요하므로 table id 별로 보관합니다.
#[derive(Default)]
pub struct EventDecoder {
    tables: HashMap<u64, TableMapEvent<'static>>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, event: &Event) -> Result<BinlogEvent> {
        let header = event.header();
        let timestamp = header.timestamp();
        let log_pos = header.log_pos();

        let data = event
            .read_data()
            .map_err(|e| CdcError::BinlogParseError(format!("failed to parse binlog event: {}", e)))?;

        let data = match data {
            Some(EventData::TableMapEvent(tme)) => {
                self.tables.insert(tme.table_id(), tme.into_owned());
                BinlogEventData::TableMap
            }
            Some(EventData::RowsEvent(rows_event)) => BinlogEventData::Rows(self.decode_rows(&rows_event)?),
            Some(EventData::QueryEvent(qe)) => BinlogEventData::Query(QueryEventData {
                database: qe.schema().into_owned(),
                query: qe.query().into_owned(),
            }),
            Some(EventData::RotateEvent(re)) => BinlogEventData::Rotate(RotateEventData {
                next_binlog_name: re.name().into_owned(),
                position: re.position(),
            }),
            Some(EventData::HeartbeatEvent) => BinlogEventData::Heartbeat,
            _ => BinlogEventData::Other,
        };

        Ok(BinlogEvent::new(timestamp, log_pos, data))
    }

    fn decode_rows(&self, rows_event: &RawRowsEvent<'_>) -> Result<RowsEventData> {
        let table_id = rows_event.table_id();
        let tme = self.tables.get(&table_id).ok_or_else(|| {
            CdcError::BinlogParseError(format!("missing TABLE_MAP for table_id {}", table_id))
        })?;

        let mut pairs = Vec::new();
        for row in rows_event.rows(tme) {
            let (before, after) =
                row.map_err(|e| CdcError::BinlogParseError(format!("failed to decode row: {}", e)))?;
            pairs.push((before.map(|r| convert_row(&r)), after.map(|r| convert_row(&r))));
        }

        let rows = match rows_event {
            RawRowsEvent::WriteRowsEvent(_) | RawRowsEvent::WriteRowsEventV1(_) => {
                RowImages::Write(pairs.into_iter().filter_map(|(_, after)| after).collect())
            }
            RawRowsEvent::UpdateRowsEvent(_)
            | RawRowsEvent::UpdateRowsEventV1(_)
            | RawRowsEvent::PartialUpdateRowsEvent(_) => RowImages::Update(
                pairs
                    .into_iter()
                    .map(|(before, after)| (before.unwrap_or_default(), after.unwrap_or_default()))
                    .collect(),
            ),
            RawRowsEvent::DeleteRowsEvent(_) | RawRowsEvent::DeleteRowsEventV1(_) => {
                RowImages::Delete(pairs.into_iter().filter_map(|(before, _)| before).collect())
            }
        };

        Ok(RowsEventData {
            table_id,
            database: tme.database_name().into_owned(),
            table: tme.table_name().into_owned(),
            rows,
        })
    }
}

fn convert_row(row: &BinlogRow) -> Row {
    (0..row.len())
        .map(|i| row.as_ref(i).map_or(CellValue::Null, convert_binlog_value))
        .collect()
}

fn convert_binlog_value(value: &BinlogValue<'_>) -> CellValue {
    match value {
        BinlogValue::Value(v) => convert_value(v),
        // TODO: render JSONB as JSON text instead of its debug form
        BinlogValue::Jsonb(jsonb) => CellValue::Json(format!("{:?}", jsonb)),
        BinlogValue::JsonDiff(_) => CellValue::Json("{}".to_string()),
    }
}

/// MySQL 값 → 셀 값
pub fn convert_value(value: &Value) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Int(v) => CellValue::Int64(*v),
        Value::UInt(v) => CellValue::UInt64(*v),
        Value::Float(v) => CellValue::Float(*v),
        Value::Double(v) => CellValue::Double(*v),
        Value::Bytes(b) => match String::from_utf8(b.clone()) {
            Ok(s) => CellValue::String(s),
            Err(_) => CellValue::Bytes(b.clone()),
        },
        Value::Date(year, month, day, hour, min, sec, micro) => {
            if *hour == 0 && *min == 0 && *sec == 0 && *micro == 0 {
                CellValue::Date(format!("{:04}-{:02}-{:02}", year, month, day))
            } else if *micro == 0 {
                CellValue::DateTime(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                ))
            } else {
                CellValue::DateTime(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                    year, month, day, hour, min, sec, micro
                ))
            }
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            let sign = if *is_negative { "-" } else { "" };
            if *micros == 0 {
                CellValue::Time(format!("{}{:02}:{:02}:{:02}", sign, total_hours, minutes, seconds))
            } else {
                CellValue::Time(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    sign, total_hours, minutes, seconds, micros
                ))
            }
        }
    }
}

/// 로컬 Binlog 파일 reader
pub struct LocalBinlogReader {
    path: PathBuf,
}

impl LocalBinlogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalBinlogReader { path: path.into() }
    }

    /// 파일을 열고 헤더를 검증
    pub fn open(&self) -> Result<BinlogFile<BufReader<File>>> {
        let mut file = File::open(&self.path)
            .map_err(|e| CdcError::IoError(format!("{}: {}", self.path.display(), e)))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| CdcError::BinlogParseError("file header is not match, file may be damaged".to_string()))?;
        verify_magic(&magic)?;
        file.seek(SeekFrom::Start(0))?;

        BinlogFile::new(BinlogVersion::Version4, BufReader::new(file))
            .map_err(|e| CdcError::BinlogParseError(format!("failed to read binlog file header: {}", e)))
    }

    /// 블로킹 스레드에서 파일을 끝까지 읽어 채널로 전달
    pub fn start(self, capacity: usize) -> Result<mpsc::Receiver<Result<BinlogEvent>>> {
        let events = self.open()?;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        info!("Reading local binlog {}", self.path.display());

        tokio::task::spawn_blocking(move || {
            let sent = forward_events(events, &tx);
            info!("Local binlog reading ended after {} event(s)", sent);
        });

        Ok(rx)
    }
}

/// 이벤트를 디코딩해 채널로 보냄. 디코딩 에러를 보낸 뒤에는 멈춤.
pub(crate) fn forward_events<I>(events: I, tx: &mpsc::Sender<Result<BinlogEvent>>) -> u64
where
    I: Iterator<Item = io::Result<Event>>,
{
    let mut decoder = EventDecoder::new();
    let mut sent = 0u64;

    for item in events {
        let decoded = item
            .map_err(|e| CdcError::BinlogParseError(format!("failed to read binlog event: {}", e)))
            .and_then(|event| decoder.decode(&event));
        let failed = decoded.is_err();

        if tx.blocking_send(decoded).is_err() {
            debug!("Event receiver dropped, stop reading");
            break;
        }
        sent += 1;
        if failed {
            warn!("Stop reading after decode error");
            break;
        }
    }
    sent
}
