//! Binlog 이벤트 → SQL 문 재구성
//!
//! 순수 함수 (`insert_sql`, `delete_sql`, `update_sql`, `simple_update_sql`,
//! `no_pk_insert_sql`) 와, 설정에 따라 이들을 조합하는 `SqlEngine` 으로 구성됩니다.
//!
//! flashback 모드에서는 방향을 뒤집습니다:
//! - INSERT → DELETE
//! - DELETE → INSERT
//! - UPDATE → 변경 후 값을 WHERE, 변경 전 값을 SET 으로

use crate::error::{CdcError, Result};
use crate::events::{BinlogEvent, BinlogEventData, CellValue, QueryEventData, RowImages, RowsEventData, SqlType};
use crate::metadata::{MetadataLookup, TableMetadata, TableMetadataCache};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

fn predicate(column: &str, value: &CellValue) -> String {
    if value.is_null() {
        format!("{} IS NULL", column)
    } else {
        format!("{}={}", column, value)
    }
}

fn assignment(column: &str, value: &CellValue) -> String {
    format!("{}={}", column, value)
}

fn join_values<'a>(values: impl Iterator<Item = &'a CellValue>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

/// `INSERT INTO schema.table(c1,...) VALUES(v1,...);`
pub fn insert_sql(meta: &TableMetadata, row: &[CellValue]) -> String {
    format!(
        "INSERT INTO {}.{}({}) VALUES({});",
        meta.database,
        meta.table,
        meta.columns.join(","),
        join_values(row.iter())
    )
}

/// 기본 키 컬럼을 제외한 INSERT
pub fn no_pk_insert_sql(meta: &TableMetadata, row: &[CellValue]) -> String {
    let (columns, values): (Vec<&str>, Vec<&CellValue>) = meta
        .columns
        .iter()
        .zip(row)
        .filter(|(col, _)| !meta.is_primary_key(col))
        .map(|(col, val)| (col.as_str(), val))
        .unzip();

    format!(
        "INSERT INTO {}.{}({}) VALUES({});",
        meta.database,
        meta.table,
        columns.join(","),
        join_values(values.into_iter())
    )
}

/// `DELETE FROM schema.table WHERE c1=v1 AND ... LIMIT 1;`
pub fn delete_sql(meta: &TableMetadata, row: &[CellValue]) -> String {
    let condition: Vec<String> = meta
        .columns
        .iter()
        .zip(row)
        .map(|(col, val)| predicate(col, val))
        .collect();

    format!(
        "DELETE FROM {}.{} WHERE {} LIMIT 1;",
        meta.database,
        meta.table,
        condition.join(" AND ")
    )
}

/// WHERE 는 `before` 의 모든 컬럼, SET 은 `after` 의 모든 컬럼
pub fn update_sql(meta: &TableMetadata, before: &[CellValue], after: &[CellValue]) -> String {
    let mut set = Vec::with_capacity(meta.columns.len());
    let mut condition = Vec::with_capacity(meta.columns.len());

    for ((col, old), new) in meta.columns.iter().zip(before).zip(after) {
        set.push(assignment(col, new));
        condition.push(predicate(col, old));
    }

    format!(
        "UPDATE {}.{} SET {} WHERE {} LIMIT 1;",
        meta.database,
        meta.table,
        set.join(","),
        condition.join(" AND ")
    )
}

/// 변경된 컬럼과 기본 키 컬럼만 포함하는 UPDATE
///
/// 기본 키가 아니면서 변경 전후의 SQL 리터럴이 같은 컬럼은 SET 과 WHERE 에서 모두 빠집니다.
pub fn simple_update_sql(meta: &TableMetadata, before: &[CellValue], after: &[CellValue]) -> String {
    let mut set = Vec::new();
    let mut condition = Vec::new();

    for ((col, old), new) in meta.columns.iter().zip(before).zip(after) {
        if !meta.is_primary_key(col) && old.to_string() == new.to_string() {
            continue;
        }
        set.push(assignment(col, new));
        condition.push(predicate(col, old));
    }

    format!(
        "UPDATE {}.{} SET {} WHERE {} LIMIT 1;",
        meta.database,
        meta.table,
        set.join(","),
        condition.join(" AND ")
    )
}

/// 쿼리 이벤트 → SQL 문 목록
///
/// BEGIN / COMMIT 은 출력하지 않습니다. 앞뒤 공백과 끝의 `;` 는 떼어내고 `;` 하나로 끝맺습니다.
pub fn query_statements(query: &QueryEventData) -> Vec<String> {
    let statement = query.query.trim().trim_end_matches(';').trim_end();
    if statement.is_empty()
        || statement.eq_ignore_ascii_case("BEGIN")
        || statement.eq_ignore_ascii_case("COMMIT")
    {
        return Vec::new();
    }

    let mut statements = Vec::with_capacity(2);
    if !query.database.is_empty() {
        statements.push(format!("USE {};", query.database));
    }
    statements.push(format!("{};", statement));
    statements
}

/// 재구성 옵션
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlOptions {
    pub flashback: bool,
    pub simple_update: bool,
    pub no_primary_key: bool,
    /// 처리할 원본 DML 종류
    pub sql_types: HashSet<SqlType>,
}

impl Default for SqlOptions {
    fn default() -> Self {
        SqlOptions {
            flashback: false,
            simple_update: false,
            no_primary_key: false,
            sql_types: SqlType::ALL.into_iter().collect(),
        }
    }
}

fn check_width(meta: &TableMetadata, row: &[CellValue]) -> Result<()> {
    if row.len() != meta.columns.len() {
        return Err(CdcError::InvalidEvent(format!(
            "{}.{} row has {} values but table has {} columns",
            meta.database,
            meta.table,
            row.len(),
            meta.columns.len()
        )));
    }
    Ok(())
}

/// 행 이벤트 → SQL 문 목록 (메타데이터는 이미 확보된 상태)
///
/// 허용되지 않은 DML 종류면 빈 목록을 반환합니다.
pub fn rows_statements(
    meta: &TableMetadata,
    rows: &RowImages,
    options: &SqlOptions,
) -> Result<Vec<String>> {
    let kind = match rows {
        RowImages::Write(_) => SqlType::Insert,
        RowImages::Update(_) => SqlType::Update,
        RowImages::Delete(_) => SqlType::Delete,
    };
    if !options.sql_types.contains(&kind) {
        return Ok(Vec::new());
    }

    let update = |before: &[CellValue], after: &[CellValue]| {
        if options.simple_update {
            simple_update_sql(meta, before, after)
        } else {
            update_sql(meta, before, after)
        }
    };

    match rows {
        RowImages::Write(rows) => rows
            .iter()
            .map(|row| {
                check_width(meta, row)?;
                Ok(if options.flashback {
                    delete_sql(meta, row)
                } else if options.no_primary_key {
                    no_pk_insert_sql(meta, row)
                } else {
                    insert_sql(meta, row)
                })
            })
            .collect(),
        RowImages::Delete(rows) => rows
            .iter()
            .map(|row| {
                check_width(meta, row)?;
                Ok(if options.flashback {
                    insert_sql(meta, row)
                } else {
                    delete_sql(meta, row)
                })
            })
            .collect(),
        RowImages::Update(pairs) => pairs
            .iter()
            .map(|(before, after)| {
                check_width(meta, before)?;
                check_width(meta, after)?;
                Ok(if options.flashback {
                    update(after.as_slice(), before.as_slice())
                } else {
                    update(before.as_slice(), after.as_slice())
                })
            })
            .collect(),
    }
}

/// 설정 + 메타데이터 캐시를 묶은 재구성 엔진
pub struct SqlEngine<L> {
    options: SqlOptions,
    cache: TableMetadataCache,
    lookup: Arc<L>,
}

impl<L: MetadataLookup> SqlEngine<L> {
    pub fn new(options: SqlOptions, lookup: Arc<L>) -> Self {
        SqlEngine {
            options,
            cache: TableMetadataCache::new(),
            lookup,
        }
    }

    pub fn cache(&self) -> &TableMetadataCache {
        &self.cache
    }

    async fn rows_event(&self, data: &RowsEventData) -> Result<Vec<String>> {
        if !self.options.sql_types.contains(&data.sql_type()) {
            debug!(
                "Skipping {} on {}.{}: sql type not selected",
                data.sql_type(),
                data.database,
                data.table
            );
            return Ok(Vec::new());
        }

        let meta = self
            .cache
            .resolve(self.lookup.as_ref(), data.table_id, &data.database, &data.table)
            .await?;

        rows_statements(&meta, &data.rows, &self.options)
    }

    /// 이벤트 하나를 SQL 문 목록으로 재구성
    ///
    /// 출력할 것이 없으면 빈 목록입니다.
    pub async fn reconstruct(&self, event: &BinlogEvent) -> Result<Vec<String>> {
        match &event.data {
            BinlogEventData::Rows(data) => self.rows_event(data).await,
            BinlogEventData::Query(query) if !self.options.flashback => Ok(query_statements(query)),
            _ => Ok(Vec::new()),
        }
    }
}
