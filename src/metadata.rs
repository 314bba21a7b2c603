//! 테이블 메타데이터 캐시
//!
//! table id 별로 컬럼 목록과 기본 키 목록을 한 번만 조회하여 보관합니다.
//! 스키마 변경에 따른 무효화는 하지 않습니다.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// 테이블 메타데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub table_id: u64,
    pub database: String,
    pub table: String,
    /// 물리적 컬럼 순서
    pub columns: Vec<String>,
    /// 기본 키 컬럼 (키 순서)
    pub primary_key: Vec<String>,
}

impl TableMetadata {
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == column)
    }
}

/// 메타데이터 조회 인터페이스
pub trait MetadataLookup: Send + Sync {
    /// schema.table 의 컬럼명 (ORDINAL_POSITION 순)
    fn columns_of(
        &self,
        database: &str,
        table: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// schema.table 의 기본 키 컬럼명
    fn primary_key_of(
        &self,
        database: &str,
        table: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// table id → 메타데이터 캐시
///
/// 캐시 적중은 읽기 락만 사용하고, 미스가 나면 `fetch_lock`을 잡은 채로 조회 후
/// 저장하므로 같은 캐시에서 동시에 진행되는 조회는 최대 하나입니다.
#[derive(Default)]
pub struct TableMetadataCache {
    entries: RwLock<HashMap<u64, Arc<TableMetadata>>>,
    fetch_lock: Mutex<()>,
}

impl TableMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, table_id: u64) -> Option<Arc<TableMetadata>> {
        self.entries.read().get(&table_id).cloned()
    }

    /// 메타데이터 조회 (없으면 lookup 으로 가져와 저장)
    ///
    /// 조회에 실패하면 아무것도 저장하지 않으므로 다음 호출에서 다시 시도합니다.
    pub async fn resolve<L: MetadataLookup>(
        &self,
        lookup: &L,
        table_id: u64,
        database: &str,
        table: &str,
    ) -> Result<Arc<TableMetadata>> {
        if let Some(meta) = self.get(table_id) {
            return Ok(meta);
        }

        let _guard = self.fetch_lock.lock().await;

        // 락을 기다리는 동안 다른 worker 가 채웠을 수 있음
        if let Some(meta) = self.get(table_id) {
            return Ok(meta);
        }

        let columns = lookup.columns_of(database, table).await?;
        let primary_key = lookup.primary_key_of(database, table).await?;

        debug!(
            "Loaded metadata for {}.{} (table_id={}, columns={}, pk={:?})",
            database,
            table,
            table_id,
            columns.len(),
            primary_key
        );

        let meta = Arc::new(TableMetadata {
            table_id,
            database: database.to_string(),
            table: table.to_string(),
            columns,
            primary_key,
        });

        self.entries.write().insert(table_id, Arc::clone(&meta));
        Ok(meta)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CdcError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// 테스트용 메모리 기반 lookup
    #[derive(Default)]
    pub(crate) struct StaticLookup {
        pub tables: HashMap<(String, String), (Vec<String>, Vec<String>)>,
        pub column_calls: AtomicUsize,
        pub pk_calls: AtomicUsize,
        pub fail_next: AtomicBool,
        pub delay: Option<Duration>,
    }

    impl StaticLookup {
        pub(crate) fn with_table(mut self, database: &str, table: &str, columns: &[&str], pk: &[&str]) -> Self {
            self.tables.insert(
                (database.to_string(), table.to_string()),
                (
                    columns.iter().map(|c| c.to_string()).collect(),
                    pk.iter().map(|c| c.to_string()).collect(),
                ),
            );
            self
        }

        fn find(&self, database: &str, table: &str) -> Result<&(Vec<String>, Vec<String>)> {
            self.tables
                .get(&(database.to_string(), table.to_string()))
                .ok_or_else(|| CdcError::QueryError(format!("unknown table {}.{}", database, table)))
        }
    }

    impl MetadataLookup for StaticLookup {
        async fn columns_of(&self, database: &str, table: &str) -> Result<Vec<String>> {
            self.column_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CdcError::QueryError("connection dropped".to_string()));
            }
            Ok(self.find(database, table)?.0.clone())
        }

        async fn primary_key_of(&self, database: &str, table: &str) -> Result<Vec<String>> {
            self.pk_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.find(database, table)?.1.clone())
        }
    }

    fn lookup() -> StaticLookup {
        StaticLookup::default().with_table("test", "t", &["id", "a", "b"], &["id"])
    }

    #[tokio::test]
    async fn test_resolve_fetches_once() {
        let cache = TableMetadataCache::new();
        let lookup = lookup();

        let first = cache.resolve(&lookup, 100, "test", "t").await.unwrap();
        let second = cache.resolve(&lookup, 100, "test", "t").await.unwrap();

        assert_eq!(first.columns, vec!["id", "a", "b"]);
        assert_eq!(first.primary_key, vec!["id"]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lookup.column_calls.load(Ordering::SeqCst), 1);
        assert_eq!(lookup.pk_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = Arc::new(TableMetadataCache::new());
        let lookup = Arc::new(StaticLookup {
            delay: Some(Duration::from_millis(20)),
            ..lookup()
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let lookup = Arc::clone(&lookup);
            handles.push(tokio::spawn(async move {
                cache.resolve(lookup.as_ref(), 7, "test", "t").await
            }));
        }
        for handle in handles {
            tokio_test::assert_ok!(handle.await.unwrap());
        }

        assert_eq!(lookup.column_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = TableMetadataCache::new();
        let lookup = lookup();
        lookup.fail_next.store(true, Ordering::SeqCst);

        let err = cache.resolve(&lookup, 100, "test", "t").await.unwrap_err();
        assert!(err.is_per_event());
        assert!(cache.is_empty());

        let meta = cache.resolve(&lookup, 100, "test", "t").await.unwrap();
        assert_eq!(meta.table, "t");
        assert_eq!(lookup.column_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keyed_by_table_id() {
        let cache = TableMetadataCache::new();
        let lookup = lookup().with_table("test", "u", &["k"], &[]);

        cache.resolve(&lookup, 1, "test", "t").await.unwrap();
        let u = cache.resolve(&lookup, 2, "test", "u").await.unwrap();

        assert_eq!(u.columns, vec!["k"]);
        assert!(u.primary_key.is_empty());
        assert!(!u.is_primary_key("k"));
        assert_eq!(cache.len(), 2);
    }
}
