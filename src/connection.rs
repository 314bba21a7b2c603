//! MySQL 데이터베이스 연결 관리

use crate::error::{CdcError, Result};
use crate::metadata::MetadataLookup;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// MySQL 연결 설정
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: Option<String>,
    /// 복제 클라이언트로 등록할 server id
    pub server_id: u32,
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "127.0.0.1".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: None,
            server_id: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn build_opts(&self) -> Opts {
        let mut opts = OptsBuilder::default()
            .ip_or_hostname(&self.hostname)
            .tcp_port(self.port)
            .user(Some(&self.username))
            .prefer_socket(Some(false));

        if !self.password.is_empty() {
            opts = opts.pass(Some(&self.password));
        }

        if let Some(ref database) = self.database {
            opts = opts.db_name(Some(database));
        }

        opts.into()
    }
}

/// Binlog 관련 서버 변수
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVariables {
    pub server_id: u64,
    pub log_bin: bool,
    pub binlog_format: String,
    pub binlog_row_image: String,
}

impl ServerVariables {
    /// 행 기반 재구성이 가능한 서버인지 확인
    pub fn check(&self) -> Result<()> {
        if self.server_id == 0 {
            return Err(CdcError::PreflightError(
                "missing server_id in mysql server".to_string(),
            ));
        }
        if !self.log_bin {
            return Err(CdcError::PreflightError(
                "binlog is disabled (log_bin=OFF)".to_string(),
            ));
        }
        if !self.binlog_format.eq_ignore_ascii_case("ROW") {
            return Err(CdcError::PreflightError(format!(
                "binlog_format must be ROW, got {}",
                self.binlog_format
            )));
        }
        if !self.binlog_row_image.eq_ignore_ascii_case("FULL") {
            return Err(CdcError::PreflightError(format!(
                "binlog_row_image must be FULL, got {}",
                self.binlog_row_image
            )));
        }
        Ok(())
    }
}

/// MySQL 연결 래퍼
///
/// 메타데이터 조회는 여러 worker 가 동시에 부르므로 풀에서 연결을 꺼내 씁니다.
pub struct MySqlConnection {
    pool: Pool,
    config: ConnectionConfig,
}

impl MySqlConnection {
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        info!("Connecting to {}:{}", config.hostname, config.port);

        let pool = Pool::new(config.build_opts());
        let connection = MySqlConnection { pool, config };

        // 연결 가능 여부를 미리 확인
        connection.conn().await?;

        info!("Connected to MySQL server");
        Ok(connection)
    }

    /// 살아있는 연결 하나 획득 (끊긴 연결은 ping 으로 걸러냄)
    async fn conn(&self) -> Result<Conn> {
        let mut conn = tokio::time::timeout(self.config.timeout, self.pool.get_conn())
            .await
            .map_err(|_| {
                CdcError::ConnectionError(format!(
                    "Timed out connecting to {}:{}",
                    self.config.hostname, self.config.port
                ))
            })?
            .map_err(|e| CdcError::ConnectionError(format!("Failed to connect to MySQL: {}", e)))?;

        conn.ping()
            .await
            .map_err(|e| CdcError::ConnectionError(format!("MySQL ping failed: {}", e)))?;

        Ok(conn)
    }

    /// Binlog 관련 서버 변수 조회
    pub async fn server_variables(&self) -> Result<ServerVariables> {
        let mut conn = self.conn().await?;
        let row: Option<(u64, u8, String, String)> = conn
            .query_first("SELECT @@server_id, @@log_bin, @@binlog_format, @@binlog_row_image")
            .await
            .map_err(|e| CdcError::PreflightError(format!("Failed to query server variables: {}", e)))?;

        let (server_id, log_bin, binlog_format, binlog_row_image) = row.ok_or_else(|| {
            CdcError::PreflightError("Server variables not available".to_string())
        })?;

        let vars = ServerVariables {
            server_id,
            log_bin: log_bin != 0,
            binlog_format,
            binlog_row_image,
        };
        debug!("Server variables: {:?}", vars);
        Ok(vars)
    }

    /// 서버의 binlog 파일 목록 (SHOW BINARY LOGS 순서)
    pub async fn list_binlog_files(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let rows: Vec<mysql_async::Row> = conn
            .query("SHOW BINARY LOGS")
            .await
            .map_err(|e| CdcError::PreflightError(format!("Failed to list binary logs: {}", e)))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.get::<String, _>(0))
            .collect())
    }

    pub async fn close(&self) -> Result<()> {
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(|e| CdcError::ConnectionError(format!("Failed to close pool: {}", e)))
    }
}

impl MetadataLookup for MySqlConnection {
    async fn columns_of(&self, database: &str, table: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await.map_err(|e| CdcError::QueryError(e.to_string()))?;
        conn.exec(
            "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
            (database, table),
        )
        .await
        .map_err(|e| CdcError::QueryError(format!("Failed to query columns of {}.{}: {}", database, table, e)))
    }

    async fn primary_key_of(&self, database: &str, table: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await.map_err(|e| CdcError::QueryError(e.to_string()))?;
        conn.exec(
            "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND COLUMN_KEY = 'PRI' \
             ORDER BY ORDINAL_POSITION",
            (database, table),
        )
        .await
        .map_err(|e| CdcError::QueryError(format!("Failed to query primary key of {}.{}: {}", database, table, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(format: &str, image: &str) -> ServerVariables {
        ServerVariables {
            server_id: 1,
            log_bin: true,
            binlog_format: format.to_string(),
            binlog_row_image: image.to_string(),
        }
    }

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.port, 3306);
        assert_eq!(config.username, "root");
    }

    #[test]
    fn test_build_opts() {
        let mut config = ConnectionConfig::new("db.internal", "repl");
        config.port = 3307;
        config.password = "secret".to_string();

        let opts = config.build_opts();
        assert_eq!(opts.ip_or_hostname(), "db.internal");
        assert_eq!(opts.tcp_port(), 3307);
        assert_eq!(opts.user(), Some("repl"));
        assert_eq!(opts.pass(), Some("secret"));
    }

    #[test]
    fn test_password_not_serialized() {
        let mut config = ConnectionConfig::default();
        config.password = "secret".to_string();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("127.0.0.1"));
    }

    #[test]
    fn test_server_variables_check() {
        assert!(vars("ROW", "FULL").check().is_ok());
        assert!(vars("row", "full").check().is_ok());
        assert!(matches!(vars("MIXED", "FULL").check(), Err(CdcError::PreflightError(_))));
        assert!(matches!(vars("ROW", "MINIMAL").check(), Err(CdcError::PreflightError(_))));

        let disabled = ServerVariables { log_bin: false, ..vars("ROW", "FULL") };
        assert!(disabled.check().is_err());

        let no_id = ServerVariables { server_id: 0, ..vars("ROW", "FULL") };
        assert!(no_id.check().is_err());
    }

    #[tokio::test]
    #[ignore] // 실제 MySQL 연결 필요
    async fn test_live_preflight() {
        let mut config = ConnectionConfig::new(
            std::env::var("DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            std::env::var("DB_USER").unwrap_or_else(|_| "root".to_string()),
        );
        config.password = std::env::var("DB_PASSWORD").unwrap_or_default();

        let conn = MySqlConnection::connect(config).await.unwrap();
        tokio_test::assert_ok!(conn.server_variables().await.unwrap().check());
        assert!(!conn.list_binlog_files().await.unwrap().is_empty());
        conn.close().await.unwrap();
    }
}
