//! 명령행 옵션 파싱 및 실행 설정 검증

use crate::connection::ConnectionConfig;
use crate::error::{CdcError, Result};
use crate::events::SqlType;
use crate::offset::BINLOG_HEADER_LEN;
use crate::sql::SqlOptions;
use chrono::{Local, NaiveDateTime};
use clap::{ArgAction, Parser};
use serde::Serialize;
use std::path::PathBuf;

/// 날짜 옵션 형식
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// MySQL binlog 에서 원본 SQL 또는 되돌리기(flashback) SQL 을 생성합니다.
#[derive(Parser, Debug, Clone)]
#[command(name = "binlog2sql", version, disable_help_flag = true)]
pub struct CliArgs {
    #[arg(long, action = ArgAction::Help, help = "Print help")]
    help: Option<bool>,

    /// Host the MySQL database server located
    #[arg(short = 'h', long, default_value = "127.0.0.1")]
    pub host: String,

    /// MySQL Username to log in as
    #[arg(short = 'u', long, default_value = "root")]
    pub user: String,

    /// MySQL Password to use
    #[arg(short = 'p', long, default_value = "")]
    pub password: String,

    /// MySQL port to use
    #[arg(short = 'P', long, default_value_t = 3306)]
    pub port: u16,

    /// Start binlog file to be parsed
    #[arg(long)]
    pub start_file: Option<String>,

    /// Stop binlog file to be parsed (default: same as --start-file)
    #[arg(long)]
    pub stop_file: Option<String>,

    /// Start position of the --start-file
    #[arg(long, default_value_t = BINLOG_HEADER_LEN)]
    pub start_position: u64,

    /// Stop position of the --stop-file (0 means end of file)
    #[arg(long, default_value_t = 0)]
    pub stop_position: u64,

    /// Start reading the binlog at first event having a datetime equal or posterior to the argument, format: "%Y-%m-%d %H:%M:%S"
    #[arg(long)]
    pub start_datetime: Option<String>,

    /// Stop reading the binlog at first event having a datetime equal or posterior to the argument, format: "%Y-%m-%d %H:%M:%S"
    #[arg(long)]
    pub stop_datetime: Option<String>,

    /// Flashback data to start_position of start_file
    #[arg(short = 'B', long)]
    pub flashback: bool,

    /// Generate insert sql without primary key if exists
    #[arg(short = 'K', long = "no-primary-key", visible_alias = "noPK")]
    pub no_primary_key: bool,

    /// Only dump DML statements (skip query events)
    #[arg(long)]
    pub only_dml: bool,

    /// UPDATE sets and matches only changed columns plus primary key
    #[arg(long)]
    pub simple: bool,

    /// Wait for more data from the server instead of stopping at the end of the last binlog
    #[arg(long)]
    pub stop_never: bool,

    /// Dbs you want to process (comma separated)
    #[arg(short = 'd', long, value_delimiter = ',')]
    pub databases: Vec<String>,

    /// Tables you want to process (comma separated)
    #[arg(short = 't', long, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Sql type you want to process, support INSERT, UPDATE, DELETE (comma separated)
    #[arg(long = "sql-type", value_delimiter = ',')]
    pub sql_type: Vec<SqlType>,

    /// Parse a local binlog file instead of streaming from the server
    #[arg(long)]
    pub local: bool,

    /// Local binlog file path, used together with --local
    #[arg(long)]
    pub local_file: Option<PathBuf>,

    /// Number of reconstruction workers
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// Server id to register as a replica (default: random)
    #[arg(long)]
    pub server_id: Option<u32>,
}

/// 검증을 마친 실행 설정
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub start_file: String,
    pub stop_file: String,
    pub start_position: u64,
    /// None 이면 stop-file 끝까지
    pub stop_position: Option<u64>,
    /// epoch 초
    pub start_time: Option<i64>,
    pub stop_time: Option<i64>,
    pub flashback: bool,
    pub no_primary_key: bool,
    pub only_dml: bool,
    pub simple: bool,
    pub stop_never: bool,
    pub databases: Vec<String>,
    pub tables: Vec<String>,
    pub sql_types: Vec<SqlType>,
    pub local_file: Option<PathBuf>,
    pub threads: usize,
}

impl Config {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        if args.local != args.local_file.is_some() {
            return Err(CdcError::ConfigError(
                "--local and --local-file must be used together".to_string(),
            ));
        }

        if args.flashback && args.no_primary_key {
            return Err(CdcError::ConfigError(
                "only one of flashback or no_pk can be True".to_string(),
            ));
        }

        if args.threads == 0 {
            return Err(CdcError::ConfigError("--threads must be at least 1".to_string()));
        }

        let local_name = args
            .local_file
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned());

        let start_file = match (args.start_file, local_name) {
            (Some(file), _) => file,
            (None, Some(name)) => name,
            (None, None) => {
                return Err(CdcError::ConfigError("Lack of parameter: start_file".to_string()))
            }
        };
        let stop_file = args.stop_file.unwrap_or_else(|| start_file.clone());

        let start_time = args.start_datetime.as_deref().map(parse_datetime).transpose()?;
        let stop_time = args.stop_datetime.as_deref().map(parse_datetime).transpose()?;
        if let (Some(start), Some(stop)) = (start_time, stop_time) {
            if stop < start {
                return Err(CdcError::ConfigError(
                    "--stop-datetime must not be earlier than --start-datetime".to_string(),
                ));
            }
        }

        let requested = if args.sql_type.is_empty() {
            SqlType::ALL.to_vec()
        } else {
            args.sql_type
        };
        let mut sql_types = Vec::new();
        for kind in requested {
            if !sql_types.contains(&kind) {
                sql_types.push(kind);
            }
        }

        let connection = ConnectionConfig {
            hostname: args.host,
            port: args.port,
            username: args.user,
            password: args.password,
            server_id: args.server_id.unwrap_or_else(random_server_id),
            ..Default::default()
        };

        Ok(Config {
            connection,
            start_file,
            stop_file,
            start_position: args.start_position,
            stop_position: (args.stop_position != 0).then_some(args.stop_position),
            start_time,
            stop_time,
            flashback: args.flashback,
            no_primary_key: args.no_primary_key,
            only_dml: args.only_dml,
            simple: args.simple,
            stop_never: args.stop_never,
            databases: args.databases.into_iter().filter(|s| !s.is_empty()).collect(),
            tables: args.tables.into_iter().filter(|s| !s.is_empty()).collect(),
            sql_types,
            local_file: args.local_file,
            threads: args.threads,
        })
    }

    pub fn is_local(&self) -> bool {
        self.local_file.is_some()
    }

    pub fn sql_options(&self) -> SqlOptions {
        SqlOptions {
            flashback: self.flashback,
            simple_update: self.simple,
            no_primary_key: self.no_primary_key,
            sql_types: self.sql_types.iter().copied().collect(),
        }
    }
}

/// "YYYY-MM-DD HH:MM:SS" (로컬 시간) → epoch 초
pub fn parse_datetime(value: &str) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), DATETIME_FORMAT)
        .map_err(|_| CdcError::ConfigError(format!("Incorrect datetime argument: {}", value)))?;

    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| CdcError::ConfigError(format!("Nonexistent local time: {}", value)))
}

/// 0 이 아닌 임의의 server id
fn random_server_id() -> u32 {
    let id = (uuid::Uuid::new_v4().as_u128() as u32) & 0x7fff_ffff;
    id.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        let mut argv = vec!["binlog2sql"];
        argv.extend_from_slice(args);
        Config::from_args(CliArgs::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--start-file", "mysql-bin.000002"]).unwrap();
        assert_eq!(config.connection.hostname, "127.0.0.1");
        assert_eq!(config.connection.port, 3306);
        assert_eq!(config.connection.username, "root");
        assert_ne!(config.connection.server_id, 0);
        assert_eq!(config.stop_file, "mysql-bin.000002");
        assert_eq!(config.start_position, 4);
        assert_eq!(config.stop_position, None);
        assert_eq!(config.sql_types, SqlType::ALL.to_vec());
        assert_eq!(config.threads, 4);
        assert!(!config.is_local());
    }

    #[test]
    fn test_short_flags() {
        let config = parse(&[
            "-h", "10.0.0.5", "-u", "repl", "-p", "pw", "-P", "3307",
            "--start-file", "mysql-bin.000001", "-B", "-d", "test,shop", "-t", "t1",
        ])
        .unwrap();
        assert_eq!(config.connection.hostname, "10.0.0.5");
        assert_eq!(config.connection.password, "pw");
        assert_eq!(config.connection.port, 3307);
        assert!(config.flashback);
        assert_eq!(config.databases, vec!["test", "shop"]);
        assert_eq!(config.tables, vec!["t1"]);
    }

    #[test]
    fn test_no_pk_alias() {
        let config = parse(&["--start-file", "mysql-bin.000001", "--noPK"]).unwrap();
        assert!(config.no_primary_key);
        let config = parse(&["--start-file", "mysql-bin.000001", "-K"]).unwrap();
        assert!(config.no_primary_key);
    }

    #[test]
    fn test_flashback_excludes_no_pk() {
        let err = parse(&["--start-file", "mysql-bin.000001", "-B", "-K"]).unwrap_err();
        assert!(matches!(err, CdcError::ConfigError(_)));
    }

    #[test]
    fn test_start_file_required() {
        assert!(matches!(parse(&[]), Err(CdcError::ConfigError(_))));
    }

    #[test]
    fn test_local_requires_file() {
        assert!(parse(&["--local"]).is_err());
        assert!(parse(&["--local-file", "/tmp/mysql-bin.000007"]).is_err());

        let config = parse(&["--local", "--local-file", "/tmp/mysql-bin.000007"]).unwrap();
        assert!(config.is_local());
        assert_eq!(config.start_file, "mysql-bin.000007");
        assert_eq!(config.stop_file, "mysql-bin.000007");
    }

    #[test]
    fn test_sql_type_parsing() {
        let config = parse(&["--start-file", "mysql-bin.000001", "--sql-type", "insert,DELETE,insert"]).unwrap();
        assert_eq!(config.sql_types, vec![SqlType::Insert, SqlType::Delete]);
        assert!(CliArgs::try_parse_from(["binlog2sql", "--sql-type", "replace"]).is_err());
    }

    #[test]
    fn test_datetime_range() {
        let config = parse(&[
            "--start-file", "mysql-bin.000001",
            "--start-datetime", "2024-06-15 14:00:00",
            "--stop-datetime", "2024-06-15 15:00:00",
        ])
        .unwrap();
        assert_eq!(config.stop_time.unwrap() - config.start_time.unwrap(), 3600);

        let err = parse(&[
            "--start-file", "mysql-bin.000001",
            "--start-datetime", "2024-06-15 15:00:00",
            "--stop-datetime", "2024-06-15 14:00:00",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_bad_datetime() {
        assert!(parse_datetime("2024/06/15").is_err());
        assert!(parse_datetime("2024-06-15 14:30:45").is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(parse(&["--start-file", "mysql-bin.000001", "--threads", "0"]).is_err());
    }

    #[test]
    fn test_config_serializes_without_password() {
        let config = parse(&["--start-file", "mysql-bin.000001", "-p", "hunter2"]).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
