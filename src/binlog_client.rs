//! MySQL Binlog 클라이언트
//!
//! 복제 클라이언트로 등록한 뒤 지정한 파일/위치부터 이벤트를 받아 디코딩합니다.

use crate::binlog::EventDecoder;
use crate::connection::ConnectionConfig;
use crate::error::{CdcError, Result};
use crate::events::BinlogEvent;
use crate::offset::BinlogPosition;
use mysql_async::{BinlogStreamRequest, Conn};
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tracing::{debug, error, info};

/// Binlog 클라이언트
pub struct BinlogClient {
    config: ConnectionConfig,
    start: BinlogPosition,
}

impl BinlogClient {
    /// 새 Binlog 클라이언트 생성
    pub fn new(config: ConnectionConfig, binlog_filename: String, binlog_position: u64) -> Self {
        BinlogClient {
            config,
            start: BinlogPosition::new(binlog_filename, binlog_position),
        }
    }

    pub fn start_position(&self) -> &BinlogPosition {
        &self.start
    }

    fn request(&self) -> BinlogStreamRequest<'_> {
        BinlogStreamRequest::new(self.config.server_id)
            .with_filename(self.start.filename.as_bytes())
            .with_pos(self.start.position)
    }

    /// Binlog 스트리밍 시작
    ///
    /// 디코딩한 이벤트를 순서대로 보냅니다. 에러는 한 번 보낸 뒤 스트림을 닫습니다.
    pub async fn start_streaming(&self, capacity: usize) -> Result<mpsc::Receiver<Result<BinlogEvent>>> {
        info!(
            "Starting binlog streaming from {} (server_id={})",
            self.start, self.config.server_id
        );

        let conn = Conn::new(self.config.build_opts())
            .await
            .map_err(|e| CdcError::ConnectionError(format!("Failed to connect for binlog stream: {}", e)))?;

        let mut stream = conn
            .get_binlog_stream(self.request())
            .await
            .map_err(|e| CdcError::ConnectionError(format!("Failed to start binlog stream: {}", e)))?;

        let (tx, rx) = mpsc::channel(capacity.max(1));

        tokio::spawn(async move {
            let mut decoder = EventDecoder::new();

            while let Some(item) = stream.next().await {
                let decoded = item
                    .map_err(|e| CdcError::BinlogParseError(format!("binlog stream error: {}", e)))
                    .and_then(|event| decoder.decode(&event));

                if let Err(ref e) = decoded {
                    error!("Binlog streaming error: {}", e);
                }
                let failed = decoded.is_err();

                if tx.send(decoded).await.is_err() {
                    debug!("Event receiver dropped, closing binlog stream");
                    break;
                }
                if failed {
                    break;
                }
            }

            info!("Binlog streaming ended");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_start_position() {
        let client = BinlogClient::new(ConnectionConfig::default(), "mysql-bin.000003".to_string(), 4);
        assert_eq!(client.start_position().to_string(), "mysql-bin.000003:4");
        assert_eq!(client.start_position().file_sequence(), Some(3));
    }
}
