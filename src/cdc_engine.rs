//! CDC 파이프라인 - 이벤트 선별, 병렬 재구성, 순서 보장 출력
//!
//! 파이프라인은 다음 단계로 진행됩니다:
//! 1. producer 가 입력 순서대로 이벤트를 읽어 스캔 커서를 갱신하고 선별
//! 2. 통과한 이벤트에 순서 번호와 위치 구간을 붙여 worker 들에게 분배
//! 3. emitter 가 worker 결과를 순서 번호대로 기록
//!
//! 종료 조건을 만나면 새 이벤트 분배를 멈추고, 이미 분배한 이벤트는 모두 기록한 뒤 끝냅니다.

use crate::config::Config;
use crate::error::{CdcError, Result};
use crate::events::{BinlogEvent, BinlogEventData, RotateEventData};
use crate::filter::{DropReason, EventFilter, Verdict};
use crate::metadata::MetadataLookup;
use crate::offset::{PositionWindow, ScanCursor};
use crate::output::{annotate, rotate_notice, OrderedEmitter};
use crate::sql::SqlEngine;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, trace, warn};

/// bounded 스트리밍에서 이 시간 동안 이벤트가 없으면 끝으로 간주
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// 처리 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingState {
    Idle,
    Streaming,
    /// 분배를 멈추고 남은 결과를 기록하는 중
    Draining,
    Terminated(TerminationReason),
}

/// 종료 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// 입력이 끝남 (로컬 파일 끝 등)
    EndOfStream,
    StopPositionReached,
    IdleTimeout,
    /// 범위 밖 파일로 회전
    RotatedOutOfRange(String),
    DecodeError(String),
    Shutdown,
    /// 출력 단계가 먼저 멈춤
    OutputClosed,
}

/// 파이프라인 실행 옵션
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    /// None 이면 다음 이벤트를 무기한 대기
    pub idle_timeout: Option<Duration>,
    /// stop-never 모드: 위치/회전 범위로 종료하지 않음
    pub follow: bool,
    /// 회전 이벤트로 현재 파일을 갱신할지 여부
    pub track_rotation: bool,
    /// 회전으로 넘어갈 수 있는 파일 목록
    pub eligible_files: Option<Vec<String>>,
}

impl PipelineOptions {
    pub fn for_config(config: &Config, eligible_files: Option<Vec<String>>) -> Self {
        if config.is_local() {
            return PipelineOptions {
                workers: config.threads,
                idle_timeout: None,
                follow: false,
                track_rotation: false,
                eligible_files: None,
            };
        }

        PipelineOptions {
            workers: config.threads,
            idle_timeout: (!config.stop_never).then_some(STREAM_IDLE_TIMEOUT),
            follow: config.stop_never,
            track_rotation: true,
            eligible_files,
        }
    }
}

/// 실행 결과 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: TerminationReason,
    pub events_seen: u64,
    pub events_admitted: u64,
    pub lines_written: u64,
}

struct WorkUnit {
    seq: u64,
    event: BinlogEvent,
    window: PositionWindow,
}

struct Emission {
    seq: u64,
    text: Option<String>,
}

enum Next {
    Event(BinlogEvent),
    Failed(CdcError),
    Closed,
    IdleTimeout,
    Shutdown,
}

async fn next_event(
    events: &mut mpsc::Receiver<Result<BinlogEvent>>,
    idle_timeout: Option<Duration>,
) -> Next {
    let received = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, events.recv()).await {
            Ok(received) => received,
            Err(_) => return Next::IdleTimeout,
        },
        None => events.recv().await,
    };

    match received {
        Some(Ok(event)) => Next::Event(event),
        Some(Err(e)) => Next::Failed(e),
        None => Next::Closed,
    }
}

async fn run_worker<L: MetadataLookup>(
    id: usize,
    units: Arc<Mutex<mpsc::Receiver<WorkUnit>>>,
    results: mpsc::Sender<Emission>,
    sql: Arc<SqlEngine<L>>,
) {
    loop {
        let unit = units.lock().await.recv().await;
        let Some(unit) = unit else {
            break;
        };

        let text = match sql.reconstruct(&unit.event).await {
            Ok(statements) => annotate(&statements, &unit.window),
            Err(e) if e.is_per_event() => {
                warn!("Skipping event ending at {}: {}", unit.window.end, e);
                None
            }
            Err(e) => {
                error!("Failed to reconstruct event ending at {}: {}", unit.window.end, e);
                None
            }
        };

        if results.send(Emission { seq: unit.seq, text }).await.is_err() {
            break;
        }
    }
    debug!("Worker {} finished", id);
}

/// MySQL CDC 엔진
pub struct CdcEngine<L> {
    filter: EventFilter,
    sql: Arc<SqlEngine<L>>,
    options: PipelineOptions,
    cursor: ScanCursor,
    state: ProcessingState,
}

impl<L: MetadataLookup + 'static> CdcEngine<L> {
    /// 새 CDC 엔진 생성
    pub fn new(filter: EventFilter, sql: Arc<SqlEngine<L>>, options: PipelineOptions) -> Self {
        let cursor = ScanCursor::new(filter.start_file.clone());
        CdcEngine {
            filter,
            sql,
            options,
            cursor,
            state: ProcessingState::Idle,
        }
    }

    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    pub fn cursor(&self) -> &ScanCursor {
        &self.cursor
    }

    /// 회전 이벤트 처리. 범위 밖 파일이면 종료 사유 반환.
    fn rotate(&mut self, rotate: &RotateEventData) -> std::result::Result<Option<String>, TerminationReason> {
        if !self.options.track_rotation {
            return Ok(None);
        }

        let next = &rotate.next_binlog_name;
        if !self.options.follow {
            if let Some(files) = &self.options.eligible_files {
                if !files.contains(next) {
                    return Err(TerminationReason::RotatedOutOfRange(next.clone()));
                }
            }
        }

        if self.cursor.rotate(next) {
            info!("Rotate to {}", next);
            return Ok(Some(rotate_notice(next)));
        }
        Ok(None)
    }

    /// 입력이 끝나거나 종료 조건을 만날 때까지 실행
    ///
    /// 디코딩 에러는 남은 결과를 모두 기록한 뒤 에러로 반환합니다.
    pub async fn run<W, S>(
        &mut self,
        mut events: mpsc::Receiver<Result<BinlogEvent>>,
        out: W,
        shutdown: S,
    ) -> Result<RunSummary>
    where
        W: Write + Send + 'static,
        S: Future<Output = ()>,
    {
        let workers = self.options.workers.max(1);
        let (work_tx, work_rx) = mpsc::channel::<WorkUnit>(workers);
        let (result_tx, mut result_rx) = mpsc::channel::<Emission>(workers * 2);

        let emitter = tokio::task::spawn_blocking(move || {
            let mut emitter = OrderedEmitter::new(out);
            while let Some(emission) = result_rx.blocking_recv() {
                emitter.accept(emission.seq, emission.text)?;
            }
            emitter.finish().map(|(_, lines)| lines)
        });

        let work_rx = Arc::new(Mutex::new(work_rx));
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&work_rx),
                    result_tx.clone(),
                    Arc::clone(&self.sql),
                ))
            })
            .collect();

        self.state = ProcessingState::Streaming;
        info!("Pipeline started with {} worker(s) from {}", workers, self.cursor.current_file());

        tokio::pin!(shutdown);
        let mut seq = 0u64;
        let mut events_seen = 0u64;
        let mut events_admitted = 0u64;
        let mut fatal = None;

        let reason = loop {
            let next = tokio::select! {
                _ = &mut shutdown => Next::Shutdown,
                next = next_event(&mut events, self.options.idle_timeout) => next,
            };

            let event = match next {
                Next::Event(event) => event,
                Next::Closed => break TerminationReason::EndOfStream,
                Next::IdleTimeout => break TerminationReason::IdleTimeout,
                Next::Shutdown => break TerminationReason::Shutdown,
                Next::Failed(e) => {
                    error!("Binlog decode failed: {}", e);
                    let reason = TerminationReason::DecodeError(e.to_string());
                    fatal = Some(e);
                    break reason;
                }
            };
            events_seen += 1;

            if let BinlogEventData::Rotate(rotate) = &event.data {
                match self.rotate(rotate) {
                    Ok(Some(notice)) => {
                        if result_tx.send(Emission { seq, text: Some(notice) }).await.is_err() {
                            break TerminationReason::OutputClosed;
                        }
                        seq += 1;
                    }
                    Ok(None) => {}
                    Err(reason) => break reason,
                }
                continue;
            }

            let window = self.cursor.observe(&event.header);

            match self.filter.check(&self.cursor, &event) {
                Verdict::Admit => {
                    events_admitted += 1;
                    if work_tx.send(WorkUnit { seq, event, window }).await.is_err() {
                        break TerminationReason::OutputClosed;
                    }
                    seq += 1;
                }
                Verdict::Drop(DropReason::PastStopPosition) if !self.options.follow => {
                    break TerminationReason::StopPositionReached;
                }
                Verdict::Drop(reason) => {
                    trace!("Dropped event at {}: {:?}", window.end, reason);
                }
            }
        };

        self.state = ProcessingState::Draining;
        info!("Stopping ({:?}), draining {} dispatched event(s)", reason, seq);

        drop(events);
        drop(work_tx);
        drop(result_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }

        let written = emitter.await;
        self.state = ProcessingState::Terminated(reason.clone());

        let lines_written = match written {
            Ok(Ok(lines)) => lines,
            Ok(Err(e)) => return Err(CdcError::IoError(format!("failed to write output: {}", e))),
            Err(e) => return Err(CdcError::Other(format!("output task failed: {}", e))),
        };

        if let Some(e) = fatal {
            return Err(e);
        }

        let summary = RunSummary {
            reason,
            events_seen,
            events_admitted,
            lines_written,
        };
        info!("Pipeline finished: {:?}", summary);
        Ok(summary)
    }
}
