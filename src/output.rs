//! 출력 포맷 및 순서 보장 기록

use crate::offset::PositionWindow;
use chrono::{Local, TimeZone};
use std::collections::BTreeMap;
use std::io::{self, Write};
use tracing::warn;

/// 이벤트 타임스탬프를 로컬 시간 "YYYY-MM-DD HH:MM:SS" 로 변환
pub fn format_event_time(timestamp: u32) -> String {
    match Local.timestamp_opt(i64::from(timestamp), 0).earliest() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

/// 각 문장 뒤에 위치 주석을 붙여 한 블록으로 합침
///
/// 문장이 없으면 None.
pub fn annotate(statements: &[String], window: &PositionWindow) -> Option<String> {
    if statements.is_empty() {
        return None;
    }
    let suffix = format!(
        " #start {} end {} time {}",
        window.start,
        window.end,
        format_event_time(window.timestamp)
    );
    Some(
        statements
            .iter()
            .map(|stmt| format!("{}{}", stmt, suffix))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// 회전 안내 줄
pub fn rotate_notice(next_file: &str) -> String {
    format!("#Rotate to {}", next_file)
}

/// 순서 번호대로 기록하는 출력기
///
/// worker 결과가 뒤섞여 도착해도 `next_seq` 부터 연속된 항목만 씁니다.
/// 출력이 없는 항목은 `None` 으로 자리만 채웁니다.
pub struct OrderedEmitter<W: Write> {
    out: W,
    next_seq: u64,
    pending: BTreeMap<u64, Option<String>>,
    lines_written: u64,
}

impl<W: Write> OrderedEmitter<W> {
    pub fn new(out: W) -> Self {
        OrderedEmitter {
            out,
            next_seq: 0,
            pending: BTreeMap::new(),
            lines_written: 0,
        }
    }

    pub fn accept(&mut self, seq: u64, text: Option<String>) -> io::Result<()> {
        self.pending.insert(seq, text);

        let mut wrote = false;
        while let Some(text) = self.pending.remove(&self.next_seq) {
            if let Some(text) = text {
                writeln!(self.out, "{}", text)?;
                self.lines_written += text.lines().count() as u64;
                wrote = true;
            }
            self.next_seq += 1;
        }
        if wrote {
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// 남은 항목을 버리고 writer 반환
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        if !self.pending.is_empty() {
            warn!(
                "Discarding {} out-of-order result(s) waiting for seq {}",
                self.pending.len(),
                self.next_seq
            );
        }
        self.out.flush()?;
        Ok((self.out, self.lines_written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> PositionWindow {
        PositionWindow {
            start: 120,
            end: 300,
            timestamp: 1_718_461_845,
        }
    }

    #[test]
    fn test_annotate_each_statement() {
        let text = annotate(
            &["USE test;".to_string(), "create table t (id int);".to_string()],
            &window(),
        )
        .unwrap();
        let time = format_event_time(1_718_461_845);
        assert_eq!(
            text,
            format!(
                "USE test; #start 120 end 300 time {t}\ncreate table t (id int); #start 120 end 300 time {t}",
                t = time
            )
        );
        assert!(annotate(&[], &window()).is_none());
    }

    #[test]
    fn test_event_time_format() {
        let time = format_event_time(0);
        assert_eq!(time.len(), "1970-01-01 00:00:00".len());
        assert_eq!(&time[4..5], "-");
    }

    #[test]
    fn test_emitter_reorders() {
        let mut emitter = OrderedEmitter::new(Vec::new());
        emitter.accept(2, Some("c".to_string())).unwrap();
        emitter.accept(1, None).unwrap();
        assert_eq!(emitter.pending_len(), 2);

        emitter.accept(0, Some("a\nb".to_string())).unwrap();
        assert_eq!(emitter.pending_len(), 0);
        assert_eq!(emitter.lines_written(), 3);

        let (out, lines) = emitter.finish().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a\nb\nc\n");
        assert_eq!(lines, 3);
    }

    #[test]
    fn test_emitter_holds_gap() {
        let mut emitter = OrderedEmitter::new(Vec::new());
        emitter.accept(1, Some("b".to_string())).unwrap();
        let (out, _) = emitter.finish().unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_rotate_notice() {
        assert_eq!(rotate_notice("mysql-bin.000002"), "#Rotate to mysql-bin.000002");
    }
}
