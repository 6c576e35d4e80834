use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use wplacer_protocol::LogLine;

pub const LOG_CAPACITY: usize = 200;

/// Where user-facing status goes. Output lines are short-lived; progress is
/// the latest remaining-pixel count and ETA.
pub trait Reporter: Send + Sync {
    fn output(&self, message: &str);
    fn progress(&self, remaining: usize, eta: Duration);
}

#[derive(Debug, Default)]
struct Board {
    log: VecDeque<LogLine>,
    remaining: Option<usize>,
    eta_ms: Option<u64>,
}

/// In-process sink backing `GET /api/status`.
#[derive(Debug)]
pub struct StatusBoard {
    capacity: usize,
    board: Mutex<Board>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl StatusBoard {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            board: Mutex::new(Board::default()),
        }
    }

    pub fn lines(&self) -> Vec<LogLine> {
        match self.board.lock() {
            Ok(b) => b.log.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn progress_snapshot(&self) -> (Option<usize>, Option<u64>) {
        match self.board.lock() {
            Ok(b) => (b.remaining, b.eta_ms),
            Err(_) => (None, None),
        }
    }
}

impl Reporter for StatusBoard {
    fn output(&self, message: &str) {
        log::info!("{message}");
        let line = LogLine {
            ts: now_rfc3339(),
            message: message.to_string(),
        };
        if let Ok(mut b) = self.board.lock() {
            b.log.push_back(line);
            while b.log.len() > self.capacity {
                b.log.pop_front();
            }
        }
    }

    fn progress(&self, remaining: usize, eta: Duration) {
        if let Ok(mut b) = self.board.lock() {
            b.remaining = Some(remaining);
            b.eta_ms = Some(eta.as_millis().try_into().unwrap_or(u64::MAX));
        }
    }
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
