use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
    Command,
    Process,
    System,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
            LogLevel::Command => "COMMAND",
            LogLevel::Process => "PROCESS",
            LogLevel::System => "SYSTEM",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Operator-visible history, bounded to the most recent `capacity` records.
///
/// Cheap to clone; all clones share one buffer.
#[derive(Debug, Clone)]
pub struct LogSink {
    records: Arc<StdMutex<VecDeque<LogRecord>>>,
    capacity: usize,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Arc::new(StdMutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn append(&self, level: LogLevel, message: impl Into<String>) {
        let record = LogRecord {
            timestamp: Local::now(),
            level,
            message: message.into(),
        };

        match level {
            LogLevel::Error => error!(target: "shell_session_server::session_log", kind = %level, "{}", record.message),
            _ => info!(target: "shell_session_server::session_log", kind = %level, "{}", record.message),
        }

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Newline-joined rendering, oldest first.
    pub fn render(&self) -> String {
        self.snapshot()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
