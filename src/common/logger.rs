// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::Arc;

/// Severity of a log message.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub level: LogLevel,
    pub source: &'static str,
    pub message: String,
}

impl LogEntry {
    #[must_use]
    pub fn new(level: LogLevel, source: &'static str, message: String) -> Self {
        Self {
            level,
            source,
            message,
        }
    }
}

pub type ArcLogger = Arc<dyn ILogger + Send + Sync>;

pub trait ILogger {
    fn log(&self, entry: LogEntry);
}

pub struct DummyLogger;

impl DummyLogger {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {})
    }
}

impl ILogger for DummyLogger {
    fn log(&self, _: LogEntry) {}
}

// A lighter-weight logging handle scoped to one handler instance, used for
// a handler's own lenient-mode diagnostics rather than the pipeline-wide
// feed.
pub type ArcMsgLogger = Arc<dyn MsgLogger + Send + Sync>;

pub trait MsgLogger {
    fn log(&self, level: LogLevel, msg: &str);
}

pub struct DummyMsgLogger;

impl MsgLogger for DummyMsgLogger {
    fn log(&self, _: LogLevel, _: &str) {}
}

#[must_use]
pub fn new_dummy_msg_logger() -> ArcMsgLogger {
    Arc::new(DummyMsgLogger {})
}
