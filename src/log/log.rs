// SPDX-License-Identifier: GPL-2.0-or-later

use common::{ILogger, LogEntry, LogLevel};
use std::{
    fmt,
    ops::Deref,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::broadcast;

/// Broadcast-based logger shared across the handler graph. Every handler
/// holds an `ArcLogger` and calls `log()`; anything interested (a test, a
/// future CLI front-end) subscribes to the feed.
pub struct Logger {
    feed: broadcast::Sender<LogEntryWithTime>,
}

impl Logger {
    #[must_use]
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self { feed }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntryWithTime> {
        self.feed.subscribe()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl ILogger for Logger {
    fn log(&self, entry: LogEntry) {
        let entry = LogEntryWithTime {
            level: entry.level,
            source: entry.source,
            message: entry.message,
            time: UnixMicro::now(),
        };
        println!("{entry}");
        // Only errors if there are no subscribers.
        self.feed.send(entry).ok();
    }
}

/// Microseconds since the `UNIX_EPOCH`.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixMicro(u64);

impl UnixMicro {
    fn now() -> Self {
        UnixMicro(
            u64::try_from(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("broken system clock")
                    .as_micros(),
            )
            .expect("really broken system clock"),
        )
    }
}

impl Deref for UnixMicro {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntryWithTime {
    pub level: LogLevel,
    pub source: &'static str,
    pub message: String,
    pub time: UnixMicro,
}

impl fmt::Display for LogEntryWithTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            LogLevel::Error => write!(f, "[ERROR] ")?,
            LogLevel::Warning => write!(f, "[WARNING] ")?,
            LogLevel::Info => write!(f, "[INFO] ")?,
            LogLevel::Debug => write!(f, "[DEBUG] ")?,
        };
        write!(f, "{}: {}", self.source, self.message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn logger_messages() {
        let logger = Logger::new();
        let mut feed = logger.subscribe();

        logger.log(LogEntry::new(LogLevel::Info, "s1", "1".to_owned()));
        logger.log(LogEntry::new(LogLevel::Warning, "s2", "2".to_owned()));

        let mut actual = vec![feed.recv().await.unwrap(), feed.recv().await.unwrap()];
        actual.iter_mut().for_each(|v| v.time = UnixMicro(0));

        let expected = vec![
            LogEntryWithTime {
                level: LogLevel::Info,
                source: "s1",
                message: "1".to_owned(),
                time: UnixMicro(0),
            },
            LogEntryWithTime {
                level: LogLevel::Warning,
                source: "s2",
                message: "2".to_owned(),
                time: UnixMicro(0),
            },
        ];

        assert_eq!(actual, expected);
    }
}
