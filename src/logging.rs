//! Per-overlay log stream
//!
//! Every overlay log line is emitted through `tracing` and fanned out to the
//! host through `mpsc` receivers handed out by [`OverlayLog::subscribe`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::constants::logging::{INCOMPATIBLE_ADDON_MARKER, INCOMPATIBLE_ADDON_MESSAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One line of the host-facing log stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Outcome of [`OverlayLog::log`], tells the caller whether to stop the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Logged,
    Suppressed,
    /// The incompatible-addon marker was seen for the first time
    IncompatibleAddon,
}

pub struct OverlayLog {
    name: String,
    disabled: AtomicBool,
    sinks: Mutex<Vec<Sender<LogEntry>>>,
}

impl OverlayLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disabled: AtomicBool::new(false),
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Open a new receiver for this overlay's log lines
    pub fn subscribe(&self) -> Receiver<LogEntry> {
        let (tx, rx) = mpsc::channel();
        self.sinks.lock().push(tx);
        rx
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Emit a line. Once the incompatible-addon marker has been seen the
    /// escalated entry and the triggering line are written, then the log goes quiet.
    pub fn log(&self, level: LogLevel, message: &str) -> LogOutcome {
        if self.is_disabled() {
            return LogOutcome::Suppressed;
        }

        if message.contains(INCOMPATIBLE_ADDON_MARKER) {
            // Only the caller that flips the flag escalates
            if self.disabled.swap(true, Ordering::AcqRel) {
                return LogOutcome::Suppressed;
            }
            self.emit(LogLevel::Error, INCOMPATIBLE_ADDON_MESSAGE);
            self.emit(level, message);
            return LogOutcome::IncompatibleAddon;
        }

        self.emit(level, message);
        LogOutcome::Logged
    }

    fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => trace!(overlay = %self.name, "{}", message),
            LogLevel::Debug => debug!(overlay = %self.name, "{}", message),
            LogLevel::Info => info!(overlay = %self.name, "{}", message),
            LogLevel::Warning => warn!(overlay = %self.name, "{}", message),
            LogLevel::Error => error!(overlay = %self.name, "{}", message),
        }

        let entry = LogEntry {
            level,
            message: format!("{}: {}", self.name, message),
        };
        // Drop receivers the host has let go of
        self.sinks.lock().retain(|sink| sink.send(entry.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_prefixed_with_overlay_name() {
        let log = OverlayLog::new("mini");
        let rx = log.subscribe();

        assert_eq!(log.log(LogLevel::Info, "hello"), LogOutcome::Logged);

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.message, "mini: hello");
    }

    #[test]
    fn test_incompatible_addon_escalates_once_then_suppresses() {
        let log = OverlayLog::new("mini");
        let rx = log.subscribe();

        let outcome = log.log(LogLevel::Error, "BrowserError: Xilium.CefGlue failed");
        assert_eq!(outcome, LogOutcome::IncompatibleAddon);
        assert!(log.is_disabled());

        let entries: Vec<_> = rx.try_iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert!(entries[0].message.contains("incompatible addon"));
        assert!(entries[1].message.contains("Xilium.CefGlue"));

        assert_eq!(log.log(LogLevel::Error, "later"), LogOutcome::Suppressed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_marker_escalates_once() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        const THREADS: usize = 8;
        for _ in 0..50 {
            let log = Arc::new(OverlayLog::new("mini"));
            let rx = log.subscribe();
            let barrier = Arc::new(Barrier::new(THREADS));

            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let log = log.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        log.log(LogLevel::Error, "Xilium.CefGlue boom")
                    })
                })
                .collect();
            let outcomes: Vec<LogOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let escalated = outcomes
                .iter()
                .filter(|outcome| **outcome == LogOutcome::IncompatibleAddon)
                .count();
            assert_eq!(escalated, 1);
            assert!(
                outcomes
                    .iter()
                    .all(|outcome| matches!(outcome, LogOutcome::IncompatibleAddon | LogOutcome::Suppressed))
            );
            assert_eq!(rx.try_iter().count(), 2);
        }
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let log = OverlayLog::new("mini");
        drop(log.subscribe());
        let rx = log.subscribe();

        log.log(LogLevel::Debug, "still delivered");

        assert_eq!(log.sinks.lock().len(), 1);
        assert_eq!(rx.try_recv().unwrap().message, "mini: still delivered");
    }
}
