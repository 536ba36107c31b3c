//! Structured file logging for warden.
//!
//! Log levels:
//! - ERROR: Registry writes that failed or left state inconsistent
//! - WARN: Recoverable conditions (malformed ledger lines, dead sessions, denials)
//! - INFO: Task creation, admissions, lifecycle transitions
//! - DEBUG: Lock acquisition, registry reads/writes, session probes
//! - TRACE: Raw session output sizes and ledger line counts
//!
//! Logging goes to a file rather than stdout because `warden serve` uses
//! stdout as its protocol channel. Several warden processes (one-shot CLI
//! calls, the server, the monitor) append to the same file, so every record
//! carries the pid.
//!
//! Environment:
//! - `WARDEN_DEBUG=1` (or `--debug`) lowers the threshold to DEBUG
//! - `WARDEN_LOG_LEVEL=<level>` picks the threshold explicitly
//! - `WARDEN_LOG_FILE=<path>` replaces `~/.warden/warden.log`
//!
//! Until [`init_with_debug`] runs every log call is a no-op.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Case-insensitive level name, as accepted in `WARDEN_LOG_LEVEL`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Threshold for a run: an explicit `WARDEN_LOG_LEVEL` wins, otherwise
/// debug mode means DEBUG and everything else INFO.
fn threshold(debug: bool, explicit: Option<&str>) -> LogLevel {
    match explicit.and_then(LogLevel::parse) {
        Some(level) => level,
        None if debug => LogLevel::Debug,
        None => LogLevel::Info,
    }
}

/// Start logging. `debug` comes from `--debug`; the environment can
/// raise it further.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_flag("WARDEN_DEBUG");
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let explicit = std::env::var("WARDEN_LOG_LEVEL").ok();
    let level = threshold(debug_enabled, explicit.as_deref());
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    let path = match std::env::var_os("WARDEN_LOG_FILE") {
        Some(path) => Some(PathBuf::from(path)),
        None => dirs::home_dir().map(|h| h.join(".warden").join("warden.log")),
    };
    if let Some(path) = path {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        LOG_PATH.set(path).ok();
    }
}

pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// One log line, without the trailing newline.
fn format_record(timestamp: &str, level: LogLevel, pid: u32, msg: &str) -> String {
    format!("[{}] [{:<5}] [pid {}] {}", timestamp, level.as_str(), pid, msg)
}

pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }
    let Some(path) = LOG_PATH.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();
        let _ = writeln!(
            file,
            "{}",
            format_record(&timestamp, level, std::process::id(), msg)
        );
    }
}

pub fn log(msg: &str) {
    log_at(LogLevel::Info, msg);
}

pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Lifecycle events: tasks created, agents deployed, terminated, reconciled.
#[macro_export]
macro_rules! wlog {
    ($($arg:tt)*) => {
        $crate::log::log(&format!($($arg)*))
    };
}

/// A registry or session operation failed in a way the caller will see.
#[macro_export]
macro_rules! wlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Spawn denials, skipped ledger lines, rollbacks and other recoverable
/// surprises.
#[macro_export]
macro_rules! wlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Per-call detail: tmux invocations, document sizes.
#[macro_export]
macro_rules! wlog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_parse_level_names() {
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse(" warning "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::from_u8(255), LogLevel::Trace);
    }

    #[test]
    fn test_threshold() {
        assert_eq!(threshold(false, None), LogLevel::Info);
        assert_eq!(threshold(true, None), LogLevel::Debug);
        assert_eq!(threshold(true, Some("error")), LogLevel::Error);
        assert_eq!(threshold(false, Some("nonsense")), LogLevel::Info);
    }

    #[test]
    fn test_format_record() {
        let line = format_record("2026-01-02 03:04:05.006", LogLevel::Warn, 42, "denied");
        assert_eq!(line, "[2026-01-02 03:04:05.006] [WARN ] [pid 42] denied");
    }

    #[test]
    fn test_uninitialized_logging_is_noop() {
        wlog!("hello {}", 1);
        wlog_warn!("warn {}", 2);
    }
}
