//! # Client Logger
//!
//! Diagnostic output for one `TickerClient`. The logger is handed to every
//! component the client builds, so toggling it affects that client only and no
//! process-wide flag exists. Records are forwarded to the `log` facade under
//! the `yticker` target; the host application decides where they end up.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{Level, LevelFilter};

/// `log` target used for every record emitted by this crate.
pub const LOG_TARGET: &str = "yticker";

/// Verbosity used when logging is switched on for a logger configured `Off`.
const FALLBACK_LEVEL: LevelFilter = LevelFilter::Debug;

/// Cloneable, level-gated handle onto the `log` facade.
///
/// Clones share the current level.
#[derive(Debug, Clone)]
pub struct ClientLogger {
    configured: LevelFilter,
    current: Arc<AtomicUsize>,
}

impl ClientLogger {
    /// Creates a logger emitting records up to `verbosity`.
    pub fn new(verbosity: LevelFilter) -> Self {
        Self {
            configured: verbosity,
            current: Arc::new(AtomicUsize::new(verbosity as usize)),
        }
    }

    /// A logger that never emits.
    pub fn silent() -> Self {
        Self::new(LevelFilter::Off)
    }

    /// Switches output on (at the configured verbosity) or off.
    pub fn set_enabled(&self, enabled: bool) {
        let level = match (enabled, self.configured) {
            (false, _) => LevelFilter::Off,
            (true, LevelFilter::Off) => FALLBACK_LEVEL,
            (true, configured) => configured,
        };
        self.current.store(level as usize, Ordering::Relaxed);
    }

    /// Effective verbosity right now.
    pub fn level(&self) -> LevelFilter {
        match self.current.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level()
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if self.enabled(level) {
            log::log!(target: LOG_TARGET, level, "{}", args);
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl Default for ClientLogger {
    fn default() -> Self {
        Self::silent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_logger_can_be_enabled() {
        let logger = ClientLogger::silent();
        assert!(!logger.enabled(Level::Error));

        logger.set_enabled(true);
        assert_eq!(logger.level(), LevelFilter::Debug);
        assert!(logger.enabled(Level::Info));
        assert!(!logger.enabled(Level::Trace));
    }

    #[test]
    fn test_toggle_restores_configured_verbosity() {
        let logger = ClientLogger::new(LevelFilter::Warn);
        logger.set_enabled(false);
        assert_eq!(logger.level(), LevelFilter::Off);

        logger.set_enabled(true);
        assert_eq!(logger.level(), LevelFilter::Warn);
        assert!(!logger.enabled(Level::Info));
    }

    #[test]
    fn test_panic_message_reads_common_payloads() {
        let literal = std::panic::catch_unwind(|| {
            panic!("literal");
        })
        .unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "literal");

        let formatted = std::panic::catch_unwind(|| {
            panic!("code {}", 7);
        })
        .unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "code 7");
    }

    #[test]
    fn test_clones_share_level() {
        let logger = ClientLogger::new(LevelFilter::Info);
        let clone = logger.clone();
        logger.set_enabled(false);
        assert_eq!(clone.level(), LevelFilter::Off);
    }
}
