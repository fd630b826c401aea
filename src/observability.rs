//! The logging facade every component takes a handle to at construction.
//!
//! This is deliberately thin: DLT/tracing export and metrics aggregation
//! are out of scope for this core, so `Logger` only needs to carry
//! severity, a message and a handful of structured fields — enough for a
//! host application to route into whatever observability stack it already
//! runs.

use core::fmt;

/// Log severities, ordered from least to most urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single structured key-value attached to a log record. Values are kept
/// as `&'static str`/formatted strings rather than an open `Any` bag: every
/// call site in this crate logs a small, fixed set of identifiers (service,
/// instance, client, etc.), not arbitrary payloads.
#[derive(Clone, Debug)]
pub struct LogField {
    pub key: &'static str,
    pub value: String,
}

impl LogField {
    pub fn new(key: &'static str, value: impl fmt::Display) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

/// Object-safe logging sink injected into the registry, event store,
/// subscription engine and dispatcher.
pub trait Logger: Send + Sync {
    fn log(&self, severity: LogSeverity, component: &str, message: &str, fields: &[LogField]);

    fn debug(&self, component: &str, message: &str, fields: &[LogField]) {
        self.log(LogSeverity::Debug, component, message, fields)
    }

    fn info(&self, component: &str, message: &str, fields: &[LogField]) {
        self.log(LogSeverity::Info, component, message, fields)
    }

    fn warn(&self, component: &str, message: &str, fields: &[LogField]) {
        self.log(LogSeverity::Warn, component, message, fields)
    }

    fn error(&self, component: &str, message: &str, fields: &[LogField]) {
        self.log(LogSeverity::Error, component, message, fields)
    }
}

/// Default facade: forwards every record to the `log` crate, so a host
/// application that already installed a `log` backend (`env_logger`,
/// `fern`, ...) gets this core's diagnostics for free.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn log(&self, severity: LogSeverity, component: &str, message: &str, fields: &[LogField]) {
        let level = match severity {
            LogSeverity::Debug => log::Level::Debug,
            LogSeverity::Info => log::Level::Info,
            LogSeverity::Warn => log::Level::Warn,
            LogSeverity::Error => log::Level::Error,
        };
        if fields.is_empty() {
            log::log!(target: "someip_core", level, "[{component}] {message}");
        } else {
            let mut rendered = String::new();
            for field in fields {
                if !rendered.is_empty() {
                    rendered.push(' ');
                }
                rendered.push_str(field.key);
                rendered.push('=');
                rendered.push_str(&field.value);
            }
            log::log!(target: "someip_core", level, "[{component}] {message} {rendered}");
        }
    }
}

/// A logger that discards everything; useful in tests that don't care to
/// assert on diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _severity: LogSeverity, _component: &str, _message: &str, _fields: &[LogField]) {}
}
