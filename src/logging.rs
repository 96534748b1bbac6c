/// Structured logging for the traffic forecasting pipeline.
///
/// Provides context-rich logging with component and intersection
/// identifiers, timestamps, and severity levels. Supports both console
/// output and file-based logging for daemon operation.
///
/// The logger is optional: until `init_logger` runs, every call is a no-op,
/// which keeps unit tests silent without fixtures.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::model::RetrainOutcome;

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parses the usual lowercase names, for the environment bootstrap.
    pub fn parse(raw: &str) -> Option<LogLevel> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Simulator,
    History,
    Model,
    Forecast,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Simulator => write!(f, "SIM"),
            Component::History => write!(f, "HIST"),
            Component::Model => write!(f, "MODEL"),
            Component::Forecast => write!(f, "FCST"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to emit.
    min_level: LogLevel,
    /// Optional file path for daemon logs.
    log_file: Option<String>,
}

impl Logger {
    /// Initialize the global logger.
    pub fn init(min_level: LogLevel, log_file: Option<String>) {
        let logger = Logger { min_level, log_file };
        *LOGGER.lock().unwrap() = Some(logger);
    }

    fn log(&self, level: LogLevel, component: Component, intersection: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let site_part = intersection.map(|id| format!(" [{}]", id)).unwrap_or_default();
        let entry = format!("{} {} {}{}: {}", timestamp, level, component, site_part, message);

        match level {
            LogLevel::Error | LogLevel::Warning => eprintln!("{}", entry),
            LogLevel::Info | LogLevel::Debug => println!("{}", entry),
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public logging functions
// ---------------------------------------------------------------------------

/// Initialize the global logger.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>) {
    Logger::init(min_level, log_file.map(String::from));
}

/// Log a general informational message.
pub fn info(component: Component, intersection: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(LogLevel::Info, component, intersection, message);
    }
}

/// Log a warning message.
pub fn warn(component: Component, intersection: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(LogLevel::Warning, component, intersection, message);
    }
}

/// Log an error message.
pub fn error(component: Component, intersection: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(LogLevel::Error, component, intersection, message);
    }
}

/// Log a debug message.
pub fn debug(component: Component, intersection: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(LogLevel::Debug, component, intersection, message);
    }
}

// ---------------------------------------------------------------------------
// Retrain outcome logging
// ---------------------------------------------------------------------------

/// Log the summary of one retrain cycle. Rejections and cold starts are
/// expected operational events, so nothing here logs at error level.
pub fn log_retrain_outcome(outcome: &RetrainOutcome) {
    match outcome {
        RetrainOutcome::Accepted { accuracy } => info(
            Component::Model,
            None,
            &format!("retrain accepted: validation accuracy {:.3}", accuracy),
        ),
        RetrainOutcome::Rejected { reason } => {
            warn(Component::Model, None, &format!("retrain rejected: {}", reason))
        }
        RetrainOutcome::InsufficientData => info(
            Component::Model,
            None,
            "retrain skipped: insufficient history per intersection",
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
