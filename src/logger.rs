//! Logging capability passed into the session by reference.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Debug => write!(f, "debug"),
            Level::Info => write!(f, "info"),
            Level::Warn => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

pub trait Logger {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Writes to stderr, dropping messages below `min_level`
#[derive(Debug, Clone, Copy)]
pub struct ConsoleLogger {
    pub min_level: Level,
}

impl ConsoleLogger {
    pub fn new(min_level: Level) -> Self {
        ConsoleLogger { min_level }
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, level: Level, message: &str) {
        if level < self.min_level {
            return;
        }
        match level {
            Level::Debug | Level::Info => eprintln!("{}", message),
            Level::Warn | Level::Error => eprintln!("{}: {}", level, message),
        }
    }
}

/// Appends `[level] message` lines to a file
pub struct FileLogger {
    file: Mutex<File>,
    min_level: Level,
}

impl FileLogger {
    pub fn create(path: &Path, min_level: Level) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileLogger {
            file: Mutex::new(file),
            min_level,
        })
    }
}

impl Logger for FileLogger {
    fn log(&self, level: Level, message: &str) {
        if level < self.min_level {
            return;
        }
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "[{}] {}", level, message);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct CaptureLogger {
    entries: Mutex<Vec<(Level, String)>>,
}

impl CaptureLogger {
    pub fn new() -> Self {
        CaptureLogger::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Messages logged at exactly `level`
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl Logger for CaptureLogger {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_logger() {
        let logger = CaptureLogger::new();
        logger.info("hello");
        logger.warn("careful");
        assert_eq!(logger.messages(Level::Warn), vec!["careful".to_string()]);
        assert_eq!(logger.entries().len(), 2);
    }

    #[test]
    fn test_file_logger_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpre.log");
        let logger = FileLogger::create(&path, Level::Info).unwrap();
        logger.debug("hidden");
        logger.error("broken");
        drop(logger);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "[error] broken\n");
    }
}
