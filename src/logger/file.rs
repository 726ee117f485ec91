/// Append-only file logging
///
/// One file per process start, named by start time, under the configured
/// log directory. Writes are buffered and flushed on `flush_file_logging`.
use chrono::Local;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};

use super::config::get_logger_config;

static LOG_FILE: Lazy<Mutex<Option<BufWriter<File>>>> = Lazy::new(|| Mutex::new(None));

/// Open the log file if file logging is enabled
pub fn init_file_logging() {
    let config = get_logger_config();
    if !config.file_logging {
        return;
    }

    if let Err(e) = fs::create_dir_all(&config.log_dir) {
        eprintln!(
            "Failed to create log directory {}: {}",
            config.log_dir.display(),
            e
        );
        return;
    }

    let file_name = format!("nexa_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
    let path = config.log_dir.join(file_name);

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            *LOG_FILE.lock() = Some(BufWriter::new(file));
        }
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", path.display(), e);
        }
    }
}

/// Write one line to the log file (no-op when file logging is off)
pub fn write_to_file(line: &str) {
    let mut guard = LOG_FILE.lock();
    if let Some(writer) = guard.as_mut() {
        if writeln!(writer, "{}", line).is_err() {
            // Disk full or file removed; stop trying
            *guard = None;
        }
    }
}

/// Flush buffered log lines
pub fn flush_file_logging() {
    if let Some(writer) = LOG_FILE.lock().as_mut() {
        let _ = writer.flush();
    }
}
