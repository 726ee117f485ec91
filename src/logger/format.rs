//! Log formatting and output with ANSI colors and text wrapping
//!
//! Handles:
//! - Colorized console output with tag and level columns
//! - Text wrapping at word boundaries
//! - Mirroring every line into the log file
//! - Broken pipe handling for piped commands

use super::file::write_to_file;
use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Column widths for alignment
const TAG_WIDTH: usize = 10;
const LEVEL_WIDTH: usize = 8;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S").to_string();

    let base_line = format!(
        "{} [{}] [{}] ",
        time.dimmed(),
        format_tag(&tag),
        format_level(level)
    );
    let prefix_width = time.len() + TAG_WIDTH + LEVEL_WIDTH + 7;
    let available = MAX_LINE_LENGTH.saturating_sub(prefix_width).max(50);

    let chunks = wrap_text(message, available);
    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let tag_clean = tag.to_plain_string();

    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            print_stdout_safe(&format!("{}{}", base_line, chunk));
        } else {
            print_stdout_safe(&format!("{}{}", " ".repeat(prefix_width), chunk));
        }
        write_to_file(&format!(
            "{} [{}] [{}] {}",
            timestamp,
            tag_clean,
            level.as_str(),
            chunk
        ));
    }
}

/// Format a tag with its color
fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => label.bright_yellow().bold(),
        LogTag::Config => label.yellow().bold(),
        LogTag::Broker => label.bright_cyan().bold(),
        LogTag::Channels => label.cyan().bold(),
        LogTag::Heartbeat => label.bright_blue().bold(),
        LogTag::Registry => label.bright_magenta().bold(),
        LogTag::Health => label.magenta().bold(),
        LogTag::Client => label.bright_green().bold(),
        LogTag::Breaker => label.bright_red().bold(),
        LogTag::Webserver => label.blue().bold(),
    }
}

/// Format a level with its color
fn format_level(level: LogLevel) -> ColoredString {
    let label = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    match level {
        LogLevel::Error => label.bright_red().bold(),
        LogLevel::Warning => label.bright_yellow().bold(),
        LogLevel::Info => label.white().bold(),
        LogLevel::Debug => label.dimmed(),
        LogLevel::Verbose => label.dimmed(),
    }
}

/// Print to stdout but ignore broken pipe errors
fn print_stdout_safe(message: &str) {
    let mut out = stdout().lock();
    if let Err(e) = writeln!(out, "{}", message) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
    }
    let _ = out.flush();
}

/// Wrap text at word boundaries, respecting existing newlines
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();

    for line in text.split('\n') {
        if line.chars().count() <= max_width {
            result.push(line.to_string());
            continue;
        }

        let mut current = String::new();
        for word in line.split_whitespace() {
            let word_len = word.chars().count();
            let current_len = current.chars().count();

            if word_len > max_width {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                let chars: Vec<char> = word.chars().collect();
                for piece in chars.chunks(max_width) {
                    result.push(piece.iter().collect());
                }
            } else if current.is_empty() {
                current = word.to_string();
            } else if current_len + word_len + 1 <= max_width {
                current.push(' ');
                current.push_str(word);
            } else {
                result.push(std::mem::replace(&mut current, word.to_string()));
            }
        }

        if !current.is_empty() {
            result.push(current);
        }
    }

    if result.is_empty() {
        result.push(String::new());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_text_breaks_on_words() {
        let wrapped = wrap_text("alpha beta gamma delta", 11);
        assert_eq!(wrapped, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn test_wrap_text_splits_long_words_and_keeps_newlines() {
        let wrapped = wrap_text("abcdefghij\nok", 4);
        assert_eq!(wrapped, vec!["abcd", "efgh", "ij", "ok"]);
    }
}
