//! Output formatting for the vulnstack CLI
//!
//! Human output is colored text; JSON mode emits one JSON document per
//! message on stdout (errors and warnings on stderr).

use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use std::io::{self, Write};
use std::time::Instant;

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        if !use_color {
            colored::control::set_override(false);
        }

        Self {
            use_color,
            json_mode,
            verbosity,
            start_time: Instant::now(),
        }
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            self.emit_stderr(&json!({ "type": "error", "message": message }));
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "Error:".red().bold(), message);
        } else {
            eprintln!("Error: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            self.emit_stderr(&json!({ "type": "warning", "message": message }));
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "Warning:".yellow().bold(), message);
        } else {
            eprintln!("Warning: {}", message);
        }
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "Hint:".cyan().bold(), message);
        } else {
            eprintln!("Hint: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 || self.json_mode {
            return;
        }

        if self.use_color {
            println!("{} {}", "Info:".blue(), message);
        } else {
            println!("Info: {}", message);
        }
    }

    /// Print a success line
    pub fn success(&self, message: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("{}", message.green().bold());
        } else {
            println!("{}", message);
        }
    }

    /// Print text verbatim (plans, DOT graphs, raw output values)
    pub fn text(&self, text: &str) {
        if self.json_mode {
            return;
        }
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }

    /// Emit a JSON document on stdout (JSON mode only)
    pub fn json<T: Serialize>(&self, value: &T) {
        if !self.json_mode {
            return;
        }
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("failed to serialize output: {}", e),
        }
    }

    /// Print name = value pairs, aligned
    pub fn key_values(&self, title: &str, pairs: &[(&str, &str)]) {
        if self.json_mode {
            return;
        }
        if !title.is_empty() {
            self.section(title);
        }
        let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in pairs {
            if self.use_color {
                println!("{:width$} = {}", key.bright_white().bold(), value, width = width);
            } else {
                println!("{:width$} = {}", key, value, width = width);
            }
        }
    }

    /// Print a list of items
    pub fn list(&self, title: &str, items: &[String]) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}:", title.bright_white().bold());
        } else {
            println!("\n{}:", title);
        }

        for item in items {
            if self.use_color {
                println!("  {} {}", "-".bright_black(), item);
            } else {
                println!("  - {}", item);
            }
        }
    }

    /// Print elapsed time since the formatter was created (verbose only)
    pub fn elapsed(&self) {
        if self.verbosity >= 1 && !self.json_mode {
            let secs = self.start_time.elapsed().as_secs_f64();
            println!("\nFinished in {:.2}s", secs);
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }

    fn emit_stderr(&self, value: &serde_json::Value) {
        eprintln!("{}", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_color_env_disables_color() {
        let formatter = OutputFormatter::new(false, false, 0);
        assert!(!formatter.use_color());
    }

    #[test]
    fn test_json_mode() {
        let formatter = OutputFormatter::new(false, true, 0);
        assert!(formatter.is_json());
    }
}
