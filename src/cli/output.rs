//! Terminal output for the command line.
//!
//! Status lines go to stdout, warnings and errors to stderr. Colors are only
//! emitted when the stream supports them.

use std::io::{self, Write};

use owo_colors::{OwoColorize, Stream};

mod symbols {
    pub const SUCCESS: &str = "✓";
    pub const ERROR: &str = "✗";
    pub const WARNING: &str = "⚠";
    pub const INFO: &str = "•";
    pub const ARROW: &str = "→";
}

/// Colored, verbosity-aware terminal writer. Cheap to clone.
#[derive(Debug, Clone, Copy)]
pub struct OutputManager {
    verbose: bool,
    quiet: bool,
}

impl OutputManager {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn info(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(
            io::stdout().lock(),
            "{} {}",
            symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
            message
        )
    }

    /// Errors are printed even in quiet mode.
    pub fn error(&self, message: &str) -> io::Result<()> {
        writeln!(
            io::stderr().lock(),
            "{} {}",
            symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
            message.if_supports_color(Stream::Stderr, |s| s.red())
        )
    }

    pub fn success(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(
            io::stdout().lock(),
            "{} {}",
            symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
            message
        )
    }

    pub fn warn(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(
            io::stderr().lock(),
            "{} {}",
            symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
            message.if_supports_color(Stream::Stderr, |s| s.yellow())
        )
    }

    pub fn verbose(&self, message: &str) -> io::Result<()> {
        if !self.verbose || self.quiet {
            return Ok(());
        }
        writeln!(
            io::stdout().lock(),
            "{}",
            message.if_supports_color(Stream::Stdout, |s| s.dimmed())
        )
    }

    pub fn progress(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(
            io::stdout().lock(),
            "{} {}",
            symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.cyan()),
            message
        )
    }

    pub fn section(&self, title: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(
            io::stdout().lock(),
            "\n{}",
            title.if_supports_color(Stream::Stdout, |s| s.bold())
        )
    }

    pub fn indent(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(io::stdout().lock(), "  {}", message)
    }
}

/// `1536` -> `1.5 KB`
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn quiet_mode_suppresses_status_lines() {
        let output = OutputManager::new(true, true);
        assert!(output.is_quiet());
        output.info("hidden").unwrap();
        output.verbose("hidden").unwrap();
    }
}
