//! Output rendering for the chat application.
//!
//! This module provides a trait-based rendering abstraction that allows for
//! different output styles.  The default implementation writes to stdout and
//! uses ANSI escape codes for status colours unless colour is disabled.

use std::io::{self, Stdout, Write};

/// ANSI escape code for dim text (used for response headers).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for bold text (used for table headers).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for green text (used for success messages).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for yellow text (used for warnings).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for magenta text (used for the assistant label).
const ANSI_MAGENTA: &str = "\x1b[35m";

/// Trait for rendering chat output.
///
/// This abstraction allows for different rendering strategies:
/// - Plain text with ANSI styling
/// - Plain text without styling (for piping/redirecting)
/// - Capturing output in tests
pub trait Renderer: Send {
    /// Called before the first piece of an assistant answer.
    fn start_response(&mut self, model: &str);

    /// Print a chunk of response text.
    ///
    /// This is called incrementally as increments are streamed from the gateway.
    fn print_text(&mut self, text: &str);

    /// Called when a response is complete.
    ///
    /// Used to ensure proper newlines after streaming.
    fn finish_response(&mut self);

    /// Called when a request is interrupted by the user.
    fn print_interrupted(&mut self);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print a warning.
    fn print_warning(&mut self, warning: &str);

    /// Print a success message.
    fn print_success(&mut self, message: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print rows under a header line.
    fn print_table(&mut self, headers: &[&str], rows: &[Vec<String>]) {
        self.print_info(&format_table(headers, rows));
    }
}

/// Lays out `rows` in left-aligned columns sized to the widest cell.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(i) {
                Some(width) => *width = (*width).max(len),
                None => widths.push(len),
            }
        }
    }

    let separators: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(render_row(headers.iter().copied(), &widths));
    out.push(render_row(separators.iter().map(String::as_str), &widths));
    for row in rows {
        out.push(render_row(row.iter().map(String::as_str), &widths));
    }
    out.join("\n")
}

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let line: Vec<String> = cells
        .zip(widths.iter())
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    line.join("  ").trim_end().to_string()
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    in_response: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            in_response: false,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn end_response_line(&mut self) {
        if self.in_response {
            println!();
            self.in_response = false;
        }
    }

    fn colored(&self, color: &str, text: &str) -> String {
        if self.use_color {
            format!("{color}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self, model: &str) {
        self.end_response_line();
        let label = self.colored(ANSI_MAGENTA, "Assistant");
        let model = self.colored(ANSI_DIM, &format!("({model})"));
        print!("{label} {model}: ");
        self.in_response = true;
        self.flush();
    }

    fn print_text(&mut self, text: &str) {
        print!("{text}");
        self.flush();
    }

    fn finish_response(&mut self) {
        self.end_response_line();
        println!();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.end_response_line();
        println!("{}", self.colored(ANSI_YELLOW, "[interrupted]"));
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.end_response_line();
        eprintln!("{}", self.colored(ANSI_RED, &format!("Error: {error}")));
    }

    fn print_warning(&mut self, warning: &str) {
        self.end_response_line();
        println!("{}", self.colored(ANSI_YELLOW, warning));
    }

    fn print_success(&mut self, message: &str) {
        self.end_response_line();
        println!("{}", self.colored(ANSI_GREEN, message));
    }

    fn print_info(&mut self, info: &str) {
        self.end_response_line();
        println!("{info}");
    }

    fn print_table(&mut self, headers: &[&str], rows: &[Vec<String>]) {
        self.end_response_line();
        let table = format_table(headers, rows);
        let mut lines = table.lines();
        if let Some(header) = lines.next() {
            println!("{}", self.colored(ANSI_BOLD, header));
        }
        for line in lines {
            println!("{line}");
        }
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color);
        assert_eq!(renderer.colored(ANSI_RED, "x"), "x");
    }

    #[test]
    fn table_columns_align() {
        let table = format_table(
            &["Name", "Type"],
            &[
                vec!["main".to_string(), "JWT".to_string()],
                vec!["backup-token".to_string(), "Other".to_string()],
            ],
        );
        assert_eq!(
            table,
            "Name          Type\n\
             ------------  -----\n\
             main          JWT\n\
             backup-token  Other"
        );
    }

    #[test]
    fn empty_table_has_header_only() {
        assert_eq!(format_table(&["A"], &[]), "A\n-");
    }
}
