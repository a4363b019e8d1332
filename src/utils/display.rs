use std::io::{self, Write};

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table};
use terminal_size::{terminal_size, Width};

/// How a console line should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Bold,
    Info,
    Success,
    Warning,
    Error,
}

/// Destination for user-facing output.
///
/// Components print through this instead of `println!` so output can be
/// captured in tests.
pub trait Console {
    fn line(&mut self, style: Style, message: &str);

    fn plain(&mut self, message: &str) {
        self.line(Style::Plain, message);
    }

    fn bold(&mut self, message: &str) {
        self.line(Style::Bold, message);
    }

    fn info(&mut self, message: &str) {
        self.line(Style::Info, message);
    }

    fn success(&mut self, message: &str) {
        self.line(Style::Success, message);
    }

    fn warning(&mut self, message: &str) {
        self.line(Style::Warning, message);
    }

    fn error(&mut self, message: &str) {
        self.line(Style::Error, message);
    }
}

/// Colored terminal output. Errors go to stderr, everything else to stdout.
#[derive(Debug, Default)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn line(&mut self, style: Style, message: &str) {
        let rendered = match style {
            Style::Plain => message.normal(),
            Style::Bold => message.bold(),
            Style::Info => message.blue(),
            Style::Success => message.green(),
            Style::Warning => message.yellow(),
            Style::Error => message.red(),
        };
        // A closed pipe is not worth a panic.
        if style == Style::Error {
            let _ = writeln!(io::stderr(), "{}", rendered);
        } else {
            let _ = writeln!(io::stdout(), "{}", rendered);
        }
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    pub lines: Vec<(Style, String)>,
}

impl MemoryConsole {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|(_, line)| line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn with_style(&self, style: Style) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(s, _)| *s == style)
            .map(|(_, line)| line.as_str())
            .collect()
    }
}

impl Console for MemoryConsole {
    fn line(&mut self, style: Style, message: &str) {
        self.lines.push((style, message.to_string()));
    }
}

/// Build a rounded table with green centered headers, sized to the terminal.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .iter()
            .map(|h| {
                Cell::new(h.to_uppercase())
                    .set_alignment(CellAlignment::Center)
                    .fg(Color::Green)
            })
            .collect::<Vec<_>>(),
    );

    if let Some((Width(width), _)) = terminal_size() {
        table.set_width(width);
    }
    table
}

/// Row with the first column highlighted as the key.
pub fn row(key: &str, rest: &[&str]) -> Vec<Cell> {
    std::iter::once(Cell::new(key).fg(Color::Cyan))
        .chain(rest.iter().map(|value| Cell::new(value).fg(Color::Blue)))
        .collect()
}

pub fn print_banner(console: &mut dyn Console, version: &str) {
    console.bold(&format!(
        "{} {}",
        "bmtlab".cyan().bold(),
        format!("v{}", version).yellow()
    ));
    console.plain(&"Developer scripts and plugins".italic().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_console_keeps_styles() {
        let mut console = MemoryConsole::default();
        console.error("boom");
        console.info("hello");
        console.warning("careful");

        assert_eq!(console.with_style(Style::Error), vec!["boom"]);
        assert_eq!(console.text(), "boom\nhello\ncareful");
    }

    #[test]
    fn test_table_renders_rows() {
        let mut t = table(&["category", "script"]);
        t.add_row(row("webcam", &["show"]));
        let rendered = t.to_string();
        assert!(rendered.contains("CATEGORY"));
        assert!(rendered.contains("webcam"));
        assert!(rendered.contains("show"));
    }
}
