//! Terminal output.
//!
//! One voice for the whole CLI: compiler-style `warning:` / `note:`
//! prefixes on plain lines, underlined section headings, and a shared
//! spinner for long-running phases. Anything tabular goes through
//! [`Table`], which sizes columns when it renders.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Printing facade used by every command.
pub struct Output;

impl Output {
    pub fn success(message: &str) {
        println!("{} {}", "ok".green().bold(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "warning:".yellow().bold(), message);
    }

    pub fn info(message: &str) {
        println!("{} {}", "note:".cyan(), message);
    }

    pub fn header(message: &str) {
        println!("\n{}", message.bold().underline());
    }

    pub fn subheader(message: &str) {
        println!("  {}", message.dimmed());
    }

    pub fn kv(key: &str, value: &str) {
        println!("  {} {}", format!("{}:", key).dimmed(), value);
    }

    /// Project names render in one consistent color everywhere.
    pub fn project_name(name: &str) -> String {
        name.cyan().to_string()
    }

    /// Spinner for a phase whose duration is worth showing.
    pub fn spinner(message: &str) -> ProgressBar {
        let style = ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")
            .expect("spinner template is static")
            .tick_strings(&["◐", "◓", "◑", "◒", "◐"]);
        let bar = ProgressBar::new_spinner()
            .with_style(style)
            .with_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}

/// Column-aligned table, sized at render time.
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<&str>) -> Self {
        Self {
            columns: columns.into_iter().map(str::to_string).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<&str>) {
        self.rows.push(row.into_iter().map(str::to_string).collect());
    }

    pub fn print(&self) {
        let widths = self.widths();
        println!("  {}", pad_row(&self.columns, &widths).bold().dimmed());
        for row in &self.rows {
            println!("  {}", pad_row(row, &widths));
        }
    }

    /// Widest cell per column, header included.
    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.columns.iter().map(String::len).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }
        widths
    }
}

/// Left-align each cell to its column width, two spaces between
/// columns, no trailing padding on the last cell.
fn pad_row(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        line.push_str(cell);
        let width = widths.get(i).copied().unwrap_or(0);
        if i + 1 < cells.len() {
            for _ in cell.len()..width {
                line.push(' ');
            }
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths_cover_header_and_rows() {
        let mut table = Table::new(vec!["Tag", "Version"]);
        table.add_row(vec!["x64-linux", "1.2"]);
        table.add_row(vec!["arm", "10.0.1"]);
        assert_eq!(table.widths(), vec![9, 7]);
    }

    #[test]
    fn test_pad_row_aligns_columns() {
        let widths = vec![9, 7];
        let cells: Vec<String> = vec!["arm".to_string(), "10.0.1".to_string()];
        assert_eq!(pad_row(&cells, &widths), "arm        10.0.1");
    }

    #[test]
    fn test_pad_row_has_no_trailing_spaces() {
        let widths = vec![9, 7];
        let cells: Vec<String> = vec!["x64-linux".to_string(), "1.2".to_string()];
        let line = pad_row(&cells, &widths);
        assert_eq!(line, "x64-linux  1.2");
        assert!(!line.ends_with(' '));
    }

    #[test]
    fn test_table_print_does_not_panic_on_ragged_rows() {
        let mut table = Table::new(vec!["Tag", "Version"]);
        table.add_row(vec!["x64-linux"]);
        table.add_row(vec!["arm", "10.0.1", "extra"]);
        table.print();
    }
}
