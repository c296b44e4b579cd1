//! Output formatting utilities for CLI commands
//!
//! Provides consistent formatting for:
//! - Tables with column alignment
//! - Colors for terminal output

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Parse a human-readable size string into bytes
///
/// Examples:
/// - "100" -> Ok(100)
/// - "1KB" -> Ok(1024)
/// - "10MB" -> Ok(10485760)
/// - "1.5GB" -> Ok(1610612736)
pub fn parse_size(size_str: &str) -> Result<u64, String> {
    let size_str = size_str.trim().to_uppercase();

    // Try to find where the number ends and unit begins
    let (num_part, unit_part) = split_number_unit(&size_str);

    let num: f64 = num_part
        .parse()
        .map_err(|_| format!("Invalid number: '{}'", num_part))?;

    let multiplier: u64 = match unit_part {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(format!("Unknown unit: '{}'", unit_part)),
    };

    Ok((num * multiplier as f64) as u64)
}

/// Split a size string into number and unit parts
fn split_number_unit(s: &str) -> (&str, &str) {
    let idx = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    (&s[..idx], &s[idx..])
}

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    // Add header row
    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    // Add data rows with colors
    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| {
                let cell = Cell::new(text);
                if let Some(c) = color {
                    cell.fg(c)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Color for a job's terminal/running state, used by `job list`.
pub fn color_for_job_state(state: &str) -> Color {
    match state {
        "running" => Color::Yellow,
        "completed" => Color::Green,
        "canceled" => Color::Grey,
        "failed" => Color::Red,
        _ => Color::White,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1kb").unwrap(), 1024);
        assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5KB").unwrap(), 1536);
    }

    #[test]
    fn test_parse_size_errors() {
        assert!(parse_size("abc").is_err());
        assert!(parse_size("1XB").is_err());
    }

    #[test]
    fn test_split_number_unit() {
        assert_eq!(split_number_unit("100"), ("100", ""));
        assert_eq!(split_number_unit("10KB"), ("10", "KB"));
        assert_eq!(split_number_unit("1.5MB"), ("1.5", "MB"));
    }
}
