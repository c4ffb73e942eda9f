use std::future::Future;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use comfy_table::{presets::NOTHING, Attribute, Cell, ContentArrangement, Table};
use dialoguer::console::style;
use indicatif::{ProgressBar, ProgressStyle};

const MIN_SPINNER_DURATION: Duration = Duration::from_millis(600);

/// Run an async operation with a spinner showing the given message.
/// Only shows spinner if stderr is a terminal.
pub async fn with_spinner<T, F: Future<Output = T>>(message: &str, fut: F) -> T {
    if !std::io::stderr().is_terminal() {
        return fut.await;
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "])
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));

    let start = Instant::now();
    let result = fut.await;

    // Ensure spinner is visible for minimum duration
    let elapsed = start.elapsed();
    if elapsed < MIN_SPINNER_DURATION {
        tokio::time::sleep(MIN_SPINNER_DURATION - elapsed).await;
    }

    spinner.finish_and_clear();
    result
}

pub enum CommandStatus {
    Success,
    Error,
    Warning,
}

pub fn print_command_status(status: CommandStatus, message: &str) {
    let indicator = match status {
        CommandStatus::Success => style("✓").green(),
        CommandStatus::Error => style("✗").red(),
        CommandStatus::Warning => style("!").dim(),
    };
    eprintln!("{indicator} {message}");
}

/// Create a table with the standard CLI styling (no borders, no wrapping)
pub fn styled_table() -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Disabled);
    table
}

/// Apply padding to all columns (call after setting headers)
pub fn apply_column_padding(table: &mut Table, padding: (u16, u16)) {
    for i in 0..table.column_count() {
        if let Some(col) = table.column_mut(i) {
            col.set_padding(padding);
        }
    }
}

/// Create a header cell with dim + bold styling
pub fn header(text: &str) -> Cell {
    Cell::new(text)
        .add_attribute(Attribute::Bold)
        .add_attribute(Attribute::Dim)
}

pub fn pluralize(count: &usize, singular: &str, plural: Option<&str>) -> String {
    if *count == 1 {
        return singular.to_string();
    }

    match plural {
        Some(p) => p.to_string(),
        None => format!("{singular}s"),
    }
}

/// Truncate to a display width with a trailing ellipsis, never splitting
/// a multi-byte character or a wide glyph.
pub fn truncate_to_width(text: &str, max_width: usize) -> String {
    use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }

    let budget = max_width.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + width > budget {
            break;
        }
        used += width;
        out.push(ch);
    }
    out.push('…');
    out
}
