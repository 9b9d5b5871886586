//! CLI output helpers: colors, icons, spinners and truncation.

use crate::models::{ConnectionState, SearchOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::time::Duration;

/// Get the current terminal width.
pub fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(100)
}

/// Check if stdout is a terminal.
pub fn is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

/// Icon for a result's source tag.
pub fn source_icon(source: &str) -> &'static str {
    match source {
        "web" => "🌐",
        "github-repo" => "📦",
        "github-code" => "💻",
        "file" => "📁",
        "documentation" => "📚",
        _ => "📄",
    }
}

/// Status types for colored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Warning,
    Info,
    Search,
}

/// Status icons for different operations.
pub fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Success => "✓",
        Status::Error => "✗",
        Status::Warning => "⚠",
        Status::Info => "ℹ",
        Status::Search => "🔍",
    }
}

/// Print a status line to stderr, keeping stdout for results.
pub fn print_status(status: Status, msg: &str) {
    let icon = status_icon(status);
    match status {
        Status::Success => eprintln!("{} {}", icon.green().bold(), msg),
        Status::Error => eprintln!("{} {}", icon.red().bold(), msg),
        Status::Warning => eprintln!("{} {}", icon.yellow().bold(), msg),
        Status::Info => eprintln!("{} {}", icon.cyan().bold(), msg),
        Status::Search => eprintln!("{} {}", icon.yellow(), msg),
    }
}

/// Connection state, colored by health.
pub fn styled_state(state: ConnectionState) -> String {
    let label = state.as_str();
    match state {
        ConnectionState::Connected => label.green().bold().to_string(),
        ConnectionState::Connecting | ConnectionState::Reconnecting => label.yellow().to_string(),
        ConnectionState::Failed => label.red().bold().to_string(),
        ConnectionState::Disconnected => label.dimmed().to_string(),
    }
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", format!("━━━ {} ━━━", title).bold().cyan());
}

/// Print the summary line above search results.
pub fn print_search_header(outcome: &SearchOutcome) {
    println!();
    println!(
        "{} Search results for: \"{}\" ({})",
        status_icon(Status::Search).yellow().bold(),
        outcome.query.cyan().bold(),
        outcome.search_type
    );

    let mut summary = format!(
        "Found {} results in {:.2}s",
        format_number(outcome.total_results).green().bold(),
        Duration::from_millis(outcome.elapsed_ms).as_secs_f64()
    );
    if outcome.cached {
        summary.push_str(&format!(" {}", "(cached)".dimmed()));
    }
    println!("{} {}", "─".repeat(30).dimmed(), summary);
    println!();
}

/// Print the providers that failed during a search.
pub fn print_failures(outcome: &SearchOutcome) {
    for failure in &outcome.provider_failures {
        print_status(
            Status::Warning,
            &format!(
                "{} ({}): {} - {}",
                failure.adapter,
                failure.provider,
                failure.kind,
                truncate_with_ellipsis(&failure.message, 80)
            ),
        );
    }
}

/// Print a divider line.
pub fn print_divider() {
    println!("{}", "─".repeat(terminal_width().min(80)).dimmed());
}

/// Format a number with commas.
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Truncate text to at most `max_chars` characters, ending in `...` when cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if max_chars <= 3 {
        return "...".to_string();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", kept.trim_end())
}

fn style(template: &str, ticks: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(ticks)
}

/// A loading spinner on stderr.
pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    /// Create a new spinner with the given message.
    pub fn new(msg: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(style("{spinner:.cyan} {msg}", "⠁⠂⠄⡀⢀⠠⠐⠈ "));
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self { pb }
    }

    /// A spinner that draws nothing, for pipes and quiet mode.
    pub fn hidden() -> Self {
        Self {
            pb: ProgressBar::hidden(),
        }
    }

    pub fn set_message(&self, msg: &str) {
        self.pb.set_message(msg.to_string());
    }

    pub fn finish_with_success(&self, msg: &str) {
        self.pb.set_style(style("{spinner:.green} {msg}", "✓✓"));
        self.pb.finish_with_message(msg.to_string());
    }

    pub fn finish_with_error(&self, msg: &str) {
        self.pb.set_style(style("{spinner:.red} {msg}", "✗✗"));
        self.pb.finish_with_message(msg.to_string());
    }

    /// Remove the spinner line.
    pub fn clear(&self) {
        self.pb.finish_and_clear();
    }
}
