// Status reporting: append-only event log rendered by the status page
use crate::models::Trend;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Trade,
    Event,
    Initialization,
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Trade => "trade",
            LogCategory::Event => "event",
            LogCategory::Initialization => "initialization",
            LogCategory::Error => "error",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    /// Message body, already rendered as HTML
    pub message: String,
}

impl LogEntry {
    /// Full line as shown on the status page
    pub fn render(&self) -> String {
        format!(
            "<b>[{} - {}]</b>: {}",
            self.timestamp.format("%Y/%m/%d %H:%M"),
            self.category.as_str().to_uppercase(),
            self.message
        )
    }
}

/// Escape text coming from outside (exchange errors, file paths)
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn colored(message: &str, color: &str) -> String {
    format!("<span style=\"color:{}\">{}</span>", color, message)
}

/// Shared, append-only status log
///
/// Cloning yields another handle to the same log. Writers only append;
/// readers get a snapshot.
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    entries: Arc<RwLock<Vec<LogEntry>>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, category: LogCategory, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            category,
            message: message.into(),
        };

        match category {
            LogCategory::Error => tracing::error!(category = %category, "{}", entry.message),
            _ => tracing::info!(category = %category, "{}", entry.message),
        }

        // A poisoned lock only means a reader panicked mid-clone
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }

    pub fn buy_log(&self, entry_price: f64, position_size: f64) {
        self.log(
            LogCategory::Trade,
            format!(
                "{} at <b><i>{}$</i></b>, position size: <b>{}</b>",
                colored("BUY", "green"),
                entry_price,
                position_size
            ),
        );
    }

    /// `pnl` is None when the balance could not be refreshed after the sale
    pub fn sell_log(&self, close_price: f64, pnl: Option<f64>, current_balance: f64) {
        let pnl_html = match pnl {
            Some(pnl) => colored(
                &format!("{:.2}$", pnl),
                if pnl > 0.0 { "green" } else { "red" },
            ),
            None => "unknown".to_string(),
        };

        self.log(
            LogCategory::Trade,
            format!(
                "{} at <b><i>{}$</i></b>, P&amp;L: <b>{}</b> current balance: <b>{:.2}$</b>",
                colored("SELL", "red"),
                close_price,
                pnl_html,
                current_balance
            ),
        );
    }

    pub fn trend_log(&self, last_trend: Trend, trend: Trend) {
        self.log(
            LogCategory::Event,
            format!(
                "trend change detected: <b>{} -&gt; {}</b>",
                colored(last_trend.name(), last_trend.color()),
                colored(trend.name(), trend.color())
            ),
        );
    }

    pub fn event_log(&self, message: &str) {
        self.log(LogCategory::Event, escape_html(message));
    }

    pub fn init_log(&self, message: &str) {
        self.log(LogCategory::Initialization, escape_html(message));
    }

    pub fn error_log(&self, context: &str, error: &dyn fmt::Display) {
        self.log(
            LogCategory::Error,
            format!("{}: {}", escape_html(context), escape_html(&error.to_string())),
        );
    }

    /// Snapshot of all entries in insertion order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .read()
            .map(|entries| entries.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
