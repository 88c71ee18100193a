//! Portfolio snapshot formatting.
//!
//! The table is laid out in plain text first and HTML-escaped afterwards,
//! so column widths are measured on what the user actually sees.

use crate::models::Holding;

/// Reply when the account has no holdings
pub const NO_HOLDINGS_MESSAGE: &str = "📭 No holdings found.";

const SNAPSHOT_HEADER: &str = "📌 Portfolio Snapshot";

/// Width of the separator rule under the column headings
const RULE_WIDTH: usize = 52;

/// Sign of a profit/loss value; zero counts as up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn of(value: f64) -> Self {
        if value >= 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn indicator(self) -> &'static str {
        match self {
            Direction::Up => "🟢",
            Direction::Down => "🔴",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub symbol: String,
    pub quantity: i64,
    pub average_price: f64,
    pub last_price: f64,
    pub pnl: f64,
}

impl SnapshotRow {
    pub fn direction(&self) -> Direction {
        Direction::of(self.pnl)
    }
}

/// Per-holding profit/loss plus the signed total
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSummary {
    pub rows: Vec<SnapshotRow>,
    pub total_pnl: f64,
}

impl PortfolioSummary {
    pub fn from_holdings(holdings: &[Holding]) -> Self {
        let rows: Vec<SnapshotRow> = holdings
            .iter()
            .map(|h| SnapshotRow {
                symbol: h.symbol().to_string(),
                quantity: h.quantity,
                average_price: h.average_price(),
                last_price: h.last_price(),
                pnl: h.pnl(),
            })
            .collect();
        let total_pnl = rows.iter().map(|r| r.pnl).sum();

        Self { rows, total_pnl }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_direction(&self) -> Direction {
        Direction::of(self.total_pnl)
    }
}

/// Render holdings as an HTML chat message, or the "no holdings" reply.
pub fn render_snapshot(holdings: &[Holding]) -> String {
    let summary = PortfolioSummary::from_holdings(holdings);
    if summary.is_empty() {
        return NO_HOLDINGS_MESSAGE.to_string();
    }
    render_table(&summary)
}

pub fn render_table(summary: &PortfolioSummary) -> String {
    let mut lines = Vec::with_capacity(summary.rows.len() + 4);
    lines.push(format!(
        "{:<10} {:>5} {:>10} {:>10} {:>12}",
        "Symbol", "Qty", "Avg", "LTP", "P&L"
    ));
    lines.push("-".repeat(RULE_WIDTH));

    for row in &summary.rows {
        lines.push(format!(
            "{:<10} {:>5} {:>10.2} {:>10.2} {} {:>9.2}",
            row.symbol,
            row.quantity,
            row.average_price,
            row.last_price,
            row.direction().indicator(),
            row.pnl
        ));
    }

    lines.push("-".repeat(RULE_WIDTH));
    lines.push(format!(
        "{:<10} {:>5} {:>10} {:>10} {} {:>9.2}",
        "TOTAL",
        "",
        "",
        "",
        summary.total_direction().indicator(),
        summary.total_pnl
    ));

    let body: Vec<String> = lines.iter().map(|l| escape_html(l)).collect();
    format!("{}\n\n<pre>{}</pre>", SNAPSHOT_HEADER, body.join("\n"))
}

/// Escape the characters Telegram's HTML parse mode treats specially
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
