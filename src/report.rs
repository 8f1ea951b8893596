use crate::analysis::PairRecord;
use crate::candles::DateWindow;
use crate::exchange::iso_format;
use chrono::DateTime;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};
use serde::{Deserialize, Serialize};

/// Flat row handed to the output stage. Unknown values are written as 0.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub pair: String,
    pub median_volatility_pct: f64,
    pub median_volume: f64,
    pub min_market_funds: f64,
    pub avg_long_session_pct: f64,
    pub max_long_session_pct: f64,
    pub avg_short_session_pct: f64,
    pub max_short_session_pct: f64,
    pub total_sessions: usize,
}

impl From<&PairRecord> for OutputRow {
    fn from(record: &PairRecord) -> Self {
        let stats = record.supertrend.value_or_default();
        Self {
            pair: record.pair.clone(),
            median_volatility_pct: record.median_volatility_pct,
            median_volume: record.median_volume,
            min_market_funds: record.min_market_funds.value_or_default(),
            avg_long_session_pct: stats.avg_long_session_pct,
            max_long_session_pct: stats.max_long_session_pct,
            avg_short_session_pct: stats.avg_short_session_pct,
            max_short_session_pct: stats.max_short_session_pct,
            total_sessions: stats.total_sessions,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScreeningReport {
    pub generated_at: i64, // epoch millis
    pub window_start: String,
    pub window_end: String,
    pub cancelled: bool,
    pub rows: Vec<OutputRow>,
}

impl ScreeningReport {
    /// Flattens `records` and ranks them by volatility, highest first.
    pub fn new(records: &[PairRecord], window: &DateWindow, generated_at: i64, cancelled: bool) -> Self {
        let mut rows: Vec<OutputRow> = records.iter().map(OutputRow::from).collect();
        rank_by_volatility(&mut rows);

        Self {
            generated_at,
            window_start: iso_format(window.start),
            window_end: iso_format(window.end),
            cancelled,
            rows,
        }
    }
}

/// Stable sort, so equal volatilities keep discovery order.
pub fn rank_by_volatility(rows: &mut [OutputRow]) {
    rows.sort_by(|a, b| {
        b.median_volatility_pct
            .partial_cmp(&a.median_volatility_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn get_visibility_ratio(current_pct: f64, top_pct: f64) -> f64 {
    let ratio = 0.4 + 0.6 * (current_pct / top_pct);
    ratio.clamp(0.4, 1.0)
}

fn format_timestamp(ts_ms: i64) -> String {
    match DateTime::from_timestamp_millis(ts_ms) {
        Some(dt) => dt.format("%d-%m-%Y %H:%M:%S").to_string(),
        None => "Unknown Time".to_string(),
    }
}

fn format_volume(volume: f64) -> String {
    let digits = format!("{:.0}", volume.max(0.0));
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// Renders the top `limit` rows of an already ranked report.
pub fn render(report: &ScreeningReport, limit: usize) -> String {
    if report.rows.is_empty() {
        return "No pairs passed the filters.".to_string();
    }

    let mut title = format!(
        "(Window {} to {}, generated at {} UTC)",
        report.window_start,
        report.window_end,
        format_timestamp(report.generated_at)
    );
    if report.cancelled {
        title.push_str(" [cancelled, partial results]");
    }

    let bold = |label: &str| Cell::new(label).add_attribute(Attribute::Bold);
    let bold_right = |label: &str| bold(label).set_alignment(CellAlignment::Right);

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            bold("Rank"),
            bold("Pair"),
            bold_right("Volatility (%)"),
            bold_right("Volume"),
            bold_right("MinFunds"),
            bold_right("AvgLong%"),
            bold_right("MaxLong%"),
            bold_right("AvgShort%"),
            bold_right("MaxShort%"),
            bold_right("Sessions"),
        ]);

    let top_pct = report.rows[0].median_volatility_pct;
    let safe_top_pct = if top_pct == 0.0 { 1.0 } else { top_pct };

    for (rank, row) in report.rows.iter().take(limit).enumerate() {
        let ratio = get_visibility_ratio(row.median_volatility_pct, safe_top_pct);
        let cyan_val = (255.0 * ratio) as u8;
        let green_val = (255.0 * ratio) as u8;

        let number = |value: String| Cell::new(value).set_alignment(CellAlignment::Right);

        table.add_row(vec![
            Cell::new(rank + 1).fg(Color::DarkGrey),
            Cell::new(&row.pair).fg(Color::Rgb {
                r: 0,
                g: cyan_val,
                b: cyan_val,
            }),
            number(format!("{:.2}", row.median_volatility_pct)).fg(Color::Rgb {
                r: 0,
                g: green_val,
                b: 0,
            }),
            number(format_volume(row.median_volume)),
            number(format!("{:.2}", row.min_market_funds)),
            number(format!("{:.2}", row.avg_long_session_pct)),
            number(format!("{:.2}", row.max_long_session_pct)),
            number(format!("{:.2}", row.avg_short_session_pct)),
            number(format!("{:.2}", row.max_short_session_pct)),
            number(row.total_sessions.to_string()),
        ]);
    }

    format!("\n{}\n{}", title, table)
}
