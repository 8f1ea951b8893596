//! SuperTrend session statistics.
//!
//! A session opens on every flip and runs until the next one (or the end of
//! the series). The flip bar belongs to the session it opens, never to the one
//! it closes.

use crate::indicators::{Signal, SuperTrend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Long,
    Short,
}

impl From<Signal> for SessionKind {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Buy => SessionKind::Long,
            Signal::Sell => SessionKind::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Session {
    pub kind: SessionKind,
    pub start_index: usize,
    /// Last bar that belongs to the session (inclusive).
    pub end_index: usize,
    pub reference_close: f64,
    pub running_high: f64,
    pub running_low: f64,
}

impl Session {
    fn open(kind: SessionKind, index: usize, high: f64, low: f64, close: f64) -> Self {
        Self {
            kind,
            start_index: index,
            end_index: index,
            reference_close: close,
            running_high: high,
            running_low: low,
        }
    }

    fn extend(&mut self, index: usize, high: f64, low: f64) {
        self.end_index = index;
        self.running_high = self.running_high.max(high);
        self.running_low = self.running_low.min(low);
    }

    /// Best move in the session's direction, as % of the close on the flip bar.
    ///
    /// `None` when that close is zero and the move has no meaning.
    pub fn move_pct(&self) -> Option<f64> {
        if self.reference_close == 0.0 {
            return None;
        }
        let pct = match self.kind {
            SessionKind::Long => (self.running_high - self.reference_close) / self.reference_close * 100.0,
            SessionKind::Short => (self.reference_close - self.running_low) / self.reference_close * 100.0,
        };
        Some(pct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SuperTrendStats {
    pub avg_long_session_pct: f64,
    pub max_long_session_pct: f64,
    pub avg_short_session_pct: f64,
    pub max_short_session_pct: f64,
    pub total_sessions: usize,
    pub long_sessions: usize,
    pub short_sessions: usize,
}

impl SuperTrendStats {
    /// `None` if any session's move cannot be computed.
    pub fn from_sessions(sessions: &[Session]) -> Option<Self> {
        let moves = |kind: SessionKind| -> Option<Vec<f64>> {
            sessions
                .iter()
                .filter(|s| s.kind == kind)
                .map(Session::move_pct)
                .collect()
        };
        let long = moves(SessionKind::Long)?;
        let short = moves(SessionKind::Short)?;

        Some(Self {
            avg_long_session_pct: mean(&long),
            max_long_session_pct: max(&long),
            avg_short_session_pct: mean(&short),
            max_short_session_pct: max(&short),
            total_sessions: long.len() + short.len(),
            long_sessions: long.len(),
            short_sessions: short.len(),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

/// Splits the series into sessions at every SuperTrend flip.
///
/// Bars before the first flip belong to no session. The last session is
/// closed at the final bar.
pub fn segment_sessions(high: &[f64], low: &[f64], close: &[f64], trend: &SuperTrend) -> Vec<Session> {
    let n = trend.len().min(high.len()).min(low.len()).min(close.len());

    let mut sessions = Vec::new();
    let mut current: Option<Session> = None;

    for i in trend.seed..n {
        if let Some(signal) = trend.state(i).and_then(|s| s.signal) {
            if let Some(done) = current.take() {
                sessions.push(done);
            }
            current = Some(Session::open(signal.into(), i, high[i], low[i], close[i]));
            continue;
        }

        if let Some(session) = current.as_mut() {
            session.extend(i, high[i], low[i]);
        }
    }

    sessions.extend(current);
    sessions
}

/// Aggregate session statistics; all zero when the trend never flips.
///
/// `None` when a session opens on a zero close.
pub fn analyze_sessions(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    trend: &SuperTrend,
) -> Option<SuperTrendStats> {
    if trend.flips().next().is_none() {
        return Some(SuperTrendStats::default());
    }
    SuperTrendStats::from_sessions(&segment_sessions(high, low, close, trend))
}
