//! ATR and SuperTrend.
//!
//! ATR here is the simple moving average of true range, not Wilder's
//! smoothing, so the SuperTrend bands match the screener's historical output.

use ta::indicators::{SimpleMovingAverage, TrueRange};
use ta::{Close, High, Low, Next};

struct PriceBar {
    high: f64,
    low: f64,
    close: f64,
}

impl High for PriceBar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl Low for PriceBar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl Close for PriceBar {
    fn close(&self) -> f64 {
        self.close
    }
}

/// Average True Range over `length` bars.
///
/// Needs at least `length + 1` points. The result has `len - length` values;
/// `atr[0]` is the window of true ranges ending at input index `length`.
pub fn calculate_atr(high: &[f64], low: &[f64], close: &[f64], length: usize) -> Option<Vec<f64>> {
    let n = close.len();
    if length == 0 || high.len() != n || low.len() != n || n < length + 1 {
        return None;
    }

    let mut true_range = TrueRange::new();
    let mut average = SimpleMovingAverage::new(length).ok()?;
    let mut atr = Vec::with_capacity(n - length);

    for i in 0..n {
        let bar = PriceBar {
            high: high[i],
            low: low[i],
            close: close[i],
        };
        let tr = true_range.next(&bar);
        // The first bar has no previous close; it only seeds the true range.
        if i == 0 {
            continue;
        }

        let value = average.next(tr);
        if i >= length {
            atr.push(value);
        }
    }

    Some(atr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[cfg(test)]
impl Direction {
    pub fn as_i8(self) -> i8 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
}

#[cfg(test)]
impl Signal {
    pub fn as_i8(self) -> i8 {
        match self {
            Signal::Buy => 1,
            Signal::Sell => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendState {
    pub line: f64,
    pub direction: Direction,
    /// Set only on the bar where the direction flips.
    pub signal: Option<Signal>,
}

/// SuperTrend output for a whole series. Bars before `seed` have no state.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperTrend {
    pub seed: usize,
    pub states: Vec<TrendState>,
}

impl SuperTrend {
    /// Number of input bars covered, including the ones before `seed`.
    pub(crate) fn len(&self) -> usize {
        self.seed + self.states.len()
    }

    pub fn state(&self, index: usize) -> Option<&TrendState> {
        index.checked_sub(self.seed).and_then(|i| self.states.get(i))
    }

    #[cfg(test)]
    pub fn line(&self) -> Vec<Option<f64>> {
        (0..self.len()).map(|i| self.state(i).map(|s| s.line)).collect()
    }

    /// +1 / -1 per bar, 0 before the seed.
    #[cfg(test)]
    pub fn direction(&self) -> Vec<i8> {
        (0..self.len())
            .map(|i| self.state(i).map_or(0, |s| s.direction.as_i8()))
            .collect()
    }

    /// +1 buy / -1 sell on flips, 0 everywhere else.
    #[cfg(test)]
    pub fn signal(&self) -> Vec<i8> {
        (0..self.len())
            .map(|i| self.state(i).and_then(|s| s.signal).map_or(0, Signal::as_i8))
            .collect()
    }

    /// `(bar index, signal)` for every flip, in order.
    pub fn flips(&self) -> impl Iterator<Item = (usize, Signal)> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.signal.map(|signal| (self.seed + i, signal)))
    }
}

/// SuperTrend with bands at `factor` ATRs around the bar midpoint.
///
/// `None` when ATR cannot be computed for the series.
pub fn calculate_supertrend(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    factor: f64,
    atr_length: usize,
) -> Option<SuperTrend> {
    let atr = calculate_atr(high, low, close, atr_length)?;

    let mut states: Vec<TrendState> = Vec::with_capacity(atr.len());

    for i in atr_length..close.len() {
        let midprice = (high[i] + low[i]) / 2.0;
        let band = factor * atr[i - atr_length];
        let upper = midprice + band;
        let lower = midprice - band;

        let state = match states.last() {
            None => {
                if close[i] <= lower {
                    TrendState {
                        line: lower,
                        direction: Direction::Down,
                        signal: None,
                    }
                } else {
                    TrendState {
                        line: upper,
                        direction: Direction::Up,
                        signal: None,
                    }
                }
            }
            Some(prev) => {
                // The line only moves in the trend's favour.
                let line = match prev.direction {
                    Direction::Up if lower > prev.line => lower,
                    Direction::Down if upper < prev.line => upper,
                    _ => prev.line,
                };
                let direction = if close[i] > line {
                    Direction::Up
                } else {
                    Direction::Down
                };
                let signal = (direction != prev.direction).then_some(match direction {
                    Direction::Up => Signal::Buy,
                    Direction::Down => Signal::Sell,
                });

                TrendState {
                    line,
                    direction,
                    signal,
                }
            }
        };
        states.push(state);
    }

    Some(SuperTrend {
        seed: atr_length,
        states,
    })
}
