use crate::candles::Candle;

/// Intraday range as a percentage of the low. Zero when `low <= 0`.
pub fn calculate_percentage_change(low: f64, high: f64) -> f64 {
    if low <= 0.0 {
        return 0.0;
    }
    (high - low) / low * 100.0
}

/// Middle value, or the mean of the two middle values for an even count.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Median daily range % over the last `days` candles.
///
/// `None` means there is not enough history and the pair should be skipped.
pub fn median_volatility(candles: &[Candle], days: usize) -> Option<f64> {
    if days == 0 || candles.len() < days {
        return None;
    }

    let ranges: Vec<f64> = candles[candles.len() - days..]
        .iter()
        .map(|c| calculate_percentage_change(c.low, c.high))
        .collect();

    median(&ranges)
}

/// Median volume over every candle fetched, not only the last `days`.
pub fn median_volume(candles: &[Candle]) -> f64 {
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    median(&volumes).unwrap_or(0.0)
}
