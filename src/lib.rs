pub mod analysis;
pub mod candles;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod products;
pub mod report;
pub mod sessions;
pub mod storage_utils;
pub mod volatility;

#[cfg(test)]
mod test_support;
