use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use volatility_screener::analysis::ScreeningPipeline;
use volatility_screener::candles::DateWindow;
use volatility_screener::exchange::{CoinbaseClient, iso_format};
use volatility_screener::report::{self, ScreeningReport};
use volatility_screener::storage_utils::{AppConfig, AsyncStorageManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let storage = AsyncStorageManager::new_relative("storage").await?;
    let config = storage
        .load_or_init("config", AppConfig::default())
        .await?
        .normalized();

    let screening = &config.screening;
    let window = DateWindow::trailing_days(Utc::now(), screening.days);
    info!(
        "Window: {} to {} (UTC), {} full daily candles expected",
        iso_format(window.start),
        iso_format(window.end),
        screening.days
    );
    info!(
        "Thresholds: volatility {}%, volume {:.0}, quote {}",
        screening.volatility_threshold, screening.volume_threshold, screening.quote_currency
    );
    info!(
        "SuperTrend: {}s candles ({}s fallback), factor {}, ATR length {}",
        config.supertrend.granularity,
        config.supertrend.fallback_granularity,
        config.supertrend.factor,
        config.supertrend.atr_length
    );

    let client = CoinbaseClient::new(&config.exchange)?;
    let pipeline = ScreeningPipeline::new(&client, &config, window);

    // Step 1: Discover pairs
    let pairs = pipeline.discover_pairs().await?;
    info!("Found {} active -{} pairs", pairs.len(), screening.quote_currency);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, cancelling the run");
            let _ = cancel_tx.send(true);
        }
    });

    // Step 2: Screen
    let run = pipeline.run(&pairs, cancel_rx).await;

    // Step 3: Rank, save and display
    let report = ScreeningReport::new(
        &run.records,
        pipeline.window(),
        Utc::now().timestamp_millis(),
        run.cancelled,
    );
    storage.save("results", &report).await?;
    info!(
        "{} pair(s) saved to {:?}",
        report.rows.len(),
        storage.base_dir.join("results.json")
    );

    println!("{}", report::render(&report, config.display_rows));

    Ok(())
}
