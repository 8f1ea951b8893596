use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

// CONFIGURATION STRUCTS
// `config.json` in the storage directory deserializes straight into these.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScreeningConfig {
    pub volatility_threshold: f64, // minimum median daily range, in %
    pub volume_threshold: f64,     // minimum median daily volume
    pub days: u32,                 // lookback window, in full daily candles
    pub quote_currency: String,    // e.g., "USD", "USDC", "BTC"
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            volatility_threshold: 2.0,
            volume_threshold: 1_000_000.0,
            days: 90,
            quote_currency: "USD".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub request_interval_ms: u64, // fixed pause after every request (~3 req/s)
    pub max_candles_per_request: u32,
    pub max_chunk_requests: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.exchange.coinbase.com".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            request_timeout_secs: 30,
            request_interval_ms: 350,
            // The exchange caps a response at 300 candles; 288 keeps a 30m chunk at 6 days.
            max_candles_per_request: 288,
            max_chunk_requests: 20,
        }
    }
}

impl ExchangeConfig {
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SuperTrendConfig {
    pub atr_length: usize,
    pub factor: f64,
    pub granularity: u32,          // seconds
    pub fallback_granularity: u32, // used when the exchange refuses `granularity`
    pub min_candles: usize,        // below this the trend stats stay zeroed
}

impl Default for SuperTrendConfig {
    fn default() -> Self {
        Self {
            atr_length: 10,
            factor: 3.0,
            granularity: 1800,
            fallback_granularity: 3600,
            min_candles: 20,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    // Nested structs organize the config logically
    pub screening: ScreeningConfig,
    pub exchange: ExchangeConfig,
    pub supertrend: SuperTrendConfig,
    pub display_rows: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            screening: ScreeningConfig::default(),
            exchange: ExchangeConfig::default(),
            supertrend: SuperTrendConfig::default(),
            display_rows: 25,
        }
    }
}

impl AppConfig {
    /// Upper-cases the quote currency so `-usd` and `-USD` filter the same pairs.
    /// A lookback of zero days is raised to one.
    pub fn normalized(mut self) -> Self {
        self.screening.quote_currency = self.screening.quote_currency.trim().to_uppercase();
        if self.screening.days == 0 {
            warn!("screening.days is 0, using 1");
            self.screening.days = 1;
        }
        self
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted at `base_dir`, creating the directory if needed.
    pub async fn new<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    /// **Constructor: new_relative**
    /// Resolves the storage path relative to where the binary executable lives.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    /// **Generic Save Function**
    /// Serializes `data` to `<filename>.json` using an atomic tmp-file + rename,
    /// so an interrupted run never leaves a truncated file behind.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;

        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    /// **Generic Load Function**
    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));

        // serde_json validates UTF-8 itself, so read raw bytes.
        let content = fs::read(path).await?;

        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `<filename>.json`, or writes `default` there first if it does not exist yet.
    pub async fn load_or_init<T>(&self, filename: &str, default: T) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let path = self.base_dir.join(format!("{}.json", filename));
        if fs::try_exists(&path).await? {
            return self.load(filename).await;
        }

        self.save(filename, &default).await?;
        info!("Wrote default {} to {:?}", filename, path);
        Ok(default)
    }
}
