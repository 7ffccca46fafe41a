use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::health::HealthConfig;
use crate::model::Timeframe;
use crate::surface::{ChartType, Presentation};
use crate::sync::SyncConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub symbol: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    pub timeframe: String,
    #[serde(default = "default_window_limit")]
    pub window_limit: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    /// Falls back to the timeframe's suggested interval when unset.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default = "default_reload_delay_ms")]
    pub reload_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_minimum_status_duration_ms")]
    pub minimum_status_duration_ms: u64,
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_refresh_rate_ms")]
    pub refresh_rate_ms: u64,
    #[serde(default = "default_chart_type")]
    pub chart_type: String,
    #[serde(default)]
    pub show_volume: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_window_limit() -> usize {
    500
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_reload_delay_ms() -> u64 {
    1_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

fn default_minimum_status_duration_ms() -> u64 {
    2_000
}

fn default_settle_window_ms() -> u64 {
    750
}

fn default_refresh_rate_ms() -> u64 {
    100
}

fn default_chart_type() -> String {
    "candlestick".to_string()
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: None,
            reload_delay_ms: default_reload_delay_ms(),
        }
    }
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            minimum_status_duration_ms: default_minimum_status_duration_ms(),
            settle_window_ms: default_settle_window_ms(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: default_refresh_rate_ms(),
            chart_type: default_chart_type(),
            show_volume: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SourceConfig {
    pub fn timeframe(&self) -> Result<Timeframe> {
        self.timeframe
            .parse()
            .with_context(|| format!("source.timeframe '{}' is invalid", self.timeframe))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Primary symbol first, then the extra ones, uppercased and deduplicated.
    pub fn watch_symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.symbol.trim().is_empty() {
            out.push(self.symbol.trim().to_ascii_uppercase());
        }
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

impl From<&HealthSection> for HealthConfig {
    fn from(s: &HealthSection) -> Self {
        HealthConfig {
            failure_threshold: s.failure_threshold,
            success_threshold: s.success_threshold,
            minimum_status_duration: Duration::from_millis(s.minimum_status_duration_ms),
            settle_window: Duration::from_millis(s.settle_window_ms),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var("CHART_SYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_file(&config_path)?;

        if let Ok(url) = std::env::var("CHART_SYNC_API_URL") {
            if !url.trim().is_empty() {
                config.source.base_url = url.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&config_str).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.source.timeframe()?;
        self.ui
            .chart_type
            .parse::<ChartType>()
            .context("ui.chart_type is invalid")?;
        if self.source.watch_symbols().is_empty() {
            bail!("source.symbol must not be empty");
        }
        if self.source.window_limit == 0 || self.source.window_limit > 100_000 {
            bail!(
                "source.window_limit must be within 1..=100000, got {}",
                self.source.window_limit
            );
        }
        if self.health.failure_threshold == 0 || self.health.success_threshold == 0 {
            bail!("health thresholds must be > 0");
        }
        Ok(())
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig::from(&self.health)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            window_limit: self.source.window_limit,
            reload_delay: Duration::from_millis(self.sync.reload_delay_ms),
        }
    }

    pub fn presentation(&self) -> Result<Presentation> {
        Ok(Presentation {
            chart_type: self.ui.chart_type.parse()?,
            show_volume: self.ui.show_volume,
        })
    }

    /// Configured poll interval, or a quarter of the timeframe's bucket.
    pub fn poll_interval(&self, timeframe: Timeframe) -> Duration {
        match self.sync.poll_interval_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => timeframe.suggested_poll_interval(),
        }
    }
}
