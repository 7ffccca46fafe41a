use serde::Deserialize;

use super::CandleWindow;
use crate::model::Candle;

/// Epochs at or above this are milliseconds (10 billion seconds is year 2286).
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Normalize an epoch that may be in seconds or milliseconds to seconds.
pub fn normalize_epoch_secs(raw: i64) -> i64 {
    if raw.abs() >= MILLIS_THRESHOLD {
        raw / 1_000
    } else {
        raw
    }
}

/// Accept `0`/`1` integers as well as JSON booleans.
pub fn int_or_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    match v {
        serde_json::Value::Null => Ok(true),
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(|i| i != 0)
            .ok_or_else(|| serde::de::Error::custom("invalid completion flag")),
        _ => Err(serde::de::Error::custom("invalid completion flag")),
    }
}

/// `GET /ohlc` response: parallel columns, `t` in milliseconds.
#[derive(Debug, Deserialize)]
pub struct OhlcResponse {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
    pub t: Vec<i64>,
    pub o: Vec<f64>,
    pub h: Vec<f64>,
    pub l: Vec<f64>,
    pub c: Vec<f64>,
    pub v: Vec<u64>,
}

impl From<OhlcResponse> for CandleWindow {
    fn from(resp: OhlcResponse) -> Self {
        CandleWindow {
            times: resp.t.into_iter().map(normalize_epoch_secs).collect(),
            opens: resp.o,
            highs: resp.h,
            lows: resp.l,
            closes: resp.c,
            volumes: resp.v,
        }
    }
}

/// `GET /latest` response: one stored candle row, `time` in seconds.
#[derive(Debug, Deserialize)]
pub struct CandleRow {
    #[serde(default)]
    pub datetime: String,
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub tick_volume: u64,
    #[serde(default)]
    pub spread: i64,
    #[serde(default)]
    pub real_volume: u64,
    #[serde(default = "default_completed", deserialize_with = "int_or_bool")]
    pub is_completed: bool,
}

fn default_completed() -> bool {
    true
}

impl From<CandleRow> for Candle {
    fn from(row: CandleRow) -> Self {
        Candle {
            time: normalize_epoch_secs(row.time),
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.tick_volume,
            completed: row.is_completed,
        }
    }
}

/// One symbol and the timeframe tables stored for it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SymbolTables {
    pub symbol: String,
    #[serde(default)]
    pub timeframes: Vec<String>,
}

/// `GET /info` response: what the store holds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolTables>,
    #[serde(default)]
    pub total_tables: u64,
    #[serde(default)]
    pub total_candles: u64,
    pub oldest_candle: Option<String>,
    pub newest_candle: Option<String>,
}

impl SourceInfo {
    /// One-line description for the host log.
    pub fn summary(&self) -> String {
        let span = match (&self.oldest_candle, &self.newest_candle) {
            (Some(oldest), Some(newest)) => format!(", {} .. {}", oldest, newest),
            _ => String::new(),
        };
        format!(
            "{} symbols, {} tables, {} candles{}",
            self.symbols.len(),
            self.total_tables,
            self.total_candles,
            span
        )
    }
}

/// FastAPI-style error body.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub detail: String,
}
