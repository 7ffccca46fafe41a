pub mod rest;
pub mod types;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::model::{Candle, Timeframe};

pub use rest::HttpDataSource;
pub use types::SourceInfo;

/// Parameters of a full-window fetch. Times are epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowQuery {
    pub limit: usize,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub completed_only: bool,
}

impl WindowQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            start_time: None,
            end_time: None,
            completed_only: false,
        }
    }
}

/// Column-oriented candle window, ascending by time (epoch seconds).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleWindow {
    pub times: Vec<i64>,
    pub opens: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<u64>,
}

impl CandleWindow {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Zip the columns into candles.
    ///
    /// The window carries no completion flags: every candle but the last is
    /// closed, and the last is treated as forming unless the query asked for
    /// completed candles only.
    pub fn into_candles(self, completed_only: bool) -> Result<Vec<Candle>, SourceError> {
        let n = self.times.len();
        let lengths = [
            self.opens.len(),
            self.highs.len(),
            self.lows.len(),
            self.closes.len(),
            self.volumes.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(SourceError::Malformed(format!(
                "column lengths differ: times={} others={:?}",
                n, lengths
            )));
        }
        if let Some(pos) = self.times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(SourceError::Malformed(format!(
                "times not ascending at index {}",
                pos + 1
            )));
        }

        Ok((0..n)
            .map(|i| Candle {
                time: self.times[i],
                open: self.opens[i],
                high: self.highs[i],
                low: self.lows[i],
                close: self.closes[i],
                volume: self.volumes[i],
                completed: completed_only || i + 1 < n,
            })
            .collect())
    }
}

/// Remote candle store polled by the synchronizer.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn list_symbols(&self) -> Result<Vec<String>, SourceError>;

    async fn list_timeframes(&self, symbol: &str) -> Result<Vec<Timeframe>, SourceError>;

    async fn get_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        query: &WindowQuery,
    ) -> Result<CandleWindow, SourceError>;

    async fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Candle, SourceError>;
}
