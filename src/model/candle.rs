use thiserror::Error;

/// One OHLCV bar. `time` is the bucket open in epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub completed: bool,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    pub fn is_forming(&self) -> bool {
        !self.completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    #[error("candle at index {index} (time {time}) is not after its predecessor")]
    OutOfOrder { index: usize, time: i64 },
    #[error("forming candle at time {time} is not the last candle")]
    FormingNotLast { time: i64 },
}

/// Result of applying a single candle to a [`Series`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The last candle was replaced in place.
    Updated,
    /// The candle opened a new bucket.
    Appended,
    /// Stale or immutable target; nothing changed.
    Ignored,
}

/// Candles ordered strictly by time with at most one trailing forming candle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    candles: Vec<Candle>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole series after validating ordering and the forming-candle rule.
    pub fn replace(&mut self, candles: Vec<Candle>) -> Result<(), SeriesError> {
        for (index, pair) in candles.windows(2).enumerate() {
            if pair[1].time <= pair[0].time {
                return Err(SeriesError::OutOfOrder {
                    index: index + 1,
                    time: pair[1].time,
                });
            }
            if pair[0].is_forming() {
                return Err(SeriesError::FormingNotLast { time: pair[0].time });
            }
        }
        self.candles = candles;
        Ok(())
    }

    /// Apply the latest candle reported by the source.
    ///
    /// A newer bucket seals the previous forming candle; its final values are
    /// picked up by the next full reload.
    pub fn upsert(&mut self, candle: Candle) -> Upsert {
        let Some(last) = self.candles.last_mut() else {
            self.candles.push(candle);
            return Upsert::Appended;
        };

        if candle.time == last.time {
            if last.completed {
                return Upsert::Ignored;
            }
            *last = candle;
            return Upsert::Updated;
        }
        if candle.time < last.time {
            return Upsert::Ignored;
        }

        last.completed = true;
        self.candles.push(candle);
        Upsert::Appended
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }
}
