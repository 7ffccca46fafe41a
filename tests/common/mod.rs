#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use chart_sync::error::{SourceError, SurfaceError};
use chart_sync::model::{Candle, Timeframe};
use chart_sync::source::{CandleWindow, DataSource, WindowQuery};
use chart_sync::surface::{RenderingSurface, SeriesHandle, SeriesKind, SeriesPoint, TimeRange};

pub fn candle(time: i64, close: f64, completed: bool) -> Candle {
    Candle {
        time,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 10,
        completed,
    }
}

/// `n` one-minute candles ending with a forming one.
pub fn minute_window(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| candle(1_700_000_000 + i as i64 * 60, 100.0 + i as f64, i + 1 < n))
        .collect()
}

pub fn transport_error() -> SourceError {
    SourceError::Status {
        code: 503,
        body: "unavailable".to_string(),
    }
}

#[derive(Default)]
struct SourceState {
    windows: HashMap<String, Vec<Candle>>,
    latest_script: HashMap<String, VecDeque<Result<Candle, SourceError>>>,
    window_calls: usize,
    latest_calls: usize,
    gate: Option<(String, Arc<Notify>)>,
    window_gate: Option<(String, Arc<Notify>)>,
}

/// Scripted data source. `get_latest` pops the next scripted result for the
/// symbol and falls back to the last candle of its window.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<SourceState>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap()
    }

    pub fn set_window(&self, symbol: &str, candles: Vec<Candle>) {
        self.lock().windows.insert(symbol.to_string(), candles);
    }

    pub fn push_latest(&self, symbol: &str, result: Result<Candle, SourceError>) {
        self.lock()
            .latest_script
            .entry(symbol.to_string())
            .or_default()
            .push_back(result);
    }

    /// Block `get_latest` for `symbol` until the returned notify fires.
    pub fn gate_latest(&self, symbol: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.lock().gate = Some((symbol.to_string(), notify.clone()));
        notify
    }

    /// Block the next `get_window` for `symbol` until the returned notify fires.
    pub fn gate_window(&self, symbol: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.lock().window_gate = Some((symbol.to_string(), notify.clone()));
        notify
    }

    pub fn window_calls(&self) -> usize {
        self.lock().window_calls
    }

    pub fn latest_calls(&self) -> usize {
        self.lock().latest_calls
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn list_symbols(&self) -> Result<Vec<String>, SourceError> {
        let mut symbols: Vec<String> = self.lock().windows.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn list_timeframes(&self, symbol: &str) -> Result<Vec<Timeframe>, SourceError> {
        if self.lock().windows.contains_key(symbol) {
            Ok(vec![Timeframe::M1, Timeframe::H1])
        } else {
            Err(SourceError::NotFound)
        }
    }

    async fn get_window(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        query: &WindowQuery,
    ) -> Result<CandleWindow, SourceError> {
        let gate = {
            let mut st = self.lock();
            st.window_calls += 1;
            match st.window_gate.take() {
                Some((gated, notify)) if gated == symbol => Some(notify),
                other => {
                    st.window_gate = other;
                    None
                }
            }
        };
        if let Some(notify) = gate {
            notify.notified().await;
        }

        let st = self.lock();
        let candles = st.windows.get(symbol).ok_or(SourceError::NotFound)?;
        let start = candles.len().saturating_sub(query.limit);
        let mut window = CandleWindow::default();
        for c in &candles[start..] {
            window.times.push(c.time);
            window.opens.push(c.open);
            window.highs.push(c.high);
            window.lows.push(c.low);
            window.closes.push(c.close);
            window.volumes.push(c.volume);
        }
        Ok(window)
    }

    async fn get_latest(&self, symbol: &str, _timeframe: Timeframe) -> Result<Candle, SourceError> {
        let gate = {
            let mut st = self.lock();
            st.latest_calls += 1;
            match &st.gate {
                Some((gated, notify)) if gated == symbol => Some(notify.clone()),
                _ => None,
            }
        };
        if let Some(notify) = gate {
            notify.notified().await;
        }

        let mut st = self.lock();
        if let Some(next) = st.latest_script.get_mut(symbol).and_then(VecDeque::pop_front) {
            return next;
        }
        st.windows
            .get(symbol)
            .and_then(|w| w.last().cloned())
            .ok_or(SourceError::NotFound)
    }
}

#[derive(Debug, Default)]
pub struct SurfaceLog {
    pub ready: bool,
    pub next_id: u64,
    pub series: BTreeMap<u64, (SeriesKind, Vec<SeriesPoint>)>,
    pub visible: Option<TimeRange>,
    pub attach_calls: usize,
    pub set_points_calls: usize,
    pub update_calls: usize,
    pub fit_all_calls: usize,
    /// Number of upcoming `update_point` calls to reject.
    pub fail_updates: usize,
}

impl SurfaceLog {
    pub fn mutations(&self) -> usize {
        self.attach_calls + self.set_points_calls + self.update_calls + self.fit_all_calls
    }

    pub fn series_of(&self, kind: SeriesKind) -> Option<&Vec<SeriesPoint>> {
        self.series
            .values()
            .find(|(k, _)| *k == kind)
            .map(|(_, points)| points)
    }

    pub fn kinds(&self) -> Vec<SeriesKind> {
        self.series.values().map(|(k, _)| *k).collect()
    }
}

/// Surface whose state stays observable after it moves into the synchronizer.
#[derive(Clone, Default)]
pub struct FakeSurface {
    pub log: Arc<Mutex<SurfaceLog>>,
}

impl FakeSurface {
    pub fn ready() -> Self {
        let surface = Self::default();
        surface.log().ready = true;
        surface
    }

    pub fn log(&self) -> MutexGuard<'_, SurfaceLog> {
        self.log.lock().unwrap()
    }
}

impl RenderingSurface for FakeSurface {
    fn is_ready(&self) -> bool {
        self.log().ready
    }

    fn attach_series(&mut self, kind: SeriesKind) -> Result<SeriesHandle, SurfaceError> {
        let mut log = self.log();
        log.attach_calls += 1;
        log.next_id += 1;
        let id = log.next_id;
        log.series.insert(id, (kind, Vec::new()));
        Ok(SeriesHandle(id))
    }

    fn detach_series(&mut self, handle: SeriesHandle) -> Result<(), SurfaceError> {
        self.log()
            .series
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(SurfaceError::StaleHandle(handle.0))
    }

    fn set_points(
        &mut self,
        handle: SeriesHandle,
        points: Vec<SeriesPoint>,
    ) -> Result<(), SurfaceError> {
        let mut log = self.log();
        log.set_points_calls += 1;
        let (_, existing) = log
            .series
            .get_mut(&handle.0)
            .ok_or(SurfaceError::StaleHandle(handle.0))?;
        *existing = points;
        Ok(())
    }

    fn update_point(&mut self, handle: SeriesHandle, point: SeriesPoint) -> Result<(), SurfaceError> {
        let mut log = self.log();
        log.update_calls += 1;
        if log.fail_updates > 0 {
            log.fail_updates -= 1;
            return Err(SurfaceError::Rejected("injected failure".to_string()));
        }
        let (_, points) = log
            .series
            .get_mut(&handle.0)
            .ok_or(SurfaceError::StaleHandle(handle.0))?;
        match points.last_mut() {
            Some(last) if last.time() == point.time() => *last = point,
            Some(last) if last.time() > point.time() => {
                return Err(SurfaceError::Rejected("older than last point".to_string()))
            }
            _ => points.push(point),
        }
        Ok(())
    }

    fn visible_range(&self) -> Option<TimeRange> {
        self.log().visible
    }

    fn set_visible_range(&mut self, range: TimeRange) -> Result<(), SurfaceError> {
        self.log().visible = Some(range);
        Ok(())
    }

    fn fit_all(&mut self) -> Result<(), SurfaceError> {
        let mut log = self.log();
        log.fit_all_calls += 1;
        log.visible = None;
        Ok(())
    }
}
