pub mod completion;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::error::{SourceError, SurfaceError, SyncError};
use crate::health::{ConnectionHealthMonitor, Outcome};
use crate::model::{Candle, Series, Timeframe, Upsert};
use crate::source::{DataSource, WindowQuery};
use crate::surface::{
    ChartType, Presentation, RenderingSurface, SeriesHandle, SeriesKind, SeriesPoint,
};

pub use completion::CompletionTracker;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of candles requested by a full reload.
    pub window_limit: usize,
    /// Delay between a completion transition and the reload it triggers.
    pub reload_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_limit: 500,
            reload_delay: Duration::from_millis(1_000),
        }
    }
}

/// The pair currently mirrored on the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncContext {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub generation: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// Latest-candle projection for the side panel.
#[derive(Debug, Clone, PartialEq)]
pub struct SidePanel {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub latest: Candle,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindSummary {
    pub candles: usize,
    pub latest: Option<Candle>,
    /// Another `bind` started before this one finished.
    pub superseded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Applied {
        upsert: Upsert,
        reload_scheduled: bool,
    },
    /// The surface rejected the update and was rebuilt by a full reload.
    Recovered { reload_scheduled: bool },
    /// The pair was rebound while the request was in flight.
    Discarded,
    /// The bound pair has no window on the surface yet; nothing was fetched.
    Loading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadResult {
    Applied { candles: usize },
    /// A reload for the same pair is already running.
    Skipped,
    /// The pair was rebound while the window was being fetched.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadReason {
    Bind,
    Completion,
    Recovery,
    Presentation,
    Manual,
}

impl ReloadReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Completion => "completion",
            Self::Recovery => "recovery",
            Self::Presentation => "presentation",
            Self::Manual => "manual",
        }
    }
}

struct SyncState<S> {
    surface: S,
    context: Option<SyncContext>,
    generation: u64,
    series: Series,
    presentation: Presentation,
    handles: Vec<(SeriesKind, SeriesHandle)>,
    completion: CompletionTracker,
    side_panel: Option<SidePanel>,
    pending_reload: Option<JoinHandle<()>>,
    reload_in_flight: Option<u64>,
    /// Generation whose first window has not been applied. The attached
    /// handles still belong to the previous pair until it is.
    loading: Option<u64>,
}

impl<S: RenderingSurface> SyncState<S> {
    fn series_kinds(&self) -> Vec<SeriesKind> {
        let mut kinds = vec![self.presentation.chart_type.series_kind()];
        if self.presentation.show_volume {
            kinds.push(SeriesKind::Volume);
        }
        kinds
    }

    fn detach_all(&mut self) {
        for (kind, handle) in self.handles.drain(..) {
            if let Err(e) = self.surface.detach_series(handle) {
                tracing::debug!(?kind, %handle, error = %e, "detach failed; handle already gone");
            }
        }
    }

    /// Rebuild every attached series from the in-memory series.
    fn redraw(&mut self, fit: bool) -> Result<(), SurfaceError> {
        let range = if fit { None } else { self.surface.visible_range() };
        self.detach_all();
        for kind in self.series_kinds() {
            let handle = self.surface.attach_series(kind)?;
            self.handles.push((kind, handle));
            let points = self
                .series
                .iter()
                .map(|c| SeriesPoint::for_kind(kind, c))
                .collect();
            self.surface.set_points(handle, points)?;
        }
        match range {
            Some(range) => self.surface.set_visible_range(range),
            None => self.surface.fit_all(),
        }
    }

    fn push_point(&mut self, candle: &Candle) -> Result<(), SurfaceError> {
        if self.handles.is_empty() {
            return Err(SurfaceError::Rejected("no series attached".to_string()));
        }
        for (kind, handle) in &self.handles {
            self.surface
                .update_point(*handle, SeriesPoint::for_kind(*kind, candle))?;
        }
        Ok(())
    }
}

/// Keeps the in-memory series and the rendering surface in step with the
/// data source.
///
/// Each poll fetches only the latest candle and applies it incrementally; a
/// full window reload happens on bind, shortly after a candle completes, and
/// whenever the surface rejects an incremental update.
pub struct ChartDataSynchronizer<S> {
    source: Arc<dyn DataSource>,
    health: Arc<ConnectionHealthMonitor>,
    config: SyncConfig,
    state: Mutex<SyncState<S>>,
}

impl<S: RenderingSurface + 'static> ChartDataSynchronizer<S> {
    pub fn new(
        source: Arc<dyn DataSource>,
        health: Arc<ConnectionHealthMonitor>,
        surface: S,
        presentation: Presentation,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            health,
            config,
            state: Mutex::new(SyncState {
                surface,
                context: None,
                generation: 0,
                series: Series::new(),
                presentation,
                handles: Vec::new(),
                completion: CompletionTracker::new(),
                side_panel: None,
                pending_reload: None,
                reload_in_flight: None,
                loading: None,
            }),
        })
    }

    pub fn health(&self) -> &Arc<ConnectionHealthMonitor> {
        &self.health
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    /// Point the chart at a new pair and load its window.
    pub async fn bind(
        self: &Arc<Self>,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<BindSummary, SyncError> {
        let generation = {
            let mut st = self.lock();
            if !st.surface.is_ready() {
                return Err(SyncError::NotReady);
            }
            if let Some(pending) = st.pending_reload.take() {
                pending.abort();
            }
            st.generation += 1;
            st.context = Some(SyncContext {
                symbol: symbol.to_string(),
                timeframe,
                generation: st.generation,
                last_poll_at: None,
            });
            st.series.clear();
            st.completion.reset();
            st.side_panel = None;
            // Claimed together with the generation bump so no other reload of
            // this pair can start ahead of the bind's own window fetch.
            st.loading = Some(st.generation);
            st.reload_in_flight = Some(st.generation);
            st.generation
        };
        tracing::info!(symbol, %timeframe, generation, "Binding chart");

        let applied = self
            .fetch_and_apply(generation, symbol, timeframe, ReloadReason::Bind)
            .await?;
        let Some(candles) = applied else {
            tracing::debug!(symbol, %timeframe, "bind superseded by a newer bind");
            return Ok(BindSummary {
                candles: 0,
                latest: None,
                superseded: true,
            });
        };

        let latest = match self.fetch_latest(symbol, timeframe).await {
            Ok(candle) => candle,
            Err(e) => {
                tracing::warn!(symbol, %timeframe, error = %e, "latest candle unavailable after bind");
                return Ok(BindSummary {
                    candles,
                    latest: None,
                    superseded: false,
                });
            }
        };

        let mut st = self.lock();
        if st.generation != generation {
            return Ok(BindSummary {
                candles,
                latest: None,
                superseded: true,
            });
        }
        st.completion.seed(&latest);
        st.side_panel = Some(SidePanel {
            symbol: symbol.to_string(),
            timeframe,
            latest: latest.clone(),
            updated_at: Utc::now(),
        });
        Ok(BindSummary {
            candles,
            latest: Some(latest),
            superseded: false,
        })
    }

    /// One scheduler tick: fetch the latest candle and apply it.
    pub async fn poll(self: &Arc<Self>) -> Result<PollOutcome, SyncError> {
        let (generation, symbol, timeframe) = {
            let st = self.lock();
            let ctx = st.context.as_ref().ok_or(SyncError::NotBound)?;
            if !st.surface.is_ready() {
                return Err(SyncError::NotReady);
            }
            if st.loading == Some(st.generation) {
                return Ok(PollOutcome::Loading);
            }
            (st.generation, ctx.symbol.clone(), ctx.timeframe)
        };

        let candle = match self.fetch_latest(&symbol, timeframe).await {
            Ok(candle) => candle,
            Err(SourceError::NotFound) => {
                return Err(SyncError::DataUnavailable { symbol, timeframe })
            }
            Err(e) => {
                tracing::debug!(symbol = %symbol, %timeframe, error = %e, "poll failed");
                return Err(SyncError::Transport(e));
            }
        };

        let (upsert, rejected, reload_scheduled) = {
            let mut st = self.lock();
            if st.generation != generation {
                return Ok(PollOutcome::Discarded);
            }

            let upsert = st.series.upsert(candle.clone());
            st.side_panel = Some(SidePanel {
                symbol: symbol.clone(),
                timeframe,
                latest: candle.clone(),
                updated_at: Utc::now(),
            });
            if let Some(ctx) = st.context.as_mut() {
                ctx.last_poll_at = Some(Utc::now());
            }

            // Identical updates are harmless, so every poll is pushed. Only a
            // stale bucket is skipped since the surface cannot rewrite history.
            let current = st.series.last().cloned();
            let rejected = match current {
                Some(last) if upsert != Upsert::Ignored || last.time == candle.time => {
                    st.push_point(&last).err()
                }
                _ => None,
            };

            let completed = st.completion.observe(&candle);
            let reload_scheduled = completed && st.pending_reload.is_none();
            if reload_scheduled {
                st.pending_reload = Some(self.spawn_deferred_reload(generation));
            }
            (upsert, rejected, reload_scheduled)
        };

        tracing::debug!(
            symbol = %symbol,
            time = candle.time,
            close = candle.close,
            completed = candle.completed,
            ?upsert,
            reload_scheduled,
            "poll applied"
        );

        match rejected {
            None => Ok(PollOutcome::Applied {
                upsert,
                reload_scheduled,
            }),
            Some(e) => {
                tracing::warn!(error = %e, "surface rejected incremental update; reloading");
                if let Err(e) = self.full_reload(generation, ReloadReason::Recovery).await {
                    tracing::warn!(error = %e, "recovery reload failed; next poll will retry");
                }
                Ok(PollOutcome::Recovered { reload_scheduled })
            }
        }
    }

    /// Restyle the existing series, keeping the visible window when known.
    pub async fn set_presentation(
        &self,
        chart_type: ChartType,
        show_volume: bool,
    ) -> Result<(), SyncError> {
        let generation = {
            let mut st = self.lock();
            if !st.surface.is_ready() {
                return Err(SyncError::NotReady);
            }
            st.presentation = Presentation {
                chart_type,
                show_volume,
            };
            if st.context.is_none() || st.series.is_empty() {
                return Ok(());
            }
            match st.redraw(false) {
                Ok(()) => {
                    tracing::info!(chart_type = chart_type.as_str(), show_volume, "Presentation changed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "restyle rejected by surface; reloading");
                    st.generation
                }
            }
        };
        self.full_reload(generation, ReloadReason::Presentation)
            .await
            .map(|_| ())
    }

    /// Refetch the full window for the bound pair.
    pub async fn reload(&self) -> Result<ReloadResult, SyncError> {
        let generation = {
            let st = self.lock();
            if st.context.is_none() {
                return Err(SyncError::NotBound);
            }
            if !st.surface.is_ready() {
                return Err(SyncError::NotReady);
            }
            st.generation
        };
        self.full_reload(generation, ReloadReason::Manual).await
    }

    pub fn displayed_candle_count(&self) -> usize {
        self.lock().series.len()
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.lock().series.as_slice().to_vec()
    }

    pub fn side_panel(&self) -> Option<SidePanel> {
        self.lock().side_panel.clone()
    }

    pub fn context(&self) -> Option<SyncContext> {
        self.lock().context.clone()
    }

    pub fn presentation(&self) -> Presentation {
        self.lock().presentation
    }

    pub fn reload_pending(&self) -> bool {
        self.lock().pending_reload.is_some()
    }

    /// True until the bound pair's first window reaches the surface.
    pub fn is_loading(&self) -> bool {
        let st = self.lock();
        st.loading == Some(st.generation)
    }

    /// Read-only access to the surface, e.g. for drawing.
    pub fn with_surface<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock().surface)
    }

    async fn fetch_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Candle, SourceError> {
        let ticket = self.health.begin_request();
        let result = self.source.get_latest(symbol, timeframe).await;
        self.health.report_outcome(ticket, outcome_of(&result));
        result
    }

    fn spawn_deferred_reload(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let delay = self.config.reload_delay;
        tracing::debug!(delay_ms = delay.as_millis() as u64, "candle completed; reload scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(sync) = weak.upgrade() else {
                return;
            };
            {
                let mut st = sync.lock();
                if st.generation != generation {
                    return;
                }
                st.pending_reload = None;
            }
            if let Err(e) = sync.full_reload(generation, ReloadReason::Completion).await {
                tracing::warn!(error = %e, "deferred reload failed");
            }
        })
    }

    async fn full_reload(
        &self,
        generation: u64,
        reason: ReloadReason,
    ) -> Result<ReloadResult, SyncError> {
        let (symbol, timeframe) = {
            let mut st = self.lock();
            if st.generation != generation {
                return Ok(ReloadResult::Discarded);
            }
            if st.reload_in_flight == Some(generation) {
                tracing::debug!(reason = reason.as_str(), "reload already in flight");
                return Ok(ReloadResult::Skipped);
            }
            let Some(ctx) = st.context.as_ref() else {
                return Err(SyncError::NotBound);
            };
            let pair = (ctx.symbol.clone(), ctx.timeframe);
            st.reload_in_flight = Some(generation);
            pair
        };

        Ok(
            match self
                .fetch_and_apply(generation, &symbol, timeframe, reason)
                .await?
            {
                Some(candles) => ReloadResult::Applied { candles },
                None => ReloadResult::Discarded,
            },
        )
    }

    /// Fetch the window and redraw every series from it. The caller holds the
    /// reload-in-flight marker for `generation`; `None` means it went stale.
    async fn fetch_and_apply(
        &self,
        generation: u64,
        symbol: &str,
        timeframe: Timeframe,
        reason: ReloadReason,
    ) -> Result<Option<usize>, SyncError> {
        let query = WindowQuery::latest(self.config.window_limit);
        let ticket = self.health.begin_request();
        let fetched = self.source.get_window(symbol, timeframe, &query).await;
        self.health.report_outcome(ticket, outcome_of(&fetched));

        let mut st = self.lock();
        if st.reload_in_flight == Some(generation) {
            st.reload_in_flight = None;
        }
        if st.generation != generation {
            return Ok(None);
        }
        let symbol = symbol.to_string();

        let window = match fetched {
            Ok(window) if !window.is_empty() => window,
            Ok(_) | Err(SourceError::NotFound) => {
                return Err(SyncError::DataUnavailable { symbol, timeframe });
            }
            Err(e) => return Err(SyncError::Transport(e)),
        };
        let candles = window
            .into_candles(query.completed_only)
            .map_err(SyncError::Transport)?;
        st.series
            .replace(candles)
            .map_err(|e| SyncError::Transport(SourceError::Malformed(e.to_string())))?;

        // A pair's first window always fits, even when it arrives by manual reload.
        let fit = reason == ReloadReason::Bind || st.loading == Some(generation);
        if let Err(e) = st.redraw(fit) {
            // Handles may have been invalidated underneath us; rebuild once more.
            tracing::warn!(error = %e, reason = reason.as_str(), "redraw rejected; retrying");
            st.redraw(fit)?;
        }

        if st.loading == Some(generation) {
            st.loading = None;
        }

        let count = st.series.len();
        tracing::info!(
            symbol = %symbol,
            %timeframe,
            candles = count,
            reason = reason.as_str(),
            "Full reload applied"
        );
        Ok(Some(count))
    }

    fn lock(&self) -> MutexGuard<'_, SyncState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Drop for ChartDataSynchronizer<S> {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = st.pending_reload.take() {
            pending.abort();
        }
    }
}

/// A 404 proves the source is reachable; only transport errors count against health.
fn outcome_of<T>(result: &Result<T, SourceError>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(e) if !e.is_transport() => Outcome::Success,
        Err(_) => Outcome::Failure,
    }
}
