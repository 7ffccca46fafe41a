use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SurfaceError;
use crate::surface::{RenderingSurface, SeriesHandle, SeriesKind, SeriesPoint, TimeRange};

/// Set by the host once the terminal has drawn its first frame.
#[derive(Debug, Clone, Default)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
struct AttachedSeries {
    kind: SeriesKind,
    points: Vec<SeriesPoint>,
}

/// Snapshot handed to the chart widget.
#[derive(Debug, Clone, Default)]
pub struct ChartView {
    pub price_kind: Option<SeriesKind>,
    pub price: Vec<SeriesPoint>,
    pub volume: Vec<SeriesPoint>,
}

/// In-memory surface drawn by the terminal UI.
#[derive(Debug, Default)]
pub struct TerminalSurface {
    ready: ReadyFlag,
    next_id: u64,
    series: BTreeMap<u64, AttachedSeries>,
    visible: Option<TimeRange>,
}

impl TerminalSurface {
    pub fn new(ready: ReadyFlag) -> Self {
        Self {
            ready,
            ..Self::default()
        }
    }

    pub fn attached(&self) -> usize {
        self.series.len()
    }

    /// Points that fall in the visible range, or the last `max_points` when
    /// the whole dataset is fitted.
    pub fn view(&self, max_points: usize) -> ChartView {
        let mut view = ChartView::default();
        for attached in self.series.values() {
            let visible: Vec<SeriesPoint> = match self.visible {
                Some(range) => attached
                    .points
                    .iter()
                    .filter(|p| p.time() >= range.from && p.time() <= range.to)
                    .cloned()
                    .collect(),
                None => attached.points.clone(),
            };
            let start = visible.len().saturating_sub(max_points);
            let tail = visible[start..].to_vec();
            if attached.kind == SeriesKind::Volume {
                view.volume = tail;
            } else {
                view.price_kind = Some(attached.kind);
                view.price = tail;
            }
        }
        view
    }

    fn get_mut(&mut self, handle: SeriesHandle) -> Result<&mut AttachedSeries, SurfaceError> {
        if !self.ready.get() {
            return Err(SurfaceError::NotReady);
        }
        self.series
            .get_mut(&handle.0)
            .ok_or(SurfaceError::StaleHandle(handle.0))
    }
}

fn shape_matches(kind: SeriesKind, point: &SeriesPoint) -> bool {
    match point {
        SeriesPoint::Ohlc { .. } => kind.is_ohlc(),
        SeriesPoint::Value { .. } => matches!(kind, SeriesKind::Line | SeriesKind::Area),
        SeriesPoint::Histogram { .. } => kind == SeriesKind::Volume,
    }
}

impl RenderingSurface for TerminalSurface {
    fn is_ready(&self) -> bool {
        self.ready.get()
    }

    fn attach_series(&mut self, kind: SeriesKind) -> Result<SeriesHandle, SurfaceError> {
        if !self.ready.get() {
            return Err(SurfaceError::NotReady);
        }
        self.next_id += 1;
        self.series.insert(
            self.next_id,
            AttachedSeries {
                kind,
                points: Vec::new(),
            },
        );
        Ok(SeriesHandle(self.next_id))
    }

    fn detach_series(&mut self, handle: SeriesHandle) -> Result<(), SurfaceError> {
        self.series
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(SurfaceError::StaleHandle(handle.0))
    }

    fn set_points(
        &mut self,
        handle: SeriesHandle,
        points: Vec<SeriesPoint>,
    ) -> Result<(), SurfaceError> {
        let series = self.get_mut(handle)?;
        if let Some(bad) = points.iter().find(|p| !shape_matches(series.kind, p)) {
            return Err(SurfaceError::Rejected(format!(
                "{:?} point at {} does not fit {:?} series",
                bad, bad.time(), series.kind
            )));
        }
        series.points = points;
        Ok(())
    }

    fn update_point(&mut self, handle: SeriesHandle, point: SeriesPoint) -> Result<(), SurfaceError> {
        let series = self.get_mut(handle)?;
        if !shape_matches(series.kind, &point) {
            return Err(SurfaceError::Rejected(format!(
                "point shape does not fit {:?} series",
                series.kind
            )));
        }
        match series.points.last_mut() {
            Some(last) if last.time() == point.time() => *last = point,
            Some(last) if last.time() > point.time() => {
                return Err(SurfaceError::Rejected(format!(
                    "cannot update {} older than last point {}",
                    point.time(),
                    last.time()
                )));
            }
            _ => series.points.push(point),
        }
        Ok(())
    }

    fn visible_range(&self) -> Option<TimeRange> {
        self.visible
    }

    fn set_visible_range(&mut self, range: TimeRange) -> Result<(), SurfaceError> {
        if range.from > range.to {
            return Err(SurfaceError::Rejected(format!(
                "empty range {}..{}",
                range.from, range.to
            )));
        }
        self.visible = Some(range);
        Ok(())
    }

    fn fit_all(&mut self) -> Result<(), SurfaceError> {
        self.visible = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_surface() -> TerminalSurface {
        let ready = ReadyFlag::new();
        ready.set();
        TerminalSurface::new(ready)
    }

    fn value(time: i64, value: f64) -> SeriesPoint {
        SeriesPoint::Value { time, value }
    }

    #[test]
    fn rejects_calls_before_ready() {
        let mut surface = TerminalSurface::new(ReadyFlag::new());
        assert_eq!(
            surface.attach_series(SeriesKind::Line),
            Err(SurfaceError::NotReady)
        );
    }

    #[test]
    fn update_point_replaces_or_appends() {
        let mut surface = ready_surface();
        let h = surface.attach_series(SeriesKind::Line).unwrap();
        surface.set_points(h, vec![value(60, 1.0), value(120, 2.0)]).unwrap();
        surface.update_point(h, value(120, 2.5)).unwrap();
        surface.update_point(h, value(180, 3.0)).unwrap();
        assert!(surface.update_point(h, value(60, 9.0)).is_err());

        let view = surface.view(10);
        assert_eq!(view.price_kind, Some(SeriesKind::Line));
        assert_eq!(view.price, vec![value(60, 1.0), value(120, 2.5), value(180, 3.0)]);
    }

    #[test]
    fn detached_handle_is_stale() {
        let mut surface = ready_surface();
        let h = surface.attach_series(SeriesKind::Line).unwrap();
        surface.detach_series(h).unwrap();
        assert_eq!(
            surface.update_point(h, value(60, 1.0)),
            Err(SurfaceError::StaleHandle(h.0))
        );
    }

    #[test]
    fn rejects_mismatched_point_shape() {
        let mut surface = ready_surface();
        let h = surface.attach_series(SeriesKind::Volume).unwrap();
        assert!(surface.set_points(h, vec![value(60, 1.0)]).is_err());
    }

    #[test]
    fn view_respects_visible_range() {
        let mut surface = ready_surface();
        let h = surface.attach_series(SeriesKind::Line).unwrap();
        surface
            .set_points(h, (1..=5).map(|i| value(i * 60, i as f64)).collect())
            .unwrap();
        surface
            .set_visible_range(TimeRange { from: 120, to: 240 })
            .unwrap();
        assert_eq!(surface.view(10).price.len(), 3);
        surface.fit_all().unwrap();
        assert_eq!(surface.visible_range(), None);
        assert_eq!(surface.view(2).price, vec![value(240, 4.0), value(300, 5.0)]);
    }
}
