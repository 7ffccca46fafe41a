//! Boundary to whatever draws the series.
//!
//! The surface keeps its own projection of the data; the synchronizer is the
//! only caller and treats every error as recoverable by a full reload.

use std::fmt;

use crate::error::SurfaceError;
use crate::model::Candle;

/// How the price series is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChartType {
    #[default]
    Candlestick,
    Bar,
    Line,
    Area,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Candlestick => "candlestick",
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Area => "area",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Candlestick => Self::Bar,
            Self::Bar => Self::Line,
            Self::Line => Self::Area,
            Self::Area => Self::Candlestick,
        }
    }

    pub fn series_kind(self) -> SeriesKind {
        match self {
            Self::Candlestick => SeriesKind::Candlestick,
            Self::Bar => SeriesKind::Bar,
            Self::Line => SeriesKind::Line,
            Self::Area => SeriesKind::Area,
        }
    }
}

impl std::str::FromStr for ChartType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "candlestick" | "candles" => Ok(Self::Candlestick),
            "bar" | "ohlc" => Ok(Self::Bar),
            "line" => Ok(Self::Line),
            "area" => Ok(Self::Area),
            other => anyhow::bail!(
                "invalid chart type '{}': expected candlestick, bar, line or area",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Presentation {
    pub chart_type: ChartType,
    pub show_volume: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    Candlestick,
    Bar,
    Line,
    Area,
    Volume,
}

impl SeriesKind {
    /// `true` for kinds that take OHLC points.
    pub fn is_ohlc(self) -> bool {
        matches!(self, Self::Candlestick | Self::Bar)
    }
}

/// Opaque id of a series attached to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesHandle(pub u64);

impl fmt::Display for SeriesHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesPoint {
    Ohlc {
        time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    Value {
        time: i64,
        value: f64,
    },
    /// Volume bar colored by the candle's direction.
    Histogram {
        time: i64,
        value: f64,
        up: bool,
    },
}

impl SeriesPoint {
    pub fn time(&self) -> i64 {
        match self {
            Self::Ohlc { time, .. } | Self::Value { time, .. } | Self::Histogram { time, .. } => {
                *time
            }
        }
    }

    /// Project a candle onto the point shape `kind` expects.
    pub fn for_kind(kind: SeriesKind, candle: &Candle) -> Self {
        match kind {
            SeriesKind::Candlestick | SeriesKind::Bar => Self::Ohlc {
                time: candle.time,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
            },
            SeriesKind::Line | SeriesKind::Area => Self::Value {
                time: candle.time,
                value: candle.close,
            },
            SeriesKind::Volume => Self::Histogram {
                time: candle.time,
                value: candle.volume as f64,
                up: candle.is_bullish(),
            },
        }
    }
}

/// Visible time window in epoch seconds, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

pub trait RenderingSurface: Send {
    /// The surface finishes initializing asynchronously after construction.
    fn is_ready(&self) -> bool;

    fn attach_series(&mut self, kind: SeriesKind) -> Result<SeriesHandle, SurfaceError>;

    fn detach_series(&mut self, handle: SeriesHandle) -> Result<(), SurfaceError>;

    fn set_points(&mut self, handle: SeriesHandle, points: Vec<SeriesPoint>)
        -> Result<(), SurfaceError>;

    /// Replace the point at `point.time()` or append it when newer than the last.
    fn update_point(&mut self, handle: SeriesHandle, point: SeriesPoint)
        -> Result<(), SurfaceError>;

    fn visible_range(&self) -> Option<TimeRange>;

    fn set_visible_range(&mut self, range: TimeRange) -> Result<(), SurfaceError>;

    fn fit_all(&mut self) -> Result<(), SurfaceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, close: f64) -> Candle {
        Candle {
            time: 60,
            open,
            high: 3.0,
            low: 0.5,
            close,
            volume: 12,
            completed: true,
        }
    }

    #[test]
    fn projects_candle_per_kind() {
        let c = candle(1.0, 2.0);
        assert!(matches!(
            SeriesPoint::for_kind(SeriesKind::Bar, &c),
            SeriesPoint::Ohlc { time: 60, .. }
        ));
        assert_eq!(
            SeriesPoint::for_kind(SeriesKind::Line, &c),
            SeriesPoint::Value { time: 60, value: 2.0 }
        );
        assert_eq!(
            SeriesPoint::for_kind(SeriesKind::Volume, &candle(2.0, 1.0)),
            SeriesPoint::Histogram {
                time: 60,
                value: 12.0,
                up: false
            }
        );
    }

    #[test]
    fn chart_type_parse_and_cycle() {
        assert_eq!("Candles".parse::<ChartType>().unwrap(), ChartType::Candlestick);
        assert_eq!("ohlc".parse::<ChartType>().unwrap(), ChartType::Bar);
        assert!("pie".parse::<ChartType>().is_err());
        assert_eq!(ChartType::Area.next(), ChartType::Candlestick);
    }
}
