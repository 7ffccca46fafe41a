use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    widgets::{Block, Borders, Widget},
};

use crate::surface::{SeriesKind, SeriesPoint};
use crate::ui::surface::ChartView;

/// One column per point; the volume overlay takes the bottom quarter.
pub struct CandleChart<'a> {
    view: &'a ChartView,
    title: String,
}

impl<'a> CandleChart<'a> {
    pub fn new(view: &'a ChartView) -> Self {
        Self {
            view,
            title: " Chart ".to_string(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = format!(" {} ", title.into());
        self
    }
}

fn price_bounds(points: &[SeriesPoint]) -> Option<(f64, f64)> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for p in points {
        match *p {
            SeriesPoint::Ohlc { high, low, .. } => {
                lo = lo.min(low);
                hi = hi.max(high);
            }
            SeriesPoint::Value { value, .. } => {
                lo = lo.min(value);
                hi = hi.max(value);
            }
            SeriesPoint::Histogram { .. } => {}
        }
    }
    (lo.is_finite() && hi.is_finite()).then_some((lo, hi))
}

/// Maps a price onto a row, top row being the highest price.
struct Scale {
    top: u16,
    rows: u16,
    min: f64,
    range: f64,
}

impl Scale {
    fn row(&self, price: f64) -> u16 {
        let normalized = ((price - self.min) / self.range).clamp(0.0, 1.0);
        let offset = (normalized * (self.rows.saturating_sub(1)) as f64).round() as u16;
        self.top + self.rows.saturating_sub(1) - offset
    }
}

fn fill_column(buf: &mut Buffer, x: u16, from: u16, to: u16, symbol: &str, style: Style) {
    let (a, b) = if from <= to { (from, to) } else { (to, from) };
    for y in a..=b {
        buf.set_string(x, y, symbol, style);
    }
}

impl Widget for CandleChart<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(self.title.as_str())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray));
        let inner = block.inner(area);
        block.render(area, buf);

        if inner.height < 4 || inner.width < 4 {
            return;
        }
        let Some(kind) = self.view.price_kind else {
            buf.set_string(
                inner.x,
                inner.y,
                "Waiting for data...",
                Style::default().fg(Color::DarkGray),
            );
            return;
        };

        let width = inner.width as usize;
        let start = self.view.price.len().saturating_sub(width);
        let price = &self.view.price[start..];
        let Some((min_price, max_price)) = price_bounds(price) else {
            return;
        };

        let volume_rows = if self.view.volume.is_empty() {
            0
        } else {
            (inner.height / 4).max(1)
        };
        let price_rows = inner.height - volume_rows;
        let range = max_price - min_price;
        let scale = Scale {
            top: inner.y,
            rows: price_rows,
            min: min_price,
            range: if range <= f64::EPSILON { 1.0 } else { range },
        };
        let bottom = inner.y + price_rows - 1;

        for (i, point) in price.iter().enumerate() {
            let x = inner.x + i as u16;
            match *point {
                SeriesPoint::Ohlc {
                    open,
                    high,
                    low,
                    close,
                    ..
                } => {
                    let color = if close >= open { Color::Green } else { Color::Red };
                    let style = Style::default().fg(color);
                    fill_column(buf, x, scale.row(high), scale.row(low), "│", style);
                    if kind == SeriesKind::Candlestick {
                        fill_column(buf, x, scale.row(open), scale.row(close), "█", style);
                    } else {
                        buf.set_string(x, scale.row(close), "┼", style);
                    }
                }
                SeriesPoint::Value { value, .. } => {
                    let y = scale.row(value);
                    if kind == SeriesKind::Area {
                        fill_column(buf, x, y, bottom, "░", Style::default().fg(Color::Blue));
                    }
                    buf.set_string(x, y, "•", Style::default().fg(Color::Cyan));
                }
                SeriesPoint::Histogram { .. } => {}
            }
        }

        if volume_rows > 0 {
            let vstart = self.view.volume.len().saturating_sub(width);
            let volume = &self.view.volume[vstart..];
            let max_volume = volume
                .iter()
                .filter_map(|p| match *p {
                    SeriesPoint::Histogram { value, .. } => Some(value),
                    _ => None,
                })
                .fold(0.0_f64, f64::max);
            let vbottom = inner.y + inner.height - 1;
            for (i, point) in volume.iter().enumerate() {
                let SeriesPoint::Histogram { value, up, .. } = *point else {
                    continue;
                };
                if max_volume <= 0.0 || value <= 0.0 {
                    continue;
                }
                let height = ((value / max_volume) * volume_rows as f64).ceil() as u16;
                let color = if up { Color::Green } else { Color::Red };
                let x = inner.x + i as u16;
                fill_column(
                    buf,
                    x,
                    vbottom + 1 - height.clamp(1, volume_rows),
                    vbottom,
                    "▇",
                    Style::default().fg(color),
                );
            }
        }

        let label_style = Style::default().fg(Color::DarkGray);
        buf.set_string(inner.x, inner.y, format!("{:.5}", max_price), label_style);
        buf.set_string(inner.x, bottom, format!("{:.5}", min_price), label_style);
    }
}
