use chrono::{DateTime, Local, TimeZone, Utc};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
};

use crate::health::ConnectionStatus;
use crate::sync::SidePanel;

pub struct StatusBar<'a> {
    pub symbol: &'a str,
    pub timeframe: &'a str,
    pub status: ConnectionStatus,
    pub candle_count: usize,
    pub poll_interval_ms: u64,
    pub chart_type: &'a str,
    pub reload_pending: bool,
}

fn status_color(status: ConnectionStatus) -> Color {
    match status {
        ConnectionStatus::Online => Color::Green,
        ConnectionStatus::Connecting => Color::Yellow,
        ConnectionStatus::Offline => Color::Red,
    }
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let sep = || Span::styled(" | ", Style::default().fg(Color::DarkGray));
        let mut spans = vec![
            Span::styled(
                " chart-sync ",
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            ),
            sep(),
            Span::styled(self.symbol, Style::default().fg(Color::Cyan)),
            Span::styled(
                format!(" {}", self.timeframe),
                Style::default().fg(Color::Cyan),
            ),
            sep(),
            Span::styled(
                self.status.label(),
                Style::default()
                    .fg(status_color(self.status))
                    .add_modifier(Modifier::BOLD),
            ),
            sep(),
            Span::styled(
                format!("candles: {}", self.candle_count),
                Style::default().fg(Color::White),
            ),
            sep(),
            Span::styled(
                format!("poll: {}ms", self.poll_interval_ms),
                Style::default().fg(Color::DarkGray),
            ),
            sep(),
            Span::styled(self.chart_type, Style::default().fg(Color::DarkGray)),
        ];
        if self.reload_pending {
            spans.push(sep());
            spans.push(Span::styled("reload…", Style::default().fg(Color::Yellow)));
        }

        buf.set_line(area.x, area.y, &Line::from(spans), area.width);
    }
}

/// Latest candle for the bound pair.
pub struct LatestCandlePanel<'a> {
    panel: Option<&'a SidePanel>,
}

impl<'a> LatestCandlePanel<'a> {
    pub fn new(panel: Option<&'a SidePanel>) -> Self {
        Self { panel }
    }
}

fn candle_time_label(epoch_secs: i64) -> String {
    Utc.timestamp_opt(epoch_secs, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| epoch_secs.to_string())
}

fn updated_label(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

impl Widget for LatestCandlePanel<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(" Latest ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray));

        let Some(panel) = self.panel else {
            Paragraph::new(Line::from(Span::styled(
                "---",
                Style::default().fg(Color::DarkGray),
            )))
            .block(block)
            .render(area, buf);
            return;
        };

        let c = &panel.latest;
        let label = |s: &'static str| Span::styled(s, Style::default().fg(Color::DarkGray));
        let value = |v: String| Span::styled(v, Style::default().fg(Color::White));
        let close_color = if c.is_bullish() { Color::Green } else { Color::Red };

        let lines = vec![
            Line::from(vec![
                Span::styled(
                    format!("{} {}", panel.symbol, panel.timeframe),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ),
            ]),
            Line::from(vec![label("Time:  "), value(candle_time_label(c.time))]),
            Line::from(vec![label("Open:  "), value(format!("{:.5}", c.open))]),
            Line::from(vec![label("High:  "), value(format!("{:.5}", c.high))]),
            Line::from(vec![label("Low:   "), value(format!("{:.5}", c.low))]),
            Line::from(vec![
                label("Close: "),
                Span::styled(format!("{:.5}", c.close), Style::default().fg(close_color)),
            ]),
            Line::from(vec![label("Vol:   "), value(c.volume.to_string())]),
            Line::from(vec![
                label("State: "),
                if c.completed {
                    Span::styled("closed", Style::default().fg(Color::DarkGray))
                } else {
                    Span::styled("forming", Style::default().fg(Color::Yellow))
                },
            ]),
            Line::from(vec![label("Upd:   "), value(updated_label(panel.updated_at))]),
        ];

        Paragraph::new(lines).block(block).render(area, buf);
    }
}

pub struct LogPanel<'a> {
    messages: &'a [String],
}

impl<'a> LogPanel<'a> {
    pub fn new(messages: &'a [String]) -> Self {
        Self { messages }
    }
}

impl Widget for LogPanel<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(" Log ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray));
        let visible = area.height.saturating_sub(2) as usize;
        let start = self.messages.len().saturating_sub(visible);
        let lines: Vec<Line> = self.messages[start..]
            .iter()
            .map(|m| Line::from(Span::styled(m.as_str(), Style::default().fg(Color::Gray))))
            .collect();

        Paragraph::new(lines).block(block).render(area, buf);
    }
}

pub struct KeybindBar;

impl Widget for KeybindBar {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
        let text = |t: &'static str| Span::styled(t, Style::default().fg(Color::DarkGray));
        let line = Line::from(vec![
            key(" [Q]"),
            text("uit  "),
            key("[+/-]"),
            text(" interval  "),
            key("[C]"),
            text("hart type  "),
            key("[V]"),
            text("olume  "),
            key("[R]"),
            text("eload  "),
            key("[S]"),
            text("ymbol  "),
            key("[T]"),
            text("imeframe  "),
        ]);

        buf.set_line(area.x, area.y, &line, area.width);
    }
}
