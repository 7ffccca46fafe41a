pub mod chart;
pub mod dashboard;
pub mod surface;

use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::Frame;

use crate::health::ConnectionStatus;
use crate::model::Timeframe;
use crate::surface::Presentation;
use crate::sync::SidePanel;

use chart::CandleChart;
use dashboard::{KeybindBar, LatestCandlePanel, LogPanel, StatusBar};
pub use surface::{ChartView, ReadyFlag, TerminalSurface};

const MAX_LOG_MESSAGES: usize = 200;

/// Host-side view state that is not owned by the synchronizer.
pub struct AppState {
    pub symbols: Vec<String>,
    pub symbol_index: usize,
    pub timeframe: Timeframe,
    pub poll_interval_ms: u64,
    pub presentation: Presentation,
    pub log_messages: Vec<String>,
}

impl AppState {
    pub fn new(
        symbols: Vec<String>,
        timeframe: Timeframe,
        poll_interval_ms: u64,
        presentation: Presentation,
    ) -> Self {
        Self {
            symbols,
            symbol_index: 0,
            timeframe,
            poll_interval_ms,
            presentation,
            log_messages: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        self.symbols
            .get(self.symbol_index)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Advance to the next watched symbol, wrapping around.
    pub fn cycle_symbol(&mut self) -> &str {
        if !self.symbols.is_empty() {
            self.symbol_index = (self.symbol_index + 1) % self.symbols.len();
        }
        self.symbol()
    }

    /// Add symbols reported by the source after the configured ones. The
    /// current selection is kept. Returns how many were new.
    pub fn merge_symbols(&mut self, reported: &[String]) -> usize {
        let before = self.symbols.len();
        for symbol in reported {
            let symbol = symbol.trim().to_uppercase();
            if !symbol.is_empty() && !self.symbols.contains(&symbol) {
                self.symbols.push(symbol);
            }
        }
        self.symbols.len() - before
    }

    /// Advance within `available`, or through every timeframe when the source
    /// did not report any.
    pub fn cycle_timeframe(&mut self, available: &[Timeframe]) -> Timeframe {
        self.timeframe = match available.iter().position(|tf| *tf == self.timeframe) {
            Some(i) => available[(i + 1) % available.len()],
            None => available
                .first()
                .copied()
                .unwrap_or_else(|| self.timeframe.next()),
        };
        self.timeframe
    }

    pub fn push_log(&mut self, msg: String) {
        self.log_messages.push(msg);
        if self.log_messages.len() > MAX_LOG_MESSAGES {
            self.log_messages.remove(0);
        }
    }
}

/// Everything read from the synchronizer for one frame.
pub struct FrameData {
    pub chart: ChartView,
    pub side_panel: Option<SidePanel>,
    pub status: ConnectionStatus,
    pub candle_count: usize,
    pub reload_pending: bool,
}

pub fn render(frame: &mut Frame, state: &AppState, data: &FrameData) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // status bar
            Constraint::Min(10),   // chart + side panel
            Constraint::Length(6), // log
            Constraint::Length(1), // keybinds
        ])
        .split(frame.area());

    let timeframe = state.timeframe.to_string();
    frame.render_widget(
        StatusBar {
            symbol: state.symbol(),
            timeframe: &timeframe,
            status: data.status,
            candle_count: data.candle_count,
            poll_interval_ms: state.poll_interval_ms,
            chart_type: state.presentation.chart_type.as_str(),
            reload_pending: data.reload_pending,
        },
        outer[0],
    );

    let main_area = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(40), Constraint::Length(26)])
        .split(outer[1]);

    frame.render_widget(
        CandleChart::new(&data.chart).title(format!("{} {}", state.symbol(), timeframe)),
        main_area[0],
    );
    frame.render_widget(
        LatestCandlePanel::new(data.side_panel.as_ref()),
        main_area[1],
    );
    frame.render_widget(LogPanel::new(&state.log_messages), outer[2]);
    frame.render_widget(KeybindBar, outer[3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(
            vec!["EURUSD".to_string(), "GBPUSD".to_string()],
            Timeframe::M1,
            1_000,
            Presentation::default(),
        )
    }

    #[test]
    fn cycle_symbol_wraps() {
        let mut s = state();
        assert_eq!(s.cycle_symbol(), "GBPUSD");
        assert_eq!(s.cycle_symbol(), "EURUSD");
    }

    #[test]
    fn merge_symbols_appends_unknown_and_keeps_selection() {
        let mut s = state();
        s.cycle_symbol();
        let reported = vec!["eurusd".to_string(), "XAUUSD".to_string(), " ".to_string()];
        assert_eq!(s.merge_symbols(&reported), 1);
        assert_eq!(s.symbols, vec!["EURUSD", "GBPUSD", "XAUUSD"]);
        assert_eq!(s.symbol(), "GBPUSD");
        assert_eq!(s.merge_symbols(&reported), 0);
    }

    #[test]
    fn cycle_timeframe_follows_available_list() {
        let mut s = state();
        let available = [Timeframe::M1, Timeframe::H1, Timeframe::D1];
        assert_eq!(s.cycle_timeframe(&available), Timeframe::H1);
        assert_eq!(s.cycle_timeframe(&available), Timeframe::D1);
        assert_eq!(s.cycle_timeframe(&available), Timeframe::M1);
        assert_eq!(s.cycle_timeframe(&[]), Timeframe::M1.next());
    }
}
