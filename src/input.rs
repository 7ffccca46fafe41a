use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    Quit,
    FasterPolling,
    SlowerPolling,
    CycleChartType,
    ToggleVolume,
    Reload,
    NextSymbol,
    NextTimeframe,
}

pub fn parse_main_command(key_code: &KeyCode) -> Option<UiCommand> {
    match key_code {
        KeyCode::Esc => Some(UiCommand::Quit),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(UiCommand::FasterPolling),
        KeyCode::Char('-') | KeyCode::Char('_') => Some(UiCommand::SlowerPolling),
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'q' => Some(UiCommand::Quit),
            'c' => Some(UiCommand::CycleChartType),
            'v' => Some(UiCommand::ToggleVolume),
            'r' => Some(UiCommand::Reload),
            's' => Some(UiCommand::NextSymbol),
            't' => Some(UiCommand::NextTimeframe),
            _ => None,
        },
        _ => None,
    }
}

/// Ctrl+C arrives as a key event while the terminal is in raw mode.
pub fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
}

/// Poll interval after a `+`/`-` press; halves or doubles within 250 ms..60 s.
pub fn step_interval_ms(current_ms: u64, command: UiCommand) -> u64 {
    const MIN_MS: u64 = 250;
    const MAX_MS: u64 = 60_000;
    let next = match command {
        UiCommand::FasterPolling => current_ms / 2,
        UiCommand::SlowerPolling => current_ms.saturating_mul(2),
        _ => current_ms,
    };
    next.clamp(MIN_MS, MAX_MS)
}
