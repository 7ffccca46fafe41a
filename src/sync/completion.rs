use crate::model::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tracked {
    time: i64,
    completed: bool,
}

/// Detects the moment the latest candle closes.
///
/// Fires once when the tracked forming candle reports `completed`, when a
/// completed candle shows up with nothing forming tracked, or when a newer
/// bucket overtakes a forming candle whose close was never observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionTracker {
    tracked: Option<Tracked>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest candle; returns `true` on a completion transition.
    pub fn observe(&mut self, candle: &Candle) -> bool {
        let fired = match self.tracked {
            None => candle.completed,
            Some(t) if candle.time == t.time => candle.completed && !t.completed,
            Some(t) if candle.time > t.time => candle.completed || !t.completed,
            // stale response
            Some(_) => return false,
        };
        self.seed(candle);
        fired
    }

    /// Track `candle` without evaluating a transition.
    pub fn seed(&mut self, candle: &Candle) {
        self.tracked = Some(Tracked {
            time: candle.time,
            completed: candle.completed,
        });
    }

    pub fn reset(&mut self) {
        self.tracked = None;
    }

    /// `(time, completed)` of the tracked candle.
    pub fn tracked(&self) -> Option<(i64, bool)> {
        self.tracked.map(|t| (t.time, t.completed))
    }
}
