//! Hysteresis for the connection indicator as an explicit transition table.
//!
//! The machine never reads a clock: every input carries the instant it
//! happened at, and deferred transitions are returned to the caller as a
//! deadline. [`super::ConnectionHealthMonitor`] owns the timers.

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Online,
    Offline,
    Connecting,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Online => "Connected",
            Self::Offline => "Disconnected",
            Self::Connecting => "Connecting…",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Minimum time a status stays on screen before it may fall to `Offline`.
    pub minimum_status_duration: Duration,
    /// Extra delay applied to `Online -> Offline` to absorb single drops.
    pub settle_window: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            minimum_status_duration: Duration::from_millis(2_000),
            settle_window: Duration::from_millis(750),
        }
    }
}

/// Issued when a request starts; handed back with its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub started_while: ConnectionStatus,
    pub started_at: Instant,
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Unchanged,
    Committed(Transition),
    Deferred { to: ConnectionStatus, due_at: Instant },
    /// A deferred transition was dropped before its deadline.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    to: ConnectionStatus,
    due_at: Instant,
}

#[derive(Debug, Clone)]
pub struct HealthMachine {
    config: HealthConfig,
    status: ConnectionStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_transition_at: Instant,
    /// Number of committed transitions so far.
    epoch: u64,
    pending: Option<Pending>,
}

impl HealthMachine {
    pub fn new(config: HealthConfig, now: Instant) -> Self {
        Self {
            config,
            status: ConnectionStatus::Offline,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition_at: now,
            epoch: 0,
            pending: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn last_transition_at(&self) -> Instant {
        self.last_transition_at
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.due_at)
    }

    pub fn pending_target(&self) -> Option<ConnectionStatus> {
        self.pending.map(|p| p.to)
    }

    /// A request is about to be sent.
    ///
    /// Only the very first request after startup surfaces `Connecting`. While
    /// `Online` the indicator is left alone so that routine polls never flash
    /// it; recovery from `Offline` is driven by outcomes instead.
    pub fn begin_request(&mut self, now: Instant) -> (RequestTicket, Step) {
        let ticket = RequestTicket {
            started_while: self.status,
            started_at: now,
            epoch: self.epoch,
        };
        let step = match self.status {
            ConnectionStatus::Offline if self.epoch == 0 => {
                self.commit(ConnectionStatus::Connecting, now)
            }
            _ => Step::Unchanged,
        };
        (ticket, step)
    }

    pub fn report(&mut self, ticket: RequestTicket, outcome: Outcome, now: Instant) -> Step {
        match outcome {
            Outcome::Success => self.on_success(now),
            Outcome::Failure => self.on_failure(ticket, now),
        }
    }

    /// Commit a deferred transition whose deadline has passed.
    pub fn on_deadline(&mut self, now: Instant) -> Step {
        match self.pending {
            Some(pending) if now >= pending.due_at => {
                self.pending = None;
                if self.status == pending.to {
                    Step::Unchanged
                } else {
                    self.commit(pending.to, now)
                }
            }
            _ => Step::Unchanged,
        }
    }

    fn on_success(&mut self, now: Instant) -> Step {
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
        let cancelled = self.pending.take().is_some();

        match self.status {
            ConnectionStatus::Online if cancelled => Step::Cancelled,
            ConnectionStatus::Online => Step::Unchanged,
            _ if self.consecutive_successes >= self.config.success_threshold => {
                self.commit(ConnectionStatus::Online, now)
            }
            ConnectionStatus::Offline => self.commit(ConnectionStatus::Connecting, now),
            ConnectionStatus::Connecting if cancelled => Step::Cancelled,
            ConnectionStatus::Connecting => Step::Unchanged,
        }
    }

    fn on_failure(&mut self, ticket: RequestTicket, now: Instant) -> Step {
        // Sent before the latest recovery; it says nothing about the link now.
        if self.status == ConnectionStatus::Online && ticket.epoch < self.epoch {
            return Step::Unchanged;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;

        if self.consecutive_failures < self.config.failure_threshold
            || self.status == ConnectionStatus::Offline
            || self.pending.is_some()
        {
            return Step::Unchanged;
        }

        let earliest = self.last_transition_at + self.config.minimum_status_duration;
        match self.status {
            ConnectionStatus::Online => {
                let due_at = (now + self.config.settle_window).max(earliest);
                self.defer(ConnectionStatus::Offline, due_at)
            }
            // The startup `Connecting` has nothing to flicker against.
            ConnectionStatus::Connecting if self.epoch <= 1 => {
                self.commit(ConnectionStatus::Offline, now)
            }
            ConnectionStatus::Connecting if now >= earliest => {
                self.commit(ConnectionStatus::Offline, now)
            }
            ConnectionStatus::Connecting => self.defer(ConnectionStatus::Offline, earliest),
            ConnectionStatus::Offline => Step::Unchanged,
        }
    }

    fn defer(&mut self, to: ConnectionStatus, due_at: Instant) -> Step {
        self.pending = Some(Pending { to, due_at });
        Step::Deferred { to, due_at }
    }

    fn commit(&mut self, to: ConnectionStatus, now: Instant) -> Step {
        let transition = Transition {
            from: self.status,
            to,
            at: now,
        };
        self.status = to;
        self.last_transition_at = now;
        self.epoch += 1;
        self.pending = None;
        Step::Committed(transition)
    }
}
