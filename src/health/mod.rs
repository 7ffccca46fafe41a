pub mod machine;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use machine::{
    ConnectionStatus, HealthConfig, HealthMachine, Outcome, RequestTicket, Step, Transition,
};

/// What the status bar shows. Only [`ConnectionHealthMonitor`] writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusIndicator {
    pub status: ConnectionStatus,
    pub changed_at: DateTime<Utc>,
}

impl StatusIndicator {
    pub fn label(&self) -> &'static str {
        self.status.label()
    }
}

/// Turns per-request outcomes into a debounced connection status.
///
/// Classification only: it never fails and never gates data flow.
pub struct ConnectionHealthMonitor {
    machine: Mutex<HealthMachine>,
    indicator: watch::Sender<StatusIndicator>,
    deadline_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHealthMonitor {
    pub fn new(config: HealthConfig) -> Arc<Self> {
        let machine = HealthMachine::new(config, Instant::now());
        let (indicator, _) = watch::channel(StatusIndicator {
            status: machine.status(),
            changed_at: Utc::now(),
        });
        Arc::new(Self {
            machine: Mutex::new(machine),
            indicator,
            deadline_timer: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusIndicator> {
        self.indicator.subscribe()
    }

    pub fn indicator(&self) -> StatusIndicator {
        self.indicator.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock_machine().status()
    }

    pub fn label(&self) -> &'static str {
        self.status().label()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_machine().consecutive_failures()
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.lock_machine().consecutive_successes()
    }

    pub fn begin_request(self: &Arc<Self>) -> RequestTicket {
        let (ticket, step) = self.lock_machine().begin_request(Instant::now());
        self.apply(step);
        ticket
    }

    pub fn report_outcome(self: &Arc<Self>, ticket: RequestTicket, outcome: Outcome) {
        let step = self.lock_machine().report(ticket, outcome, Instant::now());
        tracing::trace!(?outcome, started_while = ?ticket.started_while, ?step, "health outcome");
        self.apply(step);
    }

    fn fire_deadline(self: &Arc<Self>) {
        let step = self.lock_machine().on_deadline(Instant::now());
        self.apply(step);
    }

    fn apply(self: &Arc<Self>, step: Step) {
        match step {
            Step::Unchanged => {}
            Step::Committed(transition) => {
                self.cancel_timer();
                tracing::info!(
                    from = transition.from.label(),
                    to = transition.to.label(),
                    "Connection status changed"
                );
                self.indicator.send_replace(StatusIndicator {
                    status: transition.to,
                    changed_at: Utc::now(),
                });
            }
            Step::Deferred { to, due_at } => {
                tracing::debug!(
                    to = to.label(),
                    in_ms = due_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Status transition deferred"
                );
                self.arm_timer(due_at);
            }
            Step::Cancelled => {
                tracing::debug!("Pending status transition cancelled");
                self.cancel_timer();
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, due_at: Instant) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(due_at).await;
            if let Some(monitor) = weak.upgrade() {
                monitor.fire_deadline();
            }
        });
        if let Some(previous) = self.lock_timer().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
        }
    }

    fn lock_machine(&self) -> MutexGuard<'_, HealthMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.deadline_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionHealthMonitor {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
