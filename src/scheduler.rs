use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Unit of work run on every tick. Each run is spawned as its own task.
pub type PollWork = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(30);
pub const MIN_INTERVAL: Duration = Duration::from_millis(50);

struct SchedulerState {
    interval: Duration,
    work: Option<PollWork>,
    running: bool,
    trigger: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    installs: u64,
}

impl SchedulerState {
    fn trigger_alive(&self) -> bool {
        self.trigger.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Replace the recurring trigger. Callers hold the state lock, so there is
    /// never more than one trigger.
    fn install_trigger(&mut self) {
        if let Some(previous) = self.trigger.take() {
            previous.abort();
        }
        let Some(work) = self.work.clone() else {
            return;
        };
        let period = self.interval;
        self.installs += 1;
        self.trigger = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tokio::spawn(work());
            }
        }));
    }
}

/// Runs a unit of work on a fixed, adjustable cadence.
///
/// Work already in flight is never interrupted by `set_interval` or `stop`.
/// A watchdog reinstalls the trigger if it disappears while the scheduler is
/// supposed to be running.
pub struct PollingScheduler {
    state: Arc<Mutex<SchedulerState>>,
    watchdog_period: Duration,
}

impl Default for PollingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::with_watchdog_period(WATCHDOG_PERIOD)
    }

    pub fn with_watchdog_period(watchdog_period: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                interval: Duration::from_secs(1),
                work: None,
                running: false,
                trigger: None,
                watchdog: None,
                installs: 0,
            })),
            watchdog_period,
        }
    }

    /// Cancel any existing schedule and run `work` every `interval`.
    pub fn start(&self, interval: Duration, work: PollWork) {
        let mut st = self.lock();
        st.interval = interval.max(MIN_INTERVAL);
        st.work = Some(work);
        st.running = true;
        st.install_trigger();
        if st.watchdog.as_ref().map_or(true, |h| h.is_finished()) {
            st.watchdog = Some(self.spawn_watchdog());
        }
        tracing::info!(interval_ms = st.interval.as_millis() as u64, "Polling started");
    }

    /// Restart the trigger with a new period.
    pub fn set_interval(&self, interval: Duration) {
        let mut st = self.lock();
        st.interval = interval.max(MIN_INTERVAL);
        if st.running {
            st.install_trigger();
        }
        tracing::info!(interval_ms = st.interval.as_millis() as u64, "Polling interval changed");
    }

    pub fn stop(&self) {
        let mut st = self.lock();
        if !st.running && st.trigger.is_none() {
            return;
        }
        st.running = false;
        if let Some(trigger) = st.trigger.take() {
            trigger.abort();
        }
        if let Some(watchdog) = st.watchdog.take() {
            watchdog.abort();
        }
        tracing::info!("Polling stopped");
    }

    pub fn interval(&self) -> Duration {
        self.lock().interval
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of times a trigger has been installed, watchdog repairs included.
    pub fn trigger_installs(&self) -> u64 {
        self.lock().installs
    }

    fn spawn_watchdog(&self) -> JoinHandle<()> {
        let state: Weak<Mutex<SchedulerState>> = Arc::downgrade(&self.state);
        let period = self.watchdog_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                let mut st = state.lock().unwrap_or_else(PoisonError::into_inner);
                if st.running && !st.trigger_alive() {
                    tracing::warn!("Polling trigger vanished; reinstalling");
                    st.install_trigger();
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_work(counter: Arc<AtomicUsize>) -> PollWork {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_reinstalls_missing_trigger() {
        let scheduler = PollingScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.start(Duration::from_millis(100), counting_work(counter.clone()));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // Simulate the trigger silently dying.
        if let Some(trigger) = scheduler.lock().trigger.take() {
            trigger.abort();
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert_eq!(scheduler.trigger_installs(), 2);
        assert!(scheduler.lock().trigger_alive());

        let before = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(counter.load(Ordering::SeqCst) >= before + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_leaves_stopped_scheduler_alone() {
        let scheduler = PollingScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.start(Duration::from_millis(100), counting_work(counter.clone()));
        scheduler.stop();

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.trigger_installs(), 1);
    }
}
