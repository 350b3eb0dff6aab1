//! Background job scheduler.
//!
//! One tokio task ticks at `schedule.tick_ms` and runs whichever jobs are
//! due: the monitoring cycle, the status report and the daily reload. Jobs
//! run one at a time on that task, so cycles never overlap. Due times are
//! taken from the injected clock.

use crate::config::{AppConfig, ScheduleConfig};
use crate::error::{AppError, AppResult};
use crate::cycle::MonitorCycle;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tickwatch_core::{CycleResult, SharedClock};
use tickwatch_notify::ChannelStore;
use tickwatch_registry::InstrumentRegistry;
use tickwatch_telemetry::{Metrics, StatusReporter, StatusTotals};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scheduled job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    MonitorCycle,
    StatusReport,
    DailyReload,
}

impl JobKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MonitorCycle => "monitor_cycle",
            Self::StatusReport => "status_report",
            Self::DailyReload => "daily_reload",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a job recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Every(Duration),
    /// Once a day at this UTC wall time.
    DailyAt(NaiveTime),
}

impl Cadence {
    /// First due time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::Every(period) => {
                let period = ChronoDuration::from_std(period)
                    .unwrap_or_else(|_| ChronoDuration::minutes(1));
                now + period
            }
            Self::DailyAt(at) => {
                let today = now.date_naive().and_time(at).and_utc();
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Job {
    kind: JobKind,
    cadence: Cadence,
    next_run: DateTime<Utc>,
}

/// Scheduler state as reported by [`Scheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub running: bool,
    pub totals: StatusTotals,
    pub check_interval_minutes: u64,
    /// Next monitoring cycle, while running.
    pub next_run: Option<DateTime<Utc>>,
    pub job_count: usize,
}

/// Registry and channel totals.
pub fn status_totals(registry: &InstrumentRegistry, store: &ChannelStore) -> StatusTotals {
    StatusTotals {
        instruments: registry.len(),
        enabled_instruments: registry.enabled_count(),
        channels: store.len(),
        valid_channels: store.valid_channels().len(),
    }
}

struct Inner {
    cycle: Arc<MonitorCycle>,
    reporter: StatusReporter,
    clock: SharedClock,
    config_path: Option<PathBuf>,
    schedule: Mutex<ScheduleConfig>,
    jobs: Mutex<Vec<Job>>,
}

impl Inner {
    fn registry(&self) -> &Arc<InstrumentRegistry> {
        self.cycle.registry()
    }

    fn store(&self) -> &Arc<ChannelStore> {
        self.cycle.dispatcher().store()
    }

    fn totals(&self) -> StatusTotals {
        status_totals(self.registry(), self.store())
    }

    fn install_jobs(&self, now: DateTime<Utc>) -> AppResult<()> {
        let schedule = self.schedule.lock().clone();
        let reload_at = schedule.daily_reload_time()?;

        let cadences = [
            (
                JobKind::MonitorCycle,
                Cadence::Every(Duration::from_secs(
                    schedule.check_interval_minutes.saturating_mul(60),
                )),
            ),
            (
                JobKind::StatusReport,
                Cadence::Every(Duration::from_secs(
                    schedule.status_report_interval_minutes.saturating_mul(60),
                )),
            ),
            (JobKind::DailyReload, Cadence::DailyAt(reload_at)),
        ];

        let jobs: Vec<Job> = cadences
            .into_iter()
            .map(|(kind, cadence)| Job {
                kind,
                cadence,
                next_run: cadence.next_after(now),
            })
            .collect();

        for job in &jobs {
            debug!(job = %job.kind, next_run = %job.next_run, "Job installed");
        }
        *self.jobs.lock() = jobs;
        Ok(())
    }

    /// Collect due jobs and advance their next run.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<JobKind> {
        let mut jobs = self.jobs.lock();
        let mut due = Vec::new();
        for job in jobs.iter_mut() {
            if job.next_run <= now {
                due.push(job.kind);
                job.next_run = job.cadence.next_after(now);
            }
        }
        due
    }

    fn next_run(&self, kind: JobKind) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .iter()
            .find(|job| job.kind == kind)
            .map(|job| job.next_run)
    }

    async fn run_job(&self, kind: JobKind) -> AppResult<()> {
        match kind {
            JobKind::MonitorCycle => {
                self.cycle.run().await;
            }
            JobKind::StatusReport => {
                self.reporter.output_status(self.totals());
            }
            JobKind::DailyReload => self.reload()?,
        }
        Ok(())
    }

    /// Run a job, containing both errors and panics.
    async fn run_guarded(&self, kind: JobKind) {
        match AssertUnwindSafe(self.run_job(kind)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(job = %kind, error = %e, "Job failed");
                Metrics::job_failed(kind.as_str());
            }
            Err(_) => {
                error!(job = %kind, "Job panicked");
                Metrics::job_failed(kind.as_str());
            }
        }
    }

    fn reload(&self) -> AppResult<()> {
        let instruments = self.registry().reload()?;
        let channels = self.store().reload()?;

        if let Some(path) = &self.config_path {
            let config = AppConfig::load(path)?;
            *self.schedule.lock() = config.schedule;
        }
        // Jobs exist only while running.
        if !self.jobs.lock().is_empty() {
            self.install_jobs(self.clock.now())?;
        }

        info!(instruments, channels, "Daily reload complete");
        Ok(())
    }
}

#[derive(Default)]
struct State {
    running: bool,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Monitoring scheduler.
pub struct Scheduler {
    inner: Arc<Inner>,
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new(
        cycle: Arc<MonitorCycle>,
        schedule: ScheduleConfig,
        config_path: Option<PathBuf>,
        clock: SharedClock,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cycle,
                reporter: StatusReporter::new(),
                clock,
                config_path,
                schedule: Mutex::new(schedule),
                jobs: Mutex::new(Vec::new()),
            }),
            state: Mutex::new(State::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Install jobs, spawn the loop and run one cycle immediately.
    pub async fn start(&self) -> AppResult<CycleResult> {
        let cancel = {
            let mut state = self.state.lock();
            if state.running {
                return Err(AppError::AlreadyRunning);
            }
            self.inner.install_jobs(self.inner.clock.now())?;
            state.running = true;
            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            cancel
        };
        Metrics::scheduler_running(true);

        let tick = Duration::from_millis(self.inner.schedule.lock().tick_ms.max(1));
        let handle = tokio::spawn(run_loop(self.inner.clone(), cancel, tick));
        self.state.lock().handle = Some(handle);

        let check_interval = self.inner.schedule.lock().check_interval_minutes;
        info!(check_interval_minutes = check_interval, "Scheduler started");

        Ok(self.inner.cycle.run().await)
    }

    /// Cancel the loop and wait for it. Returns false if not running.
    pub async fn stop(&self) -> bool {
        let (cancel, handle) = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            state.running = false;
            (state.cancel.take(), state.handle.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        if let Some(mut handle) = handle {
            let timeout = Duration::from_secs(self.inner.schedule.lock().stop_timeout_secs);
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Scheduler loop ended abnormally"),
                Err(_) => {
                    warn!(
                        timeout_secs = timeout.as_secs(),
                        "Scheduler loop did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }

        self.inner.jobs.lock().clear();
        Metrics::scheduler_running(false);
        info!("Scheduler stopped");
        true
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.is_running();
        SchedulerStatus {
            running,
            totals: self.inner.totals(),
            check_interval_minutes: self.inner.schedule.lock().check_interval_minutes,
            next_run: self.inner.next_run(JobKind::MonitorCycle),
            job_count: self.inner.jobs.lock().len(),
        }
    }

    /// Run one cycle now, outside the schedule.
    pub async fn run_now(&self) -> CycleResult {
        self.inner.cycle.run().await
    }

    /// Run the daily reload now.
    pub fn reload(&self) -> AppResult<()> {
        self.inner.reload()
    }
}

async fn run_loop(inner: Arc<Inner>, cancel: CancellationToken, tick: Duration) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for kind in inner.take_due(inner.clock.now()) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    inner.run_guarded(kind).await;
                }
            }
        }
    }
    debug!("Scheduler loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;
    use tickwatch_core::{Instrument, ManualClock, WebhookConfig};
    use tickwatch_feed::ScriptedPriceSource;
    use tickwatch_notify::MockTransport;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        source: Arc<ScriptedPriceSource>,
        app: Application,
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
    }

    fn fixture(config_path: Option<PathBuf>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.instruments_path = dir.path().join("instruments.json");
        config.storage.channels_path = dir.path().join("channels.json");
        config.storage.history_dir = None;
        config.monitor.inter_call_delay_ms = 0;
        config.feed.retry_base_delay_ms = 0;
        config.schedule.tick_ms = 10;

        let clock = Arc::new(ManualClock::new(start_time()));
        let source = Arc::new(ScriptedPriceSource::new().with_prices("AAPL", 150.0, 151.0));
        let app = Application::with_components(
            config,
            config_path,
            clock.clone(),
            source.clone(),
            Arc::new(MockTransport::new()),
        )
        .unwrap();
        app.registry()
            .add(Instrument::new("AAPL", "Apple", "US", 5.0, -5.0).unwrap())
            .unwrap();
        app.channel_store().add_webhook(
            "room",
            WebhookConfig {
                endpoint_url: "https://hooks.example/a".to_string(),
            },
            true,
        );

        Fixture {
            _dir: dir,
            clock,
            source,
            app,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[test]
    fn test_cadence_next_after() {
        let now = start_time();
        assert_eq!(
            Cadence::Every(Duration::from_secs(60)).next_after(now),
            now + ChronoDuration::minutes(1)
        );

        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(
            Cadence::DailyAt(nine).next_after(now),
            Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap()
        );

        let early = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        assert_eq!(
            Cadence::DailyAt(nine).next_after(early),
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_start_runs_initial_cycle_and_rejects_restart() {
        let f = fixture(None);
        let scheduler = f.app.scheduler();

        let result = scheduler.start().await.unwrap();
        assert_eq!(result.monitored, 1);
        assert_eq!(result.successful_updates, 1);
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start().await,
            Err(AppError::AlreadyRunning)
        ));

        let status = scheduler.status();
        assert!(status.running);
        assert_eq!(status.job_count, 3);
        assert_eq!(status.check_interval_minutes, 1);
        assert_eq!(status.next_run, Some(start_time() + ChronoDuration::minutes(1)));
        assert_eq!(status.totals.enabled_instruments, 1);
        assert_eq!(status.totals.valid_channels, 1);

        assert!(scheduler.stop().await);
        assert!(!scheduler.stop().await);

        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.job_count, 0);
        assert!(status.next_run.is_none());
    }

    #[tokio::test]
    async fn test_loop_runs_due_cycles() {
        let f = fixture(None);
        let scheduler = f.app.scheduler();
        scheduler.start().await.unwrap();
        assert_eq!(f.source.calls("AAPL"), 1);

        settle().await;
        assert_eq!(f.source.calls("AAPL"), 1);

        f.clock.advance(ChronoDuration::seconds(61));
        settle().await;
        assert_eq!(f.source.calls("AAPL"), 2);

        scheduler.stop().await;
        f.clock.advance(ChronoDuration::minutes(5));
        settle().await;
        assert_eq!(f.source.calls("AAPL"), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_does_not_stop_loop() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("broken.toml");
        let mut file = std::fs::File::create(&bad).unwrap();
        writeln!(file, "[schedule]\ncheck_interval_minutes = \"often\"").unwrap();

        let f = fixture(Some(bad));
        let scheduler = f.app.scheduler();
        scheduler.start().await.unwrap();

        // Past the 09:00 reload and the next cycle.
        f.clock.advance(ChronoDuration::days(1));
        settle().await;
        assert_eq!(f.source.calls("AAPL"), 2);
        assert!(scheduler.is_running());

        f.clock.advance(ChronoDuration::seconds(61));
        settle().await;
        assert_eq!(f.source.calls("AAPL"), 3);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_reload_picks_up_store_changes() {
        let f = fixture(None);
        let scheduler = f.app.scheduler();

        let other = InstrumentRegistry::open(f.app.registry().path()).unwrap();
        other
            .add(Instrument::new("TSLA", "Tesla", "US", 3.0, -3.0).unwrap())
            .unwrap();

        scheduler.reload().unwrap();
        assert!(f.app.registry().contains("TSLA"));
        assert_eq!(scheduler.status().totals.instruments, 2);
    }
}
