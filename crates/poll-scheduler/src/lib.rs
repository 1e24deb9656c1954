mod simulate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, Timelike};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use cloud_client::{CloudClient, FetchError};
use device_registry::Settings;
use history_store::{HistoryStore, SheetDataset, StoreError};
use telemetry_codec::derive;
use types::{Device, DeviceStatus, HistoryRecord, Sample};

const POLL_CYCLES: &str = "inverter_poll_cycles_total";
const FETCH_DURATION: &str = "inverter_fetch_duration_seconds";

/// Receives the outcome of every device cycle.
pub trait Display: Send + Sync {
    fn on_sample(&self, device: &Device, sample: &Sample, dataset: &SheetDataset);
    fn on_status(&self, device: &Device, status: DeviceStatus);
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("status fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("record not persisted: {0}")]
    Persist(#[from] StoreError),
}

/// Per-round tally of device outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub polled: usize,
    pub simulated: usize,
    pub failed: usize,
    pub unconfigured: usize,
    /// Devices left alone because the round fell outside the recording window.
    pub skipped: usize,
    pub elapsed: Duration,
}

struct Shared {
    settings: watch::Receiver<Arc<Settings>>,
    client: Arc<dyn CloudClient>,
    store: HistoryStore,
    display: Arc<dyn Display>,
    simulate: AtomicBool,
}

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives periodic poll rounds over every registered device.
pub struct PollScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl PollScheduler {
    pub fn new(
        settings: watch::Receiver<Arc<Settings>>,
        client: Arc<dyn CloudClient>,
        store: HistoryStore,
        display: Arc<dyn Display>,
        simulate: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                client,
                store,
                display,
                simulate: AtomicBool::new(simulate),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the background ticker. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|worker| !worker.handle.is_finished()) {
            debug!("scheduler already running");
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            Arc::clone(&self.shared),
            self.shared.settings.clone(),
            stop_rx,
        ));
        *worker = Some(Worker { stop, handle });
        info!("monitoring started");
        true
    }

    /// Prevents new rounds from starting and waits for the in-flight one.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.stop.send(true);
        if let Err(err) = worker.handle.await {
            warn!(error = %err, "scheduler task join failed");
        }
        info!("monitoring stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// One out-of-schedule round over all devices, regardless of the
    /// recording window or running state. The periodic timer is untouched.
    pub async fn refresh(&self) -> RoundSummary {
        let settings = self.shared.snapshot();
        self.shared.round(settings, now_local()).await
    }

    /// Runs the round a scheduled tick at `now` would run.
    pub async fn tick_at(&self, now: NaiveDateTime) -> RoundSummary {
        self.shared.tick(truncate(now)).await
    }

    pub fn simulate(&self) -> bool {
        self.shared.simulate.load(Ordering::SeqCst)
    }

    /// Enabling simulation runs one immediate round.
    pub async fn set_simulate(&self, enabled: bool) -> Option<RoundSummary> {
        let previous = self.shared.simulate.swap(enabled, Ordering::SeqCst);
        if previous == enabled {
            return None;
        }
        info!(enabled, "simulation toggled");
        if enabled {
            Some(self.refresh().await)
        } else {
            None
        }
    }
}

impl Shared {
    fn snapshot(&self) -> Arc<Settings> {
        self.settings.borrow().clone()
    }

    async fn tick(self: &Arc<Self>, now: NaiveDateTime) -> RoundSummary {
        let settings = self.snapshot();
        if !settings.window.contains(now.time()) {
            debug!(
                time = %now.time(),
                start = %settings.window.start,
                stop = %settings.window.stop,
                "outside recording window"
            );
            return RoundSummary {
                skipped: settings.devices.len(),
                ..RoundSummary::default()
            };
        }
        self.round(settings, now).await
    }

    async fn round(self: &Arc<Self>, settings: Arc<Settings>, now: NaiveDateTime) -> RoundSummary {
        let started = Instant::now();
        let simulate = self.simulate.load(Ordering::SeqCst);

        let mut cycles = JoinSet::new();
        for device in settings.devices.iter().cloned() {
            let shared = Arc::clone(self);
            let settings = Arc::clone(&settings);
            cycles.spawn(async move { shared.cycle(&settings, device, now, simulate).await });
        }

        let mut summary = RoundSummary::default();
        while let Some(result) = cycles.join_next().await {
            match result {
                Ok(DeviceStatus::Ok) => summary.polled += 1,
                Ok(DeviceStatus::Simulated) => summary.simulated += 1,
                Ok(DeviceStatus::Failed) => summary.failed += 1,
                Ok(DeviceStatus::Unconfigured) => summary.unconfigured += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(error = %err, "device cycle task failed");
                }
            }
        }

        summary.elapsed = started.elapsed();
        let lag = summary.elapsed.saturating_sub(settings.poll_interval);
        info!(
            timestamp = %now,
            polled = summary.polled,
            simulated = summary.simulated,
            failed = summary.failed,
            unconfigured = summary.unconfigured,
            elapsed_ms = summary.elapsed.as_millis(),
            lag_ms = lag.as_millis(),
            "poll round complete"
        );
        summary
    }

    async fn cycle(
        &self,
        settings: &Settings,
        device: Device,
        now: NaiveDateTime,
        simulate: bool,
    ) -> DeviceStatus {
        let (mut sample, status) = if device.is_configured() {
            match self.fetch(settings, &device, now).await {
                Ok(sample) => (sample, DeviceStatus::Ok),
                Err(err) => {
                    warn!(
                        device = %device.label,
                        device_id = %device.device_id,
                        timestamp = %now,
                        error = %err,
                        "device cycle failed"
                    );
                    return self.report(&device, DeviceStatus::Failed);
                }
            }
        } else if simulate {
            (synthetic(now), DeviceStatus::Simulated)
        } else {
            debug!(device = %device.label, "no device id configured");
            return self.report(&device, DeviceStatus::Unconfigured);
        };
        derive::apply(&mut sample);

        let dataset = match self.persist(&sample, &device.label).await {
            Ok(dataset) => dataset,
            Err(err) => {
                error!(sheet = %device.label, timestamp = %now, error = %err, "sample kept in memory only");
                self.store.working_set(&device.label).unwrap_or_default()
            }
        };
        self.display.on_sample(&device, &sample, &dataset);
        self.report(&device, status)
    }

    async fn fetch(
        &self,
        settings: &Settings,
        device: &Device,
        now: NaiveDateTime,
    ) -> Result<Sample, SchedulerError> {
        let started = Instant::now();
        let result = self
            .client
            .get_status(&settings.credentials, &device.device_id)
            .await;
        histogram!(FETCH_DURATION, "device" => device.label.clone())
            .record(started.elapsed().as_secs_f64());
        let items = result?;
        Ok(telemetry_codec::decode_status(&items, now))
    }

    async fn persist(&self, sample: &Sample, label: &str) -> Result<Arc<SheetDataset>, SchedulerError> {
        let record = HistoryRecord::from_sample(sample);
        Ok(self.store.append(record, label).await?)
    }

    fn report(&self, device: &Device, status: DeviceStatus) -> DeviceStatus {
        counter!(POLL_CYCLES, "device" => device.label.clone(), "status" => status.as_str())
            .increment(1);
        self.display.on_status(device, status);
        status
    }
}

async fn run(
    shared: Arc<Shared>,
    mut settings: watch::Receiver<Arc<Settings>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut period = settings.borrow_and_update().poll_interval;
    let mut ticker = build_ticker(tokio::time::Instant::now(), period);
    let mut settings_open = true;

    loop {
        // Stop wins over an overdue tick left behind by a long round.
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!("scheduler shutdown requested");
                    break;
                }
            }
            _ = ticker.tick() => {
                shared.tick(now_local()).await;
            }
            changed = settings.changed(), if settings_open => {
                if changed.is_err() {
                    settings_open = false;
                    continue;
                }
                let next = settings.borrow_and_update().poll_interval;
                if next != period {
                    info!(
                        previous_secs = period.as_secs(),
                        interval_secs = next.as_secs(),
                        "poll interval changed"
                    );
                    period = next;
                    ticker = build_ticker(tokio::time::Instant::now() + period, period);
                }
            }
        }
    }
}

fn build_ticker(start: tokio::time::Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn synthetic(now: NaiveDateTime) -> Sample {
    simulate::sample(&mut rand::thread_rng(), now)
}

fn now_local() -> NaiveDateTime {
    truncate(Local::now().naive_local())
}

fn truncate(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}
