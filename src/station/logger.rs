use super::weather::WeatherStation;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_LOGGING_INTERVAL: Duration = Duration::from_secs(30);

/// Grace period before the first reading so boot does not hammer the
/// sensor bus.
const STARTUP_DELAY: Duration = Duration::from_millis(100);
/// Upper bound on waiting for the loop to exit during stop/restart.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct LoggerLoop {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Background timer loop persisting one measurement row per tick.
///
/// Changing the interval restarts a running loop, so the new interval
/// applies to the very next tick instead of waiting out the old one.
pub struct MeasurementLogger {
    station: Arc<WeatherStation>,
    interval: Mutex<Duration>,
    loop_handle: AsyncMutex<Option<LoggerLoop>>,
    active: AtomicBool,
}

impl MeasurementLogger {
    pub fn new(station: Arc<WeatherStation>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            station,
            interval: Mutex::new(interval),
            loop_handle: AsyncMutex::new(None),
            active: AtomicBool::new(false),
        })
    }

    pub fn is_logging(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn logging_interval(&self) -> Duration {
        *self.interval.lock()
    }

    pub async fn set_logging_interval(self: &Arc<Self>, interval: Duration) {
        *self.interval.lock() = interval;
        if self.is_logging() {
            // restart so the next row is due `interval` from now
            self.start_logging().await;
        }
    }

    pub async fn set_log_in_background(self: &Arc<Self>, enabled: bool) {
        if enabled {
            self.start_logging().await;
        } else {
            self.stop_logging().await;
        }
    }

    /// Start the background loop; restarts it when already running.
    pub async fn start_logging(self: &Arc<Self>) {
        let mut slot = self.loop_handle.lock().await;
        if let Some(running) = slot.take() {
            debug!("Measurement logger was not stopped; stopping now");
            shutdown_loop(running).await;
        }

        let station = Arc::clone(&self.station);
        let logger = Arc::clone(self);
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(STARTUP_DELAY).await;
            loop {
                station.measure_and_log();
                let interval = logger.logging_interval();
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        debug!("Measurement logger exited cleanly");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        *slot = Some(LoggerLoop { token, task });
        self.active.store(true, Ordering::Relaxed);
        info!("Background measurement logging started");
    }

    pub async fn stop_logging(&self) {
        let mut slot = self.loop_handle.lock().await;
        match slot.take() {
            Some(running) => {
                shutdown_loop(running).await;
                self.active.store(false, Ordering::Relaxed);
                info!("Background measurement logging stopped");
            }
            None => debug!("Measurement logger is not running"),
        }
    }
}

async fn shutdown_loop(running: LoggerLoop) {
    running.token.cancel();
    if tokio::time::timeout(STOP_JOIN_TIMEOUT, running.task)
        .await
        .is_err()
    {
        warn!("Measurement logger did not stop within {STOP_JOIN_TIMEOUT:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Measurement, MeasurementStore, MemoryStore};
    use crate::station::sensors::MockSensor;

    fn station(store: Arc<dyn MeasurementStore>) -> Arc<WeatherStation> {
        let sensor = Arc::new(MockSensor::new(20.0, 50.0, 1000.0));
        Arc::new(
            WeatherStation::new(store, 0.0)
                .with_temperature_sensor(Arc::clone(&sensor) as _)
                .with_humidity_sensor(Arc::clone(&sensor) as _)
                .with_pressure_sensor(sensor as _),
        )
    }

    #[tokio::test]
    async fn logger_persists_rows_on_its_interval() {
        let store = Arc::new(MemoryStore::new());
        let logger = MeasurementLogger::new(
            station(Arc::clone(&store) as _),
            Duration::from_millis(50),
        );

        logger.start_logging().await;
        assert!(logger.is_logging());

        tokio::time::sleep(Duration::from_millis(300)).await;
        logger.stop_logging().await;
        assert!(!logger.is_logging());

        let rows = store.len();
        assert!(rows >= 3, "expected several rows, got {rows}");
        let frozen = store.len();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.len(), frozen, "stopped logger must not log");
    }

    #[tokio::test]
    async fn interval_change_takes_effect_on_the_next_tick() {
        let store = Arc::new(MemoryStore::new());
        let logger = MeasurementLogger::new(
            station(Arc::clone(&store) as _),
            Duration::from_secs(3600),
        );

        logger.start_logging().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        // one row from the long-interval loop start
        let before = store.len();
        assert!(before >= 1);

        logger.set_logging_interval(Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        logger.stop_logging().await;

        let rows = store.rows();
        assert!(
            rows.len() >= before + 3,
            "new interval must apply immediately, got {} rows",
            rows.len()
        );
        // consecutive rows after the change are far closer than the
        // stale one-hour interval
        let last = rows.last().unwrap().time;
        let second_last = rows[rows.len() - 2].time;
        let gap = (last - second_last).num_milliseconds();
        assert!(gap < 2_000, "rows were {gap} ms apart");
    }

    #[tokio::test]
    async fn double_start_keeps_a_single_loop() {
        let store = Arc::new(MemoryStore::new());
        let logger = MeasurementLogger::new(
            station(Arc::clone(&store) as _),
            Duration::from_millis(50),
        );

        logger.start_logging().await;
        logger.start_logging().await;
        assert!(logger.is_logging());

        tokio::time::sleep(Duration::from_millis(120)).await;
        logger.stop_logging().await;
        let after_stop = store.len();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.len(), after_stop);
    }

    #[tokio::test]
    async fn stopping_an_idle_logger_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let logger = MeasurementLogger::new(station(store as _), Duration::from_millis(50));
        logger.stop_logging().await;
        assert!(!logger.is_logging());
    }

    /// Persistence failures must not terminate the loop.
    struct FlakyStore {
        inner: MemoryStore,
        remaining_failures: Mutex<u32>,
    }

    impl MeasurementStore for FlakyStore {
        fn log(&self, measurement: &Measurement) -> bool {
            let mut remaining = self.remaining_failures.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return false;
            }
            self.inner.log(measurement)
        }
    }

    #[tokio::test]
    async fn persistence_failures_do_not_kill_the_loop() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            remaining_failures: Mutex::new(2),
        });
        let logger = MeasurementLogger::new(
            station(Arc::clone(&store) as _),
            Duration::from_millis(40),
        );

        logger.start_logging().await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        logger.stop_logging().await;

        assert!(
            store.inner.len() >= 1,
            "loop must survive failed ticks and keep logging"
        );
    }
}
