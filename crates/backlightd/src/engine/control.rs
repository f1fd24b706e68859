use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::level::BrightnessLevel;
use super::table::LevelTable;
use crate::backlight::BrightnessPort;
use crate::backlight::HardwareError;
use crate::store::GatewayError;
use crate::store::SensorGateway;
use crate::store::StoreClient;

/// Timing and republish settings of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSettings {
    /// Time between two adjustment cycles.
    pub polling_interval: Duration,

    /// Upper bound for one cycle, including its store round trips.
    pub cycle_timeout: Duration,

    /// Minimum change of the hardware brightness before it is republished.
    pub hysteresis_threshold: u64,
}

/// Errors that abort a single adjustment cycle.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("failed to get illuminance value: {0}")]
    Illuminance(#[source] GatewayError),

    #[error("failed to set backlight: {0}")]
    Hardware(#[from] HardwareError),

    #[error("backlight task failed: {0}")]
    PortTask(#[from] tokio::task::JoinError),

    #[error("cycle did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Errors that prevent the loop from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("store connection failed: {0}")]
    Unreachable(#[source] GatewayError),

    #[error("store did not answer ping within {0:?}")]
    PingTimedOut(Duration),
}

/// Drives the backlight from the ambient light sensor.
///
/// Owns the two pieces of mutable state: the active level of the hysteresis
/// table and the last brightness published to the store.
pub struct ControlLoop<C, P> {
    gateway: SensorGateway<C>,
    port: Arc<P>,
    table: LevelTable,
    settings: ControlSettings,
    current_level: BrightnessLevel,
    /// `None` until the first successful publish.
    last_published: Option<i64>,
}

impl<C: StoreClient, P: BrightnessPort + 'static> ControlLoop<C, P> {
    /// Create the loop, seeding the active level from the hardware.
    ///
    /// Falls back to [`BrightnessLevel::Mid`] when the backlight cannot be read.
    pub fn new(
        gateway: SensorGateway<C>,
        port: P,
        table: LevelTable,
        settings: ControlSettings,
    ) -> Self {
        let current_level = match port.read_brightness() {
            Ok(brightness) => {
                let level = table.closest_level(brightness);
                info!(
                    "Initial backlight brightness {} maps to level {}",
                    brightness, level
                );
                level
            }
            Err(e) => {
                warn!(
                    "Failed to read initial brightness ({}), starting at {}",
                    e,
                    BrightnessLevel::Mid
                );
                BrightnessLevel::Mid
            }
        };

        Self {
            gateway,
            port: Arc::new(port),
            table,
            settings,
            current_level,
            last_published: None,
        }
    }

    pub fn current_level(&self) -> BrightnessLevel {
        self.current_level
    }

    pub fn last_published(&self) -> Option<i64> {
        self.last_published
    }

    /// Run until `cancel` fires.
    ///
    /// The store must answer a ping first; after that, cycle failures are
    /// logged and never end the loop.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), StartupError> {
        let timeout = self.settings.cycle_timeout;
        match tokio::time::timeout(timeout, self.gateway.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(StartupError::Unreachable(e)),
            Err(_) => return Err(StartupError::PingTimedOut(timeout)),
        }

        info!(
            "Starting backlight control with polling interval {:?}",
            self.settings.polling_interval
        );
        info!("Level table: {}", self.table);

        let mut ticker = tokio::time::interval(self.settings.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cycle: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        if cycle == 0 {
                            error!("Initial backlight adjustment failed: {}", e);
                        } else {
                            error!(cycle, "Periodic backlight adjustment failed: {}", e);
                        }
                    }
                }
            }
            cycle += 1;
        }

        info!("Backlight control stopped after {} cycles", cycle);
        Ok(())
    }

    /// Run blocking backlight I/O off the runtime workers.
    ///
    /// When the cycle times out the call keeps running on its own thread and
    /// its result is dropped.
    async fn with_port<T, F>(&self, f: F) -> Result<T, CycleError>
    where
        T: Send + 'static,
        F: FnOnce(&P) -> Result<T, HardwareError> + Send + 'static,
    {
        let port = Arc::clone(&self.port);
        let value = tokio::task::spawn_blocking(move || f(port.as_ref())).await??;
        Ok(value)
    }

    /// One adjustment cycle bounded by the configured timeout.
    pub async fn run_cycle(&mut self) -> Result<(), CycleError> {
        let timeout = self.settings.cycle_timeout;
        tokio::time::timeout(timeout, self.adjust())
            .await
            .map_err(|_| CycleError::TimedOut(timeout))?
    }

    /// One adjustment cycle without a timeout.
    ///
    /// Only the illuminance read and a hardware write abort the cycle. A
    /// failed readback or republish is logged and the cycle still succeeds.
    pub async fn adjust(&mut self) -> Result<(), CycleError> {
        let illuminance = self
            .gateway
            .read_illuminance()
            .await
            .map_err(CycleError::Illuminance)?;

        let transition = self.table.transition(self.current_level, illuminance);
        if transition.level != self.current_level {
            info!(
                "Illuminance {} lux: switching from {} to {}",
                illuminance, self.current_level, transition.level
            );
        } else {
            debug!(
                "Illuminance {} lux: staying at {}",
                illuminance, self.current_level
            );
        }
        self.current_level = transition.level;

        if let Some(brightness) = transition.brightness {
            info!("Setting backlight to {} level: {}", transition.level, brightness);
            self.with_port(move |port| port.write_brightness(brightness))
                .await?;
        }

        let brightness = match self.with_port(|port| port.read_brightness()).await {
            Ok(brightness) => brightness,
            Err(e) => {
                warn!("Failed to read current brightness: {}", e);
                return Ok(());
            }
        };

        let delta = self.last_published.map(|last| brightness.abs_diff(last));
        match delta {
            Some(delta) if delta < self.settings.hysteresis_threshold => {
                debug!(
                    "Brightness {} within {} of last published value, not publishing",
                    brightness, self.settings.hysteresis_threshold
                );
            }
            _ => match self.gateway.publish_backlight(brightness).await {
                Ok(()) => {
                    match (self.last_published, delta) {
                        (Some(last), Some(delta)) => info!(
                            "Brightness changed from {} to {} (delta: {}), published",
                            last, brightness, delta
                        ),
                        _ => info!("Published initial brightness {}", brightness),
                    }
                    self.last_published = Some(brightness);
                }
                Err(e) => warn!("Failed to publish backlight value: {}", e),
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlight::MockBacklight;
    use crate::engine::table::tests::dashboard_table;
    use crate::store::MockStoreClient;
    use crate::store::BACKLIGHT_FIELD;
    use crate::store::DASHBOARD_KEY;
    use crate::store::ILLUMINANCE_FIELD;

    fn settings() -> ControlSettings {
        ControlSettings {
            polling_interval: Duration::from_millis(10),
            cycle_timeout: Duration::from_secs(5),
            hysteresis_threshold: 512,
        }
    }

    fn control_loop(
        store: &MockStoreClient,
        backlight: &MockBacklight,
        settings: ControlSettings,
    ) -> ControlLoop<MockStoreClient, MockBacklight> {
        ControlLoop::new(
            SensorGateway::new(store.clone()),
            backlight.clone(),
            dashboard_table(),
            settings,
        )
    }

    fn set_lux(store: &MockStoreClient, lux: &str) {
        store.set_field(DASHBOARD_KEY, ILLUMINANCE_FIELD, lux);
    }

    #[test]
    fn test_initial_level_from_hardware() {
        let cases = [
            (9350, BrightnessLevel::VeryLow),
            (9500, BrightnessLevel::Low),
            (9600, BrightnessLevel::Low),
            (9700, BrightnessLevel::Mid),
            (9800, BrightnessLevel::Mid),
            (9950, BrightnessLevel::High),
            (10240, BrightnessLevel::VeryHigh),
        ];
        for (brightness, want) in cases {
            let store = MockStoreClient::new();
            let backlight = MockBacklight::with_value(brightness);
            let control = control_loop(&store, &backlight, settings());
            assert_eq!(control.current_level(), want, "brightness {}", brightness);
            assert_eq!(control.last_published(), None);
            assert!(backlight.state().writes.is_empty());
        }
    }

    #[test]
    fn test_initial_level_falls_back_to_mid() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::default();
        let control = control_loop(&store, &backlight, settings());
        assert_eq!(control.current_level(), BrightnessLevel::Mid);
    }

    #[tokio::test]
    async fn test_first_cycle_publishes_regardless_of_delta() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(&store, &backlight, settings());
        set_lux(&store, "25");

        control.adjust().await.unwrap();

        assert_eq!(control.current_level(), BrightnessLevel::Mid);
        assert!(backlight.state().writes.is_empty());
        assert_eq!(control.last_published(), Some(9700));
        assert_eq!(store.field(DASHBOARD_KEY, BACKLIGHT_FIELD).as_deref(), Some("9700"));
        assert_eq!(store.state().published.len(), 1);
    }

    #[tokio::test]
    async fn test_republish_gate() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9500);
        let mut control = control_loop(&store, &backlight, settings());
        set_lux(&store, "10");

        control.adjust().await.unwrap();
        assert_eq!(control.last_published(), Some(9500));

        // Small external change: below the threshold.
        backlight.state().value = Some(9600);
        control.adjust().await.unwrap();
        assert_eq!(control.last_published(), Some(9500));
        assert_eq!(store.state().published.len(), 1);
        assert_eq!(store.field(DASHBOARD_KEY, BACKLIGHT_FIELD).as_deref(), Some("9500"));

        backlight.state().value = Some(10100);
        control.adjust().await.unwrap();
        assert_eq!(control.last_published(), Some(10100));
        assert_eq!(store.state().published.len(), 2);
        assert_eq!(store.field(DASHBOARD_KEY, BACKLIGHT_FIELD).as_deref(), Some("10100"));
        assert!(backlight.state().writes.is_empty());
    }

    #[tokio::test]
    async fn test_delta_equal_to_threshold_publishes() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9500);
        let mut control = control_loop(&store, &backlight, settings());
        set_lux(&store, "10");

        control.adjust().await.unwrap();
        backlight.state().value = Some(9500 - 512);
        control.adjust().await.unwrap();

        assert_eq!(control.last_published(), Some(8988));
    }

    #[tokio::test]
    async fn test_level_change_writes_hardware() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(&store, &backlight, settings());
        set_lux(&store, "41");

        control.adjust().await.unwrap();

        assert_eq!(control.current_level(), BrightnessLevel::High);
        assert_eq!(backlight.state().writes, vec![9950]);
        assert_eq!(control.last_published(), Some(9950));

        // Same sample again: no further write.
        control.adjust().await.unwrap();
        assert_eq!(backlight.state().writes, vec![9950]);
    }

    #[tokio::test]
    async fn test_missing_sensor_data_steps_down() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(&store, &backlight, settings());

        control.adjust().await.unwrap();
        assert_eq!(control.current_level(), BrightnessLevel::Low);
        control.adjust().await.unwrap();
        assert_eq!(control.current_level(), BrightnessLevel::VeryLow);
        control.adjust().await.unwrap();
        assert_eq!(control.current_level(), BrightnessLevel::VeryLow);

        assert_eq!(backlight.state().writes, vec![9500, 9350]);
    }

    #[tokio::test]
    async fn test_readback_failure_is_not_fatal() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(&store, &backlight, settings());
        set_lux(&store, "25");

        control.adjust().await.unwrap();
        assert_eq!(control.last_published(), Some(9700));

        backlight.state().fail_reads = true;
        set_lux(&store, "41");
        control.adjust().await.unwrap();

        assert_eq!(control.current_level(), BrightnessLevel::High);
        assert_eq!(backlight.state().writes, vec![9950]);
        assert_eq!(control.last_published(), Some(9700));
        assert_eq!(store.state().published.len(), 1);
    }

    #[tokio::test]
    async fn test_illuminance_failure_aborts_before_hardware() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(&store, &backlight, settings());
        let reads_after_startup = backlight.state().reads;
        store.state().unavailable = true;

        let err = control.adjust().await.unwrap_err();

        assert!(matches!(
            err,
            CycleError::Illuminance(GatewayError::Unavailable(_))
        ));
        assert!(backlight.state().writes.is_empty());
        assert_eq!(backlight.state().reads, reads_after_startup);
        assert_eq!(control.current_level(), BrightnessLevel::Mid);
        assert_eq!(control.last_published(), None);
    }

    #[tokio::test]
    async fn test_invalid_illuminance_aborts_cycle() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(&store, &backlight, settings());
        set_lux(&store, "dark");

        let err = control.adjust().await.unwrap_err();

        assert!(matches!(
            err,
            CycleError::Illuminance(GatewayError::InvalidValue(_))
        ));
        assert!(store.state().published.is_empty());
    }

    #[tokio::test]
    async fn test_hardware_write_failure_aborts_cycle() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(&store, &backlight, settings());
        backlight.state().fail_writes = true;
        set_lux(&store, "41");

        let err = control.adjust().await.unwrap_err();

        assert!(matches!(err, CycleError::Hardware(HardwareError::Write(..))));
        assert_eq!(control.current_level(), BrightnessLevel::High);
        assert!(store.state().published.is_empty());
        assert_eq!(control.last_published(), None);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_last_published() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(&store, &backlight, settings());
        set_lux(&store, "25");
        store.state().fail_writes = true;

        control.adjust().await.unwrap();
        assert_eq!(control.last_published(), None);

        store.state().fail_writes = false;
        control.adjust().await.unwrap();
        assert_eq!(control.last_published(), Some(9700));
    }

    #[tokio::test]
    async fn test_cycle_timeout() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(
            &store,
            &backlight,
            ControlSettings {
                cycle_timeout: Duration::from_millis(20),
                ..settings()
            },
        );
        store.state().hang = true;

        let err = control.run_cycle().await.unwrap_err();

        assert!(matches!(err, CycleError::TimedOut(d) if d == Duration::from_millis(20)));
        assert!(backlight.state().writes.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_timeout_bounds_stalled_hardware_write() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let mut control = control_loop(
            &store,
            &backlight,
            ControlSettings {
                cycle_timeout: Duration::from_millis(20),
                ..settings()
            },
        );
        set_lux(&store, "41");
        backlight.state().stall = Some(Duration::from_millis(500));

        let started = std::time::Instant::now();
        let err = control.run_cycle().await.unwrap_err();

        assert!(matches!(err, CycleError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(store.state().published.is_empty());
    }

    #[tokio::test]
    async fn test_run_fails_when_store_unreachable() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let control = control_loop(&store, &backlight, settings());
        store.state().unavailable = true;

        let result = control.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(StartupError::Unreachable(_))));
        assert_eq!(store.state().reads, 0);
    }

    #[tokio::test]
    async fn test_run_fails_when_ping_times_out() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let control = control_loop(
            &store,
            &backlight,
            ControlSettings {
                cycle_timeout: Duration::from_millis(20),
                ..settings()
            },
        );
        store.state().hang = true;

        let result = control.run(CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(StartupError::PingTimedOut(d)) if d == Duration::from_millis(20)
        ));
        assert_eq!(store.state().pings, 1);
        assert_eq!(store.state().reads, 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_cycle_in_progress() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let control = control_loop(
            &store,
            &backlight,
            ControlSettings {
                polling_interval: Duration::from_secs(3600),
                cycle_timeout: Duration::from_secs(3600),
                ..settings()
            },
        );
        set_lux(&store, "41");
        store.state().hang_reads = true;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(control.run(cancel.clone()));

        let mut reading = false;
        for _ in 0..100 {
            if store.state().reads > 0 {
                reading = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reading, "first cycle did not start");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(store.state().pings, 1);
        assert!(backlight.state().writes.is_empty());
        assert!(store.state().published.is_empty());
        assert_eq!(store.field(DASHBOARD_KEY, BACKLIGHT_FIELD), None);
    }

    #[tokio::test]
    async fn test_run_adjusts_immediately_and_stops_on_cancel() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let control = control_loop(
            &store,
            &backlight,
            ControlSettings {
                polling_interval: Duration::from_secs(3600),
                ..settings()
            },
        );
        set_lux(&store, "41");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(control.run(cancel.clone()));

        let mut published = false;
        for _ in 0..100 {
            if !store.state().published.is_empty() {
                published = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(published, "first cycle did not run");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(store.state().pings, 1);
        assert_eq!(store.state().reads, 1);
        assert_eq!(backlight.state().writes, vec![9950]);
    }

    #[tokio::test]
    async fn test_run_keeps_polling_after_errors() {
        let store = MockStoreClient::new();
        let backlight = MockBacklight::with_value(9700);
        let control = control_loop(&store, &backlight, settings());
        set_lux(&store, "garbage");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(control.run(cancel.clone()));

        let mut reads = 0;
        for _ in 0..100 {
            reads = store.state().reads;
            if reads >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reads >= 3, "loop stopped polling after errors");

        set_lux(&store, "25");
        for _ in 0..100 {
            if !store.state().published.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(
            store.field(DASHBOARD_KEY, BACKLIGHT_FIELD).as_deref(),
            Some("9700")
        );
    }
}
