use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use backlightd::config::parse_duration;
use backlightd::config::LoggingConfig;
use backlightd::Config;
use backlightd::ControlLoop;
use backlightd::LogLevel;
use backlightd::RedisStore;
use backlightd::SensorGateway;
use backlightd::SysfsBacklight;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Drive the display backlight from the ambient light sensor.
#[derive(Debug, Parser)]
#[command(name = "backlightd", version)]
struct Args {
    /// TOML configuration file; built-in defaults are used without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Redis URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Polling interval for the illuminance value (e.g. 1s, 500ms)
    #[arg(long, value_parser = parse_duration)]
    polling_time: Option<Duration>,

    /// Path to the backlight brightness file
    #[arg(long)]
    backlight_path: Option<PathBuf>,

    /// Minimum brightness change required to update the store
    #[arg(long)]
    hysteresis_threshold: Option<u64>,

    /// Log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

impl Args {
    /// Command-line flags take precedence over the config file
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.redis_url {
            config.store.url = url.clone();
        }
        if let Some(interval) = self.polling_time {
            config.backlight.polling_interval = interval;
        }
        if let Some(path) = &self.backlight_path {
            config.backlight.path = path.clone();
        }
        if let Some(threshold) = self.hysteresis_threshold {
            config.backlight.hysteresis_threshold = threshold;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);

    init_tracing(&config.logging);

    tracing::info!("backlightd v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        tracing::info!("Loaded config from: {}", path.display());
    }

    let table = config.level_table()?;
    let settings = config.control_settings()?;

    tracing::info!("Connecting to store at {}", config.store.url);
    let store = tokio::time::timeout(
        settings.cycle_timeout,
        RedisStore::connect(&config.store.url),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Timed out connecting to {}", config.store.url))?
    .with_context(|| format!("Failed to connect to store at {}", config.store.url))?;

    let backlight = SysfsBacklight::new(&config.backlight.path);
    tracing::info!("Using backlight path: {}", backlight.path().display());

    let signals = ShutdownSignals::install().context("Failed to install signal handlers")?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(signals, cancel.clone()));

    ControlLoop::new(SensorGateway::new(store), backlight, table, settings)
        .run(cancel)
        .await
        .context("Backlight service failed")?;

    tracing::info!("backlightd shutdown complete");

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = Targets::new()
        .with_default(logging.level)
        .with_targets(
            logging
                .overrides
                .iter()
                .map(|(target, level)| (target.clone(), *level)),
        );

    // journald stamps every line itself
    let (journal, terminal) = if std::env::var_os("JOURNAL_STREAM").is_some() {
        (Some(fmt::layer().without_time()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(journal)
        .with(terminal)
        .init();
}

async fn cancel_on_signal(mut signals: ShutdownSignals, cancel: CancellationToken) {
    signals.recv().await;
    tracing::info!("Received shutdown signal");
    cancel.cancel();
}

/// SIGINT and SIGTERM listeners, registered before the loop starts.
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::signal;
        use tokio::signal::unix::SignalKind;

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(windows)]
struct ShutdownSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) {
        self.ctrl_c.recv().await;
    }
}
