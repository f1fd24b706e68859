pub mod backlight;
pub mod config;
pub mod engine;
pub mod store;

pub use backlight::BrightnessPort;
pub use backlight::HardwareError;
pub use backlight::SysfsBacklight;
pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::BrightnessLevel;
pub use engine::ControlLoop;
pub use engine::ControlSettings;
pub use engine::CycleError;
pub use engine::LevelConfig;
pub use engine::LevelTable;
pub use store::GatewayError;
pub use store::RedisStore;
pub use store::SensorGateway;
pub use store::StoreClient;
