//! Shared key-value store used to exchange values with the dashboard.

mod client;
mod gateway;

#[cfg(test)]
pub use client::MockStoreClient;
pub use client::RedisStore;
pub use client::StoreClient;
pub use gateway::GatewayError;
pub use gateway::SensorGateway;
pub use gateway::BACKLIGHT_FIELD;
pub use gateway::DASHBOARD_CHANNEL;
pub use gateway::DASHBOARD_KEY;
pub use gateway::ILLUMINANCE_FIELD;
