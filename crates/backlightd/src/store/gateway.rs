use tracing::debug;

use super::client::StoreClient;

/// Hash record shared with the rest of the dashboard.
pub const DASHBOARD_KEY: &str = "dashboard";

/// Field holding the ambient illuminance sample (lux).
pub const ILLUMINANCE_FIELD: &str = "brightness";

/// Field holding the resolved hardware backlight value.
pub const BACKLIGHT_FIELD: &str = "backlight";

/// Channel notified after every backlight update.
pub const DASHBOARD_CHANNEL: &str = "dashboard";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("invalid illuminance value {0:?}")]
    InvalidValue(String),
}

/// Binds the dashboard record layout to a [`StoreClient`].
pub struct SensorGateway<C> {
    client: C,
}

impl<C: StoreClient> SensorGateway<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Current ambient illuminance, truncated toward zero.
    ///
    /// A missing field means the sensor has not reported yet and reads as 0.
    pub async fn read_illuminance(&self) -> Result<i64, GatewayError> {
        let Some(raw) = self
            .client
            .read_field(DASHBOARD_KEY, ILLUMINANCE_FIELD)
            .await?
        else {
            debug!("Illuminance value not found in store");
            return Ok(0);
        };

        parse_illuminance(&raw)
    }

    /// Store `value` as the current backlight and notify subscribers.
    pub async fn publish_backlight(&self, value: i64) -> Result<(), GatewayError> {
        self.client
            .write_field_and_publish(
                DASHBOARD_KEY,
                BACKLIGHT_FIELD,
                value,
                DASHBOARD_CHANNEL,
                BACKLIGHT_FIELD,
            )
            .await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), GatewayError> {
        self.client.ping().await?;
        Ok(())
    }
}

fn parse_illuminance(raw: &str) -> Result<i64, GatewayError> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }

    match trimmed.parse::<f64>() {
        // `as` truncates toward zero and saturates at the i64 bounds.
        Ok(value) if value.is_finite() => Ok(value as i64),
        _ => Err(GatewayError::InvalidValue(raw.to_string())),
    }
}
