use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;

/// Operations the daemon needs from the shared key-value store.
///
/// This trait allows for mocking the store for testing purposes.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read one field of a hash record, `None` if the field does not exist.
    async fn read_field(&self, key: &str, field: &str) -> RedisResult<Option<String>>;

    /// Write one field of a hash record and publish `message` on `channel`
    /// as a single transaction.
    async fn write_field_and_publish(
        &self,
        key: &str,
        field: &str,
        value: i64,
        channel: &str,
        message: &str,
    ) -> RedisResult<()>;

    /// Check that the store answers.
    async fn ping(&self) -> RedisResult<()>;
}

/// Redis-backed store.
///
/// The connection manager is cheap to clone and reconnects on its own after
/// the server goes away.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Open a connection to the Redis server at `url` (e.g. `redis://host:6379`).
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    async fn read_field(&self, key: &str, field: &str) -> RedisResult<Option<String>> {
        let mut connection = self.connection.clone();
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut connection)
            .await?;
        Ok(value)
    }

    async fn write_field_and_publish(
        &self,
        key: &str,
        field: &str,
        value: i64,
        channel: &str,
        message: &str,
    ) -> RedisResult<()> {
        let mut connection = self.connection.clone();
        let () = redis::pipe()
            .atomic()
            .hset(key, field, value)
            .ignore()
            .publish(channel, message)
            .ignore()
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> RedisResult<()> {
        let mut connection = self.connection.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }
}

/// In-memory store for tests. Clones share state.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MockStoreClient {
    inner: std::sync::Arc<std::sync::Mutex<MockStoreState>>,
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockStoreState {
    pub fields: std::collections::HashMap<(String, String), String>,
    pub published: Vec<(String, String)>,
    pub reads: usize,
    pub pings: usize,
    /// Every operation fails as if the server were unreachable.
    pub unavailable: bool,
    /// Only the write+publish transaction fails.
    pub fail_writes: bool,
    /// Every operation waits forever.
    pub hang: bool,
    /// Only field reads wait forever.
    pub hang_reads: bool,
}

#[cfg(test)]
impl MockStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockStoreState> {
        self.inner.lock().unwrap()
    }

    pub fn set_field(&self, key: &str, field: &str, value: &str) {
        self.state()
            .fields
            .insert((key.to_string(), field.to_string()), value.to_string());
    }

    pub fn field(&self, key: &str, field: &str) -> Option<String> {
        self.state()
            .fields
            .get(&(key.to_string(), field.to_string()))
            .cloned()
    }

    async fn check(&self, failing: impl FnOnce(&MockStoreState) -> bool) -> RedisResult<()> {
        let (hang, fail) = {
            let state = self.state();
            (state.hang, failing(&state))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "mock store unavailable",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl StoreClient for MockStoreClient {
    async fn read_field(&self, key: &str, field: &str) -> RedisResult<Option<String>> {
        let hang_reads = {
            let mut state = self.state();
            state.reads += 1;
            state.hang_reads
        };
        if hang_reads {
            std::future::pending::<()>().await;
        }
        self.check(|s| s.unavailable).await?;
        Ok(self.field(key, field))
    }

    async fn write_field_and_publish(
        &self,
        key: &str,
        field: &str,
        value: i64,
        channel: &str,
        message: &str,
    ) -> RedisResult<()> {
        self.check(|s| s.unavailable || s.fail_writes).await?;
        let mut state = self.state();
        state
            .fields
            .insert((key.to_string(), field.to_string()), value.to_string());
        state
            .published
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn ping(&self) -> RedisResult<()> {
        self.state().pings += 1;
        self.check(|s| s.unavailable).await
    }
}
