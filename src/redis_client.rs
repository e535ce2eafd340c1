use redis::{aio::MultiplexedConnection, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

/// Thin JSON layer over a multiplexed Redis connection. All keys get a
/// common prefix so several deployments can share one Redis.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
    prefix: String,
}

fn codec_error(e: serde_json::Error) -> RedisError {
    RedisError::from((redis::ErrorKind::TypeError, "JSON codec error", e.to_string()))
}

impl RedisClient {
    pub async fn new(redis_url: &str, prefix: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!(prefix, "Connected to Redis");
        Ok(RedisClient {
            conn,
            prefix: prefix.to_string(),
        })
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, suffix: &str) -> redis::RedisResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(suffix)).await?;
        raw.map(|data| serde_json::from_str(&data).map_err(codec_error)).transpose()
    }

    pub async fn set_json_ex<T: Serialize>(&self, suffix: &str, value: &T, ttl_secs: u64) -> redis::RedisResult<()> {
        let data = serde_json::to_string(value).map_err(codec_error)?;
        let mut conn = self.conn.clone();
        conn.set_ex(self.key(suffix), data, ttl_secs).await
    }

    pub async fn del(&self, suffix: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.del(self.key(suffix)).await
    }
}
