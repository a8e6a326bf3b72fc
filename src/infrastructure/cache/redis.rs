use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisError, aio::MultiplexedConnection};
use tracing::debug;

use crate::application::services::cache::{CacheError, CacheService};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// [`CacheService`] backed by a shared multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
    default_ttl: Duration,
}

impl RedisCache {
    pub async fn connect(url: &str, default_ttl: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(unavailable)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;

        debug!("connected to redis");
        Ok(Self {
            connection,
            default_ttl,
        })
    }

    fn ttl_millis(&self, ttl: Option<Duration>) -> u64 {
        ttl.unwrap_or(self.default_ttl).as_millis().max(1) as u64
    }
}

fn unavailable(err: RedisError) -> CacheError {
    CacheError::Unavailable(err.to_string())
}

#[async_trait]
impl CacheService for RedisCache {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(self.ttl_millis(ttl))
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(unavailable)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut con = self.connection.clone();
        con.get::<_, Option<String>>(key).await.map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        con.del::<_, ()>(key).await.map_err(unavailable)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut con = self.connection.clone();
        con.exists::<_, bool>(key).await.map_err(unavailable)
    }

    async fn zadd(
        &self,
        key: &str,
        score: f64,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(self.ttl_millis(ttl))
            .ignore()
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(unavailable)
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        let mut con = self.connection.clone();
        redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<_, Vec<String>>(&mut con)
            .await
            .map_err(unavailable)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut con = self.connection.clone();
        redis::cmd("ZREM")
            .arg(key)
            .arg(members)
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(unavailable)
    }

    async fn zcard(&self, key: &str) -> Result<u64, CacheError> {
        let mut con = self.connection.clone();
        con.zcard::<_, u64>(key).await.map_err(unavailable)
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        redis::cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(unavailable)
    }

    async fn is_healthy(&self) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut con)
            .await
            .map_err(unavailable)?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Unavailable(format!("unexpected PING reply: {pong}")))
        }
    }
}
