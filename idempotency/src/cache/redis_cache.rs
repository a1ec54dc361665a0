use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::{debug, info};

use super::{CacheError, DistributedCache};

// Tag indexes are sorted sets scored by member expiry (server clock, millis).
// Every write drops members that have already expired and only ever extends
// the index's own TTL, so the index stays bounded by the live key count.
//
// KEYS[1] is the value key, KEYS[2..] the tag indexes.
// ARGV[1] is the value, ARGV[2] the TTL in millis.

/// `SET NX`, the fallback `GET` and the tag bookkeeping run as one script:
/// a record is never committed without its tags, and a concurrent expiry
/// cannot slip between the check and the read.
const GET_OR_CREATE_SCRIPT: &str = r#"
local created = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
if not created then
    return {0, redis.call('GET', KEYS[1])}
end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local ttl = tonumber(ARGV[2])
for i = 2, #KEYS do
    redis.call('ZREMRANGEBYSCORE', KEYS[i], '-inf', now)
    redis.call('ZADD', KEYS[i], now + ttl, KEYS[1])
    if redis.call('PTTL', KEYS[i]) < ttl then
        redis.call('PEXPIRE', KEYS[i], ttl)
    end
end
return {1, ARGV[1]}
"#;

const SET_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local ttl = tonumber(ARGV[2])
for i = 2, #KEYS do
    redis.call('ZREMRANGEBYSCORE', KEYS[i], '-inf', now)
    redis.call('ZADD', KEYS[i], now + ttl, KEYS[1])
    if redis.call('PTTL', KEYS[i]) < ttl then
        redis.call('PEXPIRE', KEYS[i], ttl)
    end
end
return 1
"#;

// TTL is refreshed on every call, not only on creation.
const INCREMENT_SCRIPT: &str = r#"
local n = redis.call('INCR', KEYS[1])
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return n
"#;

// Returns the members whose score is still in the future.
const LIVE_TAG_MEMBERS_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
return redis.call('ZRANGEBYSCORE', KEYS[1], '(' .. now, '+inf')
"#;

/// [`DistributedCache`] backed by Redis.
///
/// Tags are kept as sorted sets named `tag:{tag}`, scored by each member's
/// expiry.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`), giving up after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Connection(format!("timed out connecting to {}", url)))??;
        info!(redis_url = %url, "Connected to Redis");
        Ok(Self { conn })
    }

    /// Number of entries in a tag index, expired or not (for monitoring).
    pub async fn tag_index_len(&self, tag: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("ZCARD").arg(tag_key(tag)).query_async(&mut conn).await?;
        Ok(len)
    }
}

fn tag_key(tag: &str) -> String {
    format!("tag:{}", tag)
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get_or_create(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<(String, bool), CacheError> {
        let mut conn = self.conn.clone();
        let script = Script::new(GET_OR_CREATE_SCRIPT);
        let mut invocation = script.key(key);
        for tag in tags {
            invocation.key(tag_key(tag));
        }
        let (created, current): (i64, String) = invocation
            .arg(&value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        let created = created == 1;
        debug!(cache_key = key, created, "get_or_create");
        Ok((current, created))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration, tags: &[&str]) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let script = Script::new(SET_SCRIPT);
        let mut invocation = script.key(key);
        for tag in tags {
            invocation.key(tag_key(tag));
        }
        invocation
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        let mut conn = self.conn.clone();
        let next: i64 = Script::new(INCREMENT_SCRIPT)
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(next)
    }

    async fn remove_by_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let index = tag_key(tag);
        let members: Vec<String> = Script::new(LIVE_TAG_MEMBERS_SCRIPT)
            .key(&index)
            .invoke_async(&mut conn)
            .await?;
        let removed: usize = if members.is_empty() {
            0
        } else {
            redis::cmd("DEL").arg(&members).query_async(&mut conn).await?
        };
        redis::cmd("DEL").arg(&index).query_async::<_, ()>(&mut conn).await?;
        Ok(removed)
    }
}
