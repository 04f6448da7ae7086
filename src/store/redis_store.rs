//! Redis-backed pool store
//!
//! Multi-key writes run as Lua scripts so each admission or removal is a
//! single atomic unit on the server, whichever instance issued it. The
//! connection manager reconnects on its own after the server goes away.

use crate::error::{MatchmakingError, Result};
use crate::store::{EntrySnapshot, PoolKeys, PoolStore, Removal, RemovalMode};
use crate::types::{ExerciseType, RemainingTtl, WaitingEntry};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// KEYS: queue, scores, info, marker. ARGV: token, score, entry json, ttl ms.
/// Returns 1 when admitted, 0 when a live entry already exists.
const ADMIT_SCRIPT: &str = r#"
local token = ARGV[1]
local present = redis.call('HEXISTS', KEYS[3], token) == 1
    or redis.call('ZSCORE', KEYS[2], token) ~= false
if present then
    if redis.call('EXISTS', KEYS[4]) == 1 then
        return 0
    end
    redis.call('HDEL', KEYS[3], token)
    redis.call('ZREM', KEYS[2], token)
    redis.call('LREM', KEYS[1], 0, token)
end
redis.call('HSET', KEYS[3], token, ARGV[3])
redis.call('ZADD', KEYS[2], ARGV[2], token)
redis.call('RPUSH', KEYS[1], token)
redis.call('SET', KEYS[4], 'WAITING', 'PX', ARGV[4])
return 1
"#;

/// KEYS: queue, scores, info, marker. ARGV: token, mode (0 unconditional,
/// 1 lapsed-only, 2 orphan-only).
/// Returns 1 when the entry the mode targets was removed, 0 when it was
/// absent, -1 when the guard found the entry still waiting.
const REMOVE_SCRIPT: &str = r#"
local token = ARGV[1]
local mode = ARGV[2]
local alive = redis.call('EXISTS', KEYS[4]) == 1
if mode == '1' and alive then
    return -1
end
if mode == '2' and redis.call('ZSCORE', KEYS[2], token) then
    return -1
end
local indexed = redis.call('ZREM', KEYS[2], token)
local described = redis.call('HDEL', KEYS[3], token)
local listed = redis.call('LREM', KEYS[1], 0, token)
redis.call('DEL', KEYS[4])
if mode == '0' then
    if indexed == 1 and alive then
        return 1
    end
    return 0
end
if mode == '1' then
    return indexed
end
if described + listed > 0 then
    return 1
end
return 0
"#;

/// Pool store on a shared Redis (or Redis Cluster) deployment
#[derive(Clone)]
pub struct RedisPoolStore {
    connection: ConnectionManager,
    prefix: String,
    admit_script: Script,
    remove_script: Script,
}

impl RedisPoolStore {
    /// Open a managed connection to `url`; keys are namespaced by `prefix`
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| MatchmakingError::StoreUnavailable {
            message: format!("Failed to create Redis client: {}", e),
        })?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| MatchmakingError::StoreUnavailable {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        debug!("Connected to Redis pool store with prefix '{}'", prefix);
        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            admit_script: Script::new(ADMIT_SCRIPT),
            remove_script: Script::new(REMOVE_SCRIPT),
        })
    }

    fn keys(&self, exercise_type: ExerciseType) -> PoolKeys {
        PoolKeys::new(&self.prefix, exercise_type)
    }
}

fn store_error(err: redis::RedisError) -> anyhow::Error {
    MatchmakingError::from(err).into()
}

#[async_trait]
impl PoolStore for RedisPoolStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn insert_entry(&self, entry: &WaitingEntry, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let keys = self.keys(entry.exercise_type);
        let payload = serde_json::to_string(entry).map_err(|e| MatchmakingError::InternalError {
            message: format!("Failed to serialize waiting entry: {}", e),
        })?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let admitted: i64 = self
            .admit_script
            .key(&keys.queue)
            .key(&keys.scores)
            .key(&keys.info)
            .key(keys.expire(&entry.token))
            .arg(&entry.token)
            .arg(entry.score)
            .arg(payload)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(admitted == 1)
    }

    async fn remove_entry(
        &self,
        exercise_type: ExerciseType,
        token: &str,
        mode: RemovalMode,
    ) -> Result<Removal> {
        let mut conn = self.connection.clone();
        let keys = self.keys(exercise_type);
        let mode = match mode {
            RemovalMode::Unconditional => "0",
            RemovalMode::LapsedOnly => "1",
            RemovalMode::OrphanOnly => "2",
        };

        let outcome: i64 = self
            .remove_script
            .key(&keys.queue)
            .key(&keys.scores)
            .key(&keys.info)
            .key(keys.expire(token))
            .arg(token)
            .arg(mode)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(match outcome {
            -1 => Removal::StillWaiting,
            0 => Removal::Absent,
            _ => Removal::Removed,
        })
    }

    async fn tokens_in_score_range(
        &self,
        exercise_type: ExerciseType,
        min: i32,
        max: i32,
    ) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let tokens: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.keys(exercise_type).scores)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(tokens)
    }

    async fn fetch_entries(
        &self,
        exercise_type: ExerciseType,
        tokens: &[String],
    ) -> Result<Vec<EntrySnapshot>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let keys = self.keys(exercise_type);
        let marker_keys: Vec<String> = tokens.iter().map(|t| keys.expire(t)).collect();

        let mut pipe = redis::pipe();
        pipe.cmd("HMGET").arg(&keys.info).arg(tokens);
        pipe.cmd("MGET").arg(&marker_keys);
        let (payloads, markers): (Vec<Option<String>>, Vec<Option<String>>) = pipe
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(tokens
            .iter()
            .zip(payloads)
            .zip(markers)
            .map(|((token, payload), marker)| {
                let Some(payload) = payload else {
                    return EntrySnapshot::Missing;
                };
                match serde_json::from_str::<WaitingEntry>(&payload) {
                    Ok(entry) if marker.is_some() => EntrySnapshot::Live(entry),
                    Ok(entry) => EntrySnapshot::Lapsed(entry),
                    Err(e) => {
                        warn!("Unreadable metadata for token {}: {}", token, e);
                        EntrySnapshot::Missing
                    }
                }
            })
            .collect())
    }

    async fn remaining_ttl(
        &self,
        exercise_type: ExerciseType,
        token: &str,
    ) -> Result<RemainingTtl> {
        let mut conn = self.connection.clone();
        let keys = self.keys(exercise_type);

        let mut pipe = redis::pipe();
        pipe.cmd("PTTL").arg(keys.expire(token));
        pipe.cmd("HEXISTS").arg(&keys.info).arg(token);
        pipe.cmd("ZSCORE").arg(&keys.scores).arg(token);
        let (pttl, has_info, score): (i64, bool, Option<f64>) = pipe
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(match pttl {
            ms if ms > 0 => RemainingTtl::Remaining(Duration::from_millis(ms as u64)),
            // marker without expiry: never written by the admit script
            -1 => RemainingTtl::Expired,
            _ if has_info || score.is_some() => RemainingTtl::Expired,
            _ => RemainingTtl::Absent,
        })
    }

    async fn in_score_index(&self, exercise_type: ExerciseType, token: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(&self.keys(exercise_type).scores)
            .arg(token)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(score.is_some())
    }

    async fn tracked_tokens(&self, exercise_type: ExerciseType) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let keys = self.keys(exercise_type);

        let mut pipe = redis::pipe();
        pipe.cmd("LRANGE").arg(&keys.queue).arg(0).arg(-1);
        pipe.cmd("ZRANGE").arg(&keys.scores).arg(0).arg(-1);
        pipe.cmd("HKEYS").arg(&keys.info);
        let (queue, scores, info): (Vec<String>, Vec<String>, Vec<String>) = pipe
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        let tokens: BTreeSet<String> = queue.into_iter().chain(scores).chain(info).collect();
        Ok(tokens.into_iter().collect())
    }

    async fn pool_size(&self, exercise_type: ExerciseType) -> Result<usize> {
        let mut conn = self.connection.clone();
        let size: usize = redis::cmd("HLEN")
            .arg(&self.keys(exercise_type).info)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(size)
    }
}
