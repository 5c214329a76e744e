use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use tracing::info;

use crate::error::CapacityError;
use crate::store::{CapacityStore, ReserveOutcome};

// KEYS[1] target mode set, KEYS[2] client -> mode key.
// ARGV: client id, capacity, mode name, key prefix.
// Returns 2 when already held, 1 when reserved, 0 when full.
const RESERVE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[2])
if current == ARGV[3] and redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then
  return 2
end
if redis.call('SCARD', KEYS[1]) >= tonumber(ARGV[2]) then
  return 0
end
if current then
  redis.call('SREM', ARGV[4] .. ':mode:' .. current .. ':members', ARGV[1])
end
redis.call('SADD', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[3])
return 1
"#;

// KEYS[1] client -> mode key. ARGV: key prefix, client id.
const RELEASE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return false
end
redis.call('SREM', ARGV[1] .. ':mode:' .. current .. ':members', ARGV[2])
redis.call('DEL', KEYS[1])
return current
"#;

/// Store shared by every server process through one Redis instance.
#[derive(Clone)]
pub struct RedisCapacityStore {
    conn: MultiplexedConnection,
    prefix: String,
    reserve: Script,
    release: Script,
}

impl RedisCapacityStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, CapacityError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let prefix = prefix.into();
        info!(prefix = %prefix, "redis capacity store connected");
        Ok(Self {
            conn,
            prefix,
            reserve: Script::new(RESERVE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    fn members_key(&self, mode: &str) -> String {
        format!("{}:mode:{}:members", self.prefix, mode)
    }

    fn client_key(&self, client: &str) -> String {
        format!("{}:client:{}", self.prefix, client)
    }
}

#[async_trait]
impl CapacityStore for RedisCapacityStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn reserve(
        &self,
        mode: &str,
        client: &str,
        capacity: u32,
    ) -> Result<ReserveOutcome, CapacityError> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .reserve
            .key(self.members_key(mode))
            .key(self.client_key(client))
            .arg(client)
            .arg(capacity)
            .arg(mode)
            .arg(&self.prefix)
            .invoke_async(&mut conn)
            .await?;
        match code {
            0 => Ok(ReserveOutcome::Full),
            1 => Ok(ReserveOutcome::Reserved),
            2 => Ok(ReserveOutcome::AlreadyHeld),
            other => Err(CapacityError::UnexpectedReply(format!(
                "reserve script returned {other}"
            ))),
        }
    }

    async fn release(&self, client: &str) -> Result<Option<String>, CapacityError> {
        let mut conn = self.conn.clone();
        let released: Option<String> = self
            .release
            .key(self.client_key(client))
            .arg(&self.prefix)
            .arg(client)
            .invoke_async(&mut conn)
            .await?;
        Ok(released)
    }

    async fn count(&self, mode: &str) -> Result<u64, CapacityError> {
        let mut conn = self.conn.clone();
        let n = redis::cmd("SCARD")
            .arg(self.members_key(mode))
            .query_async::<_, u64>(&mut conn)
            .await?;
        Ok(n)
    }

    async fn mode_of(&self, client: &str) -> Result<Option<String>, CapacityError> {
        let mut conn = self.conn.clone();
        let mode = redis::cmd("GET")
            .arg(self.client_key(client))
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(mode)
    }
}
