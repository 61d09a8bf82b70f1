//! Redis-backed [`SharedStateStore`] for multi-process deployments.
//!
//! Key layout, per session (the `{...}` hash tag keeps a session's keys
//! on one cluster slot so scripts can touch all of them):
//!
//! ```text
//! {prefix}:{<session>}:players      hash  user id → display name
//! {prefix}:{<session>}:channels     hash  channel → user id
//! {prefix}:{<session>}:roles        hash  user id → X | O | Spectator
//! {prefix}:{<session>}:rematch      string, JSON RematchOffer
//! {prefix}:{<session>}:session_key  string
//! ```
//!
//! Every operation that reads before it writes runs as one Lua script,
//! so it's atomic against every other client of the same Redis.
//!
//! Retained sessions are left to Redis key expiry (`PEXPIRE`);
//! registering a channel `PERSIST`s the session's keys again.

use std::collections::HashMap;
use std::time::Duration;

use lobbyforge_protocol::{ChannelName, Mark, Role, SessionId, UserId};
use redis::Script;
use redis::aio::MultiplexedConnection;

use crate::{
    Departure, PlayerRecord, RematchOffer, SharedStateStore, StoreError,
    generate_session_key,
};

const ASSIGN_ROLE: &str = r"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing then return existing end
local has_x, has_o = false, false
for _, role in ipairs(redis.call('HVALS', KEYS[1])) do
  if role == 'X' then has_x = true elseif role == 'O' then has_o = true end
end
local role = 'Spectator'
if not has_x then role = 'X' elseif not has_o then role = 'O' end
redis.call('HSET', KEYS[1], ARGV[1], role)
return role
";

// ARGV: user id, seat role. Demotes any other holder of the seat.
const SEAT_ROLE: &str = r"
local roles = redis.call('HGETALL', KEYS[1])
for i = 1, #roles, 2 do
  if roles[i + 1] == ARGV[2] and roles[i] ~= ARGV[1] then
    redis.call('HSET', KEYS[1], roles[i], 'Spectator')
  end
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
";

// ARGV[1]: receiver user id, digits only. serde_json writes the field
// as `"receiver_user_id":<id>` followed by `,` or `}`; matching the text
// keeps u64 ids exact where cjson would round them to doubles.
const POP_OFFER: &str = r#"
local offer = redis.call('GET', KEYS[1])
if not offer then return false end
if not string.find(offer, '"receiver_user_id":' .. ARGV[1] .. '[,}]') then
  return false
end
redis.call('DEL', KEYS[1])
return offer
"#;

const ENSURE_KEY: &str = r"
local key = redis.call('GET', KEYS[1])
if key then return key end
redis.call('SET', KEYS[1], ARGV[1])
return ARGV[1]
";

// KEYS: channels, players, roles. ARGV: channel, retain flag.
// Returns {owner or '', player_removed, remaining_channels}.
const RELEASE_CHANNEL: &str = r"
local owner = redis.call('HGET', KEYS[1], ARGV[1])
if not owner then return {'', 0, redis.call('HLEN', KEYS[1])} end
redis.call('HDEL', KEYS[1], ARGV[1])
local removed = 0
if ARGV[2] == '0' then
  local others = 0
  for _, user in ipairs(redis.call('HVALS', KEYS[1])) do
    if user == owner then others = others + 1 end
  end
  if others == 0 then
    redis.call('HDEL', KEYS[2], owner)
    redis.call('HDEL', KEYS[3], owner)
    removed = 1
  end
end
return {owner, removed, redis.call('HLEN', KEYS[1])}
";

// KEYS[1] must be the channel hash. ARGV[1]: ttl in milliseconds.
const RETAIN_IF_IDLE: &str = r"
if redis.call('HLEN', KEYS[1]) > 0 then return 0 end
for _, key in ipairs(KEYS) do
  redis.call('PEXPIRE', key, ARGV[1])
end
return 1
";

// KEYS[1] must be the channel hash; the rest are deleted with it.
const CLEAR_IF_IDLE: &str = r"
if redis.call('HLEN', KEYS[1]) > 0 then return 0 end
redis.call('DEL', unpack(KEYS))
return 1
";

/// Keys of one session.
struct SessionKeys {
    players: String,
    channels: String,
    roles: String,
    rematch: String,
    session_key: String,
}

impl SessionKeys {
    fn new(prefix: &str, session: &SessionId) -> Self {
        let base = format!("{prefix}:{{{session}}}");
        Self {
            players: format!("{base}:players"),
            channels: format!("{base}:channels"),
            roles: format!("{base}:roles"),
            rematch: format!("{base}:rematch"),
            session_key: format!("{base}:session_key"),
        }
    }

    /// Every key, channel hash first.
    fn all(&self) -> [&str; 5] {
        [
            &self.channels,
            &self.players,
            &self.roles,
            &self.rematch,
            &self.session_key,
        ]
    }
}

/// A [`SharedStateStore`] on a shared Redis instance.
pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
    assign_role: Script,
    seat_role: Script,
    pop_offer: Script,
    ensure_key: Script,
    release_channel: Script,
    retain_if_idle: Script,
    clear_if_idle: Script,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1/`). Keys are namespaced
    /// under `prefix`.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        tracing::info!(prefix, "connected to redis shared state");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            assign_role: Script::new(ASSIGN_ROLE),
            seat_role: Script::new(SEAT_ROLE),
            pop_offer: Script::new(POP_OFFER),
            ensure_key: Script::new(ENSURE_KEY),
            release_channel: Script::new(RELEASE_CHANNEL),
            retain_if_idle: Script::new(RETAIN_IF_IDLE),
            clear_if_idle: Script::new(CLEAR_IF_IDLE),
        })
    }

    fn keys(&self, session: &SessionId) -> SessionKeys {
        SessionKeys::new(&self.prefix, session)
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

fn parse_user(raw: &str) -> Result<UserId, StoreError> {
    raw.parse()
        .map(UserId)
        .map_err(|_| StoreError::Corrupt(format!("bad user id `{raw}`")))
}

fn parse_role(raw: &str) -> Result<Role, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

impl SharedStateStore for RedisStore {
    async fn add_player(
        &self,
        session: &SessionId,
        user: UserId,
        display_name: &str,
    ) -> Result<(), StoreError> {
        redis::cmd("HSET")
            .arg(&self.keys(session).players)
            .arg(user.0)
            .arg(display_name)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn remove_player(&self, session: &SessionId, user: UserId) -> Result<(), StoreError> {
        let keys = self.keys(session);
        redis::pipe()
            .atomic()
            .cmd("HDEL")
            .arg(&keys.players)
            .arg(user.0)
            .ignore()
            .cmd("HDEL")
            .arg(&keys.roles)
            .arg(user.0)
            .ignore()
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn players(&self, session: &SessionId) -> Result<Vec<PlayerRecord>, StoreError> {
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&self.keys(session).players)
            .query_async(&mut self.conn())
            .await?;
        raw.into_iter()
            .map(|(user, display_name)| {
                Ok(PlayerRecord {
                    user_id: parse_user(&user)?,
                    display_name,
                })
            })
            .collect()
    }

    async fn add_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
        user: UserId,
    ) -> Result<(), StoreError> {
        // A live channel cancels any pending expiry of the session.
        let keys = self.keys(session);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(&keys.channels)
            .arg(channel.as_str())
            .arg(user.0)
            .ignore();
        for key in keys.all() {
            pipe.cmd("PERSIST").arg(key).ignore();
        }
        pipe.query_async::<_, ()>(&mut self.conn()).await?;
        Ok(())
    }

    async fn remove_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
    ) -> Result<Option<UserId>, StoreError> {
        // HGET + HDEL in one MULTI so the owner we report is the one we removed.
        let (owner, _): (Option<String>, i64) = redis::pipe()
            .atomic()
            .cmd("HGET")
            .arg(&self.keys(session).channels)
            .arg(channel.as_str())
            .cmd("HDEL")
            .arg(&self.keys(session).channels)
            .arg(channel.as_str())
            .query_async(&mut self.conn())
            .await?;
        owner.as_deref().map(parse_user).transpose()
    }

    async fn channels(
        &self,
        session: &SessionId,
    ) -> Result<Vec<(ChannelName, UserId)>, StoreError> {
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&self.keys(session).channels)
            .query_async(&mut self.conn())
            .await?;
        raw.into_iter()
            .map(|(channel, user)| Ok((ChannelName::from_raw(channel), parse_user(&user)?)))
            .collect()
    }

    async fn has_any_channels(&self, session: &SessionId) -> Result<bool, StoreError> {
        let len: u64 = redis::cmd("HLEN")
            .arg(&self.keys(session).channels)
            .query_async(&mut self.conn())
            .await?;
        Ok(len > 0)
    }

    async fn release_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
        retain_player: bool,
    ) -> Result<Departure, StoreError> {
        let keys = self.keys(session);
        let (owner, removed, remaining): (String, i64, i64) = self
            .release_channel
            .key(&keys.channels)
            .key(&keys.players)
            .key(&keys.roles)
            .arg(channel.as_str())
            .arg(if retain_player { "1" } else { "0" })
            .invoke_async(&mut self.conn())
            .await?;

        let user_id = if owner.is_empty() {
            None
        } else {
            Some(parse_user(&owner)?)
        };
        Ok(Departure {
            user_id,
            player_removed: removed == 1,
            remaining_channels: usize::try_from(remaining).unwrap_or_default(),
        })
    }

    async fn assign_role(&self, session: &SessionId, user: UserId) -> Result<Role, StoreError> {
        let raw: String = self
            .assign_role
            .key(&self.keys(session).roles)
            .arg(user.0)
            .invoke_async(&mut self.conn())
            .await?;
        parse_role(&raw)
    }

    async fn seat_role(
        &self,
        session: &SessionId,
        user: UserId,
        mark: Mark,
    ) -> Result<(), StoreError> {
        let _: i64 = self
            .seat_role
            .key(&self.keys(session).roles)
            .arg(user.0)
            .arg(Role::from(mark).as_str())
            .invoke_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn role_of(&self, session: &SessionId, user: UserId) -> Result<Option<Role>, StoreError> {
        let raw: Option<String> = redis::cmd("HGET")
            .arg(&self.keys(session).roles)
            .arg(user.0)
            .query_async(&mut self.conn())
            .await?;
        raw.as_deref().map(parse_role).transpose()
    }

    async fn roles(&self, session: &SessionId) -> Result<HashMap<UserId, Role>, StoreError> {
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&self.keys(session).roles)
            .query_async(&mut self.conn())
            .await?;
        raw.iter()
            .map(|(user, role)| Ok((parse_user(user)?, parse_role(role)?)))
            .collect()
    }

    async fn store_rematch_offer(
        &self,
        session: &SessionId,
        offer: &RematchOffer,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(offer)?;
        redis::cmd("SET")
            .arg(&self.keys(session).rematch)
            .arg(payload)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn rematch_offer(&self, session: &SessionId) -> Result<Option<RematchOffer>, StoreError> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(&self.keys(session).rematch)
            .query_async(&mut self.conn())
            .await?;
        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn pop_rematch_offer(
        &self,
        session: &SessionId,
        receiver: UserId,
    ) -> Result<Option<RematchOffer>, StoreError> {
        let raw: Option<String> = self
            .pop_offer
            .key(&self.keys(session).rematch)
            .arg(receiver.0)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn clear_rematch_offer(&self, session: &SessionId) -> Result<(), StoreError> {
        redis::cmd("DEL")
            .arg(&self.keys(session).rematch)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn ensure_session_key(&self, session: &SessionId) -> Result<String, StoreError> {
        let candidate = generate_session_key();
        let key: String = self
            .ensure_key
            .key(&self.keys(session).session_key)
            .arg(candidate)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(key)
    }

    async fn session_key(&self, session: &SessionId) -> Result<Option<String>, StoreError> {
        let key: Option<String> = redis::cmd("GET")
            .arg(&self.keys(session).session_key)
            .query_async(&mut self.conn())
            .await?;
        Ok(key)
    }

    async fn clear_all(&self, session: &SessionId) -> Result<(), StoreError> {
        redis::cmd("DEL")
            .arg(&self.keys(session).all()[..])
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn retain_if_idle(&self, session: &SessionId, ttl: Duration) -> Result<bool, StoreError> {
        let keys = self.keys(session);
        let mut invocation = self.retain_if_idle.prepare_invoke();
        for key in keys.all() {
            invocation.key(key);
        }
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        invocation.arg(ttl_ms);
        let idle: i64 = invocation.invoke_async(&mut self.conn()).await?;
        Ok(idle == 1)
    }

    async fn clear_if_idle(&self, session: &SessionId) -> Result<bool, StoreError> {
        let keys = self.keys(session);
        let mut invocation = self.clear_if_idle.prepare_invoke();
        for key in keys.all() {
            invocation.key(key);
        }
        let cleared: i64 = invocation.invoke_async(&mut self.conn()).await?;
        Ok(cleared == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_keys_share_hash_tag() {
        let keys = SessionKeys::new("lf", &SessionId::from("42"));
        assert_eq!(keys.players, "lf:{42}:players");
        assert_eq!(keys.channels, "lf:{42}:channels");
        assert_eq!(keys.all()[0], "lf:{42}:channels");
        assert!(keys.all().iter().all(|k| k.contains("{42}")));
    }

    #[test]
    fn test_offer_json_has_matchable_receiver_field() {
        let offer = RematchOffer {
            requested_by_role: Mark::O,
            requester_user_id: UserId(2),
            receiver_user_id: UserId(u64::MAX),
            created_at: 9,
        };
        let json = serde_json::to_string(&offer).unwrap();
        let field = format!("\"receiver_user_id\":{}", u64::MAX);
        let at = json.find(&field).expect("receiver field written verbatim");
        assert!(matches!(json.as_bytes()[at + field.len()], b',' | b'}'));
    }

    #[test]
    fn test_parse_user_rejects_garbage() {
        assert_eq!(parse_user("7").unwrap(), UserId(7));
        assert!(matches!(parse_user("x"), Err(StoreError::Corrupt(_))));
    }
}
