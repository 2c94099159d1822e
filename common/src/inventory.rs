//! Atomic inventory primitives on the KV store.
//!
//! Stock is held as plain integers and every mutation runs as a server-side
//! script, so existence, capacity and idempotency checks are indivisible
//! with respect to other clients. Callers must never re-read and compare
//! after a script returns: a concurrent deduction may have intervened.

use redis::aio::ConnectionManager;
use redis::{Client, Script, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Success is the new stock integer; failures raise stable `ERR_*` tokens
/// which the client maps onto [`InventoryError`].
const DECR_STOCK_SCRIPT: &str = r#"
local stock = redis.call('GET', KEYS[1])
if stock == false then
    return redis.error_reply('ERR_KEY_MISSING')
end
if tonumber(stock) < tonumber(ARGV[1]) then
    return redis.error_reply('ERR_INSUFFICIENT')
end
return redis.call('DECRBY', KEYS[1], ARGV[1])
"#;

const DECR_STOCK_WITH_USER_SCRIPT: &str = r#"
if redis.call('SISMEMBER', KEYS[2], ARGV[2]) == 1 then
    return redis.error_reply('ERR_ALREADY_PURCHASED')
end
local stock = redis.call('GET', KEYS[1])
if stock == false then
    return redis.error_reply('ERR_KEY_MISSING')
end
if tonumber(stock) < tonumber(ARGV[1]) then
    return redis.error_reply('ERR_INSUFFICIENT')
end
local left = redis.call('DECRBY', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
return left
"#;

const SET_IF_ABSENT_TTL_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.error_reply('ERR_KEY_EXISTS')
end
redis.call('SETEX', KEYS[1], ARGV[2], ARGV[1])
return 1
"#;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("stock key missing")]
    StockKeyMissing,
    #[error("insufficient stock")]
    StockInsufficient,
    #[error("user already purchased")]
    AlreadyPurchased,
    #[error("key already exists")]
    KeyExists,
    #[error("unexpected script reply: {0}")]
    ScriptFormat(String),
    #[error("kv: {0}")]
    Kv(redis::RedisError),
}

/// The deduction surface consumed by services and the message consumer.
///
/// `decr` returns the remaining stock, or `None` when the server answered
/// in the legacy status form that omits the new value.
pub trait Inventory: Send + Sync {
    fn decr(
        &self,
        key: &str,
        qty: i64,
    ) -> impl Future<Output = Result<Option<i64>, InventoryError>> + Send;

    fn decr_with_user(
        &self,
        stock_key: &str,
        user_set_key: &str,
        qty: i64,
        user_id: i64,
    ) -> impl Future<Output = Result<Option<i64>, InventoryError>> + Send;

    fn set_if_absent_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), InventoryError>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), InventoryError>> + Send;
}

impl<I: Inventory> Inventory for Arc<I> {
    async fn decr(&self, key: &str, qty: i64) -> Result<Option<i64>, InventoryError> {
        (**self).decr(key, qty).await
    }

    async fn decr_with_user(
        &self,
        stock_key: &str,
        user_set_key: &str,
        qty: i64,
        user_id: i64,
    ) -> Result<Option<i64>, InventoryError> {
        (**self)
            .decr_with_user(stock_key, user_set_key, qty, user_id)
            .await
    }

    async fn set_if_absent_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), InventoryError> {
        (**self).set_if_absent_ttl(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<(), InventoryError> {
        (**self).remove(key).await
    }
}

pub fn stock_key(course_id: i64) -> String {
    format!("promotion:stock:{course_id}")
}

pub fn purchased_key(course_id: i64) -> String {
    format!("promotion:purchased:{course_id}")
}

pub fn order_lock_key(order_id: i64) -> String {
    format!("trade:lock:{order_id}")
}

pub fn course_lock_key(order_id: i64, course_id: i64) -> String {
    format!("trade:lock:{order_id}:{course_id}")
}

pub fn user_session_key(user_id: i64) -> String {
    format!("user:session:{user_id}")
}

pub fn rate_limit_key(action: &str, user_id: i64) -> String {
    format!("ratelimit:{action}:{user_id}")
}

/// Redis-backed implementation; the canonical one.
#[derive(Clone)]
pub struct RedisInventory {
    conn: ConnectionManager,
    decr_stock: Script,
    decr_stock_with_user: Script,
    set_if_absent: Script,
}

impl RedisInventory {
    pub async fn connect(redis_url: &str) -> Result<Self, InventoryError> {
        let client = Client::open(redis_url).map_err(InventoryError::Kv)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(InventoryError::Kv)?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            decr_stock: Script::new(DECR_STOCK_SCRIPT),
            decr_stock_with_user: Script::new(DECR_STOCK_WITH_USER_SCRIPT),
            set_if_absent: Script::new(SET_IF_ABSENT_TTL_SCRIPT),
        }
    }
}

impl Inventory for RedisInventory {
    async fn decr(&self, key: &str, qty: i64) -> Result<Option<i64>, InventoryError> {
        let mut conn = self.conn.clone();
        let reply: Value = self
            .decr_stock
            .key(key)
            .arg(qty)
            .invoke_async(&mut conn)
            .await
            .map_err(classify_error)?;
        stock_from_reply(reply)
    }

    async fn decr_with_user(
        &self,
        stock_key: &str,
        user_set_key: &str,
        qty: i64,
        user_id: i64,
    ) -> Result<Option<i64>, InventoryError> {
        let mut conn = self.conn.clone();
        let reply: Value = self
            .decr_stock_with_user
            .key(stock_key)
            .key(user_set_key)
            .arg(qty)
            .arg(user_id)
            .invoke_async(&mut conn)
            .await
            .map_err(classify_error)?;
        stock_from_reply(reply)
    }

    async fn set_if_absent_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), InventoryError> {
        let mut conn = self.conn.clone();
        let _: Value = self
            .set_if_absent
            .key(key)
            .arg(value)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(classify_error)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), InventoryError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(InventoryError::Kv)?;
        Ok(())
    }
}

fn classify_error(err: redis::RedisError) -> InventoryError {
    let message = err.to_string();
    match token_from_message(&message) {
        Some(mapped) => mapped,
        None => InventoryError::Kv(err),
    }
}

fn token_from_message(message: &str) -> Option<InventoryError> {
    if message.contains("ERR_KEY_MISSING") {
        Some(InventoryError::StockKeyMissing)
    } else if message.contains("ERR_INSUFFICIENT") {
        Some(InventoryError::StockInsufficient)
    } else if message.contains("ERR_ALREADY_PURCHASED") {
        Some(InventoryError::AlreadyPurchased)
    } else if message.contains("ERR_KEY_EXISTS") {
        Some(InventoryError::KeyExists)
    } else {
        None
    }
}

/// Integer replies carry the new stock. Older script revisions answered a
/// status table, which the server collapses to a status string or an empty
/// array; those still mean success, just without the value.
fn stock_from_reply(reply: Value) -> Result<Option<i64>, InventoryError> {
    match reply {
        Value::Int(remaining) => Ok(Some(remaining)),
        Value::Okay => Ok(None),
        Value::SimpleString(_) => Ok(None),
        Value::Array(items) if items.is_empty() => Ok(None),
        other => Err(InventoryError::ScriptFormat(format!("{other:?}"))),
    }
}

/// In-memory implementation used by tests and local tooling. One mutex over
/// the whole state gives the same indivisibility the scripts do.
#[derive(Default)]
pub struct MemoryInventory {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    stocks: HashMap<String, i64>,
    sets: HashMap<String, HashSet<i64>>,
    tokens: HashMap<String, String>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stock(&self, key: &str, value: i64) {
        self.lock().stocks.insert(key.to_string(), value);
    }

    pub fn stock(&self, key: &str) -> Option<i64> {
        self.lock().stocks.get(key).copied()
    }

    pub fn has_token(&self, key: &str) -> bool {
        self.lock().tokens.contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Inventory for MemoryInventory {
    async fn decr(&self, key: &str, qty: i64) -> Result<Option<i64>, InventoryError> {
        let mut state = self.lock();
        let stock = state
            .stocks
            .get_mut(key)
            .ok_or(InventoryError::StockKeyMissing)?;
        if *stock < qty {
            return Err(InventoryError::StockInsufficient);
        }
        *stock -= qty;
        Ok(Some(*stock))
    }

    async fn decr_with_user(
        &self,
        stock_key: &str,
        user_set_key: &str,
        qty: i64,
        user_id: i64,
    ) -> Result<Option<i64>, InventoryError> {
        let mut state = self.lock();
        if state
            .sets
            .get(user_set_key)
            .is_some_and(|set| set.contains(&user_id))
        {
            return Err(InventoryError::AlreadyPurchased);
        }
        let stock = state
            .stocks
            .get_mut(stock_key)
            .ok_or(InventoryError::StockKeyMissing)?;
        if *stock < qty {
            return Err(InventoryError::StockInsufficient);
        }
        *stock -= qty;
        let remaining = *stock;
        state
            .sets
            .entry(user_set_key.to_string())
            .or_default()
            .insert(user_id);
        Ok(Some(remaining))
    }

    async fn set_if_absent_ttl(
        &self,
        key: &str,
        value: &str,
        _ttl: Duration,
    ) -> Result<(), InventoryError> {
        let mut state = self.lock();
        if state.tokens.contains_key(key) {
            return Err(InventoryError::KeyExists);
        }
        state.tokens.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), InventoryError> {
        self.lock().tokens.remove(key);
        Ok(())
    }
}
