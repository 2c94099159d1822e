use std::time::{SystemTime, UNIX_EPOCH};

pub mod db;
pub mod env;
pub mod halfmsg;
pub mod inventory;
pub mod kafka;
pub mod message;
pub mod snowflake;
pub mod txn;

pub fn now_millis() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
