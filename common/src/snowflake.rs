//! Distributed unique ID generation.
//!
//! IDs are 64-bit: 1 sign bit (always 0), 41 bits of milliseconds since the
//! platform epoch, 10 bits of worker id and 12 bits of per-millisecond
//! sequence. Within one worker the output is strictly increasing, which
//! keeps primary-key inserts append-mostly.

use std::env;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// 2023-01-01T00:00:00Z in milliseconds.
pub const EPOCH_MS: i64 = 1_672_531_200_000;

pub const WORKER_ID_BITS: u8 = 10;
pub const SEQUENCE_BITS: u8 = 12;
pub const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
pub const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_ID_SHIFT: u8 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u8 = SEQUENCE_BITS + WORKER_ID_BITS;

#[derive(Debug, thiserror::Error)]
pub enum SnowflakeError {
    #[error("worker id must be between 0 and {MAX_WORKER_ID}, got {0}")]
    InvalidWorkerId(i64),
    #[error("clock moved backwards by {0}ms, refusing to generate id")]
    ClockRegression(i64),
    #[error("invalid SNOWFLAKE_WORKER_ID: {0}")]
    InvalidEnv(String),
}

#[derive(Debug, Default)]
struct State {
    last_timestamp: i64,
    sequence: i64,
}

#[derive(Debug)]
pub struct Generator {
    worker_id: i64,
    state: Mutex<State>,
}

impl Generator {
    pub fn new(worker_id: i64) -> Result<Self, SnowflakeError> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(SnowflakeError::InvalidWorkerId(worker_id));
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(State::default()),
        })
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    pub fn next(&self) -> Result<i64, SnowflakeError> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut timestamp = current_millis();
        if timestamp < state.last_timestamp {
            return Err(SnowflakeError::ClockRegression(
                state.last_timestamp - timestamp,
            ));
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // sequence rollover: spin into the next millisecond
                timestamp = wait_next_millis(state.last_timestamp);
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = timestamp;
        Ok(compose(timestamp, self.worker_id, state.sequence))
    }
}

pub fn compose(timestamp_ms: i64, worker_id: i64, sequence: i64) -> i64 {
    ((timestamp_ms - EPOCH_MS) << TIMESTAMP_SHIFT) | (worker_id << WORKER_ID_SHIFT) | sequence
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub timestamp_ms: i64,
    pub worker_id: i64,
    pub sequence: i64,
}

pub fn parse(id: i64) -> IdParts {
    IdParts {
        timestamp_ms: (id >> TIMESTAMP_SHIFT) + EPOCH_MS,
        worker_id: (id >> WORKER_ID_SHIFT) & MAX_WORKER_ID,
        sequence: id & MAX_SEQUENCE,
    }
}

fn current_millis() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

fn wait_next_millis(last_timestamp: i64) -> i64 {
    let mut timestamp = current_millis();
    while timestamp <= last_timestamp {
        std::hint::spin_loop();
        timestamp = current_millis();
    }
    timestamp
}

#[derive(Debug, Clone)]
pub struct Config {
    pub worker_id: i64,
}

impl Config {
    /// Resolves the worker id from the environment: `SNOWFLAKE_WORKER_ID`
    /// wins, otherwise the trailing ordinal of `HOSTNAME`/`POD_NAME`
    /// (StatefulSet naming), otherwise worker 0.
    pub fn from_env() -> Result<Self, SnowflakeError> {
        if let Ok(raw) = env::var("SNOWFLAKE_WORKER_ID") {
            let worker_id = raw
                .parse::<i64>()
                .map_err(|_| SnowflakeError::InvalidEnv(raw.clone()))?;
            if !(0..=MAX_WORKER_ID).contains(&worker_id) {
                return Err(SnowflakeError::InvalidWorkerId(worker_id));
            }
            return Ok(Self { worker_id });
        }

        let hostname = env::var("HOSTNAME")
            .or_else(|_| env::var("POD_NAME"))
            .unwrap_or_default();
        if let Some(worker_id) = ordinal_from_host(&hostname) {
            return Ok(Self { worker_id });
        }

        tracing::warn!("no worker id configuration found, defaulting to 0");
        Ok(Self { worker_id: 0 })
    }

    pub fn build(&self) -> Result<Generator, SnowflakeError> {
        Generator::new(self.worker_id)
    }
}

fn ordinal_from_host(hostname: &str) -> Option<i64> {
    let (_, ordinal) = hostname.rsplit_once('-')?;
    ordinal
        .parse::<i64>()
        .ok()
        .filter(|v| (0..=MAX_WORKER_ID).contains(v))
}
