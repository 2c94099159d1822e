//! Two-phase transactional send.
//!
//! `send` persists a half-message, runs the caller's local transaction and
//! only then makes the message visible by publishing it. The local
//! transaction and the check-back must key the same decision off the
//! message body alone; the producer never inspects it. `resolve_pending`
//! is the broker-initiated check-back: it sweeps half-messages that were
//! left unresolved (crash, timeout, panic) and settles them against the
//! caller's read-only probe.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::halfmsg::{HalfMessage, HalfStore, HalfStoreError, TxnOutcome};
use crate::now_millis;

/// Runs the local side effect after the half-message is accepted, and
/// answers check-backs for messages whose fate was never reported.
///
/// `execute` must be idempotent: a retry of an unresolved send must not
/// duplicate its side effect. `check` must be pure: it only inspects
/// state and reports.
pub trait LocalTxn: Send + Sync {
    fn execute(&self, msg: &HalfMessage) -> impl Future<Output = TxnOutcome> + Send;
    fn check(&self, msg: &HalfMessage) -> impl Future<Output = TxnOutcome> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("broker: {0}")]
    Broker(String),
}

/// Commit-side delivery. Implementations are thread-safe; one instance is
/// shared by every in-flight send.
pub trait MessageSink: Send + Sync {
    fn publish(&self, msg: &HalfMessage) -> Result<(), SinkError>;
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Broker addresses, comma or semicolon separated.
    pub name_server: String,
    pub group: String,
    pub topic: String,
    pub retry_times: u32,
    pub send_timeout_ms: u64,
    /// How long a half-message may stay unresolved before check-back.
    pub check_delay_ms: i64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            name_server: "localhost:9092".to_string(),
            group: "trade-order-producer".to_string(),
            topic: "trade-order".to_string(),
            retry_times: 2,
            send_timeout_ms: 3_000,
            check_delay_ms: 3_000,
        }
    }
}

pub fn parse_name_servers(raw: &str) -> Vec<String> {
    let separator = if raw.contains(';') { ';' } else { ',' };
    raw.split(separator)
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The local transaction committed and the message is visible.
    Committed,
    /// The local transaction failed; the half-message was discarded.
    RolledBack,
    /// Fate undecided; the check-back sweep owns convergence.
    Unresolved,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub committed: usize,
    pub rolled_back: usize,
    pub unresolved: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("half-message store: {0}")]
    Store(#[from] HalfStoreError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub struct TransactionalProducer<L, S> {
    cfg: ProducerConfig,
    store: HalfStore,
    listener: L,
    sink: S,
}

impl<L: LocalTxn, S: MessageSink> TransactionalProducer<L, S> {
    pub fn new(cfg: ProducerConfig, store: HalfStore, listener: L, sink: S) -> Self {
        Self {
            cfg,
            store,
            listener,
            sink,
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.cfg
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn half_store(&self) -> &HalfStore {
        &self.store
    }

    pub async fn send(&self, mut msg: HalfMessage) -> Result<SendStatus, ProducerError> {
        if msg.topic.is_empty() {
            msg.topic = self.cfg.topic.clone();
        }

        // accept: durable but invisible until commit
        let id = self.store.enqueue(&msg)?;

        let outcome = guarded(self.listener.execute(&msg)).await;
        match outcome {
            TxnOutcome::Commit => match self.publish_with_retry(&msg).await {
                Ok(()) => {
                    self.store.resolve(id, TxnOutcome::Commit)?;
                    Ok(SendStatus::Committed)
                }
                Err(err) => {
                    tracing::warn!(
                        key = %msg.key,
                        error = %err,
                        "publish failed after commit, leaving for check-back"
                    );
                    Ok(SendStatus::Unresolved)
                }
            },
            TxnOutcome::Rollback => {
                self.store.resolve(id, TxnOutcome::Rollback)?;
                Ok(SendStatus::RolledBack)
            }
            TxnOutcome::Unknown => {
                tracing::warn!(key = %msg.key, "local transaction unresolved");
                Ok(SendStatus::Unresolved)
            }
        }
    }

    /// Settles every half-message older than the configured delay. Messages
    /// the check-back still cannot decide stay pending for the next sweep;
    /// repeated sweeps converge because the probe is keyed on durable state.
    pub async fn resolve_pending(&self) -> Result<SweepStats, ProducerError> {
        let now = now_millis();
        let mut stats = SweepStats::default();

        for pending in self.store.pending()? {
            if now - pending.enqueued_at_ms < self.cfg.check_delay_ms {
                continue;
            }
            match guarded(self.listener.check(&pending.msg)).await {
                TxnOutcome::Commit => {
                    self.publish_with_retry(&pending.msg).await?;
                    self.store.resolve(pending.id, TxnOutcome::Commit)?;
                    stats.committed += 1;
                }
                TxnOutcome::Rollback => {
                    self.store.resolve(pending.id, TxnOutcome::Rollback)?;
                    stats.rolled_back += 1;
                }
                TxnOutcome::Unknown => {
                    tracing::warn!(key = %pending.msg.key, "check-back still unresolved");
                    stats.unresolved += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn publish_with_retry(&self, msg: &HalfMessage) -> Result<(), SinkError> {
        let mut attempts = 0;
        loop {
            match self.sink.publish(msg) {
                Ok(()) => return Ok(()),
                Err(_) if attempts < self.cfg.retry_times => {
                    attempts += 1;
                    let backoff = 2_u64.saturating_pow(attempts).min(64);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A panicking executor is indistinguishable from a crashed process, so it
/// resolves the same way: unknown now, check-back later.
async fn guarded<F: Future<Output = TxnOutcome>>(fut: F) -> TxnOutcome {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!("transaction callback panicked, treating as unknown");
            TxnOutcome::Unknown
        }
    }
}
