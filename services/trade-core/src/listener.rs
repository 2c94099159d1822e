//! Local transaction and check-back behind the transactional producer.
//!
//! Both sides decide from the envelope body alone: `execute` writes the
//! order the body describes, `check` probes whether that order exists.
//! They therefore always agree, keyed on the order id.

use platform_common::halfmsg::{HalfMessage, TxnOutcome};
use platform_common::message::OrderMessage;
use platform_common::txn::LocalTxn;
use std::sync::Arc;

use crate::model::build_order;
use crate::store::{OrderStore, StoreError};

pub struct OrderTxnListener<S> {
    store: Arc<S>,
}

impl<S> OrderTxnListener<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: OrderStore> LocalTxn for OrderTxnListener<S> {
    async fn execute(&self, msg: &HalfMessage) -> TxnOutcome {
        let order_msg: OrderMessage = match serde_json::from_str(&msg.body) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::error!(key = %msg.key, error = %err, "undecodable order message");
                return TxnOutcome::Rollback;
            }
        };
        if order_msg.course_ids.is_empty() || order_msg.real_amount <= 0 {
            tracing::error!(order_id = order_msg.order_id, "malformed order message");
            return TxnOutcome::Rollback;
        }

        let (order, items) = build_order(&order_msg, chrono::Utc::now());
        match self.store.create(&order, &items).await {
            Ok(()) => {
                tracing::info!(order_id = order.id, "order created in local transaction");
                TxnOutcome::Commit
            }
            // a redelivered execution already wrote the row; same decision
            Err(StoreError::DuplicateOrder) => {
                tracing::info!(order_id = order.id, "order already exists, committing");
                TxnOutcome::Commit
            }
            Err(StoreError::Database(err)) => {
                tracing::error!(order_id = order.id, error = %err, "order creation ambiguous");
                TxnOutcome::Unknown
            }
            Err(err) => {
                tracing::error!(order_id = order.id, error = %err, "order creation failed");
                TxnOutcome::Rollback
            }
        }
    }

    async fn check(&self, msg: &HalfMessage) -> TxnOutcome {
        let order_msg: OrderMessage = match serde_json::from_str(&msg.body) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::error!(key = %msg.key, error = %err, "undecodable order message in check-back");
                return TxnOutcome::Rollback;
            }
        };

        match self.store.get_by_id(order_msg.order_id).await {
            Ok(order) => {
                tracing::info!(
                    order_id = order.id,
                    status = order.status.as_i16(),
                    "order found in check-back"
                );
                TxnOutcome::Commit
            }
            Err(StoreError::NotFound(_)) => {
                tracing::info!(order_id = order_msg.order_id, "order absent in check-back");
                TxnOutcome::Rollback
            }
            Err(err) => {
                tracing::warn!(
                    order_id = order_msg.order_id,
                    error = %err,
                    "check-back probe failed"
                );
                TxnOutcome::Unknown
            }
        }
    }
}
