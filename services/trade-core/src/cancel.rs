use std::sync::Arc;

use crate::contracts::commerce::v1 as proto;
use crate::error::TradeError;
use crate::model::OrderStatus;
use crate::store::OrderStore;

/// Cancellation: ownership check, PendingPayment guard, version-guarded
/// transition to Closed. `ConcurrentModification` is surfaced verbatim so
/// the caller can re-read and retry.
pub struct CancelOrderLogic<S> {
    store: Arc<S>,
}

impl<S: OrderStore> CancelOrderLogic<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn cancel_order(
        &self,
        req: &proto::CancelOrderRequest,
    ) -> Result<proto::CancelOrderResponse, TradeError> {
        if req.user_id <= 0 {
            return Err(TradeError::InvalidArgument(format!(
                "invalid user_id: {}",
                req.user_id
            )));
        }
        if req.order_id <= 0 {
            return Err(TradeError::InvalidArgument(format!(
                "invalid order_id: {}",
                req.order_id
            )));
        }

        let order = self.store.get_by_id(req.order_id).await?;

        // reveal nothing about the real owner
        if order.user_id != req.user_id {
            tracing::warn!(
                order_id = req.order_id,
                user_id = req.user_id,
                "cancel denied: ownership mismatch"
            );
            return Err(TradeError::Forbidden);
        }

        if order.status != OrderStatus::PendingPayment {
            return Err(TradeError::CannotCancel(order.status));
        }

        self.store
            .update_status(
                order.id,
                OrderStatus::PendingPayment,
                OrderStatus::Closed,
                order.version,
            )
            .await?;

        tracing::info!(order_id = order.id, user_id = req.user_id, "order canceled");
        Ok(proto::CancelOrderResponse {
            order_id: order.id,
            status: i32::from(OrderStatus::Closed.as_i16()),
            success: true,
        })
    }
}
