use platform_common::inventory::{stock_key, Inventory, InventoryError};

use crate::contracts::commerce::v1 as proto;

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("kv unavailable: {0}")]
    Unavailable(String),
}

impl From<StockError> for tonic::Status {
    fn from(err: StockError) -> Self {
        match &err {
            StockError::InvalidArgument(_) => tonic::Status::invalid_argument(err.to_string()),
            StockError::Unavailable(_) => tonic::Status::unavailable(err.to_string()),
        }
    }
}

/// Stock deduction behind the gRPC surface. Resource failures come back as
/// `(success=false, message)` so callers can branch without parsing codes;
/// only malformed requests and a down KV store raise errors.
pub struct DecrStockLogic<I> {
    inventory: I,
}

impl<I: Inventory> DecrStockLogic<I> {
    pub fn new(inventory: I) -> Self {
        Self { inventory }
    }

    pub async fn decr_stock(
        &self,
        req: &proto::DecrStockRequest,
    ) -> Result<proto::DecrStockResponse, StockError> {
        if req.course_id <= 0 {
            return Err(StockError::InvalidArgument(format!(
                "invalid course_id: {}",
                req.course_id
            )));
        }
        if req.num <= 0 {
            return Err(StockError::InvalidArgument(
                "num must be greater than 0".to_string(),
            ));
        }

        let key = stock_key(req.course_id);
        match self.inventory.decr(&key, req.num).await {
            Ok(remaining) => {
                tracing::info!(course_id = req.course_id, num = req.num, ?remaining, "stock deducted");
                Ok(proto::DecrStockResponse {
                    success: true,
                    message: "stock deducted".to_string(),
                })
            }
            Err(err @ InventoryError::StockKeyMissing)
            | Err(err @ InventoryError::StockInsufficient)
            | Err(err @ InventoryError::AlreadyPurchased) => {
                tracing::warn!(course_id = req.course_id, num = req.num, error = %err, "stock deduction refused");
                Ok(proto::DecrStockResponse {
                    success: false,
                    message: err.to_string(),
                })
            }
            Err(err) => {
                tracing::error!(course_id = req.course_id, error = %err, "stock deduction failed");
                Err(StockError::Unavailable(err.to_string()))
            }
        }
    }
}
