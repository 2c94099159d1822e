use platform_common::snowflake::SnowflakeError;
use platform_common::txn::ProducerError;
use tonic::Status;

use crate::model::OrderStatus;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("user not found or invalid: {0}")]
    UserInvalid(i64),
    #[error("order does not belong to user")]
    Forbidden,
    #[error("order cannot be canceled: current status is {}", .0.as_i16())]
    CannotCancel(OrderStatus),
    #[error("order persistence failed, message rolled back")]
    PlacementRolledBack,
    #[error("order placement unresolved, awaiting check-back")]
    PlacementUnresolved,
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("id generation: {0}")]
    Id(#[from] SnowflakeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Producer(#[from] ProducerError),
}

impl From<TradeError> for Status {
    fn from(err: TradeError) -> Self {
        match &err {
            TradeError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
            TradeError::UserInvalid(_) => Status::failed_precondition(err.to_string()),
            TradeError::Forbidden => Status::permission_denied(err.to_string()),
            TradeError::CannotCancel(_) => Status::failed_precondition(err.to_string()),
            TradeError::PlacementRolledBack | TradeError::PlacementUnresolved => {
                Status::aborted(err.to_string())
            }
            TradeError::Encode(_) => Status::internal(err.to_string()),
            TradeError::Id(_) => Status::internal(err.to_string()),
            TradeError::Store(StoreError::NotFound(_)) => Status::not_found(err.to_string()),
            TradeError::Store(StoreError::ConcurrentModification { .. }) => {
                Status::aborted(err.to_string())
            }
            TradeError::Store(_) => Status::unavailable(err.to_string()),
            TradeError::Producer(_) => Status::unavailable(err.to_string()),
        }
    }
}
