use platform_common::halfmsg::HalfMessage;
use platform_common::message::{OrderMessage, ORDER_PLACED_TAG};
use platform_common::snowflake::Generator;
use platform_common::txn::{LocalTxn, MessageSink, SendStatus, TransactionalProducer};
use std::future::Future;
use std::sync::Arc;
use tonic::transport::Channel;

use crate::contracts::commerce::v1 as proto;
use crate::contracts::commerce::v1::user_service_client::UserServiceClient;
use crate::error::TradeError;
use crate::model::OrderStatus;

pub const MAX_COURSES: usize = 100;
pub const MAX_COUPONS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: i64,
    pub username: String,
    pub mobile: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("user not found: {0}")]
    NotFound(i64),
    #[error("rpc: {0}")]
    Rpc(String),
}

/// Identity lookups the coordinator depends on.
pub trait UserDirectory: Send + Sync {
    fn get_user(
        &self,
        user_id: i64,
    ) -> impl Future<Output = Result<UserInfo, DirectoryError>> + Send;
}

#[derive(Clone)]
pub struct GrpcUserDirectory {
    client: UserServiceClient<Channel>,
}

impl GrpcUserDirectory {
    pub fn new(client: UserServiceClient<Channel>) -> Self {
        Self { client }
    }
}

impl UserDirectory for GrpcUserDirectory {
    async fn get_user(&self, user_id: i64) -> Result<UserInfo, DirectoryError> {
        let mut client = self.client.clone();
        let response = client
            .get_user(proto::GetUserRequest { user_id })
            .await
            .map_err(|status| match status.code() {
                tonic::Code::NotFound => DirectoryError::NotFound(user_id),
                _ => DirectoryError::Rpc(status.to_string()),
            })?
            .into_inner();
        Ok(UserInfo {
            user_id: response.user_id,
            username: response.username,
            mobile: response.mobile,
        })
    }
}

/// Orchestrates placement: validate, confirm the user, mint the id, hand
/// the envelope to the transactional producer. A successful return means
/// the order row exists and the deduction message is committed; the
/// deduction itself lands asynchronously.
pub struct PlaceOrderLogic<U, L, S> {
    users: U,
    ids: Arc<Generator>,
    producer: Arc<TransactionalProducer<L, S>>,
}

impl<U, L, S> PlaceOrderLogic<U, L, S>
where
    U: UserDirectory,
    L: LocalTxn,
    S: MessageSink,
{
    pub fn new(users: U, ids: Arc<Generator>, producer: Arc<TransactionalProducer<L, S>>) -> Self {
        Self {
            users,
            ids,
            producer,
        }
    }

    pub async fn place_order(
        &self,
        req: &proto::PlaceOrderRequest,
    ) -> Result<proto::PlaceOrderResponse, TradeError> {
        validate(req)?;

        self.users.get_user(req.user_id).await.map_err(|err| {
            tracing::error!(user_id = req.user_id, error = %err, "user validation failed");
            TradeError::UserInvalid(req.user_id)
        })?;

        let order_id = if req.order_id > 0 {
            req.order_id
        } else {
            self.ids.next()?
        };

        let order_msg = OrderMessage {
            order_id,
            user_id: req.user_id,
            course_ids: req.course_ids.clone(),
            real_amount: req.real_amount,
        };
        let msg = HalfMessage {
            topic: String::new(),
            key: order_msg.message_key(),
            tag: ORDER_PLACED_TAG.to_string(),
            body: serde_json::to_string(&order_msg)?,
        };

        match self.producer.send(msg).await? {
            SendStatus::Committed => {
                tracing::info!(order_id, user_id = req.user_id, "order placed");
                Ok(proto::PlaceOrderResponse {
                    order_id,
                    pay_amount: req.real_amount,
                    status: i32::from(OrderStatus::PendingPayment.as_i16()),
                })
            }
            SendStatus::RolledBack => {
                tracing::error!(order_id, "order placement rolled back");
                Err(TradeError::PlacementRolledBack)
            }
            SendStatus::Unresolved => {
                tracing::warn!(order_id, "order placement unresolved");
                Err(TradeError::PlacementUnresolved)
            }
        }
    }
}

fn validate(req: &proto::PlaceOrderRequest) -> Result<(), TradeError> {
    if req.user_id <= 0 {
        return Err(TradeError::InvalidArgument(format!(
            "invalid user_id: {}",
            req.user_id
        )));
    }
    if req.order_id < 0 {
        return Err(TradeError::InvalidArgument(format!(
            "invalid order_id: {}",
            req.order_id
        )));
    }
    if req.course_ids.is_empty() {
        return Err(TradeError::InvalidArgument(
            "course_ids cannot be empty".to_string(),
        ));
    }
    if req.course_ids.len() > MAX_COURSES {
        return Err(TradeError::InvalidArgument(format!(
            "too many course_ids: {}",
            req.course_ids.len()
        )));
    }
    if req.course_ids.iter().any(|&id| id <= 0) {
        return Err(TradeError::InvalidArgument(
            "course_ids must be positive".to_string(),
        ));
    }
    if req.coupon_ids.len() > MAX_COUPONS {
        return Err(TradeError::InvalidArgument(format!(
            "too many coupon_ids: {}",
            req.coupon_ids.len()
        )));
    }
    if req.real_amount <= 0 {
        return Err(TradeError::InvalidArgument(
            "real_amount must be greater than 0".to_string(),
        ));
    }
    Ok(())
}
