use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;

use crate::model::{Order, OrderItem, OrderStatus, PayChannel};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate order")]
    DuplicateOrder,
    #[error("order not found: {0}")]
    NotFound(i64),
    #[error("concurrent modification: id={id}, expected_status={expected_status:?}, expected_version={expected_version}")]
    ConcurrentModification {
        id: i64,
        expected_status: OrderStatus,
        expected_version: i32,
    },
    #[error("pay info stale: {0}")]
    PayInfoStale(i64),
    #[error("invalid status value in row: {0}")]
    InvalidStatus(i16),
    #[error("invalid pay channel value in row: {0}")]
    InvalidPayChannel(i16),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable order persistence. `create` is all-or-nothing over the order
/// and its items; `update_status` is a compare-and-swap on
/// `(id, status, version)` and callers must re-read before retrying it.
pub trait OrderStore: Send + Sync {
    fn create(
        &self,
        order: &Order,
        items: &[OrderItem],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_by_id(&self, id: i64) -> impl Future<Output = Result<Order, StoreError>> + Send;

    fn list_by_user(
        &self,
        user_id: i64,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send;

    fn list_items(
        &self,
        order_id: i64,
    ) -> impl Future<Output = Result<Vec<OrderItem>, StoreError>> + Send;

    fn update_status(
        &self,
        id: i64,
        expected: OrderStatus,
        new: OrderStatus,
        expected_version: i32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_pay_info(
        &self,
        id: i64,
        channel: PayChannel,
        out_trade_no: &str,
        pay_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OrderStore for PgOrderStore {
    async fn create(&self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO trade_order \
             (id, user_id, status, total_amount, pay_amount, pay_channel, out_trade_no, \
              pay_time, create_time, update_time, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.status.as_i16())
        .bind(order.total_amount)
        .bind(order.pay_amount)
        .bind(order.pay_channel.map(PayChannel::as_i16))
        .bind(order.out_trade_no.as_deref())
        .bind(order.pay_time)
        .bind(order.create_time)
        .bind(order.update_time)
        .bind(order.version)
        .execute(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        for item in items {
            sqlx::query(
                "INSERT INTO trade_order_item \
                 (id, order_id, user_id, course_id, course_name, price, real_pay_amount, \
                  create_time, update_time) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.user_id)
            .bind(item.course_id)
            .bind(&item.course_name)
            .bind(item.price)
            .bind(item.real_pay_amount)
            .bind(item.create_time)
            .bind(item.update_time)
            .execute(&mut *tx)
            .await
            .map_err(map_insert_error)?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Order, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, status, total_amount, pay_amount, pay_channel, out_trade_no, \
             pay_time, create_time, update_time, version \
             FROM trade_order WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;
        order_from_row(&row)
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT id, user_id, status, total_amount, pay_amount, pay_channel, \
                     out_trade_no, pay_time, create_time, update_time, version \
                     FROM trade_order WHERE user_id = $1 AND status = $2 \
                     ORDER BY create_time DESC LIMIT $3 OFFSET $4",
                )
                .bind(user_id)
                .bind(status.as_i16())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, user_id, status, total_amount, pay_amount, pay_channel, \
                     out_trade_no, pay_time, create_time, update_time, version \
                     FROM trade_order WHERE user_id = $1 \
                     ORDER BY create_time DESC LIMIT $2 OFFSET $3",
                )
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(order_from_row).collect()
    }

    async fn list_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, order_id, user_id, course_id, course_name, price, real_pay_amount, \
             create_time, update_time \
             FROM trade_order_item WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn update_status(
        &self,
        id: i64,
        expected: OrderStatus,
        new: OrderStatus,
        expected_version: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE trade_order \
             SET status = $1, version = version + 1, update_time = $2 \
             WHERE id = $3 AND status = $4 AND version = $5",
        )
        .bind(new.as_i16())
        .bind(Utc::now())
        .bind(id)
        .bind(expected.as_i16())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ConcurrentModification {
                id,
                expected_status: expected,
                expected_version,
            });
        }
        Ok(())
    }

    async fn update_pay_info(
        &self,
        id: i64,
        channel: PayChannel,
        out_trade_no: &str,
        pay_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE trade_order \
             SET pay_channel = $1, out_trade_no = $2, pay_time = $3, status = $4, \
                 version = version + 1, update_time = $5 \
             WHERE id = $6 AND status = $7",
        )
        .bind(channel.as_i16())
        .bind(out_trade_no)
        .bind(pay_time)
        .bind(OrderStatus::Paid.as_i16())
        .bind(Utc::now())
        .bind(id)
        .bind(OrderStatus::PendingPayment.as_i16())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PayInfoStale(id));
        }
        Ok(())
    }
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::DuplicateOrder;
        }
    }
    StoreError::Database(err)
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status_raw: i16 = row.try_get("status")?;
    let status = OrderStatus::from_i16(status_raw).ok_or(StoreError::InvalidStatus(status_raw))?;
    let pay_channel = match row.try_get::<Option<i16>, _>("pay_channel")? {
        Some(raw) => Some(PayChannel::from_i16(raw).ok_or(StoreError::InvalidPayChannel(raw))?),
        None => None,
    };

    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        status,
        total_amount: row.try_get("total_amount")?,
        pay_amount: row.try_get("pay_amount")?,
        pay_channel,
        out_trade_no: row.try_get("out_trade_no")?,
        pay_time: row.try_get("pay_time")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
        version: row.try_get("version")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<OrderItem, StoreError> {
    Ok(OrderItem {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        course_id: row.try_get("course_id")?,
        course_name: row.try_get("course_name")?,
        price: row.try_get("price")?,
        real_pay_amount: row.try_get("real_pay_amount")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}
