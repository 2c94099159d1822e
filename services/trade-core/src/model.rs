use chrono::{DateTime, Utc};
use platform_common::message::OrderMessage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum OrderStatus {
    PendingPayment = 1,
    Closed = 2,
    Paid = 3,
    Finished = 4,
    Refunded = 5,
}

impl OrderStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(OrderStatus::PendingPayment),
            2 => Some(OrderStatus::Closed),
            3 => Some(OrderStatus::Paid),
            4 => Some(OrderStatus::Finished),
            5 => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    /// The legal transition table. Everything else is rejected before it
    /// reaches the store.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::PendingPayment, OrderStatus::Closed)
                | (OrderStatus::PendingPayment, OrderStatus::Paid)
                | (OrderStatus::Paid, OrderStatus::Finished)
                | (OrderStatus::Paid, OrderStatus::Refunded)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum PayChannel {
    Alipay = 1,
    WeChat = 2,
}

impl PayChannel {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(PayChannel::Alipay),
            2 => Some(PayChannel::WeChat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub status: OrderStatus,
    pub total_amount: i32,
    pub pay_amount: i32,
    pub pay_channel: Option<PayChannel>,
    pub out_trade_no: Option<String>,
    pub pay_time: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub version: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub course_name: String,
    pub price: i32,
    pub real_pay_amount: i32,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Splits an integer amount over `n` items; every item gets `total / n`
/// and the last one absorbs the remainder, so the parts always sum back
/// to the total.
pub fn split_amount(total: i32, n: usize) -> Vec<i32> {
    let n32 = n as i32;
    let per_item = total / n32;
    (0..n)
        .map(|i| {
            if i == n - 1 {
                total - per_item * (n32 - 1)
            } else {
                per_item
            }
        })
        .collect()
}

/// Rebuilds the order and its items from the envelope body. This is the
/// single decision function shared by the local transaction and the
/// check-back: everything derives from the message, nothing else.
pub fn build_order(msg: &OrderMessage, now: DateTime<Utc>) -> (Order, Vec<OrderItem>) {
    let order = Order {
        id: msg.order_id,
        user_id: msg.user_id,
        status: OrderStatus::PendingPayment,
        total_amount: msg.real_amount,
        pay_amount: msg.real_amount,
        pay_channel: None,
        out_trade_no: None,
        pay_time: None,
        create_time: now,
        update_time: now,
        version: 1,
    };

    let shares = split_amount(msg.real_amount, msg.course_ids.len());
    let items = msg
        .course_ids
        .iter()
        .zip(shares)
        .enumerate()
        .map(|(i, (&course_id, share))| OrderItem {
            // deterministic item ids, no extra minting round-trips
            id: msg.order_id + i as i64 + 1,
            order_id: msg.order_id,
            user_id: msg.user_id,
            course_id,
            course_name: format!("Course {course_id}"),
            price: share,
            real_pay_amount: share,
            create_time: now,
            update_time: now,
        })
        .collect();

    (order, items)
}
