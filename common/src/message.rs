//! The order envelope shared by the producing and consuming sides.
//!
//! The body is JSON so fields can be added over time; `orderId` stays a
//! stable top-level field because every decoder keys its decision on it.

use serde::{Deserialize, Serialize};

pub const ORDER_PLACED_TAG: &str = "ORDER_PLACED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMessage {
    pub order_id: i64,
    pub user_id: i64,
    pub course_ids: Vec<i64>,
    pub real_amount: i32,
}

impl OrderMessage {
    pub fn message_key(&self) -> String {
        format!("order_{}", self.order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_is_camel_case_json() {
        let msg = OrderMessage {
            order_id: 9,
            user_id: 1001,
            course_ids: vec![5001, 5002],
            real_amount: 10_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"orderId":9,"userId":1001,"courseIds":[5001,5002],"realAmount":10000}"#
        );
        assert_eq!(msg.message_key(), "order_9");
    }

    #[test]
    fn decoder_ignores_unknown_fields() {
        let json = r#"{"orderId":9,"userId":1001,"courseIds":[5001],"realAmount":100,"couponIds":[1]}"#;
        let msg: OrderMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.order_id, 9);
    }
}
