use chrono::{DateTime, Utc};
use platform_common::halfmsg::{HalfMessage, HalfStore};
use platform_common::message::OrderMessage;
use platform_common::snowflake::Generator;
use platform_common::txn::{
    MessageSink, ProducerConfig, SendStatus, SinkError, TransactionalProducer,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::cancel::CancelOrderLogic;
use crate::contracts::commerce::v1 as proto;
use crate::error::TradeError;
use crate::health;
use crate::listener::OrderTxnListener;
use crate::model::{Order, OrderItem, OrderStatus, PayChannel};
use crate::place::{DirectoryError, PlaceOrderLogic, UserDirectory, UserInfo};
use crate::store::{OrderStore, StoreError};

#[derive(Default)]
struct MemoryOrderStore {
    rows: Mutex<HashMap<i64, (Order, Vec<OrderItem>)>>,
    fail_creates: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryOrderStore {
    fn order(&self, id: i64) -> Option<Order> {
        self.rows.lock().unwrap().get(&id).map(|(o, _)| o.clone())
    }

    fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

impl OrderStore for MemoryOrderStore {
    async fn create(&self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrder);
        }
        rows.insert(order.id, (order.clone(), items.to_vec()));
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Order, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .map(|(order, _)| order.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut orders: Vec<Order> = rows
            .values()
            .map(|(order, _)| order.clone())
            .filter(|order| order.user_id == user_id)
            .filter(|order| status.map_or(true, |s| order.status == s))
            .collect();
        orders.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        Ok(orders
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn list_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&order_id)
            .map(|(_, items)| items.clone())
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        id: i64,
        expected: OrderStatus,
        new: OrderStatus,
        expected_version: i32,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some((order, _))
                if order.status == expected && order.version == expected_version =>
            {
                order.status = new;
                order.version += 1;
                order.update_time = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::ConcurrentModification {
                id,
                expected_status: expected,
                expected_version,
            }),
        }
    }

    async fn update_pay_info(
        &self,
        id: i64,
        channel: PayChannel,
        out_trade_no: &str,
        pay_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some((order, _)) if order.status == OrderStatus::PendingPayment => {
                order.pay_channel = Some(channel);
                order.out_trade_no = Some(out_trade_no.to_string());
                order.pay_time = Some(pay_time);
                order.status = OrderStatus::Paid;
                order.version += 1;
                order.update_time = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::PayInfoStale(id)),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<HalfMessage>>,
}

impl RecordingSink {
    fn bodies(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }
}

impl MessageSink for RecordingSink {
    fn publish(&self, msg: &HalfMessage) -> Result<(), SinkError> {
        self.published.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

struct StubUsers {
    known: Vec<i64>,
}

impl UserDirectory for StubUsers {
    async fn get_user(&self, user_id: i64) -> Result<UserInfo, DirectoryError> {
        if self.known.contains(&user_id) {
            Ok(UserInfo {
                user_id,
                username: format!("user-{user_id}"),
                mobile: "13800000000".to_string(),
            })
        } else {
            Err(DirectoryError::NotFound(user_id))
        }
    }
}

struct Fixture {
    _tmp: TempDir,
    store: Arc<MemoryOrderStore>,
    producer: Arc<TransactionalProducer<OrderTxnListener<MemoryOrderStore>, RecordingSink>>,
    place: PlaceOrderLogic<StubUsers, OrderTxnListener<MemoryOrderStore>, RecordingSink>,
    cancel: CancelOrderLogic<MemoryOrderStore>,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryOrderStore::default());
    let cfg = ProducerConfig {
        check_delay_ms: 0,
        ..ProducerConfig::default()
    };
    let producer = Arc::new(TransactionalProducer::new(
        cfg,
        HalfStore::open(tmp.path()).unwrap(),
        OrderTxnListener::new(store.clone()),
        RecordingSink::default(),
    ));
    let place = PlaceOrderLogic::new(
        StubUsers { known: vec![1001] },
        Arc::new(Generator::new(1).unwrap()),
        producer.clone(),
    );
    let cancel = CancelOrderLogic::new(store.clone());
    Fixture {
        _tmp: tmp,
        store,
        producer,
        place,
        cancel,
    }
}

fn place_req(user_id: i64, order_id: i64, course_ids: Vec<i64>, real_amount: i32) -> proto::PlaceOrderRequest {
    proto::PlaceOrderRequest {
        user_id,
        order_id,
        course_ids,
        coupon_ids: Vec::new(),
        real_amount,
    }
}

#[test]
fn health_is_ok() {
    let h = health();
    assert_eq!(h.service, "trade-core");
    assert_eq!(h.status, "ok");
}

#[tokio::test]
async fn place_order_creates_row_and_commits_message() {
    let f = fixture();
    let resp = f
        .place
        .place_order(&place_req(1001, 0, vec![5001], 10_000))
        .await
        .unwrap();

    assert_eq!(resp.pay_amount, 10_000);
    assert_eq!(resp.status, i32::from(OrderStatus::PendingPayment.as_i16()));
    assert!(resp.order_id > 0);

    let order = f.store.order(resp.order_id).unwrap();
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.pay_amount, 10_000);
    assert_eq!(order.version, 1);

    let bodies = f.producer.sink().bodies();
    assert_eq!(bodies.len(), 1);
    let msg: OrderMessage = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(msg.order_id, resp.order_id);
    assert_eq!(msg.course_ids, vec![5001]);
    assert_eq!(msg.real_amount, 10_000);
}

#[tokio::test]
async fn place_order_keeps_caller_supplied_id() {
    let f = fixture();
    let resp = f
        .place
        .place_order(&place_req(1001, 424_242, vec![5001, 5002], 9_000))
        .await
        .unwrap();
    assert_eq!(resp.order_id, 424_242);

    let items = f.store.list_items(424_242).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, 424_243);
    assert_eq!(items[1].id, 424_244);
    assert_eq!(items.iter().map(|i| i.real_pay_amount).sum::<i32>(), 9_000);
}

#[tokio::test]
async fn place_order_rejects_empty_course_list_before_any_side_effect() {
    let f = fixture();
    let err = f
        .place
        .place_order(&place_req(1001, 0, Vec::new(), 10_000))
        .await
        .unwrap_err();

    match err {
        TradeError::InvalidArgument(msg) => assert_eq!(msg, "course_ids cannot be empty"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(f.store.len(), 0);
    assert!(f.producer.sink().bodies().is_empty());
}

#[tokio::test]
async fn place_order_validation_covers_limits() {
    let f = fixture();
    for req in [
        place_req(0, 0, vec![5001], 10_000),
        place_req(1001, -1, vec![5001], 10_000),
        place_req(1001, 0, vec![5001], 0),
        place_req(1001, 0, vec![-5], 10_000),
        place_req(1001, 0, (1..=101).collect(), 10_000),
    ] {
        assert!(matches!(
            f.place.place_order(&req).await,
            Err(TradeError::InvalidArgument(_))
        ));
    }

    let mut with_coupons = place_req(1001, 0, vec![5001], 10_000);
    with_coupons.coupon_ids = (1..=51).collect();
    assert!(matches!(
        f.place.place_order(&with_coupons).await,
        Err(TradeError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn place_order_rejects_unknown_user() {
    let f = fixture();
    let err = f
        .place
        .place_order(&place_req(9999, 0, vec![5001], 10_000))
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::UserInvalid(9999)));
    assert_eq!(f.store.len(), 0);
}

#[tokio::test]
async fn ambiguous_local_transaction_is_rolled_back_by_check_back() {
    let f = fixture();
    f.store.fail_creates.store(true, Ordering::SeqCst);

    let err = f
        .place
        .place_order(&place_req(1001, 777, vec![5001], 10_000))
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::PlacementUnresolved));

    // no row was written, so the check-back must discard the half-message
    f.store.fail_creates.store(false, Ordering::SeqCst);
    let stats = f.producer.resolve_pending().await.unwrap();
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(f.store.len(), 0);
    assert!(f.producer.sink().bodies().is_empty());
}

#[tokio::test]
async fn redelivered_local_transaction_is_idempotent() {
    let f = fixture();
    let msg = OrderMessage {
        order_id: 321,
        user_id: 1001,
        course_ids: vec![5001],
        real_amount: 10_000,
    };
    let half = HalfMessage {
        topic: "trade-order".to_string(),
        key: msg.message_key(),
        tag: "ORDER_PLACED".to_string(),
        body: serde_json::to_string(&msg).unwrap(),
    };

    assert_eq!(f.producer.send(half.clone()).await.unwrap(), SendStatus::Committed);
    assert_eq!(f.producer.send(half).await.unwrap(), SendStatus::Committed);

    assert_eq!(f.store.len(), 1);
    assert_eq!(f.store.list_items(321).await.unwrap().len(), 1);
}

#[tokio::test]
async fn check_back_is_pure_and_repeatable() {
    use platform_common::halfmsg::TxnOutcome;
    use platform_common::txn::LocalTxn;

    let store = Arc::new(MemoryOrderStore::default());
    let listener = OrderTxnListener::new(store.clone());
    let msg = OrderMessage {
        order_id: 555,
        user_id: 1001,
        course_ids: vec![5001],
        real_amount: 100,
    };
    let half = HalfMessage {
        topic: "trade-order".to_string(),
        key: msg.message_key(),
        tag: "ORDER_PLACED".to_string(),
        body: serde_json::to_string(&msg).unwrap(),
    };

    assert_eq!(listener.check(&half).await, TxnOutcome::Rollback);
    assert_eq!(listener.check(&half).await, TxnOutcome::Rollback);
    assert_eq!(store.len(), 0);

    assert_eq!(listener.execute(&half).await, TxnOutcome::Commit);
    assert_eq!(listener.check(&half).await, TxnOutcome::Commit);
    assert_eq!(listener.check(&half).await, TxnOutcome::Commit);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn cancel_transitions_pending_order_to_closed() {
    let f = fixture();
    let placed = f
        .place
        .place_order(&place_req(1001, 0, vec![5001], 10_000))
        .await
        .unwrap();

    let resp = f
        .cancel
        .cancel_order(&proto::CancelOrderRequest {
            user_id: 1001,
            order_id: placed.order_id,
        })
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.status, i32::from(OrderStatus::Closed.as_i16()));

    let order = f.store.order(placed.order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Closed);
    assert_eq!(order.version, 2);
}

#[tokio::test]
async fn cancel_by_wrong_user_is_forbidden_and_leaves_row_untouched() {
    let f = fixture();
    let placed = f
        .place
        .place_order(&place_req(1001, 0, vec![5001], 10_000))
        .await
        .unwrap();

    let err = f
        .cancel
        .cancel_order(&proto::CancelOrderRequest {
            user_id: 9999,
            order_id: placed.order_id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::Forbidden));

    let order = f.store.order(placed.order_id).unwrap();
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.version, 1);
}

#[tokio::test]
async fn cancel_missing_order_is_not_found() {
    let f = fixture();
    let err = f
        .cancel
        .cancel_order(&proto::CancelOrderRequest {
            user_id: 1001,
            order_id: 12345,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::Store(StoreError::NotFound(12345))));
}

#[tokio::test]
async fn cancel_rejects_non_pending_orders() {
    let f = fixture();
    let placed = f
        .place
        .place_order(&place_req(1001, 0, vec![5001], 10_000))
        .await
        .unwrap();
    f.store
        .update_pay_info(placed.order_id, PayChannel::Alipay, "ext-1", Utc::now())
        .await
        .unwrap();

    let err = f
        .cancel
        .cancel_order(&proto::CancelOrderRequest {
            user_id: 1001,
            order_id: placed.order_id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::CannotCancel(OrderStatus::Paid)));
}

#[tokio::test]
async fn concurrent_status_updates_admit_exactly_one_winner() {
    let f = fixture();
    let placed = f
        .place
        .place_order(&place_req(1001, 0, vec![5001], 10_000))
        .await
        .unwrap();

    let a = {
        let store = f.store.clone();
        let id = placed.order_id;
        tokio::spawn(async move {
            store
                .update_status(id, OrderStatus::PendingPayment, OrderStatus::Closed, 1)
                .await
        })
    };
    let b = {
        let store = f.store.clone();
        let id = placed.order_id;
        tokio::spawn(async move {
            store
                .update_status(id, OrderStatus::PendingPayment, OrderStatus::Closed, 1)
                .await
        })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::ConcurrentModification { .. })))
        .count();
    assert_eq!((wins, conflicts), (1, 1));
    assert_eq!(f.store.order(placed.order_id).unwrap().version, 2);
}

#[tokio::test]
async fn duplicate_create_leaves_first_write_intact() {
    let f = fixture();
    f.place
        .place_order(&place_req(1001, 888, vec![5001], 10_000))
        .await
        .unwrap();

    let msg = OrderMessage {
        order_id: 888,
        user_id: 1001,
        course_ids: vec![6001, 6002, 6003],
        real_amount: 500,
    };
    let (order, items) = crate::model::build_order(&msg, Utc::now());
    assert!(matches!(
        f.store.create(&order, &items).await,
        Err(StoreError::DuplicateOrder)
    ));

    let items = f.store.list_items(888).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].course_id, 5001);
}

#[tokio::test]
async fn pay_info_update_is_guarded_by_pending_status() {
    let f = fixture();
    let placed = f
        .place
        .place_order(&place_req(1001, 0, vec![5001], 10_000))
        .await
        .unwrap();

    f.store
        .update_pay_info(placed.order_id, PayChannel::WeChat, "wx-001", Utc::now())
        .await
        .unwrap();
    let order = f.store.order(placed.order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.pay_channel, Some(PayChannel::WeChat));
    assert_eq!(order.out_trade_no.as_deref(), Some("wx-001"));
    assert!(order.pay_time.is_some());
    assert_eq!(order.version, 2);

    assert!(matches!(
        f.store
            .update_pay_info(placed.order_id, PayChannel::WeChat, "wx-002", Utc::now())
            .await,
        Err(StoreError::PayInfoStale(_))
    ));
}

#[tokio::test]
async fn list_by_user_filters_on_status() {
    let f = fixture();
    let first = f
        .place
        .place_order(&place_req(1001, 0, vec![5001], 10_000))
        .await
        .unwrap();
    f.place
        .place_order(&place_req(1001, 0, vec![5002], 2_000))
        .await
        .unwrap();
    f.cancel
        .cancel_order(&proto::CancelOrderRequest {
            user_id: 1001,
            order_id: first.order_id,
        })
        .await
        .unwrap();

    let all = f.store.list_by_user(1001, None, 10, 0).await.unwrap();
    assert_eq!(all.len(), 2);

    let closed = f
        .store
        .list_by_user(1001, Some(OrderStatus::Closed), 10, 0)
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].id, first.order_id);

    let other = f.store.list_by_user(4242, None, 10, 0).await.unwrap();
    assert!(other.is_empty());
}
