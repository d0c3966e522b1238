//! Integration tests for the order lifecycle against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, Sku, UserId};
use domain::{NewOrder, Order, OrderItem, OrderStatus, StatusChangedEvent, StockItem};
use service::{
    DispatcherConfig, Dispatched, InMemoryProducer, OrderService, Repositories, ServiceError,
    StatusEventDispatcher, StockService,
};
use storage::{
    MemoryStore, MemoryTx, OrderRepository, OutboxRepository, Scope, StockRepository,
    StorageError,
};

const SKU: u32 = 1076963;

struct TestHarness {
    store: MemoryStore,
    service: OrderService<MemoryStore>,
    producer: InMemoryProducer,
    dispatcher: StatusEventDispatcher<MemoryStore>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_stock(10, 0)
    }

    fn with_stock(total_count: u64, reserved: u64) -> Self {
        let store = MemoryStore::with_stock([StockItem::new(SKU, total_count, reserved)]);
        let producer = InMemoryProducer::new(2);
        let service = OrderService::from_store(Arc::new(store.clone()));
        let dispatcher = StatusEventDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(producer.clone()),
            DispatcherConfig {
                topic: "loms.order-events".to_string(),
                idle_interval: Duration::from_millis(5),
            },
        );

        Self {
            store,
            service,
            producer,
            dispatcher,
        }
    }

    async fn stock(&self) -> StockItem {
        self.store
            .get_by_sku(Scope::Auto, Sku::new(SKU))
            .await
            .unwrap()
    }

    async fn statuses(&self, order_id: OrderId) -> Vec<OrderStatus> {
        self.service
            .order_events(order_id)
            .await
            .unwrap()
            .into_iter()
            .map(|event| event.status)
            .collect()
    }

    async fn drain(&self) -> usize {
        let mut sent = 0;
        while let Dispatched::Sent(_) = self.dispatcher.dispatch_next().await.unwrap() {
            sent += 1;
        }
        sent
    }
}

#[tokio::test]
async fn test_reserve_three_of_ten() {
    let h = TestHarness::new();

    let order_id = h
        .service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 3)])
        .await
        .unwrap();

    assert_eq!(
        h.service.order_info(order_id).await.unwrap().status,
        OrderStatus::AwaitingPayment
    );
    assert_eq!(h.stock().await, StockItem::new(SKU, 10, 3));
    assert_eq!(
        h.statuses(order_id).await,
        vec![OrderStatus::New, OrderStatus::AwaitingPayment]
    );
}

#[tokio::test]
async fn test_reject_twenty_of_ten() {
    let h = TestHarness::new();

    let err = h
        .service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 20)])
        .await
        .unwrap_err();

    let order_id = match err {
        ServiceError::CannotFulfill { order_id, .. } => order_id,
        other => panic!("expected CannotFulfill, got {other:?}"),
    };
    assert_eq!(
        h.service.order_info(order_id).await.unwrap().status,
        OrderStatus::Failed
    );
    assert_eq!(h.stock().await, StockItem::new(SKU, 10, 0));
    assert_eq!(
        h.statuses(order_id).await,
        vec![OrderStatus::New, OrderStatus::Failed]
    );
}

#[tokio::test]
async fn test_pay_consumes_stock() {
    let h = TestHarness::new();
    let order_id = h
        .service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 3)])
        .await
        .unwrap();

    h.service.order_pay(order_id).await.unwrap();

    assert_eq!(h.stock().await, StockItem::new(SKU, 7, 0));
    assert_eq!(
        h.statuses(order_id).await,
        vec![
            OrderStatus::New,
            OrderStatus::AwaitingPayment,
            OrderStatus::Payed
        ]
    );
}

#[tokio::test]
async fn test_cancel_releases_stock() {
    let h = TestHarness::new();
    let order_id = h
        .service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 3)])
        .await
        .unwrap();

    h.service.order_cancel(order_id).await.unwrap();

    assert_eq!(h.stock().await, StockItem::new(SKU, 10, 0));
    assert_eq!(
        h.service.stock().stocks_info(Sku::new(SKU)).await.unwrap(),
        10
    );
    assert_eq!(
        h.statuses(order_id).await.last(),
        Some(&OrderStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_created_orders_never_stay_new() {
    let h = TestHarness::with_stock(5, 0);

    for count in [2, 4, 3, 1] {
        let order_id = match h
            .service
            .order_create(UserId::new(9), vec![OrderItem::new(SKU, count)])
            .await
        {
            Ok(order_id) => order_id,
            Err(ServiceError::CannotFulfill { order_id, .. }) => order_id,
            Err(other) => panic!("unexpected error: {other}"),
        };
        let status = h.service.order_info(order_id).await.unwrap().status;
        assert!(matches!(
            status,
            OrderStatus::AwaitingPayment | OrderStatus::Failed
        ));
    }

    let stock = h.stock().await;
    assert_eq!(stock.reserved, 5);
    assert!(stock.reserved <= stock.total_count);
}

#[tokio::test]
async fn test_parallel_orders_over_capacity() {
    let h = TestHarness::new();

    let tasks: Vec<_> = (0..12)
        .map(|user| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .order_create(UserId::new(user), vec![OrderItem::new(SKU, 1)])
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(ServiceError::CannotFulfill { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(rejected, 2);
    assert_eq!(h.stock().await, StockItem::new(SKU, 10, 10));
}

#[tokio::test]
async fn test_every_transition_is_published_once() {
    let h = TestHarness::new();
    let paid = h
        .service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 2)])
        .await
        .unwrap();
    h.service.order_pay(paid).await.unwrap();
    let failed = h
        .service
        .order_create(UserId::new(2), vec![OrderItem::new(SKU, 50)])
        .await
        .is_err();
    assert!(failed);

    let sent = h.drain().await;

    // New, AwaitingPayment, Payed + New, Failed
    assert_eq!(sent, 5);
    assert_eq!(h.producer.message_count(), 5);
    assert_eq!(h.store.unsent_event_count().await, 0);

    let paid_key = paid.to_string().into_bytes();
    let partitions: Vec<i32> = h
        .producer
        .messages()
        .into_iter()
        .filter(|message| message.key == paid_key)
        .map(|message| message.partition)
        .collect();
    assert_eq!(partitions.len(), 3);
    assert!(partitions.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_pay_requires_awaiting_payment() {
    let h = TestHarness::new();
    let order_id = h
        .service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 3)])
        .await
        .unwrap();
    h.service.order_cancel(order_id).await.unwrap();

    let err = h.service.order_pay(order_id).await.unwrap_err();

    assert!(matches!(err, ServiceError::InvalidStatusTransition { .. }));
    assert_eq!(h.stock().await, StockItem::new(SKU, 10, 0));
    assert_eq!(h.statuses(order_id).await.len(), 3);
}

/// Delegates to the memory store but refuses to persist `Failed`.
struct RefuseFailedStatus {
    inner: MemoryStore,
}

#[async_trait]
impl OrderRepository<MemoryTx> for RefuseFailedStatus {
    async fn create(&self, scope: Scope<'_, MemoryTx>, order: &NewOrder) -> storage::Result<OrderId> {
        self.inner.create(scope, order).await
    }

    async fn get_by_id(&self, scope: Scope<'_, MemoryTx>, id: OrderId) -> storage::Result<Order> {
        self.inner.get_by_id(scope, id).await
    }

    async fn get_by_id_for_update(
        &self,
        scope: Scope<'_, MemoryTx>,
        id: OrderId,
    ) -> storage::Result<Order> {
        self.inner.get_by_id_for_update(scope, id).await
    }

    async fn set_status(
        &self,
        scope: Scope<'_, MemoryTx>,
        id: OrderId,
        status: OrderStatus,
    ) -> storage::Result<()> {
        if status == OrderStatus::Failed {
            return Err(StorageError::InvalidData("status store offline".to_string()));
        }
        self.inner.set_status(scope, id, status).await
    }
}

#[tokio::test]
async fn test_unrecorded_failure_reports_both_errors() {
    let store = MemoryStore::with_stock([StockItem::new(SKU, 1, 0)]);
    let repos = Repositories {
        orders: Arc::new(RefuseFailedStatus {
            inner: store.clone(),
        }),
        outbox: Arc::new(store.clone()),
        stock: StockService::new(Arc::new(store.clone())),
    };
    let service = OrderService::new(Arc::new(store.clone()), repos);

    let err = service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 2)])
        .await
        .unwrap_err();

    match err {
        ServiceError::FailureNotRecorded {
            order_id,
            cause,
            source,
        } => {
            assert!(matches!(cause, StorageError::InsufficientStock { .. }));
            assert!(matches!(
                *source,
                ServiceError::Storage(StorageError::InvalidData(_))
            ));
            // The order stays as first written; only the New event exists.
            let info = service.order_info(order_id).await.unwrap();
            assert_eq!(info.status, OrderStatus::New);
        }
        other => panic!("expected FailureNotRecorded, got {other:?}"),
    }
    assert_eq!(store.event_count().await, 1);
}

/// Outbox whose mark-as-sent fails while `crash` is set, as if the process
/// died between publishing and committing.
struct CrashingOutbox {
    inner: MemoryStore,
    crash: AtomicBool,
}

#[async_trait]
impl OutboxRepository<MemoryTx> for CrashingOutbox {
    async fn create_order_status_changed_event(
        &self,
        scope: Scope<'_, MemoryTx>,
        order_id: OrderId,
        status: OrderStatus,
    ) -> storage::Result<()> {
        self.inner
            .create_order_status_changed_event(scope, order_id, status)
            .await
    }

    async fn fetch_next_order_status_changed_event(
        &self,
        scope: Scope<'_, MemoryTx>,
    ) -> storage::Result<StatusChangedEvent> {
        self.inner.fetch_next_order_status_changed_event(scope).await
    }

    async fn mark_order_status_changed_event_as_sent(
        &self,
        scope: Scope<'_, MemoryTx>,
        event: &StatusChangedEvent,
    ) -> storage::Result<()> {
        if self.crash.load(Ordering::SeqCst) {
            return Err(StorageError::TransactionPanicked("process killed".to_string()));
        }
        self.inner
            .mark_order_status_changed_event_as_sent(scope, event)
            .await
    }

    async fn list_by_order(
        &self,
        scope: Scope<'_, MemoryTx>,
        order_id: OrderId,
    ) -> storage::Result<Vec<StatusChangedEvent>> {
        self.inner.list_by_order(scope, order_id).await
    }
}

#[tokio::test]
async fn test_dispatch_is_at_least_once_across_crash() {
    let h = TestHarness::new();
    let order_id = h
        .service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 1)])
        .await
        .unwrap();

    let outbox = Arc::new(CrashingOutbox {
        inner: h.store.clone(),
        crash: AtomicBool::new(true),
    });
    let dispatcher = StatusEventDispatcher::new(
        Arc::new(h.store.clone()),
        outbox.clone(),
        Arc::new(h.producer.clone()),
        DispatcherConfig::default(),
    );

    // Published, but never marked: the event stays pending.
    assert!(dispatcher.dispatch_next().await.is_err());
    assert_eq!(h.producer.message_count(), 1);
    assert_eq!(h.store.unsent_event_count().await, 2);

    outbox.crash.store(false, Ordering::SeqCst);
    while let Dispatched::Sent(_) = dispatcher.dispatch_next().await.unwrap() {}

    // The first event went out twice; nothing was lost.
    let messages = h.producer.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].payload, messages[1].payload);
    assert_eq!(h.store.unsent_event_count().await, 0);

    let events = h.service.order_events(order_id).await.unwrap();
    assert!(events.iter().all(|event| event.sent));
}

#[tokio::test]
async fn test_background_dispatcher_publishes_new_orders() {
    let h = TestHarness::new();
    let TestHarness {
        store,
        service,
        producer,
        dispatcher,
    } = h;

    let handle = dispatcher.spawn();
    service
        .order_create(UserId::new(1), vec![OrderItem::new(SKU, 1)])
        .await
        .unwrap();

    for _ in 0..200 {
        if producer.message_count() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.stop().await;

    assert_eq!(producer.message_count(), 2);
    assert_eq!(store.unsent_event_count().await, 0);
}
