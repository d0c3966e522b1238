//! Order lifecycle service.

use std::sync::Arc;

use common::{OrderId, UserId};
use domain::{NewOrder, OrderInfo, OrderItem, OrderStatus, StatusChangedEvent};
use storage::{
    OrderRepository, OutboxRepository, Scope, StockRepository, StorageError, TxManager,
    run_in_transaction,
};

use crate::error::{Result, ServiceError};
use crate::stock::StockService;

/// Repositories the lifecycle operations work on, all sharing one
/// transaction type.
pub struct Repositories<T: Send> {
    pub orders: Arc<dyn OrderRepository<T>>,
    pub outbox: Arc<dyn OutboxRepository<T>>,
    pub stock: StockService<T>,
}

impl<T: Send> Clone for Repositories<T> {
    fn clone(&self) -> Self {
        Self {
            orders: Arc::clone(&self.orders),
            outbox: Arc::clone(&self.outbox),
            stock: self.stock.clone(),
        }
    }
}

impl<T: Send> Repositories<T> {
    /// Uses one store for every repository.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: OrderRepository<T> + OutboxRepository<T> + StockRepository<T> + 'static,
    {
        Self {
            orders: store.clone(),
            outbox: store.clone(),
            stock: StockService::new(store),
        }
    }

    /// Moves an order to `status` and appends the matching outbox event.
    async fn set_status_with_event(
        &self,
        tx: &mut T,
        order_id: OrderId,
        status: OrderStatus,
    ) -> storage::Result<()> {
        self.orders
            .set_status(Scope::Within(&mut *tx), order_id, status)
            .await?;
        self.outbox
            .create_order_status_changed_event(Scope::Within(tx), order_id, status)
            .await
    }
}

/// Orchestrates order creation, payment and cancellation.
///
/// Every status change is written together with its outbox event, so an
/// observer never sees one without the other.
pub struct OrderService<M: TxManager> {
    tx_manager: Arc<M>,
    repos: Repositories<M::Tx>,
}

impl<M: TxManager> Clone for OrderService<M> {
    fn clone(&self) -> Self {
        Self {
            tx_manager: Arc::clone(&self.tx_manager),
            repos: self.repos.clone(),
        }
    }
}

impl<M: TxManager> OrderService<M> {
    /// Creates a new order service.
    pub fn new(tx_manager: Arc<M>, repos: Repositories<M::Tx>) -> Self {
        Self { tx_manager, repos }
    }

    /// Creates a service over a store that is its own transaction manager.
    pub fn from_store(store: Arc<M>) -> Self
    where
        M: OrderRepository<M::Tx> + OutboxRepository<M::Tx> + StockRepository<M::Tx> + 'static,
    {
        let repos = Repositories::from_store(Arc::clone(&store));
        Self::new(store, repos)
    }

    /// Returns the stock service sharing this service's ledger.
    pub fn stock(&self) -> &StockService<M::Tx> {
        &self.repos.stock
    }

    /// Creates an order and reserves its stock.
    ///
    /// The order is persisted as `New` first. If the reservation then
    /// succeeds the order moves to `AwaitingPayment`; otherwise it is marked
    /// `Failed`. Either way both transitions are announced through the
    /// outbox.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn order_create(&self, user_id: UserId, items: Vec<OrderItem>) -> Result<OrderId> {
        let new_order = NewOrder::new(user_id, items).map_err(ServiceError::InvalidOrder)?;
        let items = new_order.items().to_vec();

        let repos = self.repos.clone();
        let order_id = run_in_transaction(&*self.tx_manager, Scope::Auto, move |tx| {
            Box::pin(async move {
                let order_id = repos.orders.create(Scope::Within(&mut *tx), &new_order).await?;
                repos
                    .outbox
                    .create_order_status_changed_event(
                        Scope::Within(tx),
                        order_id,
                        OrderStatus::New,
                    )
                    .await?;
                Ok::<_, StorageError>(order_id)
            })
        })
        .await?;
        tracing::info!(%order_id, "order created");

        if let Err(cause) = self.repos.stock.reserve(Scope::Auto, &items).await {
            tracing::warn!(%order_id, error = %cause, "stock reservation failed");
            metrics::counter!("loms_orders_failed_total").increment(1);

            if let Err(source) = self
                .record_status(order_id, OrderStatus::Failed, "fail", OrderStatus::can_fail)
                .await
            {
                tracing::error!(%order_id, error = %source, "could not mark order as failed");
                return Err(ServiceError::FailureNotRecorded {
                    order_id,
                    cause,
                    source: Box::new(source),
                });
            }

            return Err(match cause {
                StorageError::SkuNotFound(_) | StorageError::InsufficientStock { .. } => {
                    ServiceError::CannotFulfill {
                        order_id,
                        source: cause,
                    }
                }
                other => other.into(),
            });
        }

        self.record_status(
            order_id,
            OrderStatus::AwaitingPayment,
            "await payment",
            OrderStatus::can_await_payment,
        )
        .await?;
        metrics::counter!("loms_orders_created_total").increment(1);
        Ok(order_id)
    }

    /// Returns the status, owner and items of an order.
    #[tracing::instrument(skip(self))]
    pub async fn order_info(&self, order_id: OrderId) -> Result<OrderInfo> {
        let order = self.repos.orders.get_by_id(Scope::Auto, order_id).await?;
        Ok(order.into())
    }

    /// Pays an order awaiting payment: its reserved stock is consumed and the
    /// order becomes `Payed`, all in one transaction.
    #[tracing::instrument(skip(self))]
    pub async fn order_pay(&self, order_id: OrderId) -> Result<()> {
        let repos = self.repos.clone();
        run_in_transaction(&*self.tx_manager, Scope::Auto, move |tx| {
            Box::pin(async move {
                let order = repos
                    .orders
                    .get_by_id_for_update(Scope::Within(&mut *tx), order_id)
                    .await?;
                order
                    .status
                    .ensure(order.status.can_pay(), "pay")
                    .map_err(|source| ServiceError::InvalidStatusTransition { order_id, source })?;

                repos
                    .stock
                    .reserve_remove(Scope::Within(&mut *tx), &order.items)
                    .await?;
                repos
                    .set_status_with_event(tx, order_id, OrderStatus::Payed)
                    .await?;
                Ok::<_, ServiceError>(())
            })
        })
        .await?;

        tracing::info!(%order_id, "order paid");
        metrics::counter!("loms_orders_paid_total").increment(1);
        Ok(())
    }

    /// Cancels an order awaiting payment and releases its reservation.
    #[tracing::instrument(skip(self))]
    pub async fn order_cancel(&self, order_id: OrderId) -> Result<()> {
        let repos = self.repos.clone();
        run_in_transaction(&*self.tx_manager, Scope::Auto, move |tx| {
            Box::pin(async move {
                let order = repos
                    .orders
                    .get_by_id_for_update(Scope::Within(&mut *tx), order_id)
                    .await?;
                order
                    .status
                    .ensure(order.status.can_cancel(), "cancel")
                    .map_err(|source| ServiceError::InvalidStatusTransition { order_id, source })?;

                repos
                    .stock
                    .reserve_cancel(Scope::Within(&mut *tx), &order.items)
                    .await?;
                repos
                    .set_status_with_event(tx, order_id, OrderStatus::Cancelled)
                    .await?;
                Ok::<_, ServiceError>(())
            })
        })
        .await?;

        tracing::info!(%order_id, "order cancelled");
        metrics::counter!("loms_orders_cancelled_total").increment(1);
        Ok(())
    }

    /// Status history of an order as recorded in the outbox, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn order_events(&self, order_id: OrderId) -> Result<Vec<StatusChangedEvent>> {
        let repos = self.repos.clone();
        let events = run_in_transaction(&*self.tx_manager, Scope::Auto, move |tx| {
            Box::pin(async move {
                repos
                    .orders
                    .get_by_id(Scope::Within(&mut *tx), order_id)
                    .await?;
                repos.outbox.list_by_order(Scope::Within(tx), order_id).await
            })
        })
        .await?;
        Ok(events)
    }

    /// Records a status change with its event in a transaction of its own.
    ///
    /// The order is locked first and `allowed` must accept its current
    /// status, so a concurrent transition is never overwritten.
    async fn record_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        action: &'static str,
        allowed: fn(&OrderStatus) -> bool,
    ) -> Result<()> {
        let repos = self.repos.clone();
        run_in_transaction(&*self.tx_manager, Scope::Auto, move |tx| {
            Box::pin(async move {
                let order = repos
                    .orders
                    .get_by_id_for_update(Scope::Within(&mut *tx), order_id)
                    .await?;
                order
                    .status
                    .ensure(allowed(&order.status), action)
                    .map_err(|source| ServiceError::InvalidStatusTransition { order_id, source })?;

                repos.set_status_with_event(tx, order_id, status).await?;
                Ok::<_, ServiceError>(())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use common::Sku;
    use domain::StockItem;
    use storage::MemoryStore;

    use super::*;

    fn service() -> (MemoryStore, OrderService<MemoryStore>) {
        let store = MemoryStore::with_stock([StockItem::new(100, 10, 0), StockItem::new(200, 2, 0)]);
        let service = OrderService::from_store(Arc::new(store.clone()));
        (store, service)
    }

    async fn statuses(service: &OrderService<MemoryStore>, id: OrderId) -> Vec<OrderStatus> {
        service
            .order_events(id)
            .await
            .unwrap()
            .into_iter()
            .map(|event| event.status)
            .collect()
    }

    #[tokio::test]
    async fn create_reserves_and_awaits_payment() {
        let (_, service) = service();

        let id = service
            .order_create(UserId::new(1), vec![OrderItem::new(100, 3)])
            .await
            .unwrap();

        let info = service.order_info(id).await.unwrap();
        assert_eq!(info.status, OrderStatus::AwaitingPayment);
        assert_eq!(info.user_id, UserId::new(1));
        assert_eq!(info.items, vec![OrderItem::new(100, 3)]);
        assert_eq!(service.stock().stocks_info(Sku::new(100)).await.unwrap(), 7);
        assert_eq!(
            statuses(&service, id).await,
            vec![OrderStatus::New, OrderStatus::AwaitingPayment]
        );
    }

    #[tokio::test]
    async fn shortage_fails_the_order() {
        let (_, service) = service();

        let err = service
            .order_create(UserId::new(1), vec![OrderItem::new(200, 3)])
            .await
            .unwrap_err();

        let order_id = match err {
            ServiceError::CannotFulfill {
                order_id,
                source: StorageError::InsufficientStock { .. },
            } => order_id,
            other => panic!("expected CannotFulfill, got {other:?}"),
        };
        assert_eq!(
            service.order_info(order_id).await.unwrap().status,
            OrderStatus::Failed
        );
        assert_eq!(
            statuses(&service, order_id).await,
            vec![OrderStatus::New, OrderStatus::Failed]
        );
    }

    #[tokio::test]
    async fn unknown_sku_fails_the_order() {
        let (_, service) = service();

        let err = service
            .order_create(
                UserId::new(1),
                vec![OrderItem::new(100, 1), OrderItem::new(999, 1)],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::CannotFulfill {
                source: StorageError::SkuNotFound(_),
                ..
            }
        ));
        assert_eq!(service.stock().stocks_info(Sku::new(100)).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn empty_order_is_rejected_before_storage() {
        let (store, service) = service();

        let err = service
            .order_create(UserId::new(1), vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidOrder(_)));
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn pay_consumes_reservation() {
        let (store, service) = service();
        let id = service
            .order_create(UserId::new(1), vec![OrderItem::new(100, 3)])
            .await
            .unwrap();

        service.order_pay(id).await.unwrap();

        assert_eq!(service.order_info(id).await.unwrap().status, OrderStatus::Payed);
        let entry = store.get_by_sku(Scope::Auto, Sku::new(100)).await.unwrap();
        assert_eq!(entry, StockItem::new(100, 7, 0));
    }

    #[tokio::test]
    async fn cancel_releases_reservation() {
        let (store, service) = service();
        let id = service
            .order_create(UserId::new(1), vec![OrderItem::new(100, 3)])
            .await
            .unwrap();

        service.order_cancel(id).await.unwrap();

        assert_eq!(
            service.order_info(id).await.unwrap().status,
            OrderStatus::Cancelled
        );
        let entry = store.get_by_sku(Scope::Auto, Sku::new(100)).await.unwrap();
        assert_eq!(entry, StockItem::new(100, 10, 0));
    }

    #[tokio::test]
    async fn pay_twice_is_rejected_without_side_effects() {
        let (store, service) = service();
        let id = service
            .order_create(UserId::new(1), vec![OrderItem::new(100, 3)])
            .await
            .unwrap();
        service.order_pay(id).await.unwrap();
        let events_before = store.event_count().await;

        let err = service.order_pay(id).await.unwrap_err();

        assert!(matches!(err, ServiceError::InvalidStatusTransition { .. }));
        assert_eq!(store.event_count().await, events_before);
        let entry = store.get_by_sku(Scope::Auto, Sku::new(100)).await.unwrap();
        assert_eq!(entry, StockItem::new(100, 7, 0));
    }

    #[tokio::test]
    async fn failed_order_cannot_be_paid_or_cancelled() {
        let (_, service) = service();
        let Err(ServiceError::CannotFulfill { order_id, .. }) = service
            .order_create(UserId::new(1), vec![OrderItem::new(200, 5)])
            .await
        else {
            panic!("expected CannotFulfill");
        };

        assert!(matches!(
            service.order_pay(order_id).await,
            Err(ServiceError::InvalidStatusTransition { .. })
        ));
        assert!(matches!(
            service.order_cancel(order_id).await,
            Err(ServiceError::InvalidStatusTransition { .. })
        ));
    }

    #[tokio::test]
    async fn recorded_status_never_overwrites_a_later_transition() {
        let (store, service) = service();
        let id = service
            .order_create(UserId::new(1), vec![OrderItem::new(100, 2)])
            .await
            .unwrap();
        service.order_pay(id).await.unwrap();
        let events_before = store.event_count().await;

        let late_failure = service
            .record_status(id, OrderStatus::Failed, "fail", OrderStatus::can_fail)
            .await;
        let late_reservation = service
            .record_status(
                id,
                OrderStatus::AwaitingPayment,
                "await payment",
                OrderStatus::can_await_payment,
            )
            .await;

        assert!(matches!(
            late_failure,
            Err(ServiceError::InvalidStatusTransition { order_id, .. }) if order_id == id
        ));
        assert!(matches!(
            late_reservation,
            Err(ServiceError::InvalidStatusTransition { .. })
        ));
        assert_eq!(service.order_info(id).await.unwrap().status, OrderStatus::Payed);
        assert_eq!(store.event_count().await, events_before);
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let (_, service) = service();
        let id = OrderId::new(404);

        assert!(matches!(
            service.order_info(id).await,
            Err(ServiceError::OrderNotFound(_))
        ));
        assert!(matches!(
            service.order_pay(id).await,
            Err(ServiceError::OrderNotFound(_))
        ));
        assert!(matches!(
            service.order_cancel(id).await,
            Err(ServiceError::OrderNotFound(_))
        ));
        assert!(matches!(
            service.order_events(id).await,
            Err(ServiceError::OrderNotFound(_))
        ));
    }
}
