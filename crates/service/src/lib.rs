//! Order lifecycle for the order management service.
//!
//! This crate provides:
//! - The order service: create, pay, cancel and inspect orders
//! - The stock service translating order items into ledger operations
//! - The message producer seam and the outbox dispatcher feeding it

pub mod dispatcher;
pub mod error;
pub mod order;
pub mod producer;
pub mod stock;

pub use dispatcher::{
    DEFAULT_TOPIC, DispatcherConfig, DispatcherHandle, Dispatched, StatusEventDispatcher,
    TRACE_ID_HEADER,
};
pub use error::{Result, ServiceError};
pub use order::{OrderService, Repositories};
pub use producer::{
    Headers, InMemoryProducer, LogProducer, MessageProducer, ProducerError, PublishedMessage,
};
pub use stock::StockService;
