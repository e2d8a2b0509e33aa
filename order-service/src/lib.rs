pub mod api;
pub mod broker;
pub mod db;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod order;
pub mod outbox;
pub mod postgres;
pub mod reservation;
pub mod schema;
pub mod store;

pub use broker::{KafkaBroker, KafkaConfig, MessageBroker, PublishError};
pub use handlers::{CreateOrderError, CreateOrderHandler};
pub use memory::InMemoryOrderStore;
pub use order::{Order, OrderLine, OrderStatus};
pub use outbox::{OutboxPublisher, PublisherConfig, RetryPolicy};
pub use postgres::PgOrderStore;
pub use reservation::{HttpReservationClient, ReservationClient, ReservationError};
pub use store::{OrderStore, OutboxStore, StoreError};
