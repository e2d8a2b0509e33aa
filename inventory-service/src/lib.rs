pub mod api;
pub mod db;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;

pub use ledger::{LedgerError, StockLedger};
pub use memory::InMemoryStockLedger;
pub use postgres::PgStockLedger;
