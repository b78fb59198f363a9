//! Storage engine for a single-file, page-addressable relational heap:
//! slotted pages, a bounded LRU buffer, a durable catalog, and a
//! table-operation façade. No SQL front end; callers drive the public API
//! directly (see `Database`).

pub mod buffer;
pub mod catalog;
pub mod database;
pub mod error;
pub mod page;
pub mod record;
pub mod schema;
pub mod storage_manager;
pub mod types;

pub use database::Database;
pub use error::{FluxError, Result};
pub use schema::{AttributeSchema, TableSchema};
pub use types::{DataType, Value};
