//! Module: db
//! Responsibility: persistence of entity records: storage port, value codec,
//! record lifecycle, queries, collections and schema reconciliation.
//! Boundary: everything here runs inside one `Session`.

pub mod cache;
pub mod codec;
pub mod collection;
pub mod query;
pub mod record;
pub mod schema;
pub mod session;
pub mod storage;

pub use cache::TitleCache;
pub use collection::Collection;
pub use query::{Condition, Filter, OrderDirection};
pub use record::{AccessMode, Record};
pub use schema::SchemaSynchronizer;
pub use session::{Session, SessionBuilder};
pub use storage::{SqlValue, SqliteStorage, Storage};
