//! Module: db::query
//! Responsibility: predicate trees over entity fields, their SQL pushdown
//! and in-memory evaluation, and the `Filter` query object.
//! Does not own: row hydration rules (see `db::record`).
//! Boundary: a tree is validated against the registry before any SQL is
//! issued; nodes on side-channel fields are re-checked in memory.

mod condition;
mod filter;
mod plan;


pub use condition::Condition;
pub use filter::{Filter, OrderDirection};
