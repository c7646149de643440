//! Module: db::storage
//! Responsibility: the narrow relational port used by records, filters and
//! the schema synchronizer.
//! Does not own: value encoding (see `db::codec`) or SQL composition.
//! Boundary: parameters are always bound; identifiers are quoted with
//! [`quote_ident`].

mod sqlite;


pub use sqlite::SqliteStorage;

use crate::error::InternalError;
use std::collections::BTreeMap;

/// One result row keyed by column name.
pub type Row = BTreeMap<String, SqlValue>;

///
/// SqlValue
/// Storage-level scalar, mirroring the engine's storage classes.
///

#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

///
/// ColumnInfo
/// Introspected physical column (`DESCRIBE`).
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

///
/// IndexInfo
/// Introspected secondary index (`SHOW INDEXES`), columns in index order.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

///
/// Storage
///

pub trait Storage {
    /// Run a statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, InternalError>;

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, InternalError>;

    /// Run an insert, returning the generated row id.
    fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64, InternalError>;

    fn table_exists(&self, table: &str) -> Result<bool, InternalError>;

    fn describe(&self, table: &str) -> Result<Vec<ColumnInfo>, InternalError>;

    /// Declared secondary indexes; implicit primary-key indexes are excluded.
    fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, InternalError>;

    /// Whether the table's key is generated by the engine.
    fn auto_increment(&self, table: &str) -> Result<bool, InternalError>;
}

/// Quote an identifier for inclusion in SQL text.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
