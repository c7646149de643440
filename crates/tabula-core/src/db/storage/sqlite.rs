use super::{ColumnInfo, IndexInfo, Row, SqlValue, Storage};
use crate::error::InternalError;
use rusqlite::{
    Connection, OptionalExtension, params, params_from_iter,
    types::{ToSql, ToSqlOutput, Value as SqliteValue, ValueRef},
};
use std::path::Path;

///
/// SqliteStorage
///
/// `DESCRIBE` maps to `pragma_table_info`, `SHOW INDEXES` to
/// `pragma_index_list` plus `pragma_index_info`; auto-increment is read from
/// the table's DDL. SQLite keeps declared column types verbatim, so type
/// reconciliation compares declared strings.
///

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InternalError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, InternalError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Storage for SqliteStorage {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, InternalError> {
        tracing::debug!(sql, params = params.len(), "execute");

        Ok(self.conn.execute(sql, params_from_iter(params))?)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, InternalError> {
        tracing::debug!(sql, params = params.len(), "query");

        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(params))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), SqlValue::from(row.get_ref(i)?));
            }
            out.push(record);
        }

        Ok(out)
    }

    fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64, InternalError> {
        self.execute(sql, params)?;

        Ok(self.conn.last_insert_rowid())
    }

    fn table_exists(&self, table: &str) -> Result<bool, InternalError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()?;

        Ok(found.is_some())
    }

    fn describe(&self, table: &str) -> Result<Vec<ColumnInfo>, InternalError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let columns = stmt
            .query_map(params![table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    column_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                    default: row.get(3)?,
                    primary_key: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(columns)
    }

    fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, InternalError> {
        let mut list = self.conn.prepare(
            "SELECT name, \"unique\" FROM pragma_index_list(?1) WHERE origin = 'c' ORDER BY name",
        )?;
        let declared = list
            .query_map(params![table], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut info = self
            .conn
            .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
        let mut out = Vec::with_capacity(declared.len());
        for (name, unique) in declared {
            let columns = info
                .query_map(params![name], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            out.push(IndexInfo {
                name,
                columns,
                unique,
            });
        }

        Ok(out)
    }

    fn auto_increment(&self, table: &str) -> Result<bool, InternalError> {
        let ddl: Option<String> = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;

        Ok(ddl.is_some_and(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT")))
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Self::Integer(v) => ToSqlOutput::Owned(SqliteValue::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Owned(SqliteValue::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(v) => Self::Integer(v),
            ValueRef::Real(v) => Self::Real(v),
            ValueRef::Text(v) => Self::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Self::Blob(v.to_vec()),
        }
    }
}
