//! Module: db::schema
//! Responsibility: reconcile the physical table of an entity type with its
//! declared structure (table, columns, column types, index groups).
//! Does not own: the declarations themselves (see `model::structure`).
//! Boundary: assumes it is the only DDL writer; concurrent runs across
//! processes are not coordinated.


use crate::{
    db::{
        Session, codec,
        storage::{ColumnInfo, IndexInfo, Row, SqlValue, Storage, quote_ident},
    },
    error::{ErrorOrigin, InternalError},
    model::{
        declaration::FieldDeclaration,
        entity_type::{EntityType, METADATA_FIELD},
    },
    obs::sink::{self, MetricsEvent},
};
use std::collections::{BTreeMap, BTreeSet};

///
/// SchemaSynchronizer
///

pub struct SchemaSynchronizer<'a> {
    session: &'a Session,
}

impl<'a> SchemaSynchronizer<'a> {
    #[must_use]
    pub const fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Bring the table of `ty` in line with its declaration.
    ///
    /// Returns whether any DDL was issued; a second call with unchanged
    /// declarations returns `false`.
    pub fn ensure_in_storage(&self, ty: &EntityType) -> Result<bool, InternalError> {
        let mut ddl = Ddl::new(self.session.storage(), ty);

        if self.session.storage().table_exists(ty.name())? {
            self.reconcile(&mut ddl, ty)?;
        } else {
            ddl.create_table()?;
        }

        if ddl.statements > 0 {
            sink::record(MetricsEvent::Ddl {
                entity: ty.name().to_string(),
                statements: ddl.statements,
            });
            tracing::info!(
                entity = ty.name(),
                statements = ddl.statements,
                "schema synchronized"
            );
        }

        Ok(ddl.statements > 0)
    }

    fn reconcile(&self, ddl: &mut Ddl<'_>, ty: &EntityType) -> Result<(), InternalError> {
        let storage = self.session.storage();
        let physical: BTreeMap<String, ColumnInfo> = storage
            .describe(ty.name())?
            .into_iter()
            .map(|column| (column.name.clone(), column))
            .collect();

        if let Some(reason) = key_change(storage, ty, &physical)? {
            if !self.session.config().schema.allow_table_rebuild {
                return Err(InternalError::conflict(
                    ErrorOrigin::Schema,
                    format!("{} needs a table rebuild ({reason}) but rebuilds are disabled", ty.name()),
                ));
            }
            tracing::warn!(
                entity = ty.name(),
                %reason,
                "rebuilding table; existing rows are discarded"
            );
            ddl.exec(format!("DROP TABLE {}", quote_ident(ty.name())))?;
            return ddl.create_table();
        }

        let declared: BTreeMap<&str, &FieldDeclaration> = ty
            .structure()
            .column_fields()
            .map(|decl| (decl.name.as_str(), decl))
            .collect();
        let missing: Vec<&FieldDeclaration> = declared
            .values()
            .filter(|decl| !physical.contains_key(&decl.name))
            .copied()
            .collect();
        let retyped: Vec<&FieldDeclaration> = declared
            .values()
            .filter(|decl| {
                physical
                    .get(&decl.name)
                    .is_some_and(|column| !same_type(column, decl))
            })
            .copied()
            .collect();
        let undeclared: Vec<&str> = physical
            .keys()
            .map(String::as_str)
            .filter(|name| !declared.contains_key(name))
            .collect();

        // Indexes go first; SQLite refuses to drop an indexed column.
        let wanted = ty.structure().index_groups();
        let touched: BTreeSet<&str> = retyped
            .iter()
            .map(|decl| decl.name.as_str())
            .chain(undeclared.iter().copied())
            .collect();
        let mut kept = BTreeSet::new();
        for index in storage.indexes(ty.name())? {
            let group = index_group(ty, &index.name);
            let intact = group.and_then(|g| wanted.get(g)) == Some(&index.columns)
                && !index.columns.iter().any(|c| touched.contains(c.as_str()));
            if intact {
                kept.insert(index.name.clone());
            } else {
                ddl.drop_index(&index)?;
            }
        }

        let has_blob = physical.contains_key(METADATA_FIELD);
        for decl in &missing {
            ddl.add_column(decl)?;
            if has_blob {
                ddl.backfill_from_blob(decl)?;
            }
        }

        for decl in &retyped {
            ddl.exec(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(ty.name()),
                quote_ident(&decl.name)
            ))?;
            ddl.add_column(decl)?;
            ddl.fill_default(decl)?;
        }

        for name in &undeclared {
            if let Some(decl) = ty.structure().field(name).filter(|d| d.is_side_channel())
                && has_blob
            {
                ddl.migrate_into_blob(decl)?;
            }
            ddl.exec(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(ty.name()),
                quote_ident(name)
            ))?;
        }

        for (group, columns) in &wanted {
            if !kept.contains(&index_name(ty, group)) {
                ddl.create_index(group, columns)?;
            }
        }

        Ok(())
    }
}

///
/// Ddl
/// Statement runner for one table; counts what it issues.
///

struct Ddl<'a> {
    storage: &'a dyn Storage,
    ty: &'a EntityType,
    table: String,
    statements: u64,
}

impl<'a> Ddl<'a> {
    fn new(storage: &'a dyn Storage, ty: &'a EntityType) -> Self {
        Self {
            storage,
            ty,
            table: quote_ident(ty.name()),
            statements: 0,
        }
    }

    fn exec(&mut self, sql: String) -> Result<(), InternalError> {
        tracing::info!(entity = self.ty.name(), %sql, "ddl");
        self.storage.execute(&sql, &[])?;
        self.statements += 1;

        Ok(())
    }

    fn create_table(&mut self) -> Result<(), InternalError> {
        let ty = self.ty;
        let key = ty.key_name();
        let columns: Vec<String> = ty
            .structure()
            .column_fields()
            .map(|decl| {
                let column = column_definition(decl);
                if decl.name != key {
                    column
                } else if ty.auto_increment() {
                    format!("{column} PRIMARY KEY AUTOINCREMENT")
                } else {
                    format!("{column} PRIMARY KEY")
                }
            })
            .collect();
        self.exec(format!("CREATE TABLE {} ({})", self.table, columns.join(", ")))?;

        for (group, columns) in ty.structure().index_groups() {
            self.create_index(&group, &columns)?;
        }

        Ok(())
    }

    fn add_column(&mut self, decl: &FieldDeclaration) -> Result<(), InternalError> {
        self.exec(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table,
            column_definition(decl)
        ))
    }

    fn create_index(&mut self, group: &str, columns: &[String]) -> Result<(), InternalError> {
        let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        self.exec(format!(
            "CREATE INDEX {} ON {} ({})",
            quote_ident(&index_name(self.ty, group)),
            self.table,
            columns.join(", ")
        ))
    }

    fn drop_index(&mut self, index: &IndexInfo) -> Result<(), InternalError> {
        self.exec(format!("DROP INDEX {}", quote_ident(&index.name)))
    }

    // Move values a side-channel field left in the blob into its new column.
    // Recreated columns start from the declared default rather than NULL.
    fn fill_default(&self, decl: &FieldDeclaration) -> Result<(), InternalError> {
        let value = codec::encode(decl.kind, &decl.initial_value())?;
        if matches!(value, SqlValue::Null) {
            return Ok(());
        }
        self.storage.execute(
            &format!("UPDATE {} SET {} = ?", self.table, quote_ident(&decl.name)),
            &[value],
        )?;

        Ok(())
    }

    fn backfill_from_blob(&self, decl: &FieldDeclaration) -> Result<(), InternalError> {
        let key = quote_ident(self.ty.key_name());
        let blob = quote_ident(METADATA_FIELD);
        let rows = self.storage.query(
            &format!("SELECT {key}, {blob} FROM {} WHERE {blob} IS NOT NULL", self.table),
            &[],
        )?;

        let mut moved = 0_usize;
        for mut row in rows {
            let Some(raw) = row.remove(METADATA_FIELD) else {
                continue;
            };
            let mut metadata = codec::decode_metadata(&raw)?;
            let Some(value) = metadata.remove(&decl.name) else {
                continue;
            };
            let value = match decl.kind.coerce(value) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(field = %decl.name, %err, "blob value dropped during backfill");
                    continue;
                }
            };

            let params = [
                codec::encode(decl.kind, &value)?,
                SqlValue::Blob(codec::encode_metadata(&metadata)?),
                row_key(&mut row, self.ty)?,
            ];
            self.storage.execute(
                &format!(
                    "UPDATE {} SET {} = ?, {blob} = ? WHERE {key} = ?",
                    self.table,
                    quote_ident(&decl.name)
                ),
                &params,
            )?;
            moved += 1;
        }
        if moved > 0 {
            tracing::info!(entity = self.ty.name(), field = %decl.name, rows = moved, "backfilled column from blob");
        }

        Ok(())
    }

    // Copy a column's values into the blob before the column is dropped.
    fn migrate_into_blob(&self, decl: &FieldDeclaration) -> Result<(), InternalError> {
        let key = quote_ident(self.ty.key_name());
        let blob = quote_ident(METADATA_FIELD);
        let column = quote_ident(&decl.name);
        let rows = self.storage.query(
            &format!(
                "SELECT {key}, {column}, {blob} FROM {} WHERE {column} IS NOT NULL",
                self.table
            ),
            &[],
        )?;

        for mut row in rows {
            let raw = row.remove(&decl.name).unwrap_or(SqlValue::Null);
            let value = match codec::decode(decl.kind, raw) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(field = %decl.name, %err, "column value dropped during migration");
                    continue;
                }
            };
            let mut metadata = match row.remove(METADATA_FIELD) {
                Some(raw) => codec::decode_metadata(&raw)?,
                None => codec::MetadataMap::new(),
            };
            metadata.insert(decl.name.clone(), value);

            let params = [
                SqlValue::Blob(codec::encode_metadata(&metadata)?),
                row_key(&mut row, self.ty)?,
            ];
            self.storage.execute(
                &format!("UPDATE {} SET {blob} = ? WHERE {key} = ?", self.table),
                &params,
            )?;
        }

        Ok(())
    }
}

// Reason the primary key can no longer be altered in place, if any.
fn key_change(
    storage: &dyn Storage,
    ty: &EntityType,
    physical: &BTreeMap<String, ColumnInfo>,
) -> Result<Option<String>, InternalError> {
    let key = ty.key_name();
    let Some(column) = physical.values().find(|column| column.primary_key) else {
        return Ok(Some("no primary key".to_string()));
    };

    if column.name != key {
        return Ok(Some(format!("key renamed from '{}' to '{key}'", column.name)));
    }
    if let Some(decl) = ty.structure().field(key)
        && !same_type(column, decl)
    {
        return Ok(Some(format!("key type changed to {:?}", decl.kind)));
    }
    if storage.auto_increment(ty.name())? != ty.auto_increment() {
        return Ok(Some("auto-increment mode changed".to_string()));
    }

    Ok(None)
}

fn column_definition(decl: &FieldDeclaration) -> String {
    format!(
        "{} {}",
        quote_ident(&decl.name),
        decl.kind.column_type().unwrap_or("TEXT")
    )
}

fn same_type(column: &ColumnInfo, decl: &FieldDeclaration) -> bool {
    decl.kind
        .column_type()
        .is_some_and(|declared| column.column_type.eq_ignore_ascii_case(declared))
}

fn index_name(ty: &EntityType, group: &str) -> String {
    format!("{}__{group}", ty.name())
}

// Group name of an index this synchronizer created.
fn index_group<'a>(ty: &EntityType, index: &'a str) -> Option<&'a str> {
    index
        .strip_prefix(ty.name())
        .and_then(|rest| rest.strip_prefix("__"))
}

fn row_key(row: &mut Row, ty: &EntityType) -> Result<SqlValue, InternalError> {
    row.remove(ty.key_name()).ok_or_else(|| {
        InternalError::corruption(
            ErrorOrigin::Schema,
            format!("{} row without key column", ty.name()),
        )
    })
}
