//! End-to-end flows through the public surface: declare, save, query, delete.

mod common;

use common::{CUSTOMER, INVOICE, LINE, PROJECT, TASK, create, ids, memory_session};
use std::{cell::RefCell, rc::Rc, sync::Arc};
use tabula::{
    db::storage::{ColumnInfo, IndexInfo, Row, SqlValue, SqliteStorage, Storage},
    obs::metrics,
    prelude::*,
};

// ---- queries -----------------------------------------------------------

#[test]
fn open_invoices_of_vip_customers() {
    let session = memory_session();
    create(&session, CUSTOMER, &[("name", "Acme".into()), ("notes", "vip".into())]);
    create(&session, CUSTOMER, &[("name", "Bolt".into())]);
    for (amount, customer, status) in [
        (50.0, 1, "paid"),
        (150.0, 1, "open"),
        (250.0, 2, "open"),
        (120.0, 1, "open"),
    ] {
        create(
            &session,
            INVOICE,
            &[
                ("amount", amount.into()),
                ("customer", customer.into()),
                ("status", status.into()),
            ],
        );
    }

    let vip = Filter::new(CUSTOMER).condition(Condition::like("notes", "vip"));
    let filter = Filter::new(INVOICE)
        .condition(
            Condition::equals("status", "open")
                .and(Condition::greater("amount", 100))
                .and(Condition::in_filter("customer", vip)),
        )
        .order_by("amount", OrderDirection::Desc);

    let found = filter.execute(&session).expect("query should run");
    assert_eq!(ids(&found), [2, 4]);
    assert_eq!(filter.count(&session).expect("count should run"), 2);

    let json = filter.to_json().expect("filter should encode");
    let wire: serde_json::Value = serde_json::from_str(&json).expect("wire record is JSON");
    assert_eq!(wire["base_type"], "invoice");
    assert_eq!(wire["base_condition"]["type"], "and");

    let restored = Filter::from_json(&json).expect("filter should decode");
    assert_eq!(
        ids(&restored.execute(&session).expect("query should run")),
        [2, 4]
    );
}

#[test]
fn titles_are_resolved_through_the_session() {
    let session = memory_session();
    create(&session, CUSTOMER, &[("name", "Acme".into())]);

    assert_eq!(
        session
            .title(CUSTOMER, &Value::Int(1))
            .expect("title lookup should succeed"),
        Some("Acme".to_string())
    );
    assert_eq!(
        session
            .title(CUSTOMER, &Value::Int(9))
            .expect("title lookup should succeed"),
        None
    );
}

// ---- deletes -----------------------------------------------------------

#[test]
fn deleting_an_invoice_removes_its_lines() {
    let session = memory_session();
    create(&session, INVOICE, &[("amount", 10.into())]);
    for qty in [1, 2] {
        create(&session, LINE, &[("invoice", 1.into()), ("qty", qty.into())]);
    }

    let mut invoice = session.load_for_write(INVOICE, 1).expect("invoice should load");
    assert!(invoice.has_referrers(&session).expect("referrer scan should run"));
    assert!(invoice.delete(&session, false).expect("delete should run"));

    assert!(Filter::get_all(&session, LINE).expect("scan should run").is_empty());
    let err = session.load(INVOICE, 1).expect_err("row is gone");
    assert!(err.is_not_found());
}

#[test]
fn blocked_project_survives_until_tasks_move() {
    let session = memory_session();
    create(&session, PROJECT, &[("name", "alpha".into())]);
    let mut task = create(&session, TASK, &[("project", 1.into())]);

    metrics::reset();
    let mut project = session.load_for_write(PROJECT, 1).expect("project should load");
    assert!(!project.delete(&session, false).expect("delete should run"));
    assert_eq!(metrics::snapshot().ops.blocked_deletes, 1);
    assert!(project.is_write());

    task.load_for_write(&session, 1, true).expect("task should load");
    task.set("project", Value::Null).expect("reference should clear");
    task.save(&session, false, false).expect("save should succeed");

    assert!(project.delete(&session, false).expect("delete should run"));
    assert!(session.locks().held_keys().is_empty());
    assert!(Filter::get_all(&session, PROJECT).expect("scan should run").is_empty());
    assert_eq!(
        Filter::new(PROJECT)
            .include_deleted(true)
            .count(&session)
            .expect("count should run"),
        1
    );
}

// ---- dirty tracking ----------------------------------------------------

///
/// RecordingStorage
/// Forwards to SQLite and remembers every statement it was handed.
///

struct RecordingStorage {
    inner: SqliteStorage,
    statements: Rc<RefCell<Vec<String>>>,
}

impl RecordingStorage {
    fn note(&self, sql: &str) {
        self.statements.borrow_mut().push(sql.to_string());
    }
}

impl Storage for RecordingStorage {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, InternalError> {
        self.note(sql);
        self.inner.execute(sql, params)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, InternalError> {
        self.inner.query(sql, params)
    }

    fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64, InternalError> {
        self.note(sql);
        self.inner.insert(sql, params)
    }

    fn table_exists(&self, table: &str) -> Result<bool, InternalError> {
        self.inner.table_exists(table)
    }

    fn describe(&self, table: &str) -> Result<Vec<ColumnInfo>, InternalError> {
        self.inner.describe(table)
    }

    fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, InternalError> {
        self.inner.indexes(table)
    }

    fn auto_increment(&self, table: &str) -> Result<bool, InternalError> {
        self.inner.auto_increment(table)
    }
}

#[test]
fn updates_write_only_changed_columns() {
    let statements = Rc::new(RefCell::new(Vec::new()));
    let storage = RecordingStorage {
        inner: SqliteStorage::open_in_memory().expect("in-memory database should open"),
        statements: Rc::clone(&statements),
    };
    let session = Session::builder(Arc::new(common::registry()), storage)
        .config(common::config(None))
        .build()
        .expect("session should build");
    session.ensure_schema().expect("schema should reconcile");

    create(&session, INVOICE, &[("amount", 10.into())]);
    statements.borrow_mut().clear();

    let mut invoice = session.load_for_write(INVOICE, 1).expect("invoice should load");
    assert!(!invoice.save(&session, false, true).expect("save should run"));
    assert!(statements.borrow().is_empty());

    invoice.set("amount", 12.5).expect("amount should be accepted");
    assert_eq!(invoice.changed_fields(), ["amount"]);
    assert!(invoice.save(&session, false, false).expect("save should run"));

    assert_eq!(
        *statements.borrow(),
        [r#"UPDATE "invoice" SET "amount" = ?, "modified_on" = ? WHERE "id" = ?"#]
    );
    assert!(!invoice.is_dirty());
}
