use super::*;
use crate::{
    config::{Config, QueryConfig},
    db::{Session, storage::SqlValue},
    error::ErrorClass,
    model::{declaration::FieldDeclaration, hooks::EntityHooks, registry::Registry},
    obs::metrics,
    test_support::{
        CONTACT, COUNTRY, CUSTOMER, INVOICE, LINE, NOTE, PROJECT, RecordingFiles, TASK,
        build_session, fast_config, invoice_type, registry, session, session_with, start,
    },
};
use proptest::prelude::*;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

// ---- helpers -----------------------------------------------------------

fn saved(session: &Session, type_name: &str, values: &[(&str, Value)]) -> Record {
    let mut record = session
        .new_record(type_name)
        .expect("fixture type should exist");
    for (name, value) in values {
        record
            .set(name, value.clone())
            .expect("fixture value should be accepted");
    }
    assert!(record.save(session, false, false).expect("save should succeed"));

    record
}

fn customer(session: &Session, name: &str) -> Record {
    saved(session, CUSTOMER, &[("name", name.into())])
}

fn row_count(session: &Session, table: &str) -> usize {
    session
        .storage()
        .query(&format!("SELECT * FROM \"{table}\""), &[])
        .expect("table should be readable")
        .len()
}

// ---- construction and typed access -------------------------------------

#[test]
fn new_record_is_writable_with_defaults() {
    let session = session();
    let invoice = session.new_record(INVOICE).expect("type should exist");

    assert!(invoice.is_write());
    assert!(!invoice.in_storage());
    assert!(!invoice.has_id());
    assert_eq!(invoice.get("status").expect("field exists"), &Value::from("open"));
    assert!(!invoice.is_dirty());
}

#[test]
fn set_coerces_and_checks_enumerations() {
    let session = session();
    let mut invoice = session.new_record(INVOICE).expect("type should exist");

    invoice.set("amount", "12.5").expect("numeric text should coerce");
    assert_eq!(invoice.get("amount").expect("field exists"), &Value::Float(12.5));

    let err = invoice
        .set("status", "void")
        .expect_err("unknown enumeration value should be rejected");
    assert_eq!(err.class, ErrorClass::Validation);

    let err = invoice
        .set("nothing", 1)
        .expect_err("unknown field should be rejected");
    assert!(err.is_usage());
}

#[test]
fn composite_fields_go_through_accessors() {
    let session = session();
    let mut invoice = session.new_record(INVOICE).expect("type should exist");
    let price = Currency {
        local_value: Some(100.0),
        currency: Some("EUR".to_string()),
        foreign_value: None,
    };

    invoice
        .set_currency("price", price.clone())
        .expect("currency should be assignable");
    assert_eq!(invoice.currency("price").expect("accessor should work"), price);

    assert!(invoice.set("price_localvalue", 5.0).is_err());
    assert!(invoice.get("price").is_err());
    assert!(invoice.address("price").is_err());
}

#[test]
fn validate_reports_every_missing_required_field() {
    let session = session();
    let mut record = session.new_record(CUSTOMER).expect("type should exist");

    let problems = record.validate().expect_err("name is required");
    assert_eq!(problems, ["field 'name' is required"]);

    let err = record
        .save(&session, false, false)
        .expect_err("save should validate");
    assert_eq!(err.problems(), ["field 'name' is required"]);
}

// ---- save ----------------------------------------------------------------

#[test]
fn first_save_assigns_key_and_timestamps() {
    let session = session();
    let invoice = saved(&session, INVOICE, &[("amount", 20.into())]);

    assert_eq!(invoice.id(), &Value::Int(1));
    assert!(invoice.in_storage());
    assert!(!invoice.is_write());
    assert_eq!(invoice.get("created_on").expect("injected"), &Value::DateTime(start()));
    assert_eq!(invoice.get("modified_on").expect("injected"), &Value::DateTime(start()));
    assert!(!session.locks().is_held("invoice.1"));
}

#[test]
fn changed_fields_track_columns_and_blob() {
    let session = session();
    saved(&session, INVOICE, &[("amount", 20.into()), ("notes", "first".into())]);

    let mut invoice = session.load_for_write(INVOICE, 1).expect("row should load");
    assert!(session.locks().is_held("invoice.1"));
    assert!(!invoice.is_dirty());

    invoice.set("amount", 30).expect("amount is writable");
    invoice.set("notes", "second").expect("notes are writable");
    assert_eq!(invoice.changed_fields(), ["amount", "metadata"]);

    invoice.set("amount", 20.0).expect("amount is writable");
    assert_eq!(invoice.changed_fields(), ["metadata"]);
    assert_eq!(invoice.loaded_value("notes").expect("field exists"), &Value::from("first"));

    assert!(invoice.save(&session, false, false).expect("save should succeed"));
    assert!(!session.locks().is_held("invoice.1"));

    let reloaded = session.load(INVOICE, 1).expect("row should load");
    assert_eq!(reloaded.get("notes").expect("field exists"), &Value::from("second"));
}

#[test]
fn unchanged_save_is_skipped_unless_forced() {
    let session = session();
    saved(&session, INVOICE, &[("amount", 20.into())]);

    let mut invoice = session.load_for_write(INVOICE, 1).expect("row should load");
    assert!(!invoice.save(&session, false, true).expect("noop save should succeed"));
    assert!(invoice.is_write());
    assert!(invoice.save(&session, true, false).expect("forced save should write"));
    assert!(!invoice.is_write());
}

#[test]
fn read_mode_rejects_mutation_and_save() {
    let session = session();
    saved(&session, INVOICE, &[("amount", 20.into())]);

    let mut invoice = session.load(INVOICE, 1).expect("row should load");
    assert!(invoice.set("amount", 1).expect_err("read mode").is_usage());
    assert!(
        invoice
            .save(&session, true, false)
            .expect_err("read mode")
            .is_usage()
    );
}

#[test]
fn stored_key_is_immutable() {
    let session = session();
    saved(&session, INVOICE, &[("amount", 20.into())]);

    let mut invoice = session.load_for_write(INVOICE, 1).expect("row should load");
    invoice.set("id", 1).expect("same key is accepted");
    assert!(invoice.set("id", 2).expect_err("key change").is_usage());
    invoice.release_lock(&session).expect("release should succeed");
}

#[test]
fn unknown_blob_entries_survive_a_save() {
    let session = session();
    let stored = customer(&session, "Ada");

    let mut extra = codec::MetadataMap::new();
    extra.insert("legacy".to_string(), Value::from("kept"));
    session
        .storage()
        .execute(
            "UPDATE \"customer\" SET \"metadata\" = ? WHERE \"id\" = ?",
            &[
                SqlValue::Blob(codec::encode_metadata(&extra).expect("blob should encode")),
                SqlValue::Integer(stored.id().as_int().expect("integer key")),
            ],
        )
        .expect("blob should be writable");

    let mut record = session.load_for_write(CUSTOMER, 1).expect("row should load");
    record.set("notes", "hello").expect("notes are writable");
    record.save(&session, false, false).expect("save should succeed");

    let rows = session
        .storage()
        .query("SELECT \"metadata\" FROM \"customer\"", &[])
        .expect("table should be readable");
    let blob = codec::decode_metadata(&rows[0]["metadata"]).expect("blob should decode");
    assert_eq!(blob.get("legacy"), Some(&Value::from("kept")));
    assert_eq!(blob.get("notes"), Some(&Value::from("hello")));
}

#[test]
fn save_and_load_are_counted() {
    metrics::reset();
    let session = session();
    saved(&session, INVOICE, &[("amount", 20.into())]);
    session.load(INVOICE, 1).expect("row should load");

    let snapshot = metrics::snapshot();
    assert_eq!(snapshot.ops.save_calls, 1);
    assert_eq!(snapshot.ops.load_calls, 1);
    assert_eq!(snapshot.entities["invoice"].save_calls, 1);
}

// ---- load ----------------------------------------------------------------

#[test]
fn missing_rows_fail_or_reset() {
    let session = session();

    let err = session.load(INVOICE, 99).expect_err("row is missing");
    assert!(err.is_not_found());

    let mut record = session.new_record(INVOICE).expect("type should exist");
    assert!(!record.load_for_read(&session, 99, false).expect("lookup should run"));
    assert_eq!(record.mode(), AccessMode::Read);
    assert!(!record.in_storage());

    assert!(!record.load_for_write(&session, 99, false).expect("lookup should run"));
    assert!(record.is_write());
    assert!(!session.locks().is_held("invoice.99"));
}

#[test]
fn load_for_read_releases_a_held_lock() {
    let session = session();
    saved(&session, INVOICE, &[("amount", 20.into())]);

    let mut record = session.load_for_write(INVOICE, 1).expect("row should load");
    assert!(session.locks().is_held("invoice.1"));
    record.load_for_read(&session, 1, true).expect("row should load");
    assert!(!session.locks().is_held("invoice.1"));
    assert_eq!(record.mode(), AccessMode::Read);
}

#[test]
fn write_lock_excludes_a_second_holder() {
    let session = session();
    saved(&session, INVOICE, &[("amount", 20.into())]);

    let _held = session.load_for_write(INVOICE, 1).expect("row should load");
    let err = session
        .load_for_write(INVOICE, 1)
        .expect_err("lock is not reentrant");
    assert_eq!(err.class, ErrorClass::Concurrency);
}

// ---- manual keys -----------------------------------------------------------

#[test]
fn manual_keys_must_be_assigned_and_unique() {
    let session = session();

    let mut unkeyed = session.new_record(COUNTRY).expect("type should exist");
    unkeyed.set("label", "Nowhere").expect("label is writable");
    assert!(unkeyed.save(&session, false, false).expect_err("no key").is_usage());

    saved(&session, COUNTRY, &[("code", "de".into()), ("label", "Germany".into())]);
    let mut duplicate = session.new_record(COUNTRY).expect("type should exist");
    duplicate.set("code", "de").expect("key is writable");
    let err = duplicate
        .save(&session, false, false)
        .expect_err("key is taken");
    assert_eq!(err.class, ErrorClass::Conflict);
    assert!(!session.locks().is_held("country.__keys"));
}

#[test]
fn missing_manual_key_is_kept_after_reset() {
    let session = session();
    let mut record = session.new_record(COUNTRY).expect("type should exist");

    assert!(!record.load_for_write(&session, "fr", false).expect("lookup should run"));
    assert_eq!(record.id(), &Value::from("fr"));
    record.set("label", "France").expect("label is writable");
    assert!(record.save(&session, false, false).expect("save should insert"));
    assert_eq!(
        session.title(COUNTRY, &Value::from("fr")).expect("title should resolve"),
        Some("France".to_string())
    );
}

// ---- hooks -----------------------------------------------------------------

struct CountingHooks {
    saves: Arc<AtomicUsize>,
}

impl EntityHooks for CountingHooks {
    fn on_save(&self, record: &mut Record) -> bool {
        record.value_of("amount").as_float().is_none_or(|v| v >= 0.0)
    }

    fn on_after_save(&self, _record: &Record) {
        self.saves.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn hooks_can_veto_and_observe_saves() {
    let saves = Arc::new(AtomicUsize::new(0));
    let ty = EntityType::builder("ledger")
        .field(FieldDeclaration::new("amount", FieldKind::Number))
        .hooks(CountingHooks {
            saves: Arc::clone(&saves),
        })
        .build()
        .expect("type should build");
    let registry = Registry::new()
        .with(ty)
        .expect("registry should build");
    let session = session_with(registry, fast_config());

    let mut record = session.new_record("ledger").expect("type should exist");
    record.set("amount", -5).expect("amount is writable");
    assert!(!record.save(&session, false, false).expect("veto is not an error"));
    assert!(!record.in_storage());

    record.set("amount", 5).expect("amount is writable");
    assert!(record.save(&session, false, false).expect("save should succeed"));
    assert_eq!(saves.load(Ordering::SeqCst), 1);
}

// ---- delete ----------------------------------------------------------------

#[test]
fn hard_delete_clears_referring_links() {
    let session = session();
    let ada = customer(&session, "Ada");
    saved(
        &session,
        INVOICE,
        &[("amount", 20.into()), ("customer", ada.id().clone())],
    );

    let mut ada = session.load_for_write(CUSTOMER, 1).expect("row should load");
    assert!(ada.has_referrers(&session).expect("lookup should run"));
    assert!(ada.delete(&session, false).expect("delete should succeed"));
    assert!(!ada.in_storage());

    assert_eq!(row_count(&session, CUSTOMER), 0);
    let invoice = session.load(INVOICE, 1).expect("invoice survives");
    assert_eq!(invoice.get("customer").expect("field exists"), &Value::Null);
}

#[test]
fn depending_records_and_attachments_are_removed() {
    let files = Arc::new(RecordingFiles::default());
    let session = build_session(registry(), fast_config(), files.clone())
        .expect("session should build");
    saved(&session, INVOICE, &[("amount", 20.into()), ("attachment", 77.into())]);
    for qty in [1, 2] {
        saved(&session, LINE, &[("invoice", 1.into()), ("qty", qty.into())]);
    }
    saved(&session, LINE, &[("qty", 9.into())]);

    let mut invoice = session.load_for_write(INVOICE, 1).expect("row should load");
    assert!(invoice.delete(&session, false).expect("delete should succeed"));

    assert_eq!(files.deleted(), [77]);
    assert_eq!(row_count(&session, LINE), 1);
    assert!(session.locks().held_keys().is_empty());
}

#[test]
fn cascades_reach_every_referrer_past_the_default_limit() {
    let config = Config {
        query: QueryConfig {
            default_limit: Some(1),
        },
        ..fast_config()
    };
    let session = session_with(registry(), config);
    customer(&session, "Ada");
    saved(&session, INVOICE, &[("amount", 20.into())]);
    for qty in [1, 2, 3] {
        saved(&session, LINE, &[("invoice", 1.into()), ("qty", qty.into())]);
    }
    for amount in [5, 6] {
        saved(&session, INVOICE, &[("amount", amount.into()), ("customer", 1.into())]);
    }

    let mut invoice = session.load_for_write(INVOICE, 1).expect("row should load");
    assert!(invoice.delete(&session, false).expect("delete should succeed"));
    assert_eq!(row_count(&session, LINE), 0);

    let mut ada = session.load_for_write(CUSTOMER, 1).expect("row should load");
    assert!(ada.delete(&session, false).expect("delete should succeed"));
    let linked = session
        .storage()
        .query("SELECT \"id\" FROM \"invoice\" WHERE \"customer\" IS NOT NULL", &[])
        .expect("table should be readable");
    assert!(linked.is_empty());
}

#[test]
fn polymorphic_links_are_cleared() {
    let session = session();
    customer(&session, "Ada");
    let mut note = session.new_record(NOTE).expect("type should exist");
    note.set_polymorphic(
        "subject",
        Some(PolymorphicRef::new(CUSTOMER, 1)),
    )
    .expect("subject is writable");
    note.set("body", "call back").expect("body is writable");
    note.save(&session, false, false).expect("save should succeed");

    let mut ada = session.load_for_write(CUSTOMER, 1).expect("row should load");
    assert!(ada.delete(&session, false).expect("delete should succeed"));

    let note = session.load(NOTE, 1).expect("note survives");
    assert_eq!(note.polymorphic("subject").expect("accessor works"), None);
    assert_eq!(note.get("body").expect("field exists"), &Value::from("call back"));
}

#[test]
fn block_strategy_refuses_until_forced() {
    metrics::reset();
    let session = session();
    saved(&session, PROJECT, &[("name", "apollo".into())]);
    saved(&session, TASK, &[("project", 1.into()), ("title", "launch".into())]);

    let mut project = session.load_for_write(PROJECT, 1).expect("row should load");
    assert!(!project.delete(&session, false).expect("refusal is not an error"));
    assert_eq!(metrics::snapshot().ops.blocked_deletes, 1);

    assert!(project.delete(&session, true).expect("forced delete should succeed"));
    assert!(project.is_deleted());
    assert!(project.in_storage());
    assert_eq!(row_count(&session, PROJECT), 1);

    let task = session.load(TASK, 1).expect("task survives");
    assert_eq!(task.get("project").expect("field exists"), &Value::Null);
}

#[test]
fn reset_fields_keeps_the_row() {
    let session = session();
    saved(
        &session,
        CONTACT,
        &[("name", "Grace".into()), ("phone", "555".into())],
    );

    let mut contact = session.load_for_write(CONTACT, 1).expect("row should load");
    assert!(contact.delete(&session, false).expect("delete should succeed"));

    let contact = session.load(CONTACT, 1).expect("row is kept");
    assert_eq!(contact.get("name").expect("field exists"), &Value::Null);
    assert_eq!(contact.get("phone").expect("field exists"), &Value::Null);
    assert_eq!(contact.get("created_on").expect("injected"), &Value::DateTime(start()));
}

#[test]
fn delete_requires_a_stored_writable_record() {
    let session = session();
    let mut fresh = session.new_record(INVOICE).expect("type should exist");
    assert!(fresh.delete(&session, false).expect_err("unsaved").is_usage());

    saved(&session, INVOICE, &[("amount", 20.into())]);
    let mut read = session.load(INVOICE, 1).expect("row should load");
    assert!(read.delete(&session, false).expect_err("read mode").is_usage());
}

// ---- raw maps ----------------------------------------------------------------

proptest! {
    #[test]
    fn raw_map_rebuilds_an_equal_record(
        amount in -1.0e6f64..1.0e6,
        paid in any::<bool>(),
        notes in "[a-z ]{0,16}",
        customer in proptest::option::of(1i64..1_000),
    ) {
        let ty = Arc::new(invoice_type());
        let status = if paid { "paid" } else { "open" };
        let record = Record::with_values(
            Arc::clone(&ty),
            [
                ("amount", Value::Float(amount)),
                ("status", Value::from(status)),
                ("notes", Value::from(notes)),
                ("customer", Value::from(customer)),
            ],
        )
        .expect("generated values should be accepted");

        let raw = record.to_raw_map();
        let rebuilt = Record::from_raw_map(ty, raw.clone()).expect("raw map should rebuild");
        prop_assert_eq!(rebuilt.to_raw_map(), raw);
    }
}

// ---- dirty diff ----------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn changed_fields_track_exactly_the_edited_values(
        amount in proptest::option::of(0i32..4),
        paid in any::<bool>(),
        notes in proptest::option::of(proptest::sample::select(vec!["", "a", "b"])),
    ) {
        let session = session();
        saved(
            &session,
            INVOICE,
            &[("amount", 1.into()), ("status", "open".into()), ("notes", "a".into())],
        );
        let mut invoice = session.load_for_write(INVOICE, 1).expect("row should load");

        let amount = amount.map(f64::from);
        let status = if paid { "paid" } else { "open" };
        invoice.set("amount", amount).expect("amount should be accepted");
        invoice.set("status", status).expect("status should be accepted");
        invoice.set("notes", notes).expect("notes should be accepted");

        let mut expected = Vec::new();
        if amount != Some(1.0) {
            expected.push("amount");
        }
        if paid {
            expected.push("status");
        }
        if notes.is_none_or(|n| n != "a") {
            expected.push("metadata");
        }
        prop_assert_eq!(invoice.changed_fields(), expected.clone());
        prop_assert_eq!(invoice.is_dirty(), !expected.is_empty());

        let written = invoice.save(&session, false, false).expect("save should run");
        prop_assert_eq!(written, !expected.is_empty());
        prop_assert!(!invoice.is_dirty());
    }
}
