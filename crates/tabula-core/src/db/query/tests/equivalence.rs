//! SQL pushdown and in-memory evaluation must select the same rows.

use crate::{
    config::Config,
    db::{Collection, Session, query::Condition, query::Filter},
    model::{
        declaration::FieldDeclaration, entity_type::EntityType, field::FieldKind,
        registry::Registry,
    },
    test_support::session_with,
    value::Value,
};
use chrono::NaiveDate;
use proptest::prelude::*;

const PROBE: &str = "probe";
const LABELS: [&str; 4] = ["", "ab", "abc", "b"];
const TAGS: [&str; 3] = ["a", "b", "c"];

#[derive(Clone, Debug)]
struct ProbeRow {
    n: Option<i64>,
    amount: Option<f64>,
    label: Option<&'static str>,
    flag: Option<bool>,
    tags: Vec<&'static str>,
    day: Option<NaiveDate>,
    memo: Option<&'static str>,
}

#[derive(Clone, Copy, Debug)]
enum Cmp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

fn probe_session() -> Session {
    let ty = EntityType::builder(PROBE)
        .field(FieldDeclaration::new("n", FieldKind::Integer))
        .field(FieldDeclaration::new("amount", FieldKind::Number))
        .field(FieldDeclaration::new("label", FieldKind::Text))
        .field(FieldDeclaration::new("flag", FieldKind::Boolean))
        .field(FieldDeclaration::new("tags", FieldKind::Array))
        .field(FieldDeclaration::new("day", FieldKind::Date))
        .field(FieldDeclaration::new("memo", FieldKind::Text).in_metadata())
        .build()
        .expect("probe type should build");

    session_with(
        Registry::new().with(ty).expect("registry should build"),
        Config::default(),
    )
}

fn store(session: &Session, row: &ProbeRow) {
    let mut record = session.new_record(PROBE).expect("probe type exists");
    let values: [(&str, Value); 7] = [
        ("n", row.n.into()),
        ("amount", row.amount.into()),
        ("label", row.label.into()),
        ("flag", row.flag.into()),
        ("tags", row.tags.clone().into()),
        ("day", row.day.into()),
        ("memo", row.memo.into()),
    ];
    for (field, value) in values {
        record.set(field, value).expect("generated value should be accepted");
    }
    record
        .save(session, false, false)
        .expect("save should succeed");
}

fn compare(op: Cmp, field: &str, value: Value) -> Condition {
    match op {
        Cmp::Eq => Condition::equals(field, value),
        Cmp::Gt => Condition::greater(field, value),
        Cmp::Ge => Condition::greater_equal(field, value),
        Cmp::Lt => Condition::lesser(field, value),
        Cmp::Le => Condition::lesser_equal(field, value),
        Cmp::Like => Condition::like(field, value),
    }
}

fn keys(collection: &Collection) -> Vec<Value> {
    collection.keys()
}

// ---- strategies --------------------------------------------------------

fn arb_cmp() -> impl Strategy<Value = Cmp> {
    prop::sample::select(vec![Cmp::Eq, Cmp::Gt, Cmp::Ge, Cmp::Lt, Cmp::Le])
}

fn arb_text_cmp() -> impl Strategy<Value = Cmp> {
    prop::sample::select(vec![Cmp::Eq, Cmp::Gt, Cmp::Lt, Cmp::Like])
}

fn arb_n() -> impl Strategy<Value = Option<i64>> {
    prop::option::of(-2i64..3)
}

fn arb_amount() -> impl Strategy<Value = Option<f64>> {
    prop::option::of((-4i32..5).prop_map(|v| f64::from(v) * 0.5))
}

fn arb_label() -> impl Strategy<Value = Option<&'static str>> {
    prop::option::of(prop::sample::select(LABELS.to_vec()))
}

fn arb_tag() -> impl Strategy<Value = &'static str> {
    prop::sample::select(TAGS.to_vec())
}

fn arb_day() -> impl Strategy<Value = Option<NaiveDate>> {
    prop::option::of(
        (1u32..4).prop_map(|d| NaiveDate::from_ymd_opt(2024, 1, d * 10).expect("valid date")),
    )
}

fn arb_row() -> impl Strategy<Value = ProbeRow> {
    (
        arb_n(),
        arb_amount(),
        arb_label(),
        prop::option::of(any::<bool>()),
        prop::collection::vec(arb_tag(), 0..3),
        arb_day(),
        arb_label(),
    )
        .prop_map(|(n, amount, label, flag, tags, day, memo)| ProbeRow {
            n,
            amount,
            label,
            flag,
            tags,
            day,
            memo,
        })
}

fn arb_leaf() -> impl Strategy<Value = Condition> {
    prop_oneof![
        (arb_cmp(), arb_n()).prop_map(|(op, v)| compare(op, "n", v.into())),
        (arb_cmp(), arb_amount()).prop_map(|(op, v)| compare(op, "amount", v.into())),
        (arb_text_cmp(), arb_label()).prop_map(|(op, v)| compare(op, "label", v.into())),
        (arb_text_cmp(), arb_label()).prop_map(|(op, v)| compare(op, "memo", v.into())),
        (arb_cmp(), arb_day()).prop_map(|(op, v)| compare(op, "day", v.into())),
        any::<bool>().prop_map(|v| Condition::equals("flag", v)),
        arb_tag().prop_map(|v| Condition::equals("tags", v)),
        prop::collection::vec(arb_tag(), 0..3).prop_map(|v| Condition::is_in("tags", v)),
        prop::collection::vec(-2i64..3, 0..3).prop_map(|v| Condition::is_in("n", v)),
        prop::collection::vec(any::<bool>(), 0..2).prop_map(|v| Condition::is_in("flag", v)),
        prop::sample::select(vec!["n", "label", "flag", "tags", "day", "memo"])
            .prop_map(|field| Condition::is_set(field)),
        Just(Condition::True),
    ]
}

fn arb_condition() -> impl Strategy<Value = Condition> {
    arb_leaf().prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.and(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.or(b)),
            inner.prop_map(|c| !c),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pushdown_and_manual_evaluation_agree(
        rows in prop::collection::vec(arb_row(), 1..5),
        condition in arb_condition(),
    ) {
        let session = probe_session();
        for row in &rows {
            store(&session, row);
        }

        let filter = Filter::new(PROBE).condition(condition);
        let pushed = filter.execute(&session).expect("pushdown query should run");
        let manual = filter
            .clone()
            .metadata_search(true)
            .execute(&session)
            .expect("manual query should run");
        prop_assert_eq!(keys(&pushed), keys(&manual));
        prop_assert_eq!(
            filter.count(&session).expect("count should run"),
            pushed.len()
        );

        for record in Filter::get_all(&session, PROBE).expect("scan should run") {
            let matched = filter
                .match_record(&session, &record)
                .expect("match should run");
            prop_assert_eq!(matched, pushed.contains_key(record.id()));
        }
    }
}
