//! Resolved predicate tree: operands coerced to their field kinds, every
//! node tagged with whether it needs in-memory evaluation. One tree renders
//! the SQL pushdown and performs the manual match, so both sides read the
//! same operands.

use crate::{
    db::{
        Session, codec,
        query::condition::{Condition, LeafOp},
        record::Record,
        storage::{SqlValue, quote_ident},
    },
    error::{ErrorOrigin, InternalError},
    model::{declaration::FieldDeclaration, entity_type::EntityType, field::FieldKind},
    value::{Value, compare_order, values_equal},
};
use chrono::Timelike;
use std::cmp::Ordering;

// Rendered in place of a node that only the manual pass can decide.
const ALWAYS_TRUE: &str = "1 = 1";
const ALWAYS_FALSE: &str = "0";

///
/// PlanNode
///

#[derive(Clone, Debug)]
pub(crate) enum PlanNode {
    True,
    Leaf(Leaf),
    And(Box<PlanNode>, Box<PlanNode>),
    Or(Box<PlanNode>, Box<PlanNode>),
    Not(Box<PlanNode>),
}

///
/// Leaf
///

#[derive(Clone, Debug)]
pub(crate) struct Leaf {
    op: LeafOp,
    target: Target,
    value: Value,
    manual: bool,
}

#[derive(Clone, Debug)]
enum Target {
    Column { name: String, kind: FieldKind },
    /// Type and id sub-fields of a polymorphic reference.
    Polymorphic { class: String, id: String },
}

impl Condition {
    /// Resolve against `ty`. Sub-filters are executed here, so planning may
    /// touch storage.
    pub(crate) fn plan(
        &self,
        session: &Session,
        ty: &EntityType,
        all_manual: bool,
    ) -> Result<PlanNode, InternalError> {
        let node = match self {
            Self::True => PlanNode::True,
            Self::And {
                condition1,
                condition2,
            } => PlanNode::And(
                Box::new(condition1.plan(session, ty, all_manual)?),
                Box::new(condition2.plan(session, ty, all_manual)?),
            ),
            Self::Or {
                condition1,
                condition2,
            } => PlanNode::Or(
                Box::new(condition1.plan(session, ty, all_manual)?),
                Box::new(condition2.plan(session, ty, all_manual)?),
            ),
            Self::Not { condition1 } => {
                PlanNode::Not(Box::new(condition1.plan(session, ty, all_manual)?))
            }
            Self::InFilter { field, filter } => {
                let keys = filter.execute_unbounded(session)?.keys();
                let decl = ty.structure().get_field(field)?;
                PlanNode::Leaf(Leaf::new(ty, decl, LeafOp::In, Value::List(keys), all_manual)?)
            }
            leaf => {
                let (op, field, value) = leaf.leaf_parts().ok_or_else(|| {
                    InternalError::usage(ErrorOrigin::Query, format!("unplannable node {leaf:?}"))
                })?;
                let decl = ty.structure().get_field(field)?;
                PlanNode::Leaf(Leaf::new(ty, decl, op, value.clone(), all_manual)?)
            }
        };

        Ok(node)
    }
}

impl PlanNode {
    /// Whether some part of the tree must be decided in memory.
    pub(crate) fn manual(&self) -> bool {
        match self {
            Self::True => false,
            Self::Leaf(leaf) => leaf.manual,
            Self::And(a, b) | Self::Or(a, b) => a.manual() || b.manual(),
            Self::Not(inner) => inner.manual(),
        }
    }

    /// SQL fragment for the WHERE clause; selects a superset of the matching
    /// rows, exactly the matching rows when nothing is manual.
    pub(crate) fn render(&self, params: &mut Vec<SqlValue>) -> Result<String, InternalError> {
        match self {
            Self::True => Ok(ALWAYS_TRUE.to_string()),
            Self::Leaf(leaf) => leaf.render(params),
            Self::And(a, b) => Ok(format!("({} AND {})", a.render(params)?, b.render(params)?)),
            Self::Or(_, _) | Self::Not(_) if self.manual() => Ok(ALWAYS_TRUE.to_string()),
            Self::Or(a, b) => Ok(format!("({} OR {})", a.render(params)?, b.render(params)?)),
            Self::Not(inner) => Ok(format!("(NOT {})", inner.render(params)?)),
        }
    }

    /// In-memory evaluation. Unless `force_manual`, nodes the SQL already
    /// decided are assumed to hold.
    pub(crate) fn matches(&self, record: &Record, force_manual: bool) -> bool {
        if !force_manual && !self.manual() {
            return true;
        }

        match self {
            Self::True => true,
            Self::Leaf(leaf) => leaf.matches(record),
            Self::And(a, b) => a.matches(record, force_manual) && b.matches(record, force_manual),
            Self::Or(a, b) => a.matches(record, true) || b.matches(record, true),
            Self::Not(inner) => !inner.matches(record, true),
        }
    }
}

impl Leaf {
    fn new(
        ty: &EntityType,
        decl: &FieldDeclaration,
        op: LeafOp,
        value: Value,
        all_manual: bool,
    ) -> Result<Self, InternalError> {
        let target = if decl.kind == FieldKind::PolymorphicReference {
            let subs = ty.structure().sub_field_names(&decl.name);
            match subs.as_slice() {
                [class, id] => Target::Polymorphic {
                    class: (*class).to_string(),
                    id: (*id).to_string(),
                },
                _ => {
                    return Err(InternalError::corruption(
                        ErrorOrigin::Query,
                        format!("polymorphic field '{}' has no sub-fields", decl.name),
                    ));
                }
            }
        } else {
            Target::Column {
                name: decl.name.clone(),
                kind: decl.kind,
            }
        };

        let value = operand(&target, op, value).map_err(|err| {
            InternalError::validation(ErrorOrigin::Query, vec![format!("{}: {err}", decl.name)])
        })?;

        Ok(Self {
            op,
            target,
            value,
            manual: all_manual || decl.is_side_channel(),
        })
    }

    // ---- sql -----------------------------------------------------------

    fn render(&self, params: &mut Vec<SqlValue>) -> Result<String, InternalError> {
        if self.manual {
            return Ok(ALWAYS_TRUE.to_string());
        }

        match &self.target {
            Target::Column { name, kind } => self.render_column(&quote_ident(name), *kind, params),
            Target::Polymorphic { class, id } => {
                let (class, id) = (quote_ident(class), quote_ident(id));
                let sql = match (self.op, self.value.as_list()) {
                    (LeafOp::Equals, Some([target_type, target_id])) => {
                        params.push(codec::encode_scalar(target_type));
                        params.push(codec::encode_scalar(target_id));
                        format!(
                            "({class} IS NOT NULL AND {class} = ? AND {id} IS NOT NULL AND {id} = ?)"
                        )
                    }
                    (LeafOp::Equals, _) => format!("{id} IS NULL"),
                    (LeafOp::IsSet, _) => format!("{id} IS NOT NULL"),
                    _ => ALWAYS_FALSE.to_string(),
                };
                Ok(sql)
            }
        }
    }

    fn render_column(
        &self,
        col: &str,
        kind: FieldKind,
        params: &mut Vec<SqlValue>,
    ) -> Result<String, InternalError> {
        let sql = match self.op {
            LeafOp::Equals if is_blank(kind, &self.value) => blank_sql(col, kind),
            LeafOp::Equals if kind == FieldKind::Boolean => {
                params.push(codec::encode_scalar(&self.value));
                format!("COALESCE({col}, 0) = ?")
            }
            LeafOp::Equals if kind.is_multi_valued() => {
                format!("({col} IS NOT NULL AND {})", contains_sql(col, &self.value, params)?)
            }
            LeafOp::Equals => {
                params.push(codec::encode_scalar(&self.value));
                format!("({col} IS NOT NULL AND {col} = ?)")
            }
            op if op.is_ordering() => {
                if !kind.behavior().orderable || self.value.is_null() {
                    return Ok(ALWAYS_FALSE.to_string());
                }
                params.push(codec::encode_scalar(&self.value));
                format!("({col} IS NOT NULL AND {col} {} ?)", sql_operator(op))
            }
            LeafOp::Like => {
                if self.value.is_null() {
                    return Ok(ALWAYS_FALSE.to_string());
                }
                params.push(codec::encode_scalar(&self.value));
                format!("({col} IS NOT NULL AND instr({col}, ?) > 0)")
            }
            LeafOp::In => {
                let items = self.value.as_list().unwrap_or_default();
                if items.is_empty() {
                    return Ok(ALWAYS_FALSE.to_string());
                }
                if kind.is_multi_valued() {
                    let any = items
                        .iter()
                        .map(|item| contains_sql(col, item, params))
                        .collect::<Result<Vec<_>, _>>()?;
                    format!("({col} IS NOT NULL AND ({}))", any.join(" OR "))
                } else {
                    params.extend(items.iter().map(codec::encode_scalar));
                    let marks = vec!["?"; items.len()].join(", ");
                    if kind == FieldKind::Boolean {
                        format!("COALESCE({col}, 0) IN ({marks})")
                    } else {
                        format!("({col} IS NOT NULL AND {col} IN ({marks}))")
                    }
                }
            }
            LeafOp::IsSet => is_set_sql(col, kind),
            _ => ALWAYS_FALSE.to_string(),
        };

        Ok(sql)
    }

    // ---- manual evaluation ---------------------------------------------

    fn matches(&self, record: &Record) -> bool {
        match &self.target {
            Target::Column { name, kind } => self.matches_column(record.value_of(name), *kind),
            Target::Polymorphic { class, id } => {
                let (class, id) = (record.value_of(class), record.value_of(id));
                match (self.op, self.value.as_list()) {
                    (LeafOp::Equals, Some([target_type, target_id])) => {
                        !class.is_null()
                            && !id.is_null()
                            && values_equal(class, target_type)
                            && values_equal(id, target_id)
                    }
                    (LeafOp::Equals, _) => id.is_null(),
                    (LeafOp::IsSet, _) => !id.is_null(),
                    _ => false,
                }
            }
        }
    }

    fn matches_column(&self, current: &Value, kind: FieldKind) -> bool {
        match self.op {
            LeafOp::Equals if is_blank(kind, &self.value) => is_blank(kind, current),
            LeafOp::Equals if kind == FieldKind::Boolean => {
                truthy(current) == self.value.as_bool().unwrap_or(false)
            }
            LeafOp::Equals if kind.is_multi_valued() => list_contains(current, &self.value),
            LeafOp::Equals => !current.is_null() && values_equal(current, &self.value),
            op if op.is_ordering() => {
                kind.behavior().orderable
                    && compare_order(current, &self.value).is_some_and(|ord| ordering_holds(op, ord))
            }
            LeafOp::Like => match (current.as_text(), self.value.as_text()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
            LeafOp::In => {
                let items = self.value.as_list().unwrap_or_default();
                if kind.is_multi_valued() {
                    items.iter().any(|item| list_contains(current, item))
                } else if kind == FieldKind::Boolean {
                    items
                        .iter()
                        .any(|item| item.as_bool().is_some_and(|b| b == truthy(current)))
                } else {
                    !current.is_null() && items.iter().any(|item| values_equal(current, item))
                }
            }
            LeafOp::IsSet => {
                if kind == FieldKind::Boolean {
                    truthy(current)
                } else {
                    !is_blank(kind, current)
                }
            }
            _ => false,
        }
    }
}

// Coerce the operand to what the target column holds.
fn operand(target: &Target, op: LeafOp, value: Value) -> Result<Value, String> {
    let kind = match target {
        Target::Polymorphic { .. } => {
            return match (op, value) {
                (LeafOp::Equals, Value::List(pair)) if pair.len() == 2 => {
                    let mut pair = pair.into_iter();
                    let class = FieldKind::Text.coerce(pair.next().unwrap_or(Value::Null))?;
                    let id = FieldKind::Reference.coerce(pair.next().unwrap_or(Value::Null))?;
                    Ok(Value::List(vec![class, id]))
                }
                (_, Value::Null) => Ok(Value::Null),
                (LeafOp::Equals, other) => Err(format!(
                    "expected a [type, id] pair for a polymorphic reference, found {other:?}"
                )),
                (_, other) => Ok(other),
            };
        }
        Target::Column { kind, .. } => *kind,
    };

    match op {
        LeafOp::IsSet => Ok(Value::Null),
        LeafOp::Like => FieldKind::Text.coerce(value),
        LeafOp::In => {
            let items = match value {
                Value::List(items) => items,
                Value::Null => Vec::new(),
                single => vec![single],
            };
            items
                .into_iter()
                .filter(|item| !item.is_null())
                .map(|item| kind.element_kind().coerce(item).map(normalize))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        LeafOp::Equals if kind.is_multi_valued() => {
            kind.element_kind().coerce(value).map(normalize)
        }
        op if op.is_ordering() && (!kind.behavior().orderable || value.is_null()) => Ok(value),
        _ => kind.coerce(value).map(normalize),
    }
}

// Storage keeps whole seconds.
fn normalize(value: Value) -> Value {
    match value {
        Value::DateTime(dt) => Value::DateTime(dt.with_nanosecond(0).unwrap_or(dt)),
        Value::Time(t) => Value::Time(t.with_nanosecond(0).unwrap_or(t)),
        other => other,
    }
}

// Null, or the kind's stored "empty" representation.
fn is_blank(kind: FieldKind, value: &Value) -> bool {
    if kind == FieldKind::Boolean {
        return value.is_null();
    }
    if kind.is_multi_valued() || is_textual(kind) {
        value.is_empty_value()
    } else {
        value.is_null()
    }
}

fn blank_sql(col: &str, kind: FieldKind) -> String {
    if kind.is_multi_valued() {
        format!("({col} IS NULL OR {col} = '[]')")
    } else if is_textual(kind) {
        format!("({col} IS NULL OR {col} = '')")
    } else {
        format!("{col} IS NULL")
    }
}

fn is_set_sql(col: &str, kind: FieldKind) -> String {
    if kind == FieldKind::Boolean {
        format!("COALESCE({col}, 0) <> 0")
    } else if kind.is_multi_valued() {
        format!("({col} IS NOT NULL AND {col} <> '[]')")
    } else if is_textual(kind) {
        format!("({col} IS NOT NULL AND {col} <> '')")
    } else {
        format!("{col} IS NOT NULL")
    }
}

// Boundary-safe element test over the compact JSON list encoding.
fn contains_sql(
    col: &str,
    element: &Value,
    params: &mut Vec<SqlValue>,
) -> Result<String, InternalError> {
    let token = codec::encode_element(element)?;
    params.extend([
        SqlValue::Text(format!("[{token},")),
        SqlValue::Text(format!(",{token},")),
        SqlValue::Text(format!(",{token}]")),
        SqlValue::Text(format!("[{token}]")),
    ]);

    Ok(format!(
        "(instr({col}, ?) > 0 OR instr({col}, ?) > 0 OR instr({col}, ?) > 0 OR {col} = ?)"
    ))
}

fn list_contains(current: &Value, element: &Value) -> bool {
    current
        .as_list()
        .is_some_and(|items| items.iter().any(|item| values_equal(item, element)))
}

fn truthy(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}

const fn is_textual(kind: FieldKind) -> bool {
    matches!(
        kind,
        FieldKind::KeyText
            | FieldKind::Text
            | FieldKind::BigText
            | FieldKind::Email
            | FieldKind::Hyperlink
            | FieldKind::Color
            | FieldKind::Password
            | FieldKind::Enumeration
            | FieldKind::CurrencyCode
            | FieldKind::Country
    )
}

const fn sql_operator(op: LeafOp) -> &'static str {
    match op {
        LeafOp::Greater => ">",
        LeafOp::GreaterEqual => ">=",
        LeafOp::Lesser => "<",
        LeafOp::LesserEqual => "<=",
        _ => "=",
    }
}

const fn ordering_holds(op: LeafOp, ord: Ordering) -> bool {
    match op {
        LeafOp::Greater => matches!(ord, Ordering::Greater),
        LeafOp::GreaterEqual => !matches!(ord, Ordering::Less),
        LeafOp::Lesser => matches!(ord, Ordering::Less),
        LeafOp::LesserEqual => !matches!(ord, Ordering::Greater),
        _ => false,
    }
}
