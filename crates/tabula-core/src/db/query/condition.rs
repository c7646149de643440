use crate::{
    db::{collection::Collection, query::Filter},
    model::{
        declaration::StorageLocation, entity_type::EntityType, field::FieldKind,
        registry::Registry,
    },
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::ops::Not;

///
/// Condition
///
/// Predicate tree over the fields of one entity type.
///
/// Wire form is a discriminated record:
/// `{ "type": <kind>, "fieldname"?, "value"?, "condition1"?, "condition2"?, "filter"? }`.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Equals {
        #[serde(rename = "fieldname")]
        field: String,
        #[serde(with = "crate::value::wire")]
        value: Value,
    },
    Greater {
        #[serde(rename = "fieldname")]
        field: String,
        #[serde(with = "crate::value::wire")]
        value: Value,
    },
    GreaterEqual {
        #[serde(rename = "fieldname")]
        field: String,
        #[serde(with = "crate::value::wire")]
        value: Value,
    },
    Lesser {
        #[serde(rename = "fieldname")]
        field: String,
        #[serde(with = "crate::value::wire")]
        value: Value,
    },
    LesserEqual {
        #[serde(rename = "fieldname")]
        field: String,
        #[serde(with = "crate::value::wire")]
        value: Value,
    },
    /// Case-sensitive substring match.
    Like {
        #[serde(rename = "fieldname")]
        field: String,
        #[serde(with = "crate::value::wire")]
        value: Value,
    },
    /// Membership in a value list; for multi-valued fields, any overlap.
    In {
        #[serde(rename = "fieldname")]
        field: String,
        #[serde(with = "crate::value::wire")]
        value: Value,
    },
    IsSet {
        #[serde(rename = "fieldname")]
        field: String,
    },
    /// Membership in the keys selected by a sub-filter.
    InFilter {
        #[serde(rename = "fieldname")]
        field: String,
        filter: Box<Filter>,
    },
    /// Membership in the keys of an already materialized collection.
    InCollection {
        #[serde(rename = "fieldname")]
        field: String,
        #[serde(with = "crate::value::wire")]
        value: Value,
    },
    And {
        condition1: Box<Condition>,
        condition2: Box<Condition>,
    },
    Or {
        condition1: Box<Condition>,
        condition2: Box<Condition>,
    },
    Not {
        condition1: Box<Condition>,
    },
    True,
}

///
/// LeafOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LeafOp {
    Equals,
    Greater,
    GreaterEqual,
    Lesser,
    LesserEqual,
    Like,
    In,
    IsSet,
}

impl LeafOp {
    pub(crate) const fn is_ordering(self) -> bool {
        matches!(
            self,
            Self::Greater | Self::GreaterEqual | Self::Lesser | Self::LesserEqual
        )
    }
}

impl Condition {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Greater {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::GreaterEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lesser(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lesser {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lesser_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::LesserEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn like(field: impl Into<String>, needle: impl Into<Value>) -> Self {
        Self::Like {
            field: field.into(),
            value: needle.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::In {
            field: field.into(),
            value: values.into(),
        }
    }

    pub fn is_set(field: impl Into<String>) -> Self {
        Self::IsSet {
            field: field.into(),
        }
    }

    pub fn in_filter(field: impl Into<String>, filter: Filter) -> Self {
        Self::InFilter {
            field: field.into(),
            filter: Box::new(filter),
        }
    }

    /// Snapshot the keys of `collection` into a membership test.
    pub fn in_collection(field: impl Into<String>, collection: &Collection) -> Self {
        Self::InCollection {
            field: field.into(),
            value: Value::List(collection.keys()),
        }
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And {
            condition1: Box::new(self),
            condition2: Box::new(other),
        }
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or {
            condition1: Box::new(self),
            condition2: Box::new(other),
        }
    }

    // Operator, field and operand of a simple leaf.
    pub(crate) fn leaf_parts(&self) -> Option<(LeafOp, &str, &Value)> {
        let parts = match self {
            Self::Equals { field, value } => (LeafOp::Equals, field, value),
            Self::Greater { field, value } => (LeafOp::Greater, field, value),
            Self::GreaterEqual { field, value } => (LeafOp::GreaterEqual, field, value),
            Self::Lesser { field, value } => (LeafOp::Lesser, field, value),
            Self::LesserEqual { field, value } => (LeafOp::LesserEqual, field, value),
            Self::Like { field, value } => (LeafOp::Like, field, value),
            Self::In { field, value } | Self::InCollection { field, value } => {
                (LeafOp::In, field, value)
            }
            Self::IsSet { field } => (LeafOp::IsSet, field, &Value::Null),
            _ => return None,
        };

        Some((parts.0, parts.1.as_str(), parts.2))
    }

    // ---- validation ----------------------------------------------------

    /// Check every node against the fields of `ty`.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self, ty: &EntityType, registry: &Registry) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        self.collect_problems(ty, registry, &mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    pub(crate) fn collect_problems(
        &self,
        ty: &EntityType,
        registry: &Registry,
        problems: &mut Vec<String>,
    ) {
        match self {
            Self::True => {}
            Self::And {
                condition1,
                condition2,
            }
            | Self::Or {
                condition1,
                condition2,
            } => {
                condition1.collect_problems(ty, registry, problems);
                condition2.collect_problems(ty, registry, problems);
            }
            Self::Not { condition1 } => condition1.collect_problems(ty, registry, problems),
            Self::InFilter { field, filter } => {
                check_in_filter(ty, field, filter, registry, problems);
            }
            leaf => {
                if let Some((op, field, _)) = leaf.leaf_parts() {
                    check_leaf(ty, op, field, problems);
                }
            }
        }
    }
}

impl Not for Condition {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not {
            condition1: Box::new(self),
        }
    }
}

// Problems of one leaf, or `None` when its field is unusable altogether.
fn check_field(ty: &EntityType, field: &str, problems: &mut Vec<String>) -> Option<FieldKind> {
    let Some(decl) = ty.structure().field(field) else {
        problems.push(format!("unknown field '{field}' on {}", ty.name()));
        return None;
    };

    if decl.storage() == StorageLocation::Transient {
        problems.push(format!("field '{field}' is not stored and cannot be queried"));
        return None;
    }
    match decl.kind {
        FieldKind::Metadata => {
            problems.push(format!("field '{field}' cannot be queried"));
            None
        }
        FieldKind::Currency | FieldKind::Address => {
            problems.push(format!(
                "field '{field}' is a {:?}; query its sub-fields instead",
                decl.kind
            ));
            None
        }
        kind => Some(kind),
    }
}

fn check_leaf(ty: &EntityType, op: LeafOp, field: &str, problems: &mut Vec<String>) {
    let Some(kind) = check_field(ty, field, problems) else {
        return;
    };

    match op {
        LeafOp::Like if !kind.behavior().text_searchable => {
            problems.push(format!(
                "substring match is not supported on field '{field}' ({kind:?})"
            ));
        }
        LeafOp::Equals | LeafOp::In
            if matches!(kind, FieldKind::Object | FieldKind::Repetition) =>
        {
            problems.push(format!(
                "equality is not supported on field '{field}' ({kind:?})"
            ));
        }
        LeafOp::In if kind.is_composite() => {
            problems.push(format!(
                "set membership is not supported on field '{field}' ({kind:?})"
            ));
        }
        _ => {}
    }
}

fn check_in_filter(
    ty: &EntityType,
    field: &str,
    filter: &Filter,
    registry: &Registry,
    problems: &mut Vec<String>,
) {
    if let Some(kind) = check_field(ty, field, problems) {
        let target = match kind {
            FieldKind::Reference | FieldKind::ReferenceMulti => ty
                .structure()
                .field(field)
                .and_then(|decl| decl.foreign_class.as_deref()),
            kind if kind.is_key() => Some(ty.name()),
            _ => None,
        };

        match target {
            None => problems.push(format!(
                "field '{field}' ({kind:?}) cannot be matched against a sub-filter"
            )),
            Some(target) if target != filter.base_type => problems.push(format!(
                "field '{field}' references {target}, but the sub-filter selects {}",
                filter.base_type
            )),
            Some(_) => {}
        }
    }

    if let Err(mut nested) = filter.validate(registry) {
        problems.append(&mut nested);
    }
}
