use crate::{
    db::{
        Session,
        collection::Collection,
        query::{condition::Condition, plan::PlanNode},
        record::{AccessMode, Record},
        storage::{SqlValue, quote_ident},
    },
    error::{ErrorOrigin, InternalError},
    model::{
        entity_type::{DELETED_FIELD, EntityType},
        registry::Registry,
    },
    obs::sink::{self, MetricsEvent},
    value::{Value, compare_order},
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, sync::Arc};

///
/// OrderDirection
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    #[expect(clippy::trivially_copy_pass_by_ref)]
    const fn is_asc(&self) -> bool {
        matches!(self, Self::Asc)
    }

    const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

///
/// Filter
///
/// Query over one entity type: an optional predicate tree plus ordering,
/// limit and visibility options. Serializes as
/// `{ "base_type": .., "base_condition"?: .. }` with the options appended
/// only when they differ from their defaults.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Filter {
    pub base_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_condition: Option<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    #[serde(default, skip_serializing_if = "OrderDirection::is_asc")]
    pub order_direction: OrderDirection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Drop records the type's `can_access` hook rejects.
    #[serde(default, skip_serializing_if = "is_false")]
    pub access_check: bool,

    /// Keep soft-deleted records.
    #[serde(default, skip_serializing_if = "is_false")]
    pub include_deleted: bool,

    /// Decide every predicate in memory instead of pushing it into SQL.
    #[serde(default, skip_serializing_if = "is_false")]
    pub metadata_search: bool,
}

#[expect(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

// Resolved execution parameters shared by `execute` and `count`.
struct Prepared {
    ty: Arc<EntityType>,
    plan: Option<PlanNode>,
    in_memory: bool,
}

impl Filter {
    #[must_use]
    pub fn new(base_type: impl Into<String>) -> Self {
        Self {
            base_type: base_type.into(),
            base_condition: None,
            order_by: None,
            order_direction: OrderDirection::Asc,
            limit: None,
            access_check: false,
            include_deleted: false,
            metadata_search: false,
        }
    }

    /// Add a predicate; repeated calls combine with AND.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.base_condition = Some(match self.base_condition.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some(field.into());
        self.order_direction = direction;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn access_check(mut self, enabled: bool) -> Self {
        self.access_check = enabled;
        self
    }

    #[must_use]
    pub const fn include_deleted(mut self, enabled: bool) -> Self {
        self.include_deleted = enabled;
        self
    }

    #[must_use]
    pub const fn metadata_search(mut self, enabled: bool) -> Self {
        self.metadata_search = enabled;
        self
    }

    // ---- wire ----------------------------------------------------------

    pub fn to_json(&self) -> Result<String, InternalError> {
        serde_json::to_string(self).map_err(|err| {
            InternalError::usage(ErrorOrigin::Query, format!("unserializable filter: {err}"))
        })
    }

    pub fn from_json(json: &str) -> Result<Self, InternalError> {
        serde_json::from_str(json).map_err(|err| {
            InternalError::usage(ErrorOrigin::Query, format!("malformed filter: {err}"))
        })
    }

    // ---- validation ----------------------------------------------------

    /// Check the base type, the ordering field and the whole predicate tree.
    pub fn validate(&self, registry: &Registry) -> Result<(), Vec<String>> {
        let Ok(ty) = registry.get(&self.base_type) else {
            return Err(vec![format!("unknown entity type '{}'", self.base_type)]);
        };

        let mut problems = Vec::new();
        if let Some(order) = &self.order_by {
            match ty.structure().field(order) {
                None => problems.push(format!("unknown order field '{order}' on {}", ty.name())),
                Some(decl)
                    if decl.kind.is_composite()
                        || !(decl.has_column() || decl.is_side_channel()) =>
                {
                    problems.push(format!("field '{order}' cannot be used for ordering"));
                }
                Some(_) => {}
            }
        }
        if let Some(condition) = &self.base_condition {
            condition.collect_problems(ty, registry, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    // ---- execution -----------------------------------------------------

    /// Run the query and hydrate the matching records in read mode.
    ///
    /// Without an explicit limit the configured `query.default_limit` applies.
    pub fn execute(&self, session: &Session) -> Result<Collection, InternalError> {
        self.execute_limited(session, self.limit.or(session.config().query.default_limit))
    }

    /// Run the query bounded only by an explicit limit. Cascades, sub-filters
    /// and counts go through here so the default limit never truncates them.
    pub(crate) fn execute_unbounded(
        &self,
        session: &Session,
    ) -> Result<Collection, InternalError> {
        self.execute_limited(session, self.limit)
    }

    fn execute_limited(
        &self,
        session: &Session,
        limit: Option<usize>,
    ) -> Result<Collection, InternalError> {
        let prepared = self.prepare(session)?;
        let ty = &prepared.ty;

        let sort_in_memory = self
            .order_by
            .as_deref()
            .and_then(|field| ty.structure().field(field))
            .is_some_and(|decl| decl.is_side_channel());
        let in_memory = prepared.in_memory || sort_in_memory;

        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT * FROM {} WHERE {}",
            quote_ident(ty.name()),
            self.where_clause(ty, prepared.plan.as_ref(), &mut params)?
        );
        sql.push_str(&self.order_clause(ty, sort_in_memory));
        if let (false, Some(limit)) = (in_memory, limit) {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = session.storage().query(&sql, &params)?;
        sink::record(MetricsEvent::RowsLoaded {
            entity: ty.name().to_string(),
            rows: rows.len() as u64,
        });

        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = 0_u64;
        for row in rows {
            let record = Record::from_row(Arc::clone(ty), row, AccessMode::Read)?;
            if let Some(plan) = &prepared.plan
                && plan.manual()
                && !plan.matches(&record, true)
            {
                rejected += 1;
                continue;
            }
            if self.access_check && !ty.hooks().can_access(&record) {
                continue;
            }
            records.push(record);
        }
        if rejected > 0 {
            sink::record(MetricsEvent::ManualRejects {
                entity: ty.name().to_string(),
                rows: rejected,
            });
        }

        if sort_in_memory {
            self.sort_records(ty, &mut records);
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }

        Collection::from_records(Arc::clone(ty), records)
    }

    /// First match, or a fresh unsaved record of the base type.
    pub fn execute_and_get_first(&self, session: &Session) -> Result<Record, InternalError> {
        let first = self.clone().limit(1).execute(session)?.into_iter().next();

        match first {
            Some(record) => Ok(record),
            None => session.new_record(&self.base_type),
        }
    }

    /// Test one already-hydrated record without querying for it.
    pub fn match_record(&self, session: &Session, record: &Record) -> Result<bool, InternalError> {
        if record.type_name() != self.base_type {
            return Ok(false);
        }
        if !self.include_deleted && record.is_deleted() {
            return Ok(false);
        }
        let prepared = self.prepare(session)?;

        Ok(prepared
            .plan
            .is_none_or(|plan| plan.matches(record, true)))
    }

    /// Number of matching records, bounded by an explicit limit.
    pub fn count(&self, session: &Session) -> Result<usize, InternalError> {
        let prepared = self.prepare(session)?;
        if prepared.in_memory {
            return Ok(self.execute_unbounded(session)?.len());
        }

        let ty = &prepared.ty;
        let mut params = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) AS matched FROM {} WHERE {}",
            quote_ident(ty.name()),
            self.where_clause(ty, prepared.plan.as_ref(), &mut params)?
        );
        let matched = session
            .storage()
            .query(&sql, &params)?
            .into_iter()
            .next()
            .and_then(|row| row.get("matched").and_then(SqlValue::as_integer))
            .unwrap_or(0);
        let matched = usize::try_from(matched).unwrap_or(0);

        Ok(self.limit.map_or(matched, |limit| matched.min(limit)))
    }

    pub fn exists(&self, session: &Session) -> Result<bool, InternalError> {
        self.clone().limit(1).count(session).map(|n| n > 0)
    }

    /// Every visible record of `type_name`, ignoring the default limit.
    pub fn get_all(session: &Session, type_name: &str) -> Result<Collection, InternalError> {
        Self::new(type_name).execute_unbounded(session)
    }

    // ---- internals -----------------------------------------------------

    fn prepare(&self, session: &Session) -> Result<Prepared, InternalError> {
        self.validate(session.registry())
            .map_err(|problems| InternalError::validation(ErrorOrigin::Query, problems))?;
        let ty = session.entity_type(&self.base_type)?;

        let plan = self
            .base_condition
            .as_ref()
            .map(|condition| condition.plan(session, &ty, self.metadata_search))
            .transpose()?;
        let in_memory = self.access_check || plan.as_ref().is_some_and(PlanNode::manual);

        Ok(Prepared {
            ty,
            plan,
            in_memory,
        })
    }

    fn where_clause(
        &self,
        ty: &EntityType,
        plan: Option<&PlanNode>,
        params: &mut Vec<SqlValue>,
    ) -> Result<String, InternalError> {
        let mut clause = match plan {
            Some(plan) => plan.render(params)?,
            None => "1 = 1".to_string(),
        };
        if ty.soft_deletes() && !self.include_deleted {
            clause = format!("{clause} AND COALESCE({}, 0) = 0", quote_ident(DELETED_FIELD));
        }

        Ok(clause)
    }

    fn order_clause(&self, ty: &EntityType, sort_in_memory: bool) -> String {
        let key = quote_ident(ty.key_name());
        match &self.order_by {
            Some(field) if !sort_in_memory && field != ty.key_name() => format!(
                " ORDER BY {} {}, {key} ASC",
                quote_ident(field),
                self.order_direction.sql()
            ),
            Some(_) if !sort_in_memory => format!(" ORDER BY {key} {}", self.order_direction.sql()),
            _ => format!(" ORDER BY {key} ASC"),
        }
    }

    // Stable sort on a side-channel field; nulls first, key order on ties.
    fn sort_records(&self, ty: &EntityType, records: &mut [Record]) {
        let Some(field) = self.order_by.as_deref() else {
            return;
        };
        let key = ty.key_name();

        records.sort_by(|a, b| {
            let ord = order_values(a.value_of(field), b.value_of(field));
            let ord = if self.order_direction.is_asc() {
                ord
            } else {
                ord.reverse()
            };
            ord.then_with(|| order_values(a.value_of(key), b.value_of(key)))
        });
    }
}

fn order_values(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_order(left, right).unwrap_or(Ordering::Equal),
    }
}
