//! Module: model::composite
//! Responsibility: composite field shapes (currency, address, polymorphic
//! reference), their primitive sub-field layout, and repetition schedules.

use crate::{model::field::FieldKind, value::Value};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

// Upper bound on candidate dates inspected by one `next_after` call.
const MAX_SCHEDULE_STEPS: usize = 20_000;

/// Primitive sub-fields of one composite kind, as `(suffix, kind)` pairs.
#[must_use]
pub const fn sub_fields(kind: FieldKind) -> &'static [(&'static str, FieldKind)] {
    match kind {
        FieldKind::Currency => &[
            ("localvalue", FieldKind::Number),
            ("currency", FieldKind::CurrencyCode),
            ("foreignvalue", FieldKind::Number),
        ],
        FieldKind::Address => &[
            ("street", FieldKind::Text),
            ("street2", FieldKind::Text),
            ("city", FieldKind::Text),
            ("zip", FieldKind::Text),
            ("country", FieldKind::Country),
        ],
        FieldKind::PolymorphicReference => &[
            ("foreign_class", FieldKind::Text),
            ("foreign_id", FieldKind::Reference),
        ],
        _ => &[],
    }
}

/// Storage name of one composite sub-field.
#[must_use]
pub fn sub_field_name(parent: &str, suffix: &str) -> String {
    format!("{parent}_{suffix}")
}

///
/// Currency
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Currency {
    pub local_value: Option<f64>,
    pub currency: Option<String>,
    pub foreign_value: Option<f64>,
}

impl Currency {
    pub(crate) fn into_values(self) -> [Value; 3] {
        [
            self.local_value.into(),
            self.currency.into(),
            self.foreign_value.into(),
        ]
    }

    pub(crate) fn from_values(values: &[&Value]) -> Self {
        Self {
            local_value: values.first().and_then(|v| v.as_float()),
            currency: values.get(1).and_then(|v| v.as_text()).map(str::to_string),
            foreign_value: values.get(2).and_then(|v| v.as_float()),
        }
    }
}

///
/// Address
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Address {
    pub street: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

impl Address {
    pub(crate) fn into_values(self) -> [Value; 5] {
        [
            self.street.into(),
            self.street2.into(),
            self.city.into(),
            self.zip.into(),
            self.country.into(),
        ]
    }

    pub(crate) fn from_values(values: &[&Value]) -> Self {
        let text = |i: usize| {
            values
                .get(i)
                .and_then(|v| v.as_text())
                .map(str::to_string)
        };

        Self {
            street: text(0),
            street2: text(1),
            city: text(2),
            zip: text(3),
            country: text(4),
        }
    }
}

///
/// PolymorphicRef
/// Reference to a record of any registered entity type.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PolymorphicRef {
    pub target_type: String,
    pub target_id: Value,
}

impl PolymorphicRef {
    #[must_use]
    pub fn new(target_type: impl Into<String>, target_id: impl Into<Value>) -> Self {
        Self {
            target_type: target_type.into(),
            target_id: target_id.into(),
        }
    }

    /// Predicate representation: `[target_type, target_id]`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Text(self.target_type.clone()),
            self.target_id.clone(),
        ])
    }

    pub(crate) fn from_values(values: &[&Value]) -> Option<Self> {
        let target_type = values.first()?.as_text()?.to_string();
        let target_id = (*values.get(1)?).clone();
        if target_id.is_null() {
            return None;
        }

        Some(Self {
            target_type,
            target_id,
        })
    }
}

///
/// RepetitionKind
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionKind {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

///
/// Repetition
///
/// Repeating schedule anchored at a start date. Weekly schedules fire on
/// `weekdays` (1 = Monday .. 7 = Sunday, defaulting to the anchor's weekday);
/// monthly schedules fire on `day_of_month`, clamped to the month's length.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Repetition {
    pub kind: RepetitionKind,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekdays: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDate>,
}

const fn default_interval() -> u32 {
    1
}

impl Repetition {
    #[must_use]
    pub const fn new(kind: RepetitionKind, interval: u32) -> Self {
        Self {
            kind,
            interval,
            weekdays: Vec::new(),
            day_of_month: None,
            until: None,
        }
    }

    /// First occurrence strictly after `after`, for a schedule starting at `anchor`.
    #[must_use]
    pub fn next_after(&self, anchor: NaiveDate, after: NaiveDate) -> Option<NaiveDate> {
        let interval = self.interval.max(1);
        let next = match self.kind {
            RepetitionKind::None => (anchor > after).then_some(anchor),
            RepetitionKind::Daily => next_daily(anchor, after, interval),
            RepetitionKind::Weekly => self.next_weekly(anchor, after, interval),
            RepetitionKind::Monthly => self.next_monthly(anchor, after, interval),
            RepetitionKind::Yearly => next_stepped(anchor, after, |k| {
                let months = k.checked_mul(interval.checked_mul(12)?)?;
                anchor.checked_add_months(Months::new(months))
            }),
        }?;

        match self.until {
            Some(until) if next > until => None,
            _ => Some(next),
        }
    }

    fn next_weekly(&self, anchor: NaiveDate, after: NaiveDate, interval: u32) -> Option<NaiveDate> {
        let weekdays: Vec<u32> = if self.weekdays.is_empty() {
            vec![anchor.weekday().number_from_monday()]
        } else {
            self.weekdays.clone()
        };
        let week_start =
            anchor.checked_sub_days(Days::new(u64::from(anchor.weekday().num_days_from_monday())))?;
        let mut candidate = if anchor > after {
            anchor
        } else {
            after.succ_opt()?
        };

        for _ in 0..MAX_SCHEDULE_STEPS {
            let week_index = (candidate - week_start).num_days() / 7;
            if week_index % i64::from(interval) == 0
                && weekdays.contains(&candidate.weekday().number_from_monday())
            {
                return Some(candidate);
            }
            candidate = candidate.succ_opt()?;
        }

        None
    }

    fn next_monthly(&self, anchor: NaiveDate, after: NaiveDate, interval: u32) -> Option<NaiveDate> {
        let day = self.day_of_month.unwrap_or_else(|| anchor.day());
        let first = anchor.with_day(1)?;

        next_stepped(anchor, after, |k| {
            let month = first.checked_add_months(Months::new(k.checked_mul(interval)?))?;
            clamp_day(month.year(), month.month(), day)
        })
    }
}

fn next_daily(anchor: NaiveDate, after: NaiveDate, interval: u32) -> Option<NaiveDate> {
    if anchor > after {
        return Some(anchor);
    }
    let elapsed = u64::try_from((after - anchor).num_days()).ok()?;
    let steps = elapsed / u64::from(interval) + 1;

    anchor.checked_add_days(Days::new(steps * u64::from(interval)))
}

// Walk occurrences `step(0), step(1), ..` until one lands after `after`.
fn next_stepped(
    anchor: NaiveDate,
    after: NaiveDate,
    step: impl Fn(u32) -> Option<NaiveDate>,
) -> Option<NaiveDate> {
    for k in 0..u32::try_from(MAX_SCHEDULE_STEPS).ok()? {
        let candidate = step(k)?;
        if candidate >= anchor && candidate > after {
            return Some(candidate);
        }
    }

    None
}

// Build a date, clamping the day to the month's last day.
fn clamp_day(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    (1..=day.clamp(1, 31))
        .rev()
        .find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn daily_schedule_steps_by_interval() {
        let schedule = Repetition::new(RepetitionKind::Daily, 3);

        assert_eq!(
            schedule.next_after(date(2024, 1, 1), date(2024, 1, 1)),
            Some(date(2024, 1, 4))
        );
        assert_eq!(
            schedule.next_after(date(2024, 1, 1), date(2023, 12, 1)),
            Some(date(2024, 1, 1))
        );
    }

    #[test]
    fn weekly_schedule_honors_weekdays_and_interval() {
        let mut schedule = Repetition::new(RepetitionKind::Weekly, 2);
        schedule.weekdays = vec![1, 5];

        // 2024-01-01 is a Monday.
        let anchor = date(2024, 1, 1);
        assert_eq!(
            schedule.next_after(anchor, date(2024, 1, 1)),
            Some(date(2024, 1, 5))
        );
        assert_eq!(
            schedule.next_after(anchor, date(2024, 1, 5)),
            Some(date(2024, 1, 15))
        );
    }

    #[test]
    fn monthly_schedule_clamps_to_month_end() {
        let mut schedule = Repetition::new(RepetitionKind::Monthly, 1);
        schedule.day_of_month = Some(31);

        assert_eq!(
            schedule.next_after(date(2024, 1, 31), date(2024, 1, 31)),
            Some(date(2024, 2, 29))
        );
    }

    #[test]
    fn until_bounds_the_schedule() {
        let mut schedule = Repetition::new(RepetitionKind::Yearly, 1);
        schedule.until = Some(date(2025, 6, 1));

        assert_eq!(
            schedule.next_after(date(2024, 3, 1), date(2024, 3, 1)),
            Some(date(2025, 3, 1))
        );
        assert_eq!(schedule.next_after(date(2024, 3, 1), date(2025, 3, 1)), None);
    }

    #[test]
    fn sub_fields_cover_composites_only() {
        assert_eq!(sub_fields(FieldKind::Currency).len(), 3);
        assert_eq!(sub_fields(FieldKind::Address).len(), 5);
        assert_eq!(sub_fields(FieldKind::PolymorphicReference).len(), 2);
        assert!(sub_fields(FieldKind::Text).is_empty());
    }
}
