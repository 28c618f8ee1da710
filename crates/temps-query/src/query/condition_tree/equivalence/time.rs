//! Relative-date operators expanded into absolute comparisons.
//!
//! Periods are computed in the filter timezone: days start at local midnight
//! and weeks start on Monday.

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde_json::Value;

use super::{date_type, Alternative};
use crate::error::{DataError, Result};
use crate::query::condition_tree::{ConditionTree, ConditionTreeLeaf};
use crate::query::context::EvalContext;
use crate::query::operator::Operator::{self, *};
use crate::types::ColumnType;

/// Bound of a period: a calendar date (local midnight) or an instant
#[derive(Debug, Clone, Copy)]
enum Bound {
    Date(NaiveDate),
    Instant(DateTime<Utc>),
}

fn start_of_day(timezone: Tz, date: NaiveDate) -> Result<DateTime<Utc>> {
    // Some zones skip midnight on DST changes, take the first valid local time
    (0..=3)
        .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
        .find_map(|time| timezone.from_local_datetime(&date.and_time(time)).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            DataError::internal(format!("No local midnight for {} in {}", date, timezone))
        })
}

fn format_bound(bound: Bound, column_type: &ColumnType, ctx: &EvalContext) -> Result<Value> {
    let text = match (bound, column_type) {
        (Bound::Date(date), ColumnType::Dateonly) => date.format("%Y-%m-%d").to_string(),
        (Bound::Date(date), _) => {
            start_of_day(ctx.timezone, date)?.to_rfc3339_opts(SecondsFormat::Millis, true)
        }
        (Bound::Instant(instant), ColumnType::Dateonly) => instant
            .with_timezone(&ctx.timezone)
            .date_naive()
            .format("%Y-%m-%d")
            .to_string(),
        (Bound::Instant(instant), _) => instant.to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    Ok(Value::String(text))
}

fn compare(
    leaf: &ConditionTreeLeaf,
    operator: Operator,
    bound: Bound,
    column_type: &ColumnType,
    ctx: &EvalContext,
) -> Result<ConditionTree> {
    Ok(leaf
        .with_operator(operator, format_bound(bound, column_type, ctx)?)
        .into())
}

fn range(
    leaf: &ConditionTreeLeaf,
    start: Bound,
    end: Bound,
    column_type: &ColumnType,
    ctx: &EvalContext,
) -> Result<ConditionTree> {
    Ok(ConditionTree::and(vec![
        compare(leaf, GreaterThanOrEqual, start, column_type, ctx)?,
        compare(leaf, LessThan, end, column_type, ctx)?,
    ]))
}

fn hours_value(leaf: &ConditionTreeLeaf) -> Result<Duration> {
    leaf.value
        .as_ref()
        .and_then(Value::as_f64)
        .filter(|hours| hours.is_finite())
        .map(|hours| Duration::milliseconds((hours * 3_600_000.0) as i64))
        .ok_or_else(|| {
            DataError::validation(format!(
                "Operator '{}' on '{}' expects a number of hours",
                leaf.operator, leaf.field
            ))
        })
}

fn days_value(leaf: &ConditionTreeLeaf) -> Result<u64> {
    leaf.value.as_ref().and_then(Value::as_u64).ok_or_else(|| {
        DataError::validation(format!(
            "Operator '{}' on '{}' expects a positive number of days",
            leaf.operator, leaf.field
        ))
    })
}

fn shift_days(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| DataError::validation("Date out of range"))
}

fn shift_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_sub_months(Months::new(months))
        .ok_or_else(|| DataError::validation("Date out of range"))
}

fn first_day(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| DataError::internal(format!("Invalid month {}-{}", year, month)))
}

/// Rewrite a relative-date leaf into comparisons against absolute bounds
pub fn expand(
    leaf: &ConditionTreeLeaf,
    column_type: &ColumnType,
    ctx: &EvalContext,
) -> Result<ConditionTree> {
    let now = Bound::Instant(ctx.now);
    let today = ctx.now.with_timezone(&ctx.timezone).date_naive();
    let tomorrow = shift_days(today, 1)?;
    let week_start = shift_days(today, -(today.weekday().num_days_from_monday() as i64))?;
    let month_start = first_day(today.year(), today.month())?;
    let quarter_start = first_day(today.year(), (today.month0() / 3) * 3 + 1)?;
    let year_start = first_day(today.year(), 1)?;

    // Periods ending "to date" stop at the current instant, or tomorrow for calendar dates
    let to_date = match column_type {
        ColumnType::Dateonly => Bound::Date(tomorrow),
        _ => now,
    };

    match leaf.operator {
        Past => compare(leaf, LessThan, now, column_type, ctx),
        Future => compare(leaf, GreaterThan, now, column_type, ctx),
        BeforeXHoursAgo => {
            let instant = ctx.now - hours_value(leaf)?;
            compare(leaf, LessThan, Bound::Instant(instant), column_type, ctx)
        }
        AfterXHoursAgo => {
            let instant = ctx.now - hours_value(leaf)?;
            compare(leaf, GreaterThan, Bound::Instant(instant), column_type, ctx)
        }
        Today => range(leaf, Bound::Date(today), Bound::Date(tomorrow), column_type, ctx),
        Yesterday => range(
            leaf,
            Bound::Date(shift_days(today, -1)?),
            Bound::Date(today),
            column_type,
            ctx,
        ),
        PreviousWeek => range(
            leaf,
            Bound::Date(shift_days(week_start, -7)?),
            Bound::Date(week_start),
            column_type,
            ctx,
        ),
        PreviousWeekToDate => range(leaf, Bound::Date(week_start), to_date, column_type, ctx),
        PreviousMonth => range(
            leaf,
            Bound::Date(shift_months(month_start, 1)?),
            Bound::Date(month_start),
            column_type,
            ctx,
        ),
        PreviousMonthToDate => range(leaf, Bound::Date(month_start), to_date, column_type, ctx),
        PreviousQuarter => range(
            leaf,
            Bound::Date(shift_months(quarter_start, 3)?),
            Bound::Date(quarter_start),
            column_type,
            ctx,
        ),
        PreviousQuarterToDate => {
            range(leaf, Bound::Date(quarter_start), to_date, column_type, ctx)
        }
        PreviousYear => range(
            leaf,
            Bound::Date(first_day(today.year() - 1, 1)?),
            Bound::Date(year_start),
            column_type,
            ctx,
        ),
        PreviousYearToDate => range(leaf, Bound::Date(year_start), to_date, column_type, ctx),
        PreviousXDays => {
            let days = days_value(leaf)? as i64;
            range(
                leaf,
                Bound::Date(shift_days(today, -days)?),
                Bound::Date(today),
                column_type,
                ctx,
            )
        }
        PreviousXDaysToDate => {
            let days = days_value(leaf)? as i64;
            range(
                leaf,
                Bound::Date(shift_days(today, -(days - 1).max(0))?),
                to_date,
                column_type,
                ctx,
            )
        }
        other => Err(DataError::internal(format!(
            "Operator '{}' is not a relative date operator",
            other
        ))),
    }
}

static PAST: [Alternative; 1] = [Alternative {
    depends_on: &[LessThan],
    applies_to: date_type,
    replacer: expand,
}];

static FUTURE: [Alternative; 1] = [Alternative {
    depends_on: &[GreaterThan],
    applies_to: date_type,
    replacer: expand,
}];

static PERIOD: [Alternative; 1] = [Alternative {
    depends_on: &[GreaterThanOrEqual, LessThan],
    applies_to: date_type,
    replacer: expand,
}];

pub(super) fn alternatives(operator: Operator) -> &'static [Alternative] {
    match operator {
        Past | BeforeXHoursAgo => &PAST,
        Future | AfterXHoursAgo => &FUTURE,
        op if op.is_relative_date() => &PERIOD,
        _ => &[],
    }
}
