use chrono::{Duration, TimeZone, Utc};
use chrono_tz::Tz;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use temps_query::query::condition_tree::equivalence::resolve;
use temps_query::{ColumnType, ConditionTreeLeaf, EvalContext, Operator, RecordData};

fn ctx() -> EvalContext {
    EvalContext::at(
        Tz::America__New_York,
        Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap(),
    )
}

fn record(value: &Value) -> RecordData {
    let mut record = RecordData::new();
    record.insert("field".to_string(), value.clone());
    record
}

/// Rewrite the leaf for the supported set and compare with direct evaluation
fn check_equivalence(
    leaf: &ConditionTreeLeaf,
    supported: &BTreeSet<Operator>,
    column_type: &ColumnType,
    samples: &[Value],
) -> Result<(), TestCaseError> {
    let Some(replacer) = resolve(leaf.operator, supported, column_type) else {
        return Ok(());
    };

    let ctx = ctx();
    let tree = replacer.apply(leaf, column_type, &ctx).unwrap();
    prop_assert!(tree.every_leaf(|l| supported.contains(&l.operator)));

    for sample in samples {
        let record = record(sample);
        prop_assert_eq!(
            leaf.matches(&record, &ctx).unwrap(),
            tree.matches(&record, &ctx).unwrap(),
            "{:?} with {:?} on {}",
            leaf.operator,
            leaf.value,
            sample
        );
    }
    Ok(())
}

fn number_value() -> impl Strategy<Value = Value> {
    prop_oneof![Just(Value::Null), (-3i64..3).prop_map(Value::from)]
}

fn string_value() -> impl Strategy<Value = Value> {
    prop_oneof![Just(Value::Null), "[aAb%_.]{0,4}".prop_map(Value::from)]
}

fn supported_sets() -> impl Strategy<Value = BTreeSet<Operator>> {
    prop::sample::subsequence(
        vec![
            Operator::Equal,
            Operator::NotEqual,
            Operator::In,
            Operator::NotIn,
            Operator::LessThan,
            Operator::GreaterThan,
            Operator::Missing,
            Operator::Like,
            Operator::ILike,
            Operator::Match,
        ],
        1..6,
    )
    .prop_map(|ops| ops.into_iter().collect())
}

proptest! {
    #[test]
    fn test_comparison_rewrites(
        operator in prop::sample::select(vec![
            Operator::Equal,
            Operator::NotEqual,
            Operator::In,
            Operator::NotIn,
            Operator::LessThanOrEqual,
            Operator::GreaterThanOrEqual,
            Operator::Blank,
            Operator::Present,
            Operator::Missing,
        ]),
        value in (-3i64..3),
        list in prop::collection::vec(number_value(), 0..4),
        supported in supported_sets(),
        samples in prop::collection::vec(number_value(), 1..8),
    ) {
        let leaf_value = if operator.expects_list() {
            Some(Value::Array(list))
        } else if operator.is_unary() {
            None
        } else {
            Some(Value::from(value))
        };
        let leaf = ConditionTreeLeaf::new("field", operator, leaf_value);
        check_equivalence(&leaf, &supported, &ColumnType::Number, &samples)?;
    }

    #[test]
    fn test_pattern_rewrites(
        operator in prop::sample::select(vec![
            Operator::Contains,
            Operator::IContains,
            Operator::StartsWith,
            Operator::IStartsWith,
            Operator::EndsWith,
            Operator::IEndsWith,
            Operator::Like,
            Operator::ILike,
            Operator::Blank,
            Operator::Present,
        ]),
        pattern in "[aAb%_.]{0,3}",
        supported in supported_sets(),
        samples in prop::collection::vec(string_value(), 1..8),
    ) {
        let value = if operator.is_unary() { None } else { Some(Value::from(pattern)) };
        let leaf = ConditionTreeLeaf::new("field", operator, value);
        check_equivalence(&leaf, &supported, &ColumnType::String, &samples)?;
    }

    #[test]
    fn test_relative_date_rewrites(
        operator in prop::sample::select(vec![
            Operator::Today,
            Operator::Yesterday,
            Operator::PreviousWeek,
            Operator::PreviousWeekToDate,
            Operator::PreviousMonth,
            Operator::PreviousQuarterToDate,
            Operator::PreviousYear,
            Operator::Past,
            Operator::Future,
            Operator::PreviousXDays,
            Operator::BeforeXHoursAgo,
        ]),
        offsets in prop::collection::vec(-200_000i64..200_000, 1..8),
    ) {
        let now = ctx().now;
        let samples: Vec<Value> = offsets
            .iter()
            .map(|minutes| json!((now + Duration::minutes(*minutes)).to_rfc3339()))
            .collect();

        let value = match operator {
            Operator::PreviousXDays => Some(json!(10)),
            Operator::BeforeXHoursAgo => Some(json!(5)),
            _ => None,
        };
        let leaf = ConditionTreeLeaf::new("field", operator, value);
        let supported: BTreeSet<Operator> =
            [Operator::LessThan, Operator::GreaterThan, Operator::Equal].into_iter().collect();

        prop_assert!(resolve(operator, &supported, &ColumnType::Date).is_some());
        check_equivalence(&leaf, &supported, &ColumnType::Date, &samples)?;
    }
}
