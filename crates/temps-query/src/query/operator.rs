use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::types::ColumnType;

/// Filter operators understood by condition tree leaves.
///
/// Variant names are the wire names and must not change.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Operator {
    Present,
    Blank,
    Missing,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    In,
    NotIn,
    Like,
    ILike,
    Match,
    Contains,
    NotContains,
    IContains,
    NotIContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    LongerThan,
    ShorterThan,
    IncludesAll,
    IncludesNone,
    Before,
    After,
    AfterXHoursAgo,
    BeforeXHoursAgo,
    Future,
    Past,
    Today,
    Yesterday,
    PreviousWeek,
    PreviousWeekToDate,
    PreviousMonth,
    PreviousMonthToDate,
    PreviousQuarter,
    PreviousQuarterToDate,
    PreviousYear,
    PreviousYearToDate,
    PreviousXDays,
    PreviousXDaysToDate,
}

use Operator::*;

impl Operator {
    pub const ALL: [Operator; 44] = [
        Present,
        Blank,
        Missing,
        Equal,
        NotEqual,
        LessThan,
        GreaterThan,
        LessThanOrEqual,
        GreaterThanOrEqual,
        In,
        NotIn,
        Like,
        ILike,
        Match,
        Contains,
        NotContains,
        IContains,
        NotIContains,
        StartsWith,
        IStartsWith,
        EndsWith,
        IEndsWith,
        LongerThan,
        ShorterThan,
        IncludesAll,
        IncludesNone,
        Before,
        After,
        AfterXHoursAgo,
        BeforeXHoursAgo,
        Future,
        Past,
        Today,
        Yesterday,
        PreviousWeek,
        PreviousWeekToDate,
        PreviousMonth,
        PreviousMonthToDate,
        PreviousQuarter,
        PreviousQuarterToDate,
        PreviousYear,
        PreviousYearToDate,
        PreviousXDays,
        PreviousXDaysToDate,
    ];

    /// Operators that take no value
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Present
                | Blank
                | Missing
                | Future
                | Past
                | Today
                | Yesterday
                | PreviousWeek
                | PreviousWeekToDate
                | PreviousMonth
                | PreviousMonthToDate
                | PreviousQuarter
                | PreviousQuarterToDate
                | PreviousYear
                | PreviousYearToDate
        )
    }

    /// Operators that expect a list of values
    pub fn expects_list(self) -> bool {
        matches!(self, In | NotIn | IncludesAll | IncludesNone)
    }

    /// Relative-date operators whose meaning depends on the current time
    pub fn is_relative_date(self) -> bool {
        matches!(
            self,
            AfterXHoursAgo
                | BeforeXHoursAgo
                | Future
                | Past
                | Today
                | Yesterday
                | PreviousWeek
                | PreviousWeekToDate
                | PreviousMonth
                | PreviousMonthToDate
                | PreviousQuarter
                | PreviousQuarterToDate
                | PreviousYear
                | PreviousYearToDate
                | PreviousXDays
                | PreviousXDaysToDate
        )
    }

    /// Operator matching exactly the records this one rejects, when one exists
    pub fn inverse(self) -> Option<Operator> {
        match self {
            Equal => Some(NotEqual),
            NotEqual => Some(Equal),
            In => Some(NotIn),
            NotIn => Some(In),
            Contains => Some(NotContains),
            NotContains => Some(Contains),
            IContains => Some(NotIContains),
            NotIContains => Some(IContains),
            Present => Some(Blank),
            Blank => Some(Present),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

const BASE_OPERATORS: &[Operator] = &[Present, Blank, Missing, Equal, NotEqual, In, NotIn];

const ORDERING_OPERATORS: &[Operator] = &[
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
];

const STRING_OPERATORS: &[Operator] = &[
    Like,
    ILike,
    Match,
    Contains,
    NotContains,
    IContains,
    NotIContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    LongerThan,
    ShorterThan,
];

const DATE_OPERATORS: &[Operator] = &[
    Before,
    After,
    AfterXHoursAgo,
    BeforeXHoursAgo,
    Future,
    Past,
    Today,
    Yesterday,
    PreviousWeek,
    PreviousWeekToDate,
    PreviousMonth,
    PreviousMonthToDate,
    PreviousQuarter,
    PreviousQuarterToDate,
    PreviousYear,
    PreviousYearToDate,
    PreviousXDays,
    PreviousXDaysToDate,
];

/// Operators a column of the given type may be filtered with once every
/// missing capability is emulated.
pub fn allowed_operators(column_type: &ColumnType) -> BTreeSet<Operator> {
    let mut operators: BTreeSet<Operator> = BTreeSet::new();

    match column_type {
        ColumnType::Json | ColumnType::Point | ColumnType::Binary => {
            operators.extend([Present, Blank, Missing]);
        }
        ColumnType::Boolean | ColumnType::Enum | ColumnType::Uuid => {
            operators.extend(BASE_OPERATORS);
        }
        ColumnType::String => {
            operators.extend(BASE_OPERATORS);
            operators.extend(STRING_OPERATORS);
        }
        ColumnType::Number | ColumnType::Time => {
            operators.extend(BASE_OPERATORS);
            operators.extend(ORDERING_OPERATORS);
        }
        ColumnType::Date | ColumnType::Dateonly => {
            operators.extend(BASE_OPERATORS);
            operators.extend(ORDERING_OPERATORS);
            operators.extend(DATE_OPERATORS);
        }
        ColumnType::Array(_) => {
            operators.extend([Present, Blank, Missing, IncludesAll, IncludesNone]);
        }
    }

    operators
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_wire_names() {
        let json = serde_json::to_value(Operator::PreviousXDaysToDate).unwrap();
        assert_eq!(json, "PreviousXDaysToDate");

        let op: Operator = serde_json::from_value(serde_json::json!("IContains")).unwrap();
        assert_eq!(op, Operator::IContains);
    }

    #[test]
    fn test_all_operators_are_distinct() {
        let set: BTreeSet<Operator> = Operator::ALL.iter().copied().collect();
        assert_eq!(set.len(), Operator::ALL.len());
    }

    #[test]
    fn test_inverse_is_symmetric() {
        for op in Operator::ALL {
            if let Some(inverse) = op.inverse() {
                assert_eq!(inverse.inverse(), Some(op));
            }
        }
    }

    #[test]
    fn test_allowed_operators_by_type() {
        let strings = allowed_operators(&ColumnType::String);
        assert!(strings.contains(&Operator::IContains));
        assert!(!strings.contains(&Operator::GreaterThan));

        let dates = allowed_operators(&ColumnType::Date);
        assert!(dates.contains(&Operator::PreviousQuarter));
        assert!(dates.contains(&Operator::GreaterThanOrEqual));

        let json = allowed_operators(&ColumnType::Json);
        assert_eq!(json.len(), 3);
    }
}
