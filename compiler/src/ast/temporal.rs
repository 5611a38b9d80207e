//! Temporal relations between adjacent children of a sequence
//!
//! A sequence of `n` event groups carries `n - 1` relations; relation `i`
//! links group `i` (first) to group `i + 1` (second).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemporalWhen {
    #[default]
    Less,
    #[serde(rename = "LESSEQUAL")]
    LessEqual,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WhichDate {
    #[default]
    #[serde(rename = "STARTDATE")]
    StartDate,
    #[serde(rename = "ENDDATE")]
    EndDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WhichObservation {
    #[default]
    First,
    Last,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanUnit {
    Hour,
    Day,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanOperator {
    Less,
    #[serde(rename = "LESSEQUAL")]
    LessEqual,
    Equal,
    #[serde(rename = "GREATEREQUAL")]
    GreaterEqual,
    Greater,
}

impl SpanOperator {
    fn is_lower_bound(&self) -> bool {
        matches!(self, SpanOperator::Greater | SpanOperator::GreaterEqual)
    }

    fn is_upper_bound(&self) -> bool {
        matches!(self, SpanOperator::Less | SpanOperator::LessEqual)
    }
}

/// Bound on the time elapsed between the two events of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalSpan {
    pub value: u32,
    pub units: SpanUnit,
    pub operator: SpanOperator,
}

/// Temporal relation between two adjacent event groups
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapOperator {
    pub when: TemporalWhen,
    pub which_date_first: WhichDate,
    pub which_observation_first: WhichObservation,
    pub which_date_second: WhichDate,
    pub which_observation_second: WhichObservation,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<TemporalSpan>,
}

impl GapOperator {
    pub fn new(when: TemporalWhen) -> Self {
        Self {
            when,
            ..Self::default()
        }
    }

    pub fn with_span(mut self, value: u32, units: SpanUnit, operator: SpanOperator) -> Self {
        self.spans.push(TemporalSpan {
            value,
            units,
            operator,
        });
        self
    }

    /// Textual form used in labels and export separators
    pub fn label(&self) -> String {
        let mut label = match self.when {
            TemporalWhen::Less => "before".to_string(),
            TemporalWhen::LessEqual => "before or at the same time as".to_string(),
            TemporalWhen::Equal => "at the same time as".to_string(),
        };
        for (i, span) in self.spans.iter().enumerate() {
            label.push_str(if i == 0 { " by " } else { " and " });
            label.push_str(&span.to_string());
        }
        label
    }

    /// Check the span bounds; `None` when the relation is well formed
    pub fn validity(&self) -> Option<String> {
        match self.spans.as_slice() {
            [] | [_] => None,
            [a, b] => {
                let brackets = (a.operator.is_lower_bound() && b.operator.is_upper_bound())
                    || (a.operator.is_upper_bound() && b.operator.is_lower_bound());
                if brackets {
                    None
                } else {
                    Some(format!(
                        "Temporal relation \"{}\" has two spans that do not form a lower and an upper bound",
                        self.label()
                    ))
                }
            }
            spans => Some(format!(
                "Temporal relation \"{}\" has {} spans, at most 2 are allowed",
                self.label(),
                spans.len()
            )),
        }
    }
}

impl fmt::Display for TemporalSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.operator {
            SpanOperator::Less => "less than",
            SpanOperator::LessEqual => "at most",
            SpanOperator::Equal => "exactly",
            SpanOperator::GreaterEqual => "at least",
            SpanOperator::Greater => "more than",
        };
        let unit = match self.units {
            SpanUnit::Hour => "hour",
            SpanUnit::Day => "day",
            SpanUnit::Month => "month",
            SpanUnit::Year => "year",
        };
        let plural = if self.value == 1 { "" } else { "s" };
        write!(f, "{} {} {}{}", op, self.value, unit, plural)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_relation_label() {
        assert_eq!(GapOperator::default().label(), "before");
        assert_eq!(GapOperator::new(TemporalWhen::Equal).label(), "at the same time as");
    }

    #[test]
    fn test_span_label() {
        let gap = GapOperator::new(TemporalWhen::Less)
            .with_span(1, SpanUnit::Day, SpanOperator::GreaterEqual)
            .with_span(3, SpanUnit::Month, SpanOperator::Less);
        assert_eq!(gap.label(), "before by at least 1 day and less than 3 months");
        assert_eq!(gap.validity(), None);
    }

    #[test]
    fn test_two_upper_bounds_rejected() {
        let gap = GapOperator::default()
            .with_span(1, SpanUnit::Day, SpanOperator::Less)
            .with_span(3, SpanUnit::Day, SpanOperator::LessEqual);
        assert!(gap.validity().is_some());
    }

    #[test]
    fn test_wire_names() {
        let gap = GapOperator::new(TemporalWhen::LessEqual);
        let json = serde_json::to_value(&gap).unwrap();
        assert_eq!(json["when"], "LESSEQUAL");
        assert_eq!(json["whichDateFirst"], "STARTDATE");
        assert_eq!(json["whichObservationSecond"], "FIRST");
        assert!(json.get("spans").is_none());
    }
}
