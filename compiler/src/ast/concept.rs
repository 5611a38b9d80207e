//! Leaf constraint payloads
//!
//! Concept, cohort and genomic-annotation leaves are what the user drops into
//! a query; value and time leaves are the auxiliary restriction kinds that the
//! export visitor can address on their own.

use crate::concept::{Cohort, Concept};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Numeric restrictions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
}

impl NumericOperator {
    /// Operator tag understood by the query engine
    pub fn wire_tag(&self) -> &'static str {
        match self {
            NumericOperator::Eq => "EQ",
            NumericOperator::Ne => "NE",
            NumericOperator::Gt => "GT",
            NumericOperator::Ge => "GE",
            NumericOperator::Lt => "LT",
            NumericOperator::Le => "LE",
            NumericOperator::Between => "BETWEEN",
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "EQ" => NumericOperator::Eq,
            "NE" => NumericOperator::Ne,
            "GT" => NumericOperator::Gt,
            "GE" => NumericOperator::Ge,
            "LT" => NumericOperator::Lt,
            "LE" => NumericOperator::Le,
            "BETWEEN" => NumericOperator::Between,
            _ => return None,
        })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            NumericOperator::Eq => "=",
            NumericOperator::Ne => "!=",
            NumericOperator::Gt => ">",
            NumericOperator::Ge => ">=",
            NumericOperator::Lt => "<",
            NumericOperator::Le => "<=",
            NumericOperator::Between => "between",
        }
    }
}

/// Numeric restriction as edited in the UI
///
/// Operands stay optional until the user fills them in; validation rejects
/// missing ones before lowering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRestriction {
    pub operator: NumericOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl NumericRestriction {
    pub fn compare(operator: NumericOperator, value: f64) -> Self {
        Self {
            operator,
            value: Some(value),
            min: None,
            max: None,
        }
    }

    pub fn between(min: f64, max: f64) -> Self {
        Self {
            operator: NumericOperator::Between,
            value: None,
            min: Some(min),
            max: Some(max),
        }
    }

    fn describe(&self, unit: Option<&str>) -> String {
        let unit = unit.map(|u| format!(" {}", u)).unwrap_or_default();
        match self.operator {
            NumericOperator::Between => format!(
                "between {} and {}{}",
                operand(self.min),
                operand(self.max),
                unit
            ),
            op => format!("{} {}{}", op.symbol(), operand(self.value), unit),
        }
    }
}

fn operand(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
}

// =============================================================================
// Text restrictions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextOperator {
    Exact,
    Begin,
    End,
    Contains,
    In,
}

impl TextOperator {
    pub fn wire_tag(&self) -> &'static str {
        match self {
            TextOperator::Exact => "LIKE[exact]",
            TextOperator::Begin => "LIKE[begin]",
            TextOperator::End => "LIKE[end]",
            TextOperator::Contains => "LIKE[contains]",
            TextOperator::In => "IN",
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "LIKE[exact]" => TextOperator::Exact,
            "LIKE[begin]" => TextOperator::Begin,
            "LIKE[end]" => TextOperator::End,
            "LIKE[contains]" => TextOperator::Contains,
            "IN" => TextOperator::In,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRestriction {
    pub operator: TextOperator,
    /// Operand for the `LIKE` forms
    #[serde(default)]
    pub value: String,
    /// Operands for the `IN` form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl TextRestriction {
    pub fn like(operator: TextOperator, value: impl Into<String>) -> Self {
        Self {
            operator,
            value: value.into(),
            values: Vec::new(),
        }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operator: TextOperator::In,
            value: String::new(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn describe(&self) -> String {
        match self.operator {
            TextOperator::Exact => format!("is '{}'", self.value),
            TextOperator::Begin => format!("begins with '{}'", self.value),
            TextOperator::End => format!("ends with '{}'", self.value),
            TextOperator::Contains => format!("contains '{}'", self.value),
            TextOperator::In => {
                let quoted: Vec<String> = self.values.iter().map(|v| format!("'{}'", v)).collect();
                format!("in ({})", quoted.join(", "))
            }
        }
    }
}

/// Either kind of value restriction, as carried by a [`ValueConstraint`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRestriction {
    Numeric(NumericRestriction),
    Text(TextRestriction),
}

// =============================================================================
// Dates
// =============================================================================

/// Inclusive date window, ISO-8601 `YYYY-MM-DD` bounds
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl DateRange {
    pub fn new(start: Option<&str>, end: Option<&str>) -> Self {
        Self {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.start, &self.end) {
            (Some(s), Some(e)) => write!(f, "from {} to {}", s, e),
            (Some(s), None) => write!(f, "since {}", s),
            (None, Some(e)) => write!(f, "until {}", e),
            (None, None) => write!(f, "at any time"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOperator {
    Before,
    After,
    Between,
}

// =============================================================================
// Leaf payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptConstraint {
    pub concept: Concept,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericRestriction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextRestriction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_date: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<DateRange>,
}

impl ConceptConstraint {
    pub fn new(concept: Concept) -> Self {
        Self {
            concept,
            numeric: None,
            text: None,
            observation_date: None,
            value_date: None,
        }
    }

    pub fn with_numeric(mut self, numeric: NumericRestriction) -> Self {
        self.numeric = Some(numeric);
        self
    }

    pub fn with_text(mut self, text: TextRestriction) -> Self {
        self.text = Some(text);
        self
    }

    pub fn with_observation_date(mut self, range: DateRange) -> Self {
        self.observation_date = Some(range);
        self
    }

    pub fn with_value_date(mut self, range: DateRange) -> Self {
        self.value_date = Some(range);
        self
    }

    pub fn label(&self) -> String {
        let mut label = self.concept.display_name.clone();
        if let Some(n) = &self.numeric {
            label.push(' ');
            label.push_str(&n.describe(self.concept.unit.as_deref()));
        }
        if let Some(t) = &self.text {
            label.push(' ');
            label.push_str(&t.describe());
        }
        if let Some(d) = self.observation_date.as_ref().filter(|d| !d.is_unbounded()) {
            label.push_str(&format!(" (observed {})", d));
        }
        if let Some(d) = self.value_date.as_ref().filter(|d| !d.is_unbounded()) {
            label.push_str(&format!(" (value dated {})", d));
        }
        label
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortConstraint {
    pub cohort: Cohort,
}

impl CohortConstraint {
    pub fn label(&self) -> String {
        format!("cohort {}", self.cohort.name)
    }
}

/// Genomic variants selected through an annotation search
///
/// `variant_ids` are already encrypted upstream and are passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomicAnnotationConstraint {
    /// Annotation the variants were looked up by, e.g. `protein_change: p.V600E`
    #[serde(default)]
    pub annotation: String,
    pub variant_ids: Vec<String>,
}

impl GenomicAnnotationConstraint {
    pub fn label(&self) -> String {
        if self.annotation.is_empty() {
            format!("{} genomic variant(s)", self.variant_ids.len())
        } else {
            self.annotation.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueConstraint {
    pub restriction: ValueRestriction,
}

impl ValueConstraint {
    pub fn label(&self) -> String {
        match &self.restriction {
            ValueRestriction::Numeric(n) => format!("value {}", n.describe(None)),
            ValueRestriction::Text(t) => format!("value {}", t.describe()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConstraint {
    pub operator: DateOperator,
    pub range: DateRange,
}

impl TimeConstraint {
    pub fn label(&self) -> String {
        let bound = |d: &Option<String>| d.clone().unwrap_or_else(|| "?".to_string());
        match self.operator {
            DateOperator::Before => format!("date before {}", bound(&self.range.end)),
            DateOperator::After => format!("date after {}", bound(&self.range.start)),
            DateOperator::Between => format!(
                "date between {} and {}",
                bound(&self.range.start),
                bound(&self.range.end)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ValueType;

    fn age() -> Concept {
        Concept::new("\\demo\\age\\", "Age")
            .with_value_type(ValueType::PositiveInteger)
            .with_unit("years")
    }

    #[test]
    fn test_numeric_label() {
        let c = ConceptConstraint::new(age())
            .with_numeric(NumericRestriction::compare(NumericOperator::Gt, 40.0));
        assert_eq!(c.label(), "Age > 40 years");

        let c = ConceptConstraint::new(age()).with_numeric(NumericRestriction::between(10.0, 20.5));
        assert_eq!(c.label(), "Age between 10 and 20.5 years");
    }

    #[test]
    fn test_text_label() {
        let c = ConceptConstraint::new(Concept::new("\\x\\", "Smoking"))
            .with_text(TextRestriction::one_of(["never", "former"]));
        assert_eq!(c.label(), "Smoking in ('never', 'former')");
    }

    #[test]
    fn test_date_label() {
        let c = ConceptConstraint::new(Concept::new("\\x\\", "Diabetes"))
            .with_observation_date(DateRange::new(Some("2020-01-01"), None));
        assert_eq!(c.label(), "Diabetes (observed since 2020-01-01)");
    }

    #[test]
    fn test_operator_tags_are_symmetric() {
        for op in [
            NumericOperator::Eq,
            NumericOperator::Ne,
            NumericOperator::Gt,
            NumericOperator::Ge,
            NumericOperator::Lt,
            NumericOperator::Le,
            NumericOperator::Between,
        ] {
            assert_eq!(NumericOperator::from_wire_tag(op.wire_tag()), Some(op));
        }
        assert_eq!(TextOperator::from_wire_tag("LIKE[begin]"), Some(TextOperator::Begin));
        assert_eq!(TextOperator::from_wire_tag("LIKE"), None);
    }

    #[test]
    fn test_time_label() {
        let t = TimeConstraint {
            operator: DateOperator::Between,
            range: DateRange::new(Some("2019-01-01"), Some("2019-12-31")),
        };
        assert_eq!(t.label(), "date between 2019-01-01 and 2019-12-31");
    }
}
