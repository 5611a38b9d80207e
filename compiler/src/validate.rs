//! Input-value validity of constraint trees
//!
//! Validity messages are user-facing: they describe what to correct and
//! never abort anything beyond the lowering attempt they block. An empty
//! result (`None`) means the subtree is valid.

use crate::ast::{
    CombinationState, ConceptConstraint, ConstraintKind, ConstraintTree, DateOperator, DateRange,
    GapOperator, NodeId, NumericOperator, NumericRestriction, TextOperator, TextRestriction,
    TimeConstraint, ValueRestriction,
};
use crate::concept::ValueType;
use chrono::NaiveDate;

impl ConstraintTree {
    /// First validity message of the whole tree
    pub fn validity(&self) -> Option<String> {
        self.node_validity(self.root())
    }

    /// First validity message in a left-to-right scan of the subtree at `id`
    pub fn node_validity(&self, id: NodeId) -> Option<String> {
        let node = match self.node(id) {
            Ok(node) => node,
            Err(e) => return Some(e.to_string()),
        };
        match node.kind() {
            ConstraintKind::Concept(c) => concept_validity(c),
            ConstraintKind::Value(v) => match &v.restriction {
                ValueRestriction::Numeric(n) => numeric_validity("Value", ValueType::Float, n),
                ValueRestriction::Text(t) => text_validity("Value", t),
            },
            ConstraintKind::Time(t) => time_validity(t),
            ConstraintKind::Cohort(c) => {
                if c.cohort.query_id.is_empty() {
                    Some(format!("Cohort \"{}\" has no saved query", c.cohort.name))
                } else {
                    None
                }
            }
            ConstraintKind::GenomicAnnotation(g) => {
                if g.variant_ids.is_empty() {
                    Some(format!("Genomic annotation \"{}\" matched no variants", g.label()))
                } else {
                    None
                }
            }
            ConstraintKind::Combination(c) if c.state() == CombinationState::TemporalSequence => {
                self.event_group_validity(id, c.gap_info())
                    .or_else(|| self.children_validity(id))
            }
            ConstraintKind::Combination(_) => self.children_validity(id),
            ConstraintKind::Sequential(s) => self
                .event_group_validity(id, s.gap_operator())
                .or_else(|| self.children_validity(id)),
        }
    }

    /// Non-empty event groups of a sequence must match its relations one to one
    fn event_group_validity(&self, id: NodeId, gaps: &[GapOperator]) -> Option<String> {
        let node = self.node(id).ok()?;
        let groups = node
            .children()
            .iter()
            .filter(|&&c| self.has_content(c))
            .count();
        let expected = gaps.len() + 1;
        if groups == expected {
            return None;
        }
        Some(format!(
            "The sequence has {} non-empty event groups for {} temporal relations; {} groups are required",
            groups,
            gaps.len(),
            expected
        ))
    }

    fn children_validity(&self, id: NodeId) -> Option<String> {
        let node = self.node(id).ok()?;
        if let Some(gaps) = node.gaps() {
            if let Some(msg) = gaps.iter().find_map(|g| g.validity()) {
                return Some(msg);
            }
        }
        node.children()
            .iter()
            .find_map(|&child| self.node_validity(child))
    }

    /// Whether the subtree at `id` holds at least one leaf
    pub fn has_content(&self, id: NodeId) -> bool {
        match self.node(id) {
            Ok(node) if node.kind().is_composite() => {
                node.children().iter().any(|&c| self.has_content(c))
            }
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

fn concept_validity(c: &ConceptConstraint) -> Option<String> {
    let name = &c.concept.display_name;
    if let Some(n) = &c.numeric {
        if !c.concept.value_type.is_numeric() {
            return Some(format!("Concept \"{}\" does not take a numeric value", name));
        }
        if let Some(msg) = numeric_validity(name, c.concept.value_type, n) {
            return Some(msg);
        }
    }
    if let Some(t) = &c.text {
        if !c.concept.value_type.is_text() {
            return Some(format!("Concept \"{}\" does not take a text value", name));
        }
        if let Some(msg) = text_validity(name, t) {
            return Some(msg);
        }
    }
    if let Some(d) = &c.observation_date {
        if let Some(msg) = date_range_validity(name, "observation date", d) {
            return Some(msg);
        }
    }
    c.value_date
        .as_ref()
        .and_then(|d| date_range_validity(name, "value date", d))
}

fn numeric_validity(name: &str, value_type: ValueType, n: &NumericRestriction) -> Option<String> {
    let operands: Vec<(&str, Option<f64>)> = match n.operator {
        NumericOperator::Between => vec![("lower bound", n.min), ("upper bound", n.max)],
        _ => vec![("value", n.value)],
    };
    for (role, operand) in &operands {
        let v = match operand {
            Some(v) => *v,
            None => {
                return Some(format!(
                    "Concept \"{}\": a {} is required for \"{}\"",
                    name,
                    role,
                    n.operator.symbol()
                ))
            }
        };
        if !v.is_finite() {
            return Some(format!("Concept \"{}\": {} {} is not a number", name, role, v));
        }
        if value_type.is_integer_only() && v.fract() != 0.0 {
            return Some(format!(
                "Concept \"{}\" only accepts integers, {} is not one",
                name, v
            ));
        }
        if value_type.is_positive_only() && v < 0.0 {
            return Some(format!(
                "Concept \"{}\" only accepts positive values, {} is negative",
                name, v
            ));
        }
    }
    if let (NumericOperator::Between, Some(min), Some(max)) = (n.operator, n.min, n.max) {
        if min > max {
            return Some(format!(
                "Concept \"{}\": lower bound {} is greater than upper bound {}",
                name, min, max
            ));
        }
    }
    None
}

fn text_validity(name: &str, t: &TextRestriction) -> Option<String> {
    match t.operator {
        TextOperator::In => {
            if t.values.is_empty() || t.values.iter().any(|v| v.trim().is_empty()) {
                Some(format!(
                    "Concept \"{}\": every value of the list must be non-empty",
                    name
                ))
            } else if t.values.iter().any(|v| v.contains('\'')) {
                Some(format!(
                    "Concept \"{}\": list values cannot contain single quotes",
                    name
                ))
            } else {
                None
            }
        }
        _ if t.value.trim().is_empty() => {
            Some(format!("Concept \"{}\": a text value is required", name))
        }
        _ => None,
    }
}

fn time_validity(t: &TimeConstraint) -> Option<String> {
    let missing = match t.operator {
        DateOperator::Before => t.range.end.is_none(),
        DateOperator::After => t.range.start.is_none(),
        DateOperator::Between => t.range.start.is_none() || t.range.end.is_none(),
    };
    if missing {
        return Some(format!("Time constraint \"{}\" is missing a date", t.label()));
    }
    date_range_validity("Time constraint", "date", &t.range)
}

fn date_range_validity(name: &str, what: &str, d: &DateRange) -> Option<String> {
    let parse = |date: &Option<String>| -> Result<Option<NaiveDate>, String> {
        match date {
            Some(date) => parse_date(date).map(Some).ok_or_else(|| {
                format!(
                    "Concept \"{}\": {} \"{}\" is not a valid YYYY-MM-DD date",
                    name, what, date
                )
            }),
            None => Ok(None),
        }
    };
    let start = match parse(&d.start) {
        Ok(start) => start,
        Err(msg) => return Some(msg),
    };
    let end = match parse(&d.end) {
        Ok(end) => end,
        Err(msg) => return Some(msg),
    };
    match (start, end) {
        (Some(start), Some(end)) if start > end => Some(format!(
            "Concept \"{}\": {} range starts ({}) after it ends ({})",
            name, what, start, end
        )),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    // chrono accepts unpadded fields, the wire format does not
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
