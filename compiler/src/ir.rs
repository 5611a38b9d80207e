//! Wire representation of a query
//!
//! Lowering flattens a constraint tree into an ordered list of [`Panel`]s:
//! each panel is one group of alternatives (OR) with a shared negation and
//! timing flag, and the query matches patients satisfying every panel. Field
//! names follow the query engine's JSON schema and must not change.

use crate::ast::GapOperator;
use serde::{Deserialize, Serialize};

/// Temporal relation between two consecutive sequential panels
pub type SequentialOperator = GapOperator;

/// Whether the items of a panel (or a query) must come from one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Timing {
    #[default]
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "sameInstanceNum")]
    SameInstance,
}

impl Timing {
    pub fn from_same_instance(same_instance: bool) -> Self {
        if same_instance {
            Timing::SameInstance
        } else {
            Timing::Any
        }
    }

    pub fn is_same_instance(&self) -> bool {
        matches!(self, Timing::SameInstance)
    }
}

/// Complete query as sent to the query engine
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    pub selection_panels: Vec<Panel>,

    #[serde(default)]
    pub sequential_panels: Vec<Panel>,

    /// One relation per adjacent pair of `sequential_panels`
    #[serde(default)]
    pub sequential_operators: Vec<SequentialOperator>,

    /// Informational; the per-panel timing is what the engine reads
    #[serde(default)]
    pub query_timing: Timing,
}

impl QueryDefinition {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    /// Negation of the whole panel
    pub not: bool,

    #[serde(default)]
    pub timing: Timing,

    #[serde(default)]
    pub concept_items: Vec<PanelItem>,

    /// Saved query ids of referenced cohorts
    #[serde(default)]
    pub cohort_items: Vec<String>,
}

impl Panel {
    pub fn item_count(&self) -> usize {
        self.concept_items.len() + self.cohort_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueKind {
    Number,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemModifier {
    pub key: String,
    pub applied_path: String,
}

/// One alternative of a panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelItem {
    pub encrypted: bool,

    /// Ontology path, ciphertext id, or modifier-applied path
    pub query_term: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<ItemModifier>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_kind: Option<ValueKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl PanelItem {
    pub fn term(query_term: impl Into<String>, encrypted: bool) -> Self {
        Self {
            encrypted,
            query_term: query_term.into(),
            modifier: None,
            value_kind: None,
            operator: None,
            value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panel_wire_names() {
        let panel = Panel {
            not: true,
            timing: Timing::SameInstance,
            concept_items: vec![PanelItem {
                value_kind: Some(ValueKind::Number),
                operator: Some("GT".into()),
                value: Some("40".into()),
                ..PanelItem::term("\\demo\\age\\", false)
            }],
            cohort_items: vec!["q-17".into()],
        };
        let json = serde_json::to_value(&panel).unwrap();
        assert_eq!(json["not"], true);
        assert_eq!(json["timing"], "sameInstanceNum");
        assert_eq!(json["conceptItems"][0]["queryTerm"], "\\demo\\age\\");
        assert_eq!(json["conceptItems"][0]["type"], "NUMBER");
        assert!(json["conceptItems"][0].get("modifier").is_none());
        assert_eq!(json["cohortItems"][0], "q-17");
    }

    #[test]
    fn test_query_definition_reads_minimal_json() {
        let q = QueryDefinition::from_json(
            r#"{"selectionPanels": [{"not": false, "conceptItems": [{"encrypted": true, "queryTerm": "xyz"}]}]}"#,
        )
        .unwrap();
        assert_eq!(q.selection_panels.len(), 1);
        assert_eq!(q.selection_panels[0].timing, Timing::Any);
        assert!(q.sequential_operators.is_empty());
        assert_eq!(q.query_timing, Timing::Any);
    }
}
