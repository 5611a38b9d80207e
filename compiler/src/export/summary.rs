//! Structured summary for UI rendering

use super::{walk, ConstraintVisitor};
use crate::ast::{
    CohortConstraint, CombinationConstraint, CombinationState, ConceptConstraint, ConstraintNode,
    ConstraintTree, NodeId, Relation, TreeError,
};
use serde::{Deserialize, Serialize};

/// Serializable mirror of a constraint subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryNode {
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_instance: Option<bool>,
    /// Ontology path or cohort query id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SummaryNode>,
    /// `relations[i]` sits between `children[i]` and `children[i + 1]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<String>,
}

impl SummaryNode {
    fn leaf(node: &ConstraintNode, reference: Option<String>) -> Self {
        Self {
            kind: node.kind().name().to_string(),
            label: node.text_label().to_string(),
            excluded: node.excluded(),
            same_instance: node.same_instance_timing(),
            reference,
            children: Vec::new(),
            relations: Vec::new(),
        }
    }
}

/// Visitor output: a rendered node or the relation between two of them
#[derive(Debug, Clone)]
pub enum SummaryPart {
    Node(SummaryNode),
    Separator(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryExporter;

impl SummaryExporter {
    pub fn summarize(&mut self, tree: &ConstraintTree) -> Result<SummaryNode, TreeError> {
        self.summarize_node(tree, tree.root())
    }

    pub fn summarize_node(
        &mut self,
        tree: &ConstraintTree,
        id: NodeId,
    ) -> Result<SummaryNode, TreeError> {
        match walk(tree, id, self)? {
            SummaryPart::Node(node) => Ok(node),
            // walk only yields separators between siblings
            SummaryPart::Separator(label) => Err(TreeError::Malformed(format!(
                "summary of {} produced a bare separator \"{}\"",
                id, label
            ))),
        }
    }
}

impl ConstraintVisitor for SummaryExporter {
    type Output = SummaryPart;

    fn visit_generic(&mut self, node: &ConstraintNode, parts: Vec<SummaryPart>) -> SummaryPart {
        let mut summary = SummaryNode::leaf(node, None);
        for part in parts {
            match part {
                SummaryPart::Node(child) => summary.children.push(child),
                SummaryPart::Separator(label) => summary.relations.push(label),
            }
        }
        SummaryPart::Node(summary)
    }

    fn visit_separator(&mut self, relation: &Relation) -> SummaryPart {
        SummaryPart::Separator(relation.label())
    }

    fn visit_concept(&mut self, node: &ConstraintNode, concept: &ConceptConstraint) -> SummaryPart {
        let path = concept.concept.query_path().to_string();
        SummaryPart::Node(SummaryNode::leaf(node, Some(path)))
    }

    fn visit_cohort(&mut self, node: &ConstraintNode, cohort: &CohortConstraint) -> SummaryPart {
        let id = cohort.cohort.query_id.clone();
        SummaryPart::Node(SummaryNode::leaf(node, Some(id)))
    }

    fn visit_combination(
        &mut self,
        node: &ConstraintNode,
        combination: &CombinationConstraint,
        parts: Vec<SummaryPart>,
    ) -> SummaryPart {
        let mut part = self.visit_generic(node, parts);
        if let SummaryPart::Node(summary) = &mut part {
            summary.kind = match combination.state() {
                CombinationState::And => "and",
                CombinationState::Or => "or",
                CombinationState::TemporalSequence => "temporal sequence",
            }
            .to_string();
        }
        part
    }
}
