//! Plain-text export, one line per node
//!
//! ```text
//! ALL OF
//!   Age > 40 years
//!   and
//!   ANY OF
//!     Diabetes
//!     or
//!     NOT cohort Smokers
//! ```

use super::{walk, ConstraintVisitor};
use crate::ast::{
    CombinationConstraint, CombinationState, ConstraintNode, ConstraintTree, NodeId, Relation,
    SequentialConstraint, TreeError,
};

/// Renders a tree as indented lines; separators get a line of their own
#[derive(Debug, Clone)]
pub struct TextExporter {
    indent: usize,
}

impl Default for TextExporter {
    fn default() -> Self {
        Self { indent: 2 }
    }
}

impl TextExporter {
    pub fn with_indent(indent: usize) -> Self {
        Self { indent }
    }

    pub fn render(&mut self, tree: &ConstraintTree) -> Result<String, TreeError> {
        self.render_node(tree, tree.root())
    }

    pub fn render_node(&mut self, tree: &ConstraintTree, id: NodeId) -> Result<String, TreeError> {
        Ok(walk(tree, id, self)?.join("\n"))
    }

    fn composite(&self, node: &ConstraintNode, header: &str, parts: Vec<Vec<String>>) -> Vec<String> {
        let pad = " ".repeat(self.indent);
        let mut lines = vec![format!("{}{}", negation(node), header)];
        lines.extend(
            parts
                .into_iter()
                .flatten()
                .map(|line| format!("{}{}", pad, line)),
        );
        lines
    }
}

fn negation(node: &ConstraintNode) -> &'static str {
    if node.excluded() {
        "NOT "
    } else {
        ""
    }
}

impl ConstraintVisitor for TextExporter {
    type Output = Vec<String>;

    fn visit_generic(&mut self, node: &ConstraintNode, parts: Vec<Vec<String>>) -> Vec<String> {
        if parts.is_empty() {
            vec![format!("{}{}", negation(node), node.text_label())]
        } else {
            self.composite(node, node.kind().name(), parts)
        }
    }

    fn visit_separator(&mut self, relation: &Relation) -> Vec<String> {
        vec![relation.label()]
    }

    fn visit_combination(
        &mut self,
        node: &ConstraintNode,
        combination: &CombinationConstraint,
        parts: Vec<Vec<String>>,
    ) -> Vec<String> {
        let header = match combination.state() {
            CombinationState::And => "ALL OF",
            CombinationState::Or => "ANY OF",
            CombinationState::TemporalSequence => "IN SEQUENCE",
        };
        self.composite(node, header, parts)
    }

    fn visit_sequential(
        &mut self,
        node: &ConstraintNode,
        _sequence: &SequentialConstraint,
        parts: Vec<Vec<String>>,
    ) -> Vec<String> {
        self.composite(node, "SEQUENCE OF", parts)
    }
}
