//! Traversal contract for renderers
//!
//! [`walk`] visits a subtree in order and hands each node to the matching
//! [`ConstraintVisitor`] method. Composite nodes receive the already-visited
//! results of their children, interleaved with one separator result per
//! adjacent pair, so a renderer never has to look up relations itself.

pub mod summary;
pub mod text;

pub use summary::{SummaryExporter, SummaryNode};
pub use text::TextExporter;

use crate::ast::{
    CohortConstraint, CombinationConstraint, ConceptConstraint, ConstraintKind, ConstraintNode,
    ConstraintTree, GenomicAnnotationConstraint, NodeId, Relation, SequentialConstraint,
    TimeConstraint, TreeError, ValueConstraint,
};
use tracing::trace;

/// One handler per node kind; every kind falls back to [`visit_generic`]
///
/// `parts` holds child results and separator results in rendering order:
/// `child, separator, child, ...`.
///
/// [`visit_generic`]: ConstraintVisitor::visit_generic
pub trait ConstraintVisitor {
    type Output;

    fn visit_generic(&mut self, node: &ConstraintNode, parts: Vec<Self::Output>) -> Self::Output;

    fn visit_separator(&mut self, relation: &Relation) -> Self::Output;

    fn visit_concept(&mut self, node: &ConstraintNode, _concept: &ConceptConstraint) -> Self::Output {
        self.visit_generic(node, Vec::new())
    }

    fn visit_cohort(&mut self, node: &ConstraintNode, _cohort: &CohortConstraint) -> Self::Output {
        self.visit_generic(node, Vec::new())
    }

    fn visit_genomic_annotation(
        &mut self,
        node: &ConstraintNode,
        _annotation: &GenomicAnnotationConstraint,
    ) -> Self::Output {
        self.visit_generic(node, Vec::new())
    }

    fn visit_value(&mut self, node: &ConstraintNode, _value: &ValueConstraint) -> Self::Output {
        self.visit_generic(node, Vec::new())
    }

    fn visit_time(&mut self, node: &ConstraintNode, _time: &TimeConstraint) -> Self::Output {
        self.visit_generic(node, Vec::new())
    }

    fn visit_combination(
        &mut self,
        node: &ConstraintNode,
        _combination: &CombinationConstraint,
        parts: Vec<Self::Output>,
    ) -> Self::Output {
        self.visit_generic(node, parts)
    }

    fn visit_sequential(
        &mut self,
        node: &ConstraintNode,
        _sequence: &SequentialConstraint,
        parts: Vec<Self::Output>,
    ) -> Self::Output {
        self.visit_generic(node, parts)
    }
}

/// Visit the subtree at `id`, children before their parent
pub fn walk<V>(tree: &ConstraintTree, id: NodeId, visitor: &mut V) -> Result<V::Output, TreeError>
where
    V: ConstraintVisitor + ?Sized,
{
    let node = tree.node(id)?;
    trace!(node = %id, kind = node.kind().name(), "visit");
    let output = match node.kind() {
        ConstraintKind::Concept(c) => visitor.visit_concept(node, c),
        ConstraintKind::Cohort(c) => visitor.visit_cohort(node, c),
        ConstraintKind::GenomicAnnotation(g) => visitor.visit_genomic_annotation(node, g),
        ConstraintKind::Value(v) => visitor.visit_value(node, v),
        ConstraintKind::Time(t) => visitor.visit_time(node, t),
        ConstraintKind::Combination(c) => {
            let parts = walk_children(tree, node, visitor)?;
            visitor.visit_combination(node, c, parts)
        }
        ConstraintKind::Sequential(s) => {
            let parts = walk_children(tree, node, visitor)?;
            visitor.visit_sequential(node, s, parts)
        }
    };
    Ok(output)
}

fn walk_children<V>(
    tree: &ConstraintTree,
    node: &ConstraintNode,
    visitor: &mut V,
) -> Result<Vec<V::Output>, TreeError>
where
    V: ConstraintVisitor + ?Sized,
{
    let mut parts = Vec::with_capacity(node.children().len() * 2);
    for (i, &child) in node.children().iter().enumerate() {
        if i > 0 {
            if let Some(relation) = node.separator(i - 1) {
                parts.push(visitor.visit_separator(&relation));
            }
        }
        parts.push(walk(tree, child, visitor)?);
    }
    Ok(parts)
}
