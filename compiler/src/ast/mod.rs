//! Constraint tree definitions
//!
//! A query under construction is a tree of constraints held in an arena
//! ([`ConstraintTree`]). Nodes are addressed by [`NodeId`]; each carries the
//! shared fields (label, exclusion, parent link, panel timing) plus a closed
//! [`ConstraintKind`] payload. Composite kinds own their children through the
//! node's child list and keep one temporal relation per adjacent pair.
//!
//! Cloning a tree clones the arena, so a clone never shares mutable state with
//! its source.

pub mod composite;
pub mod concept;
pub mod temporal;

pub use concept::{
    CohortConstraint, ConceptConstraint, DateOperator, DateRange, GenomicAnnotationConstraint,
    NumericOperator, NumericRestriction, TextOperator, TextRestriction, TimeConstraint,
    ValueConstraint, ValueRestriction,
};
pub use temporal::{
    GapOperator, SpanOperator, SpanUnit, TemporalSpan, TemporalWhen, WhichDate, WhichObservation,
};

use crate::concept::{Cohort, Concept};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TreeError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("{kind} constraint {id} cannot hold children")]
    NotComposite { id: NodeId, kind: &'static str },

    #[error("{id} is not a combination constraint")]
    NotCombination { id: NodeId },

    #[error("Node {child} is already attached to {owner}")]
    AlreadyAttached { child: NodeId, owner: NodeId },

    #[error("Attaching {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("Node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("Index {index} out of range for {id} ({len} entries)")]
    IndexOutOfRange { id: NodeId, index: usize, len: usize },

    #[error("Malformed tree: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(String),
}

/// Index of a node inside its [`ConstraintTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Node kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombinationState {
    #[default]
    And,
    Or,
    TemporalSequence,
}

/// Unordered AND/OR grouping, or a temporal sequence using `gap_info`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CombinationConstraint {
    pub(crate) state: CombinationState,
    /// Relation between child `i` and child `i + 1`; only read in
    /// `TemporalSequence` state
    #[serde(default)]
    pub(crate) gap_info: Vec<GapOperator>,
    /// Top-level inclusion/exclusion tree; never re-parented when embedded
    #[serde(default)]
    pub(crate) is_root: bool,
}

impl CombinationConstraint {
    pub fn state(&self) -> CombinationState {
        self.state
    }

    pub fn gap_info(&self) -> &[GapOperator] {
        &self.gap_info
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }
}

/// Ordered chain of event groups linked pairwise by temporal relations
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequentialConstraint {
    #[serde(default)]
    pub(crate) gap_operator: Vec<GapOperator>,
}

impl SequentialConstraint {
    pub fn gap_operator(&self) -> &[GapOperator] {
        &self.gap_operator
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    Concept(ConceptConstraint),
    Cohort(CohortConstraint),
    GenomicAnnotation(GenomicAnnotationConstraint),
    Value(ValueConstraint),
    Time(TimeConstraint),
    Combination(CombinationConstraint),
    Sequential(SequentialConstraint),
}

impl ConstraintKind {
    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::Concept(_) => "concept",
            ConstraintKind::Cohort(_) => "cohort",
            ConstraintKind::GenomicAnnotation(_) => "genomic annotation",
            ConstraintKind::Value(_) => "value",
            ConstraintKind::Time(_) => "time",
            ConstraintKind::Combination(_) => "combination",
            ConstraintKind::Sequential(_) => "sequential",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            ConstraintKind::Combination(_) | ConstraintKind::Sequential(_)
        )
    }

    /// Label of a leaf; composites derive theirs from their children
    fn leaf_label(&self) -> String {
        match self {
            ConstraintKind::Concept(c) => c.label(),
            ConstraintKind::Cohort(c) => c.label(),
            ConstraintKind::GenomicAnnotation(g) => g.label(),
            ConstraintKind::Value(v) => v.label(),
            ConstraintKind::Time(t) => t.label(),
            ConstraintKind::Combination(_) | ConstraintKind::Sequential(_) => String::new(),
        }
    }
}

/// Relation rendered between two consecutive children of a composite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    And,
    Or,
    Temporal(GapOperator),
}

impl Relation {
    pub fn label(&self) -> String {
        match self {
            Relation::And => "and".to_string(),
            Relation::Or => "or".to_string(),
            Relation::Temporal(gap) => gap.label(),
        }
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// A constraint ready to be inserted into a tree
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub excluded: bool,
    pub same_instance_timing: Option<bool>,
}

impl Constraint {
    pub fn new(kind: ConstraintKind) -> Self {
        Self {
            kind,
            excluded: false,
            same_instance_timing: None,
        }
    }

    pub fn concept(concept: ConceptConstraint) -> Self {
        Self::new(ConstraintKind::Concept(concept))
    }

    /// Presence-only concept leaf
    pub fn plain_concept(concept: Concept) -> Self {
        Self::concept(ConceptConstraint::new(concept))
    }

    pub fn cohort(cohort: Cohort) -> Self {
        Self::new(ConstraintKind::Cohort(CohortConstraint { cohort }))
    }

    pub fn genomic_annotation(annotation: impl Into<String>, variant_ids: Vec<String>) -> Self {
        Self::new(ConstraintKind::GenomicAnnotation(
            GenomicAnnotationConstraint {
                annotation: annotation.into(),
                variant_ids,
            },
        ))
    }

    pub fn value(restriction: ValueRestriction) -> Self {
        Self::new(ConstraintKind::Value(ValueConstraint { restriction }))
    }

    pub fn time(operator: DateOperator, range: DateRange) -> Self {
        Self::new(ConstraintKind::Time(TimeConstraint { operator, range }))
    }

    pub fn combination(state: CombinationState) -> Self {
        Self::new(ConstraintKind::Combination(CombinationConstraint {
            state,
            gap_info: Vec::new(),
            is_root: false,
        }))
    }

    pub fn and() -> Self {
        Self::combination(CombinationState::And)
    }

    pub fn or() -> Self {
        Self::combination(CombinationState::Or)
    }

    /// Top-level AND marked as a root tree
    pub fn root() -> Self {
        Self::new(ConstraintKind::Combination(CombinationConstraint {
            state: CombinationState::And,
            gap_info: Vec::new(),
            is_root: true,
        }))
    }

    pub fn sequence() -> Self {
        Self::new(ConstraintKind::Sequential(SequentialConstraint::default()))
    }

    pub fn excluded(mut self, excluded: bool) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn same_instance(mut self, same_instance: bool) -> Self {
        self.same_instance_timing = Some(same_instance);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintNode {
    #[serde(default)]
    pub(crate) text_label: String,
    #[serde(default)]
    pub(crate) excluded: bool,
    #[serde(default)]
    pub(crate) parent: Option<NodeId>,
    #[serde(default)]
    pub(crate) same_instance_timing: Option<bool>,
    #[serde(default)]
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: ConstraintKind,
}

impl ConstraintNode {
    fn from_constraint(c: Constraint) -> Self {
        let text_label = c.kind.leaf_label();
        Self {
            text_label,
            excluded: c.excluded,
            parent: None,
            same_instance_timing: c.same_instance_timing,
            children: Vec::new(),
            kind: c.kind,
        }
    }

    pub fn text_label(&self) -> &str {
        &self.text_label
    }

    pub fn excluded(&self) -> bool {
        self.excluded
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn same_instance_timing(&self) -> Option<bool> {
        self.same_instance_timing
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    pub fn is_root(&self) -> bool {
        matches!(&self.kind, ConstraintKind::Combination(c) if c.is_root)
    }

    /// Gap metadata of a composite, `None` for leaves
    pub fn gaps(&self) -> Option<&[GapOperator]> {
        match &self.kind {
            ConstraintKind::Combination(c) => Some(&c.gap_info),
            ConstraintKind::Sequential(s) => Some(&s.gap_operator),
            _ => None,
        }
    }

    pub(crate) fn gaps_mut(&mut self) -> Option<&mut Vec<GapOperator>> {
        match &mut self.kind {
            ConstraintKind::Combination(c) => Some(&mut c.gap_info),
            ConstraintKind::Sequential(s) => Some(&mut s.gap_operator),
            _ => None,
        }
    }

    /// Relation between child `index` and child `index + 1`
    pub fn separator(&self, index: usize) -> Option<Relation> {
        match &self.kind {
            ConstraintKind::Combination(c) => match c.state {
                CombinationState::And => Some(Relation::And),
                CombinationState::Or => Some(Relation::Or),
                CombinationState::TemporalSequence => {
                    c.gap_info.get(index).cloned().map(Relation::Temporal)
                }
            },
            ConstraintKind::Sequential(s) => {
                s.gap_operator.get(index).cloned().map(Relation::Temporal)
            }
            _ => None,
        }
    }
}

// =============================================================================
// Tree
// =============================================================================

/// Arena holding one constraint tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintTree {
    nodes: Vec<ConstraintNode>,
    root: NodeId,
}

impl ConstraintTree {
    pub fn new(root: Constraint) -> Self {
        Self {
            nodes: vec![ConstraintNode::from_constraint(root)],
            root: NodeId(0),
        }
    }

    /// Empty top-level AND, the starting point of a selection
    pub fn new_selection() -> Self {
        Self::new(Constraint::root())
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_node(&self) -> &ConstraintNode {
        &self.nodes[self.root.0]
    }

    /// Number of slots in the arena, detached nodes included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a detached node; attach it with [`ConstraintTree::add_child`]
    pub fn insert(&mut self, constraint: Constraint) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(ConstraintNode::from_constraint(constraint));
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&ConstraintNode, TreeError> {
        self.nodes.get(id.0).ok_or(TreeError::UnknownNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut ConstraintNode, TreeError> {
        self.nodes.get_mut(id.0).ok_or(TreeError::UnknownNode(id))
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], TreeError> {
        Ok(&self.node(id)?.children)
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        Ok(self.node(id)?.parent)
    }

    /// Number of parent links between `id` and the top of its tree
    pub fn depth(&self, id: NodeId) -> Result<usize, TreeError> {
        let mut depth = 0;
        let mut current = self.node(id)?.parent;
        while let Some(p) = current {
            depth += 1;
            current = self.node(p)?.parent;
        }
        Ok(depth)
    }

    pub fn text_label(&self) -> &str {
        self.root_node().text_label()
    }

    pub fn set_excluded(&mut self, id: NodeId, excluded: bool) -> Result<(), TreeError> {
        self.node_mut(id)?.excluded = excluded;
        Ok(())
    }

    pub fn set_same_instance_timing(
        &mut self,
        id: NodeId,
        timing: Option<bool>,
    ) -> Result<(), TreeError> {
        self.node_mut(id)?.same_instance_timing = timing;
        Ok(())
    }

    /// Parent that lists `id` among its children, independent of parent links
    pub(crate) fn owner_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.children.contains(&id))
            .map(NodeId)
    }

    /// Whether `needle` is `id` or one of its descendants
    pub(crate) fn contains(&self, id: NodeId, needle: NodeId) -> bool {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if current == needle {
                return true;
            }
            if let Some(node) = self.nodes.get(current.0) {
                stack.extend(node.children.iter().copied());
            }
        }
        false
    }

    /// Ids of `id` and its descendants in pre-order
    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current)?;
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Deep copies
    // -------------------------------------------------------------------------

    /// Copy the subtree at `id` from `source` into this arena as a detached node
    fn copy_from(&mut self, source: &ConstraintTree, id: NodeId) -> Result<NodeId, TreeError> {
        let node = source.node(id)?;
        let new_id = NodeId(self.nodes.len());
        self.nodes.push(ConstraintNode {
            parent: None,
            children: Vec::new(),
            ..node.clone()
        });
        let mut children = Vec::with_capacity(node.children.len());
        for &child in &node.children {
            let copied = self.copy_from(source, child)?;
            if !self.nodes[copied.0].is_root() {
                self.nodes[copied.0].parent = Some(new_id);
            }
            children.push(copied);
        }
        self.nodes[new_id.0].children = children;
        Ok(new_id)
    }

    /// Independent tree holding a deep copy of the subtree at `id`
    pub fn subtree(&self, id: NodeId) -> Result<ConstraintTree, TreeError> {
        let mut out = ConstraintTree {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        out.root = out.copy_from(self, id)?;
        Ok(out)
    }

    /// Deep copy of `id` inside this arena, returned detached
    pub fn duplicate(&mut self, id: NodeId) -> Result<NodeId, TreeError> {
        let snapshot = self.subtree(id)?;
        self.copy_from(&snapshot, snapshot.root)
    }

    /// Deep copy `other` and attach it as the last child of `parent`
    pub fn graft(&mut self, parent: NodeId, other: &ConstraintTree) -> Result<NodeId, TreeError> {
        self.node(parent)?;
        let id = self.copy_from(other, other.root)?;
        self.add_child(parent, id)?;
        Ok(id)
    }

    /// Copy without detached nodes
    pub fn compacted(&self) -> Result<ConstraintTree, TreeError> {
        self.subtree(self.root)
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    pub fn to_json(&self) -> Result<String, TreeError> {
        serde_json::to_string_pretty(self).map_err(|e| TreeError::Json(e.to_string()))
    }

    /// Parse a tree and check its structural integrity
    ///
    /// Stored labels are not trusted; they are re-derived from the payloads.
    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        let mut tree: ConstraintTree =
            serde_json::from_str(json).map_err(|e| TreeError::Json(e.to_string()))?;
        tree.fill_unused_gaps();
        tree.check_integrity()?;
        tree.relabel()?;
        Ok(tree)
    }

    /// AND/OR groups ignore their relations, so stored files may omit them
    fn fill_unused_gaps(&mut self) {
        for node in &mut self.nodes {
            let pairs = node.children.len().saturating_sub(1);
            if let ConstraintKind::Combination(c) = &mut node.kind {
                if c.state != CombinationState::TemporalSequence && c.gap_info.is_empty() {
                    c.gap_info.resize(pairs, GapOperator::default());
                }
            }
        }
    }

    /// Re-derive every label reachable from the root, children first
    fn relabel(&mut self) -> Result<(), TreeError> {
        for id in self.descendants(self.root)?.into_iter().rev() {
            let label = if self.nodes[id.0].kind.is_composite() {
                self.composite_label(id)?
            } else {
                self.nodes[id.0].kind.leaf_label()
            };
            self.nodes[id.0].text_label = label;
        }
        Ok(())
    }

    /// Verify ids, parent links, gap sizing and acyclicity
    pub fn check_integrity(&self) -> Result<(), TreeError> {
        if self.root.0 >= self.nodes.len() {
            return Err(TreeError::Malformed(format!("root {} out of range", self.root)));
        }
        let mut owners: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i);
            if !node.children.is_empty() && !node.kind.is_composite() {
                return Err(TreeError::Malformed(format!(
                    "{} node {} has children",
                    node.kind.name(),
                    id
                )));
            }
            for &child in &node.children {
                let slot = owners.get_mut(child.0).ok_or_else(|| {
                    TreeError::Malformed(format!("{} references unknown child {}", id, child))
                })?;
                if slot.is_some() || child == self.root {
                    return Err(TreeError::Malformed(format!(
                        "{} is owned more than once",
                        child
                    )));
                }
                *slot = Some(id);
            }
            if let Some(gaps) = node.gaps() {
                let expected = node.children.len().saturating_sub(1);
                if gaps.len() != expected {
                    return Err(TreeError::Malformed(format!(
                        "{} has {} temporal relations for {} children",
                        id,
                        gaps.len(),
                        node.children.len()
                    )));
                }
            }
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                if owners[i] != Some(parent) {
                    return Err(TreeError::Malformed(format!(
                        "{} claims parent {} which does not own it",
                        NodeId(i),
                        parent
                    )));
                }
            }
        }
        // single ownership plus a reachable walk bound rules out cycles
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            if std::mem::replace(&mut seen[current.0], true) {
                return Err(TreeError::Malformed(format!("cycle through {}", current)));
            }
            stack.extend(self.nodes[current.0].children.iter().copied());
        }
        Ok(())
    }
}

impl Default for ConstraintTree {
    fn default() -> Self {
        Self::new_selection()
    }
}
