//! Panel list → constraint tree raising pass
//!
//! Rebuilds an editable tree from a stored query. A panel with one
//! alternative raises to a leaf, a panel with several raises to an OR group
//! of leaves, and the panels are combined under a top-level AND.
//!
//! Raising is lossy: only the flat shapes produced by lowering come back
//! unchanged. Deeper AND/OR nesting collapses to AND-of-ORs, and date ranges
//! (which have no wire field) are dropped.

use crate::ast::{
    CombinationState, ConceptConstraint, Constraint, ConstraintTree, NodeId, NumericOperator,
    NumericRestriction, TextOperator, TextRestriction, TreeError,
};
use crate::concept::{Cohort, Concept, Modifier};
use crate::ir::{Panel, PanelItem, QueryDefinition, SequentialOperator, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq)]
pub enum RaiseError {
    #[error("Unknown query term: {0}")]
    UnresolvedTerm(String),

    #[error("Unknown cohort query id: {0}")]
    UnresolvedCohort(String),

    #[error("Unknown operator {operator} on {query_term}")]
    UnknownOperator {
        query_term: String,
        operator: String,
    },

    #[error("Malformed value {value:?} for operator {operator} on {query_term}")]
    MalformedValue {
        query_term: String,
        operator: String,
        value: String,
    },

    #[error("Item {query_term} has a value restriction without {missing}")]
    IncompleteRestriction {
        query_term: String,
        missing: &'static str,
    },

    #[error("Panel {index} has no items")]
    EmptyPanel { index: usize },

    #[error("{operators} temporal operators for {panels} sequential panels")]
    OperatorCountMismatch { panels: usize, operators: usize },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

// =============================================================================
// Term resolution
// =============================================================================

/// What a panel item refers to
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedTerm {
    Concept(Concept),
    GenomicVariant(String),
}

/// Collaborator mapping wire terms back to ontology and cohort-store entries
pub trait TermResolver {
    fn resolve_item(&self, item: &PanelItem) -> Option<ResolvedTerm>;

    fn resolve_cohort(&self, query_id: &str) -> Option<Cohort>;
}

/// In-memory resolver, loadable from JSON
///
/// Concepts are keyed by the term they are queried with: the ontology path,
/// or the ciphertext for encrypted concepts. Modifier items are looked up by
/// the modifier key and re-targeted at the item's applied concept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticTermResolver {
    #[serde(default)]
    concepts: HashMap<String, Concept>,

    /// Genomic variant id → annotation label
    #[serde(default)]
    variants: HashMap<String, String>,

    /// Saved query id → cohort
    #[serde(default)]
    cohorts: HashMap<String, Cohort>,
}

impl StaticTermResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concept(mut self, concept: Concept) -> Self {
        self.concepts.insert(concept.path.clone(), concept);
        self
    }

    pub fn with_encrypted_concept(mut self, ciphertext: impl Into<String>, concept: Concept) -> Self {
        self.concepts.insert(ciphertext.into(), concept);
        self
    }

    pub fn with_variant(mut self, id: impl Into<String>, annotation: impl Into<String>) -> Self {
        self.variants.insert(id.into(), annotation.into());
        self
    }

    pub fn with_cohort(mut self, cohort: Cohort) -> Self {
        self.cohorts.insert(cohort.query_id.clone(), cohort);
        self
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl TermResolver for StaticTermResolver {
    fn resolve_item(&self, item: &PanelItem) -> Option<ResolvedTerm> {
        if let Some(m) = &item.modifier {
            let mut concept = self.concepts.get(&m.key)?.clone();
            concept.modifier = Some(Modifier {
                key_path: m.key.clone(),
                applied_path: m.applied_path.clone(),
                applied_concept_path: item.query_term.clone(),
            });
            return Some(ResolvedTerm::Concept(concept));
        }
        if let Some(annotation) = self.variants.get(&item.query_term) {
            return Some(ResolvedTerm::GenomicVariant(annotation.clone()));
        }
        self.concepts
            .get(&item.query_term)
            .cloned()
            .map(ResolvedTerm::Concept)
    }

    fn resolve_cohort(&self, query_id: &str) -> Option<Cohort> {
        self.cohorts.get(query_id).cloned()
    }
}

// =============================================================================
// Raising
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaiseOptions {
    /// Re-wrap top-level leaves as `AND(OR(leaf))`
    pub normalize: bool,
}

impl Default for RaiseOptions {
    fn default() -> Self {
        Self { normalize: true }
    }
}

/// Trees rebuilt from a stored query
#[derive(Debug, Clone, PartialEq)]
pub struct RaisedQuery {
    pub selection: ConstraintTree,
    /// `None` when the query has no sequential panels
    pub sequence: Option<ConstraintTree>,
    pub query_same_instance: bool,
}

/// One panel raised to either a leaf or an OR group of leaves
enum RaisedPanel {
    Leaf(Constraint),
    Group { or: Constraint, leaves: Vec<Constraint> },
}

impl RaisedPanel {
    /// Insert into `tree` as a detached node
    fn insert(self, tree: &mut ConstraintTree) -> Result<NodeId, TreeError> {
        match self {
            RaisedPanel::Leaf(leaf) => Ok(tree.insert(leaf)),
            RaisedPanel::Group { or, leaves } => {
                let id = tree.insert(or);
                for leaf in leaves {
                    let leaf_id = tree.insert(leaf);
                    tree.add_child(id, leaf_id)?;
                }
                Ok(id)
            }
        }
    }

    /// Canonical OR form; a leaf gets a wrapper carrying its flags
    fn into_group(self) -> RaisedPanel {
        match self {
            RaisedPanel::Leaf(leaf) => {
                let mut or = Constraint::or().excluded(leaf.excluded);
                or.same_instance_timing = leaf.same_instance_timing;
                RaisedPanel::Group {
                    or,
                    leaves: vec![leaf],
                }
            }
            group => group,
        }
    }
}

/// Rebuild a selection tree from its panels
pub fn raise_selection(
    panels: &[Panel],
    resolver: &dyn TermResolver,
    options: RaiseOptions,
) -> Result<ConstraintTree, RaiseError> {
    let mut raised = panels
        .iter()
        .enumerate()
        .map(|(i, p)| raise_panel(i, p, resolver))
        .collect::<Result<Vec<_>, _>>()?;

    if options.normalize {
        let mut tree = ConstraintTree::new_selection();
        let root = tree.root();
        for panel in raised {
            let id = panel.into_group().insert(&mut tree)?;
            tree.add_child(root, id)?;
        }
        debug!(panels = panels.len(), "raised selection");
        return Ok(tree);
    }

    let tree = if raised.len() == 1 {
        match raised.pop() {
            Some(RaisedPanel::Leaf(leaf)) => ConstraintTree::new(leaf),
            Some(RaisedPanel::Group { or, leaves }) => {
                let mut tree = ConstraintTree::new(or);
                let root = tree.root();
                for leaf in leaves {
                    let id = tree.insert(leaf);
                    tree.add_child(root, id)?;
                }
                tree
            }
            None => ConstraintTree::new_selection(),
        }
    } else {
        let mut tree = ConstraintTree::new_selection();
        let root = tree.root();
        for panel in raised {
            let id = panel.insert(&mut tree)?;
            tree.add_child(root, id)?;
        }
        tree
    };
    debug!(panels = panels.len(), "raised selection without normalization");
    Ok(tree)
}

/// Rebuild a sequence tree, installing `operators` verbatim
pub fn raise_sequence(
    panels: &[Panel],
    operators: &[SequentialOperator],
    resolver: &dyn TermResolver,
) -> Result<ConstraintTree, RaiseError> {
    if operators.len() != panels.len().saturating_sub(1) {
        return Err(RaiseError::OperatorCountMismatch {
            panels: panels.len(),
            operators: operators.len(),
        });
    }

    let mut tree = ConstraintTree::new(Constraint::sequence());
    let root = tree.root();
    for (i, panel) in panels.iter().enumerate() {
        let id = raise_panel(i, panel, resolver)?.insert(&mut tree)?;
        tree.add_child(root, id)?;
    }
    for (i, op) in operators.iter().enumerate() {
        tree.set_gap(root, i, op.clone())?;
    }
    debug!(panels = panels.len(), "raised sequence");
    Ok(tree)
}

/// Rebuild both trees of a stored query
pub fn raise_query(
    query: &QueryDefinition,
    resolver: &dyn TermResolver,
    options: RaiseOptions,
) -> Result<RaisedQuery, RaiseError> {
    let selection = raise_selection(&query.selection_panels, resolver, options)?;
    let sequence = if query.sequential_panels.is_empty() {
        None
    } else {
        Some(raise_sequence(
            &query.sequential_panels,
            &query.sequential_operators,
            resolver,
        )?)
    };
    Ok(RaisedQuery {
        selection,
        sequence,
        query_same_instance: query.query_timing.is_same_instance(),
    })
}

fn raise_panel(
    index: usize,
    panel: &Panel,
    resolver: &dyn TermResolver,
) -> Result<RaisedPanel, RaiseError> {
    if panel.is_empty() {
        return Err(RaiseError::EmptyPanel { index });
    }
    let mut leaves = Vec::with_capacity(panel.item_count());
    for item in &panel.concept_items {
        leaves.push(raise_item(item, resolver)?);
    }
    for id in &panel.cohort_items {
        let cohort = resolver
            .resolve_cohort(id)
            .ok_or_else(|| RaiseError::UnresolvedCohort(id.clone()))?;
        leaves.push(Constraint::cohort(cohort));
    }

    let same_instance = panel.timing.is_same_instance().then_some(true);
    if leaves.len() == 1 {
        let mut leaf = leaves.remove(0).excluded(panel.not);
        leaf.same_instance_timing = same_instance;
        return Ok(RaisedPanel::Leaf(leaf));
    }
    let mut or = Constraint::combination(CombinationState::Or).excluded(panel.not);
    or.same_instance_timing = same_instance;
    Ok(RaisedPanel::Group { or, leaves })
}

fn raise_item(item: &PanelItem, resolver: &dyn TermResolver) -> Result<Constraint, RaiseError> {
    let concept = match resolver.resolve_item(item) {
        Some(ResolvedTerm::Concept(concept)) => concept,
        Some(ResolvedTerm::GenomicVariant(annotation)) => {
            return Ok(Constraint::genomic_annotation(
                annotation,
                vec![item.query_term.clone()],
            ))
        }
        None => return Err(RaiseError::UnresolvedTerm(item.query_term.clone())),
    };

    if item.encrypted != concept.is_encrypted() {
        warn!(
            term = %item.query_term,
            encrypted = item.encrypted,
            "resolved concept disagrees with the item's encryption flag"
        );
    }

    let mut constraint = ConceptConstraint::new(concept);
    match (item.value_kind, &item.operator) {
        (None, None) => {}
        (Some(_), None) => {
            return Err(RaiseError::IncompleteRestriction {
                query_term: item.query_term.clone(),
                missing: "an operator",
            })
        }
        (None, Some(_)) => {
            return Err(RaiseError::IncompleteRestriction {
                query_term: item.query_term.clone(),
                missing: "a value type",
            })
        }
        (Some(kind), Some(operator)) => {
            let value = item
                .value
                .as_deref()
                .ok_or_else(|| RaiseError::IncompleteRestriction {
                    query_term: item.query_term.clone(),
                    missing: "a value",
                })?;
            match kind {
                ValueKind::Number => {
                    constraint.numeric = Some(parse_numeric(item, operator, value)?)
                }
                ValueKind::Text => constraint.text = Some(parse_text(item, operator, value)?),
            }
        }
    }
    Ok(Constraint::concept(constraint))
}

fn parse_numeric(
    item: &PanelItem,
    operator: &str,
    value: &str,
) -> Result<NumericRestriction, RaiseError> {
    let op = NumericOperator::from_wire_tag(operator).ok_or_else(|| RaiseError::UnknownOperator {
        query_term: item.query_term.clone(),
        operator: operator.to_string(),
    })?;
    let malformed = || RaiseError::MalformedValue {
        query_term: item.query_term.clone(),
        operator: operator.to_string(),
        value: value.to_string(),
    };
    let number = |s: &str| s.trim().parse::<f64>().map_err(|_| malformed());

    match op {
        NumericOperator::Between => {
            let (min, max) = value.split_once(" and ").ok_or_else(malformed)?;
            Ok(NumericRestriction::between(number(min)?, number(max)?))
        }
        op => Ok(NumericRestriction::compare(op, number(value)?)),
    }
}

fn parse_text(item: &PanelItem, operator: &str, value: &str) -> Result<TextRestriction, RaiseError> {
    let op = TextOperator::from_wire_tag(operator).ok_or_else(|| RaiseError::UnknownOperator {
        query_term: item.query_term.clone(),
        operator: operator.to_string(),
    })?;
    if op != TextOperator::In {
        return Ok(TextRestriction::like(op, value));
    }

    let inner = value
        .trim()
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .ok_or_else(|| RaiseError::MalformedValue {
            query_term: item.query_term.clone(),
            operator: operator.to_string(),
            value: value.to_string(),
        })?;
    Ok(TextRestriction::one_of(inner.split("','")))
}
