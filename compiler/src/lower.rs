//! Constraint tree → panel list lowering pass
//!
//! This module flattens a constraint tree into the ordered panel list the
//! query engine consumes. It performs:
//! - Validation of every node before anything is emitted
//! - AND flattening (nested ANDs concatenate their panels)
//! - OR pooling (one panel holding every alternative of the group)
//! - Concept item encoding (encryption, modifiers, value operators)
//!
//! The pass is all-or-nothing: any error discards the panels produced so far.

use crate::ast::{
    CombinationState, ConceptConstraint, ConstraintKind, ConstraintNode, ConstraintTree, NodeId,
    NumericOperator, NumericRestriction, TextOperator, TextRestriction, TreeError,
};
use crate::crypto::{CryptoError, TermEncryptor};
use crate::ir::*;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error, PartialEq)]
pub enum LowerError {
    #[error("Invalid query: {0}")]
    Invalid(String),

    #[error("OR group {id} mixes excluded and included alternatives")]
    MixedExclusion { id: NodeId },

    #[error("OR group {id} excludes each of its {alternatives} alternatives, which one panel cannot express")]
    ExcludedAlternatives { id: NodeId, alternatives: usize },

    #[error("{kind} constraint {id} cannot be lowered to a panel")]
    UnsupportedConstraint { id: NodeId, kind: &'static str },

    #[error("{kind} constraint {id} cannot be nested inside an OR group")]
    UnsupportedNesting { id: NodeId, kind: &'static str },

    #[error("Expected an OR combination at {id}, found {found}")]
    ExpectedOr { id: NodeId, found: String },

    #[error("Sequence root {id} is a {kind} constraint")]
    NotASequence { id: NodeId, kind: &'static str },

    #[error("Event group {id} lowers to {panels} panels, a sequence step needs exactly one")]
    AmbiguousEventGroup { id: NodeId, panels: usize },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Encryption(#[from] CryptoError),
}

impl LowerError {
    /// Errors the user can fix by editing the query, as opposed to defects
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            LowerError::Invalid(_)
                | LowerError::MixedExclusion { .. }
                | LowerError::ExcludedAlternatives { .. }
        )
    }
}

/// Context for lowering one query
struct LowerContext<'a> {
    /// Query-level same-instance request
    query_same_instance: bool,

    encryptor: &'a dyn TermEncryptor,
}

/// Lower a selection tree to its panels
pub fn lower_selection(
    tree: &ConstraintTree,
    query_same_instance: bool,
    encryptor: &dyn TermEncryptor,
) -> Result<Vec<Panel>, LowerError> {
    check_validity(tree)?;
    let ctx = LowerContext {
        query_same_instance,
        encryptor,
    };
    let mut panels = Vec::new();
    ctx.lower_node(tree, tree.root(), false, &mut panels)?;
    debug!(panels = panels.len(), "lowered selection");
    Ok(panels)
}

/// Lower a sequence tree to one panel per event group plus its relations
///
/// The root must be a sequential constraint or a combination in temporal
/// sequence state; its relations are returned unchanged.
pub fn lower_sequence(
    tree: &ConstraintTree,
    query_same_instance: bool,
    encryptor: &dyn TermEncryptor,
) -> Result<(Vec<Panel>, Vec<SequentialOperator>), LowerError> {
    check_validity(tree)?;
    let ctx = LowerContext {
        query_same_instance,
        encryptor,
    };
    let root = tree.root_node();
    let operators = match root.kind() {
        ConstraintKind::Sequential(s) => s.gap_operator().to_vec(),
        ConstraintKind::Combination(c) if c.state() == CombinationState::TemporalSequence => {
            c.gap_info().to_vec()
        }
        other => {
            return Err(LowerError::NotASequence {
                id: tree.root(),
                kind: other.name(),
            })
        }
    };

    let mut panels = Vec::new();
    for &child in root.children() {
        if !tree.has_content(child) {
            debug!(node = %child, "skipping empty event group");
            continue;
        }
        let mut group = Vec::new();
        ctx.lower_node(tree, child, root.excluded(), &mut group)?;
        if group.len() != 1 {
            return Err(LowerError::AmbiguousEventGroup {
                id: child,
                panels: group.len(),
            });
        }
        panels.append(&mut group);
    }
    debug!(
        panels = panels.len(),
        operators = operators.len(),
        "lowered sequence"
    );
    Ok((panels, operators))
}

/// Lower a selection and an optional sequence into a complete query
pub fn lower_query(
    selection: &ConstraintTree,
    sequence: Option<&ConstraintTree>,
    query_same_instance: bool,
    encryptor: &dyn TermEncryptor,
) -> Result<QueryDefinition, LowerError> {
    let selection_panels = lower_selection(selection, query_same_instance, encryptor)?;
    let (sequential_panels, sequential_operators) = match sequence {
        Some(tree) => lower_sequence(tree, query_same_instance, encryptor)?,
        None => (Vec::new(), Vec::new()),
    };
    Ok(QueryDefinition {
        selection_panels,
        sequential_panels,
        sequential_operators,
        query_timing: Timing::from_same_instance(query_same_instance),
    })
}

fn check_validity(tree: &ConstraintTree) -> Result<(), LowerError> {
    match tree.validity() {
        Some(msg) => Err(LowerError::Invalid(msg)),
        None => Ok(()),
    }
}

impl LowerContext<'_> {
    fn timing(&self, node: &ConstraintNode) -> Timing {
        Timing::from_same_instance(
            self.query_same_instance && node.same_instance_timing() == Some(true),
        )
    }

    /// Append the panels of the subtree at `id`; `negated` is the exclusion
    /// inherited from enclosing ANDs
    fn lower_node(
        &self,
        tree: &ConstraintTree,
        id: NodeId,
        negated: bool,
        out: &mut Vec<Panel>,
    ) -> Result<(), LowerError> {
        let node = tree.node(id)?;
        trace!(node = %id, kind = node.kind().name(), "lowering");
        match node.kind() {
            ConstraintKind::Combination(c) => match c.state() {
                CombinationState::And => {
                    let not = negated || node.excluded();
                    for &child in node.children() {
                        self.lower_node(tree, child, not, out)?;
                    }
                    Ok(())
                }
                CombinationState::Or => {
                    if let Some(panel) = self.lower_or_group(tree, id, negated)? {
                        out.push(panel);
                    }
                    Ok(())
                }
                CombinationState::TemporalSequence => Err(LowerError::UnsupportedConstraint {
                    id,
                    kind: "temporal sequence",
                }),
            },
            ConstraintKind::Concept(_)
            | ConstraintKind::GenomicAnnotation(_)
            | ConstraintKind::Cohort(_) => {
                let mut panel = Panel {
                    not: negated || node.excluded(),
                    timing: self.timing(node),
                    ..Panel::default()
                };
                self.pool_leaf(id, node, &mut panel)?;
                out.push(panel);
                Ok(())
            }
            ConstraintKind::Value(_) | ConstraintKind::Time(_) | ConstraintKind::Sequential(_) => {
                Err(LowerError::UnsupportedConstraint {
                    id,
                    kind: node.kind().name(),
                })
            }
        }
    }

    /// One panel pooling every alternative of the OR group at `id`
    ///
    /// Returns `None` for a group without alternatives.
    fn lower_or_group(
        &self,
        tree: &ConstraintTree,
        id: NodeId,
        negated: bool,
    ) -> Result<Option<Panel>, LowerError> {
        let node = tree.node(id)?;
        match node.kind() {
            ConstraintKind::Combination(c) if c.state() == CombinationState::Or => {}
            ConstraintKind::Combination(c) => {
                return Err(LowerError::ExpectedOr {
                    id,
                    found: format!("{:?} combination", c.state()),
                })
            }
            other => {
                return Err(LowerError::ExpectedOr {
                    id,
                    found: other.name().to_string(),
                })
            }
        }

        let mut alternatives = Vec::new();
        for &child in node.children() {
            collect_alternatives(tree, child, false, &mut alternatives)?;
        }
        if alternatives.is_empty() {
            debug!(node = %id, "skipping empty OR group");
            return Ok(None);
        }

        // a panel negates the disjunction of its items, so only a lone
        // alternative can carry its own exclusion onto the panel
        let excluded = alternatives.iter().filter(|&&(_, excluded)| excluded).count();
        if excluded > 0 && alternatives.len() > 1 {
            return Err(if excluded == alternatives.len() {
                LowerError::ExcludedAlternatives {
                    id,
                    alternatives: excluded,
                }
            } else {
                LowerError::MixedExclusion { id }
            });
        }

        let mut panel = Panel {
            not: negated || node.excluded() || excluded > 0,
            timing: self.timing(node),
            ..Panel::default()
        };
        for (leaf, _) in alternatives {
            self.pool_leaf(leaf, tree.node(leaf)?, &mut panel)?;
        }
        Ok(Some(panel))
    }

    fn pool_leaf(
        &self,
        id: NodeId,
        node: &ConstraintNode,
        panel: &mut Panel,
    ) -> Result<(), LowerError> {
        match node.kind() {
            ConstraintKind::Concept(c) => panel.concept_items.push(self.lower_concept(c)?),
            ConstraintKind::GenomicAnnotation(g) => panel
                .concept_items
                .extend(g.variant_ids.iter().map(|v| PanelItem::term(v.clone(), true))),
            ConstraintKind::Cohort(c) => panel.cohort_items.push(c.cohort.query_id.clone()),
            other => {
                return Err(LowerError::UnsupportedConstraint {
                    id,
                    kind: other.name(),
                })
            }
        }
        Ok(())
    }

    fn lower_concept(&self, c: &ConceptConstraint) -> Result<PanelItem, LowerError> {
        let mut item = match &c.concept.encryption {
            Some(descriptor) => {
                trace!(encryptor = self.encryptor.kind(), "encrypting concept id");
                PanelItem::term(self.encryptor.encrypt_integer(descriptor.id)?, true)
            }
            None => PanelItem::term(c.concept.query_path(), false),
        };
        if c.observation_date.is_some() || c.value_date.is_some() {
            warn!(
                concept = %c.concept.path,
                "date ranges have no panel field and are not sent"
            );
        }
        if let Some(m) = &c.concept.modifier {
            item.modifier = Some(ItemModifier {
                key: m.key_path.clone(),
                applied_path: m.applied_path.clone(),
            });
        }
        if let Some(n) = &c.numeric {
            item.value_kind = Some(ValueKind::Number);
            item.operator = Some(n.operator.wire_tag().to_string());
            item.value = Some(numeric_value(&c.concept.display_name, n)?);
        } else if let Some(t) = &c.text {
            item.value_kind = Some(ValueKind::Text);
            item.operator = Some(t.operator.wire_tag().to_string());
            item.value = Some(text_value(t));
        }
        Ok(item)
    }
}

/// Leaves reachable through nested OR groups, with their effective exclusion
fn collect_alternatives(
    tree: &ConstraintTree,
    id: NodeId,
    inherited_excluded: bool,
    out: &mut Vec<(NodeId, bool)>,
) -> Result<(), LowerError> {
    let node = tree.node(id)?;
    let excluded = inherited_excluded || node.excluded();
    match node.kind() {
        ConstraintKind::Concept(_)
        | ConstraintKind::GenomicAnnotation(_)
        | ConstraintKind::Cohort(_) => out.push((id, excluded)),
        ConstraintKind::Combination(c) if c.state() == CombinationState::Or => {
            for &child in node.children() {
                collect_alternatives(tree, child, excluded, out)?;
            }
        }
        // a one-child AND is just a wrapper
        ConstraintKind::Combination(c)
            if c.state() == CombinationState::And && node.children().len() == 1 =>
        {
            collect_alternatives(tree, node.children()[0], excluded, out)?;
        }
        ConstraintKind::Combination(_) if node.children().is_empty() => {}
        other => {
            return Err(LowerError::UnsupportedNesting {
                id,
                kind: other.name(),
            })
        }
    }
    Ok(())
}

fn numeric_value(concept: &str, n: &NumericRestriction) -> Result<String, LowerError> {
    let missing = || LowerError::Invalid(format!("Concept \"{}\" is missing an operand", concept));
    match n.operator {
        NumericOperator::Between => {
            let min = n.min.ok_or_else(missing)?;
            let max = n.max.ok_or_else(missing)?;
            Ok(format!("{} and {}", min, max))
        }
        _ => Ok(n.value.ok_or_else(missing)?.to_string()),
    }
}

fn text_value(t: &TextRestriction) -> String {
    match t.operator {
        TextOperator::In => t
            .values
            .iter()
            .map(|v| format!("'{}'", v))
            .collect::<Vec<_>>()
            .join(","),
        _ => t.value.clone(),
    }
}
