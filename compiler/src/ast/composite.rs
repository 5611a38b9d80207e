//! Composite operations on a constraint tree
//!
//! Combination and sequential constraints keep their gap metadata in
//! lock-step with their children: `gaps.len() == children.len() - 1` after
//! every add/remove. Each structural change re-derives the labels of the
//! touched composite and of its ancestors.

use super::{
    CombinationState, ConstraintKind, ConstraintNode, ConstraintTree, GapOperator, NodeId,
    TreeError,
};

impl ConstraintTree {
    fn require_composite(&self, id: NodeId) -> Result<&ConstraintNode, TreeError> {
        let node = self.node(id)?;
        if node.kind.is_composite() {
            Ok(node)
        } else {
            Err(TreeError::NotComposite {
                id,
                kind: node.kind.name(),
            })
        }
    }

    /// A node may be attached only if it is detached and does not contain `parent`
    fn check_attachable(&self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.node(child)?;
        if child == self.root || self.contains(child, parent) {
            return Err(TreeError::Cycle { parent, child });
        }
        if let Some(owner) = self.owner_of(child) {
            return Err(TreeError::AlreadyAttached { child, owner });
        }
        Ok(())
    }

    fn link_parent(&mut self, parent: NodeId, child: NodeId) {
        let node = &mut self.nodes[child.0];
        if !node.is_root() {
            node.parent = Some(parent);
        }
    }

    /// Append `child` to the composite `parent`
    ///
    /// A default relation is added for the new adjacent pair.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.require_composite(parent)?;
        self.check_attachable(parent, child)?;

        let node = &mut self.nodes[parent.0];
        node.children.push(child);
        let pairs = node.children.len() - 1;
        if let Some(gaps) = node.gaps_mut() {
            gaps.resize(pairs, GapOperator::default());
        }
        self.link_parent(parent, child);
        self.refresh_labels(parent)
    }

    /// Replace the child at `index` with the detached node `child`
    ///
    /// The replaced node is left detached; relations are kept as they are.
    pub fn update_child(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<NodeId, TreeError> {
        let len = self.require_composite(parent)?.children.len();
        if index >= len {
            return Err(TreeError::IndexOutOfRange {
                id: parent,
                index,
                len,
            });
        }
        let old = self.nodes[parent.0].children[index];
        if old == child {
            return Ok(old);
        }
        self.check_attachable(parent, child)?;

        self.nodes[parent.0].children[index] = child;
        self.nodes[old.0].parent = None;
        self.link_parent(parent, child);
        self.refresh_labels(parent)?;
        Ok(old)
    }

    /// Detach `child` from `parent`
    ///
    /// The relation to the left of the removed child (index `max(i - 1, 0)`)
    /// is dropped with it.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.require_composite(parent)?;
        let node = &mut self.nodes[parent.0];
        let index = node
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or(TreeError::NotAChild { parent, child })?;

        node.children.remove(index);
        if let Some(gaps) = node.gaps_mut() {
            if !gaps.is_empty() {
                gaps.remove(index.saturating_sub(1));
            }
        }
        self.nodes[child.0].parent = None;
        self.refresh_labels(parent)
    }

    /// Toggle a combination between AND and OR
    ///
    /// A temporal sequence leaves sequencing and becomes an AND.
    pub fn switch_combination_state(&mut self, id: NodeId) -> Result<CombinationState, TreeError> {
        let next = match &self.node(id)?.kind {
            ConstraintKind::Combination(c) => match c.state {
                CombinationState::And => CombinationState::Or,
                CombinationState::Or | CombinationState::TemporalSequence => CombinationState::And,
            },
            _ => return Err(TreeError::NotCombination { id }),
        };
        self.set_combination_state(id, next)?;
        Ok(next)
    }

    pub fn set_combination_state(
        &mut self,
        id: NodeId,
        state: CombinationState,
    ) -> Result<(), TreeError> {
        match &mut self.node_mut(id)?.kind {
            ConstraintKind::Combination(c) => c.state = state,
            _ => return Err(TreeError::NotCombination { id }),
        }
        self.refresh_labels(id)
    }

    /// Set the relation between child `index` and child `index + 1`
    pub fn set_gap(&mut self, id: NodeId, index: usize, gap: GapOperator) -> Result<(), TreeError> {
        self.require_composite(id)?;
        let gaps = self.nodes[id.0]
            .gaps_mut()
            .ok_or(TreeError::NotComposite {
                id,
                kind: "leaf",
            })?;
        let len = gaps.len();
        let slot = gaps
            .get_mut(index)
            .ok_or(TreeError::IndexOutOfRange { id, index, len })?;
        *slot = gap;
        self.refresh_labels(id)
    }

    /// Re-derive the label of `id` and of every ancestor
    ///
    /// Embedded roots carry no parent link, so the climb continues through
    /// the composite that lists them as a child.
    pub(crate) fn refresh_labels(&mut self, id: NodeId) -> Result<(), TreeError> {
        let mut current = Some(id);
        while let Some(id) = current {
            let label = self.composite_label(id)?;
            let node = self.node_mut(id)?;
            if node.kind.is_composite() {
                node.text_label = label;
            }
            let (parent, embedded) = (node.parent, node.is_root());
            current = match parent {
                Some(parent) => Some(parent),
                None if embedded => self.owner_of(id),
                None => None,
            };
        }
        Ok(())
    }

    pub(super) fn composite_label(&self, id: NodeId) -> Result<String, TreeError> {
        let node = self.node(id)?;
        let grouped = node.children.len() > 1;
        let mut label = String::new();
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                let sep = node.separator(i - 1).map(|r| r.label()).unwrap_or_default();
                label.push(' ');
                label.push_str(&sep);
                label.push(' ');
            }
            let child = self.node(child)?;
            if grouped && child.kind.is_composite() && child.children.len() > 1 {
                label.push('(');
                label.push_str(&child.text_label);
                label.push(')');
            } else {
                label.push_str(&child.text_label);
            }
        }
        Ok(label)
    }
}
