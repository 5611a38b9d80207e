//! Integration tests for tree → panel lowering
//!
//! Covers the panel shapes the query engine relies on, end to end through the
//! JSON wire format.

use cohortc::ast::{
    CombinationState, ConceptConstraint, Constraint, ConstraintTree, GapOperator, NodeId,
    NumericOperator, NumericRestriction, SpanOperator, SpanUnit, TemporalWhen, TextOperator,
    TextRestriction,
};
use cohortc::concept::{Cohort, Concept, Modifier, ValueType};
use cohortc::crypto::{CryptoError, NoEncryption, TaggedEncryptor};
use cohortc::ir::{QueryDefinition, Timing, ValueKind};
use cohortc::lower::{lower_query, lower_selection, lower_sequence, LowerError};

// =============================================================================
// Test Data Fixtures
// =============================================================================

fn concept(name: &str) -> Constraint {
    Constraint::plain_concept(Concept::new(format!("\\i2b2\\{}\\", name), name))
}

fn age_over(years: f64) -> Constraint {
    Constraint::concept(
        ConceptConstraint::new(
            Concept::new("\\i2b2\\Demographics\\Age\\", "Age")
                .with_value_type(ValueType::PositiveInteger)
                .with_unit("years"),
        )
        .with_numeric(NumericRestriction::compare(NumericOperator::Gt, years)),
    )
}

/// Attach `leaves` under a new composite node appended to `parent`
fn group(
    tree: &mut ConstraintTree,
    parent: NodeId,
    composite: Constraint,
    leaves: Vec<Constraint>,
) -> NodeId {
    let id = tree.insert(composite);
    tree.add_child(parent, id).unwrap();
    for leaf in leaves {
        let leaf_id = tree.insert(leaf);
        tree.add_child(id, leaf_id).unwrap();
    }
    id
}

fn terms(panel: &cohortc::ir::Panel) -> Vec<&str> {
    panel
        .concept_items
        .iter()
        .map(|i| i.query_term.as_str())
        .collect()
}

// =============================================================================
// Selection
// =============================================================================

#[test]
fn test_and_of_ors_lowers_to_one_panel_per_group() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    group(&mut tree, root, Constraint::or(), vec![concept("A")]);
    group(&mut tree, root, Constraint::or(), vec![concept("B"), concept("C")]);

    let panels = lower_selection(&tree, false, &NoEncryption).unwrap();

    assert_eq!(panels.len(), 2);
    assert_eq!(terms(&panels[0]), vec!["\\i2b2\\A\\"]);
    assert_eq!(terms(&panels[1]), vec!["\\i2b2\\B\\", "\\i2b2\\C\\"]);
    assert!(panels.iter().all(|p| !p.not && p.timing == Timing::Any));
}

#[test]
fn test_k_groups_give_k_panels_in_order() {
    for k in 1..6 {
        let mut tree = ConstraintTree::new_selection();
        let root = tree.root();
        for i in 0..k {
            group(&mut tree, root, Constraint::or(), vec![concept(&format!("G{}", i))]);
        }
        let panels = lower_selection(&tree, false, &NoEncryption).unwrap();
        assert_eq!(panels.len(), k);
        for (i, panel) in panels.iter().enumerate() {
            assert_eq!(terms(panel), vec![format!("\\i2b2\\G{}\\", i)]);
        }
    }
}

#[test]
fn test_cohorts_pool_into_cohort_items() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    group(
        &mut tree,
        root,
        Constraint::or(),
        vec![concept("A"), Constraint::cohort(Cohort::new("Diabetics", "q-7"))],
    );
    let standalone = tree.insert(Constraint::cohort(Cohort::new("Smokers", "q-9")));
    tree.add_child(root, standalone).unwrap();

    let panels = lower_selection(&tree, false, &NoEncryption).unwrap();
    assert_eq!(panels[0].cohort_items, vec!["q-7".to_string()]);
    assert_eq!(terms(&panels[0]), vec!["\\i2b2\\A\\"]);
    assert_eq!(panels[1].cohort_items, vec!["q-9".to_string()]);
    assert!(panels[1].concept_items.is_empty());
}

#[test]
fn test_deep_nesting_flattens_and_pools() {
    // AND(A, AND(OR(B, OR(C, D)), AND(E)))
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    let a = tree.insert(concept("A"));
    tree.add_child(root, a).unwrap();
    let inner = group(&mut tree, root, Constraint::and(), vec![]);
    let or = group(&mut tree, inner, Constraint::or(), vec![concept("B")]);
    group(&mut tree, or, Constraint::or(), vec![concept("C"), concept("D")]);
    group(&mut tree, inner, Constraint::and(), vec![concept("E")]);

    let panels = lower_selection(&tree, false, &NoEncryption).unwrap();
    let shapes: Vec<Vec<&str>> = panels.iter().map(terms).collect();
    assert_eq!(
        shapes,
        vec![
            vec!["\\i2b2\\A\\"],
            vec!["\\i2b2\\B\\", "\\i2b2\\C\\", "\\i2b2\\D\\"],
            vec!["\\i2b2\\E\\"],
        ]
    );
}

#[test]
fn test_and_inside_or_is_rejected() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    let or = group(&mut tree, root, Constraint::or(), vec![concept("A")]);
    group(&mut tree, or, Constraint::and(), vec![concept("B"), concept("C")]);

    let err = lower_selection(&tree, false, &NoEncryption).unwrap_err();
    assert!(matches!(err, LowerError::UnsupportedNesting { .. }));
    assert!(!err.is_user_error());
}

#[test]
fn test_invalid_input_blocks_lowering() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    let bad = Constraint::concept(
        ConceptConstraint::new(
            Concept::new("\\i2b2\\Lab\\Glucose\\", "Glucose").with_value_type(ValueType::Float),
        )
        .with_numeric(NumericRestriction::between(10.0, 5.0)),
    );
    group(&mut tree, root, Constraint::or(), vec![bad]);

    match lower_selection(&tree, false, &NoEncryption) {
        Err(LowerError::Invalid(msg)) => assert!(msg.contains("Glucose"), "{}", msg),
        other => panic!("expected a validity error, got {:?}", other),
    }
}

#[test]
fn test_restrictions_and_modifier_on_the_wire() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    let smoking = Constraint::concept(
        ConceptConstraint::new(
            Concept::new("\\i2b2\\Smoking\\", "Smoking").with_value_type(ValueType::Text),
        )
        .with_text(TextRestriction::one_of(["never", "former"])),
    );
    let staged = Constraint::plain_concept(Concept::new("\\mod\\Stage\\", "Stage").with_modifier(
        Modifier {
            key_path: "\\mod\\Stage\\".into(),
            applied_path: "\\i2b2\\Dx\\%".into(),
            applied_concept_path: "\\i2b2\\Dx\\Melanoma\\".into(),
        },
    ));
    group(&mut tree, root, Constraint::or(), vec![age_over(40.0)]);
    group(&mut tree, root, Constraint::or(), vec![smoking, staged]);

    let panels = lower_selection(&tree, false, &NoEncryption).unwrap();
    let age = &panels[0].concept_items[0];
    assert_eq!(age.value_kind, Some(ValueKind::Number));
    assert_eq!(age.operator.as_deref(), Some("GT"));
    assert_eq!(age.value.as_deref(), Some("40"));

    let smoking = &panels[1].concept_items[0];
    assert_eq!(smoking.value_kind, Some(ValueKind::Text));
    assert_eq!(smoking.operator.as_deref(), Some("IN"));
    assert_eq!(smoking.value.as_deref(), Some("'never','former'"));

    let staged = &panels[1].concept_items[1];
    assert_eq!(staged.query_term, "\\i2b2\\Dx\\Melanoma\\");
    let modifier = staged.modifier.as_ref().unwrap();
    assert_eq!(modifier.key, "\\mod\\Stage\\");
    assert_eq!(modifier.applied_path, "\\i2b2\\Dx\\%");

    let json = serde_json::to_value(&panels).unwrap();
    assert_eq!(json[1]["conceptItems"][1]["modifier"]["appliedPath"], "\\i2b2\\Dx\\%");
}

#[test]
fn test_text_like_operator() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    let c = Constraint::concept(
        ConceptConstraint::new(
            Concept::new("\\i2b2\\Note\\", "Note").with_value_type(ValueType::Text),
        )
        .with_text(TextRestriction::like(TextOperator::Begin, "metasta")),
    );
    group(&mut tree, root, Constraint::or(), vec![c]);

    let panels = lower_selection(&tree, false, &NoEncryption).unwrap();
    let item = &panels[0].concept_items[0];
    assert_eq!(item.operator.as_deref(), Some("LIKE[begin]"));
    assert_eq!(item.value.as_deref(), Some("metasta"));
}

#[test]
fn test_encrypted_concepts_go_through_the_encryptor() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    let secret =
        Constraint::plain_concept(Concept::new("\\i2b2\\HIV\\", "HIV").with_encryption(31));
    group(&mut tree, root, Constraint::or(), vec![secret]);

    let panels = lower_selection(&tree, false, &TaggedEncryptor).unwrap();
    assert!(panels[0].concept_items[0].encrypted);
    assert_eq!(panels[0].concept_items[0].query_term, "enc:31");

    assert_eq!(
        lower_selection(&tree, false, &NoEncryption),
        Err(LowerError::Encryption(CryptoError::Unavailable(31)))
    );
}

#[test]
fn test_genomic_variants_share_a_panel() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    let variants = Constraint::genomic_annotation("BRAF", vec!["v-1".into(), "v-2".into()]);
    group(&mut tree, root, Constraint::or(), vec![variants]);

    let panels = lower_selection(&tree, false, &NoEncryption).unwrap();
    assert_eq!(panels.len(), 1);
    assert_eq!(terms(&panels[0]), vec!["v-1", "v-2"]);
    assert!(panels[0].concept_items.iter().all(|i| i.encrypted));
}

#[test]
fn test_excluded_alternatives_are_not_pooled_into_one_negated_panel() {
    let mut tree = ConstraintTree::new_selection();
    let root = tree.root();
    let or = group(
        &mut tree,
        root,
        Constraint::or(),
        vec![concept("A").excluded(true), concept("B").excluded(true)],
    );

    let err = lower_selection(&tree, false, &NoEncryption).unwrap_err();
    assert_eq!(
        err,
        LowerError::ExcludedAlternatives {
            id: or,
            alternatives: 2
        }
    );
    assert!(err.is_user_error());

    // a lone excluded alternative still negates its panel
    let mut single = ConstraintTree::new_selection();
    let root = single.root();
    group(&mut single, root, Constraint::or(), vec![concept("A").excluded(true)]);
    let panels = lower_selection(&single, false, &NoEncryption).unwrap();
    assert!(panels[0].not);
    assert_eq!(terms(&panels[0]), vec!["\\i2b2\\A\\"]);
}

#[test]
fn test_nested_excluded_or_inside_or_is_rejected() {
    let mut tree = ConstraintTree::new(Constraint::or());
    let root = tree.root();
    let a = tree.insert(concept("A"));
    tree.add_child(root, a).unwrap();
    let inner = group(&mut tree, root, Constraint::or(), vec![concept("B"), concept("C")]);
    tree.set_excluded(inner, true).unwrap();

    assert_eq!(
        lower_selection(&tree, false, &NoEncryption),
        Err(LowerError::MixedExclusion { id: root })
    );
}

// =============================================================================
// Sequences and whole queries
// =============================================================================

fn sequence_tree() -> ConstraintTree {
    let mut tree = ConstraintTree::new(Constraint::sequence());
    let root = tree.root();
    for name in ["Diagnosis", "Treatment", "Relapse"] {
        let id = tree.insert(concept(name));
        tree.add_child(root, id).unwrap();
    }
    tree.set_gap(
        root,
        0,
        GapOperator::new(TemporalWhen::Less).with_span(30, SpanUnit::Day, SpanOperator::LessEqual),
    )
    .unwrap();
    tree.set_gap(root, 1, GapOperator::new(TemporalWhen::LessEqual)).unwrap();
    tree
}

#[test]
fn test_sequence_lowers_with_operators_unchanged() {
    let tree = sequence_tree();
    let (panels, operators) = lower_sequence(&tree, false, &NoEncryption).unwrap();
    assert_eq!(panels.len(), 3);
    assert_eq!(operators.len(), 2);
    assert_eq!(operators[0].spans[0].value, 30);
    assert_eq!(operators[1].when, TemporalWhen::LessEqual);
}

#[test]
fn test_temporal_combination_root_lowers_like_a_sequence() {
    let mut tree = ConstraintTree::new(Constraint::combination(CombinationState::TemporalSequence));
    let root = tree.root();
    for name in ["A", "B"] {
        let id = tree.insert(concept(name));
        tree.add_child(root, id).unwrap();
    }
    tree.set_gap(root, 0, GapOperator::new(TemporalWhen::Equal)).unwrap();

    let (panels, operators) = lower_sequence(&tree, false, &NoEncryption).unwrap();
    assert_eq!(panels.len(), 2);
    assert_eq!(operators, vec![GapOperator::new(TemporalWhen::Equal)]);
}

#[test]
fn test_query_definition_json() {
    let mut selection = ConstraintTree::new_selection();
    let root = selection.root();
    let or = group(&mut selection, root, Constraint::or(), vec![age_over(18.0)]);
    selection.set_same_instance_timing(or, Some(true)).unwrap();
    let excluded = group(&mut selection, root, Constraint::or(), vec![concept("Pregnancy")]);
    selection.set_excluded(excluded, true).unwrap();

    let query = lower_query(&selection, Some(&sequence_tree()), true, &NoEncryption).unwrap();
    assert_eq!(query.query_timing, Timing::SameInstance);

    let json: serde_json::Value = serde_json::from_str(&query.to_json().unwrap()).unwrap();
    assert_eq!(json["queryTiming"], "sameInstanceNum");
    assert_eq!(json["selectionPanels"][0]["timing"], "sameInstanceNum");
    assert_eq!(json["selectionPanels"][1]["not"], true);
    assert_eq!(json["selectionPanels"][1]["timing"], "any");
    assert_eq!(json["sequentialPanels"].as_array().unwrap().len(), 3);
    assert_eq!(json["sequentialOperators"][0]["when"], "LESS");
    assert_eq!(json["sequentialOperators"][0]["spans"][0]["operator"], "LESSEQUAL");
    assert_eq!(json["sequentialOperators"][1]["when"], "LESSEQUAL");

    let back = QueryDefinition::from_json(&query.to_json().unwrap()).unwrap();
    assert_eq!(back, query);
}

/// Sequence root of either kind: [A, empty OR, B] with one relation per child pair
fn sequence_with_empty_group(root: Constraint) -> (ConstraintTree, NodeId) {
    let mut tree = ConstraintTree::new(root);
    let root = tree.root();
    let a = tree.insert(concept("A"));
    tree.add_child(root, a).unwrap();
    let empty = group(&mut tree, root, Constraint::or(), vec![]);
    let b = tree.insert(concept("B"));
    tree.add_child(root, b).unwrap();
    (tree, empty)
}

#[test]
fn test_empty_event_group_blocks_sequence_lowering() {
    for root in [
        Constraint::sequence(),
        Constraint::combination(CombinationState::TemporalSequence),
    ] {
        let (tree, _) = sequence_with_empty_group(root);
        match lower_sequence(&tree, false, &NoEncryption) {
            Err(LowerError::Invalid(msg)) => {
                assert!(msg.contains("2 non-empty event groups"), "{}", msg)
            }
            other => panic!("expected invalid sequence, got {:?}", other),
        }
    }
}

#[test]
fn test_sequence_operators_match_panels_once_groups_are_filled() {
    for root in [
        Constraint::sequence(),
        Constraint::combination(CombinationState::TemporalSequence),
    ] {
        let (mut tree, empty) = sequence_with_empty_group(root);
        let c = tree.insert(concept("C"));
        tree.add_child(empty, c).unwrap();

        let (panels, operators) = lower_sequence(&tree, false, &NoEncryption).unwrap();
        assert_eq!(panels.len(), 3);
        assert_eq!(operators.len(), panels.len() - 1);
        assert_eq!(terms(&panels[1]), vec!["\\i2b2\\C\\"]);
    }
}
