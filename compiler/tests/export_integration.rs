//! Integration tests for tree export
//!
//! Both renderers run over the same traversal; a third visitor defined here
//! checks that the contract is usable from outside the crate.

use cohortc::ast::{ConceptConstraint, ConstraintNode, ConstraintTree, Relation, TimeConstraint};
use cohortc::export::{walk, ConstraintVisitor, SummaryExporter, TextExporter};

// =============================================================================
// Test Data Fixtures
// =============================================================================

/// `AND(OR(Diabetes since 2020, NOT cohort Smokers), Age >= 18)` as stored on disk
const STORED_TREE: &str = r#"{
    "root": 0,
    "nodes": [
        {
            "children": [1, 4],
            "kind": {"type": "combination", "state": "AND", "is_root": true}
        },
        {
            "parent": 0,
            "same_instance_timing": true,
            "children": [2, 3],
            "kind": {"type": "combination", "state": "OR"}
        },
        {
            "parent": 1,
            "kind": {
                "type": "concept",
                "concept": {"path": "\\i2b2\\Dx\\Diabetes\\", "display_name": "Diabetes"},
                "observation_date": {"start": "2020-01-01"}
            }
        },
        {
            "parent": 1,
            "excluded": true,
            "kind": {"type": "cohort", "cohort": {"name": "Smokers", "query_id": "q-9"}}
        },
        {
            "parent": 0,
            "kind": {
                "type": "concept",
                "concept": {
                    "path": "\\i2b2\\Demographics\\Age\\",
                    "display_name": "Age",
                    "value_type": "positive_integer",
                    "unit": "years"
                },
                "numeric": {"operator": "ge", "value": 18.0}
            }
        }
    ]
}"#;

fn stored() -> ConstraintTree {
    ConstraintTree::from_json(STORED_TREE).unwrap()
}

/// Collects the ontology paths of every concept, in order
#[derive(Default)]
struct PathCollector {
    paths: Vec<String>,
}

impl ConstraintVisitor for PathCollector {
    type Output = ();

    fn visit_generic(&mut self, _node: &ConstraintNode, _parts: Vec<()>) {}

    fn visit_separator(&mut self, _relation: &Relation) {}

    fn visit_concept(&mut self, _node: &ConstraintNode, concept: &ConceptConstraint) {
        self.paths.push(concept.concept.path.clone());
    }

    fn visit_time(&mut self, _node: &ConstraintNode, _time: &TimeConstraint) {
        unreachable!("no time constraints in the stored tree");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_stored_tree_labels() {
    let tree = stored();
    assert_eq!(
        tree.text_label(),
        "(Diabetes (observed since 2020-01-01) or cohort Smokers) and Age >= 18 years"
    );
    assert_eq!(tree.validity(), None);
}

#[test]
fn test_text_export() {
    let text = TextExporter::default().render(&stored()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "ALL OF",
            "  ANY OF",
            "    Diabetes (observed since 2020-01-01)",
            "    or",
            "    NOT cohort Smokers",
            "  and",
            "  Age >= 18 years",
        ]
    );
}

#[test]
fn test_summary_export() {
    let summary = SummaryExporter.summarize(&stored()).unwrap();
    assert_eq!(summary.kind, "and");
    assert_eq!(summary.relations, vec!["and".to_string()]);

    let group = &summary.children[0];
    assert_eq!(group.same_instance, Some(true));
    assert_eq!(group.children[0].kind, "concept");
    assert_eq!(group.children[1].kind, "cohort");
    assert!(group.children[1].excluded);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["children"][1]["reference"], "\\i2b2\\Demographics\\Age\\");
    assert_eq!(json["children"][0]["sameInstance"], true);
}

#[test]
fn test_external_visitor() {
    let tree = stored();
    let mut collector = PathCollector::default();
    walk(&tree, tree.root(), &mut collector).unwrap();
    assert_eq!(
        collector.paths,
        vec![
            "\\i2b2\\Dx\\Diabetes\\".to_string(),
            "\\i2b2\\Demographics\\Age\\".to_string(),
        ]
    );
}

#[test]
fn test_subtree_export() {
    let tree = stored();
    let or = tree.children(tree.root()).unwrap()[0];
    let text = TextExporter::with_indent(4).render_node(&tree, or).unwrap();
    assert!(text.starts_with("ANY OF\n    Diabetes"));
    assert!(text.ends_with("\n    NOT cohort Smokers"));
}
