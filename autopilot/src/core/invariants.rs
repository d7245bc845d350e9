//! Semantic goal-tree invariants not expressible via JSON Schema.

use std::collections::{BTreeMap, HashSet};

use crate::core::goals::GoalTree;

/// Check semantic invariants not expressible in JSON Schema:
/// - No duplicate milestone, subtask or feature ids
/// - Every `dependsOn` entry names a known id of the same kind
/// - No dependency cycles between milestones or between features
///
/// Returns stable error messages (empty on success).
pub fn validate_goal_invariants(goals: &GoalTree) -> Vec<String> {
    let mut errors = Vec::new();

    let mut milestone_ids = HashSet::new();
    let mut subtask_ids = HashSet::new();
    let mut feature_ids = HashSet::new();
    for milestone in &goals.milestones {
        if !milestone_ids.insert(milestone.id.as_str()) {
            errors.push(format!("duplicate milestone id '{}'", milestone.id));
        }
        for subtask in &milestone.subtasks {
            if !subtask_ids.insert(subtask.id.as_str()) {
                errors.push(format!(
                    "{}: duplicate subtask id '{}'",
                    milestone.id, subtask.id
                ));
            }
            for feature in &subtask.features {
                if !feature_ids.insert(feature.id.as_str()) {
                    errors.push(format!(
                        "{}/{}: duplicate feature id '{}'",
                        milestone.id, subtask.id, feature.id
                    ));
                }
                if feature.test_command.trim().is_empty() {
                    errors.push(format!("{}: testCommand must not be empty", feature.id));
                }
            }
        }
    }

    let mut milestone_graph = BTreeMap::new();
    for milestone in &goals.milestones {
        for dep in &milestone.depends_on {
            if !milestone_ids.contains(dep.as_str()) {
                errors.push(format!(
                    "milestone '{}' depends on unknown milestone '{}'",
                    milestone.id, dep
                ));
            }
        }
        milestone_graph.insert(milestone.id.as_str(), dep_refs(&milestone.depends_on));
    }

    let mut feature_graph = BTreeMap::new();
    for feature in goals.features() {
        for dep in &feature.depends_on {
            if !feature_ids.contains(dep.as_str()) {
                errors.push(format!(
                    "feature '{}' depends on unknown feature '{}'",
                    feature.id, dep
                ));
            }
        }
        feature_graph.insert(feature.id.as_str(), dep_refs(&feature.depends_on));
    }

    if let Some(cycle) = find_cycle(&milestone_graph) {
        errors.push(format!("milestone dependency cycle: {}", cycle.join(" -> ")));
    }
    if let Some(cycle) = find_cycle(&feature_graph) {
        errors.push(format!("feature dependency cycle: {}", cycle.join(" -> ")));
    }

    errors
}

fn dep_refs(deps: &[String]) -> Vec<&str> {
    deps.iter().map(String::as_str).collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search for a cycle; returns the cycle path with the first node
/// repeated at the end.
fn find_cycle<'a>(graph: &BTreeMap<&'a str, Vec<&'a str>>) -> Option<Vec<String>> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut stack: Vec<&str> = Vec::new();
    for node in graph.keys().copied() {
        if let Some(cycle) = visit(node, graph, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    graph: &BTreeMap<&'a str, Vec<&'a str>>,
    marks: &mut BTreeMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    match marks.get(node) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        None => {}
    }

    marks.insert(node, Mark::Visiting);
    stack.push(node);
    for dep in graph.get(node).into_iter().flatten().copied() {
        // Unknown ids are reported separately.
        if !graph.contains_key(dep) {
            continue;
        }
        if let Some(cycle) = visit(dep, graph, marks, stack) {
            return Some(cycle);
        }
    }
    stack.pop();
    marks.insert(node, Mark::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, goal_tree, milestone};

    #[test]
    fn valid_tree_has_no_errors() {
        let goals = goal_tree(vec![
            milestone("m-1", &[], vec![feature("a", &[]), feature("b", &["a"])]),
            milestone("m-2", &["m-1"], vec![feature("c", &["b"])]),
        ]);
        assert!(validate_goal_invariants(&goals).is_empty());
    }

    #[test]
    fn reports_duplicates_and_unknown_dependencies() {
        let goals = goal_tree(vec![
            milestone("m-1", &["m-9"], vec![feature("a", &["zzz"])]),
            milestone("m-2", &[], vec![feature("a", &[])]),
        ]);
        let errors = validate_goal_invariants(&goals);
        assert!(errors.contains(&"m-2/m-2-sub: duplicate feature id 'a'".to_string()));
        assert!(errors.contains(&"milestone 'm-1' depends on unknown milestone 'm-9'".to_string()));
        assert!(errors.contains(&"feature 'a' depends on unknown feature 'zzz'".to_string()));
    }

    /// A cyclic graph would otherwise make selection return nothing forever.
    #[test]
    fn detects_feature_cycle_with_path() {
        let goals = goal_tree(vec![milestone(
            "m-1",
            &[],
            vec![feature("a", &["c"]), feature("b", &["a"]), feature("c", &["b"])],
        )]);
        let errors = validate_goal_invariants(&goals);
        assert_eq!(
            errors,
            vec!["feature dependency cycle: a -> c -> b -> a".to_string()]
        );
    }

    #[test]
    fn detects_milestone_self_dependency() {
        let goals = goal_tree(vec![milestone("m-1", &["m-1"], vec![feature("a", &[])])]);
        let errors = validate_goal_invariants(&goals);
        assert_eq!(
            errors,
            vec!["milestone dependency cycle: m-1 -> m-1".to_string()]
        );
    }
}
