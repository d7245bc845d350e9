//! Keyword heuristics that detect review feedback reversing a binding decision.
//!
//! Everything here is deterministic and self-contained so the heuristic can be
//! replaced without touching the review pipeline:
//!
//! - **direct**: feedback text, or an issue's description/suggestion, recommends
//!   one of a decision's rejected alternatives ("switch to Redux").
//! - **indirect**: an issue criticizes one of the decision's key terms with a
//!   critical phrase ("avoid hooks here").
//! - **potential**: reserved; never produced by [`check_for_contradictions`].

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::review::{DesignDecision, ReviewIssue};

const MIN_KEYWORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "these", "those", "from", "into", "onto", "over",
    "are", "was", "were", "been", "being", "have", "has", "had", "not", "but", "you", "your",
    "our", "its", "their", "them", "they", "all", "any", "each", "more", "most", "some", "such",
    "than", "then", "too", "very", "can", "will", "would", "should", "could", "may", "might",
    "must", "use", "used", "using", "via", "per", "also", "just", "only", "instead", "rather",
    "about", "when", "where", "which", "while", "what", "who", "how", "why", "because", "here",
    "there", "out", "off", "own", "same", "other", "new", "make", "makes", "made",
];

/// Phrases that introduce a recommendation; the recommended term follows.
const TRIGGER_PATTERN: &str = r"(?:use|using|uses|switch(?:ing)?\s+to|migrate\s+to|move\s+to|replace\s+(?:\w+\s+)?with|adopt|prefer|go\s+with|should(?:\s+\w+)?|recommend(?:s|ed)?(?:\s+using)?|consider(?:\s+using)?)";

/// Words that, just before a trigger in the same clause, negate the recommendation.
const NEGATIONS: &[&str] = &["not", "no", "never", "avoid", "without", "against"];
const NEGATING_PAIRS: &[&str] = &["instead of", "rather than"];

const CRITICAL_PHRASES: &[&str] = &[
    "should not",
    "shouldn't",
    "avoid",
    "incorrect",
    "anti-pattern",
    "antipattern",
    "bad practice",
    "don't use",
    "do not use",
    "not recommended",
    "problematic",
    "wrong",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionSeverity {
    Direct,
    Indirect,
    Potential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionResolution {
    /// Nothing to do.
    None,
    /// Stop the pipeline and hand the decision to a human.
    Escalate,
    /// Let the review stand but surface a warning.
    Warn,
    /// Record for context only.
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contradiction {
    pub decision_id: String,
    pub decision: String,
    pub severity: ContradictionSeverity,
    /// Text that triggered the match.
    pub conflicting_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_alternative: Option<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContradictionCheckResult {
    pub has_contradiction: bool,
    pub contradictions: Vec<Contradiction>,
    pub resolution: ContradictionResolution,
}

impl ContradictionCheckResult {
    pub fn has_direct(&self) -> bool {
        self.contradictions
            .iter()
            .any(|c| c.severity == ContradictionSeverity::Direct)
    }

    pub fn of_severity(&self, severity: ContradictionSeverity) -> Vec<&Contradiction> {
        self.contradictions
            .iter()
            .filter(|c| c.severity == severity)
            .collect()
    }
}

pub fn resolution_for(severity: ContradictionSeverity) -> ContradictionResolution {
    match severity {
        ContradictionSeverity::Direct => ContradictionResolution::Escalate,
        ContradictionSeverity::Indirect => ContradictionResolution::Warn,
        ContradictionSeverity::Potential => ContradictionResolution::Note,
    }
}

/// Lower-cased tokens of at least three characters with stop words removed,
/// in first-seen order without duplicates.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '.'))
        .map(|token| token.trim_matches(|c: char| c == '-' || c == '.'))
        .filter(|token| token.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|token| !STOP_WORDS.contains(token))
        .filter(|token| seen.insert(token.to_string()))
        .map(str::to_string)
        .collect()
}

/// True when `text` recommends any distinctive keyword of `alternative`.
///
/// Keywords the alternative shares with the decision itself (e.g. "state" in
/// both "hooks for state" and "Redux for state") are ignored, as are negated
/// recommendations ("do not use Redux").
pub fn recommends_alternative(
    text: &str,
    alternative: &str,
    decision_terms: &HashSet<String>,
) -> bool {
    let lowered = text.to_lowercase();
    extract_keywords(alternative)
        .into_iter()
        .filter(|keyword| !decision_terms.contains(keyword))
        .any(|keyword| {
            recommendation_regex(&keyword).is_some_and(|re| {
                re.find_iter(&lowered)
                    .any(|found| !is_negated(&lowered[..found.start()]))
            })
        })
}

/// Looks at the last two words of the clause preceding a trigger.
fn is_negated(before: &str) -> bool {
    let clause = before
        .rsplit(|c: char| matches!(c, ',' | ';' | '.' | '!' | '?' | ':'))
        .next()
        .unwrap_or(before);
    let words: Vec<&str> = clause.split_whitespace().rev().take(2).collect();
    if words.iter().any(|word| {
        NEGATIONS.contains(word) || word.ends_with("n't") || word.ends_with("n\u{2019}t")
    }) {
        return true;
    }
    match words.as_slice() {
        [last, previous] => NEGATING_PAIRS.contains(&format!("{previous} {last}").as_str()),
        _ => false,
    }
}

fn recommendation_regex(keyword: &str) -> Option<Regex> {
    let pattern = format!(
        r"\b{TRIGGER_PATTERN}\s+(?:the\s+|a\s+|an\s+)?{}\b",
        regex::escape(keyword)
    );
    Regex::new(&pattern).ok()
}

/// Returns the critical phrase when `text` criticizes one of `decision_terms`.
pub fn criticizes_decision(text: &str, decision_terms: &HashSet<String>) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    let phrase = CRITICAL_PHRASES
        .iter()
        .find(|phrase| lowered.contains(*phrase))?;
    let words: HashSet<String> = extract_keywords(&lowered).into_iter().collect();
    decision_terms
        .iter()
        .any(|term| words.contains(term))
        .then_some(*phrase)
}

/// Check reviewer output against the binding decisions of a feature.
pub fn check_for_contradictions(
    feedback: &str,
    issues: &[ReviewIssue],
    decisions: &[DesignDecision],
) -> ContradictionCheckResult {
    let mut contradictions = Vec::new();

    for decision in decisions {
        let terms: HashSet<String> = extract_keywords(&decision.decision).into_iter().collect();

        if let Some(alternative) = decision
            .alternatives_rejected
            .iter()
            .find(|alt| recommends_alternative(feedback, alt, &terms))
        {
            contradictions.push(Contradiction {
                decision_id: decision.id.clone(),
                decision: decision.decision.clone(),
                severity: ContradictionSeverity::Direct,
                conflicting_text: feedback.trim().to_string(),
                rejected_alternative: Some(alternative.clone()),
                explanation: format!(
                    "feedback recommends '{}', which was rejected in favor of '{}'",
                    alternative, decision.decision
                ),
            });
        }

        for issue in issues {
            let text = issue_text(issue);
            if let Some(alternative) = decision
                .alternatives_rejected
                .iter()
                .find(|alt| recommends_alternative(&text, alt, &terms))
            {
                contradictions.push(Contradiction {
                    decision_id: decision.id.clone(),
                    decision: decision.decision.clone(),
                    severity: ContradictionSeverity::Direct,
                    conflicting_text: text,
                    rejected_alternative: Some(alternative.clone()),
                    explanation: format!(
                        "issue recommends '{}', which was rejected in favor of '{}'",
                        alternative, decision.decision
                    ),
                });
            } else if let Some(phrase) = criticizes_decision(&text, &terms) {
                contradictions.push(Contradiction {
                    decision_id: decision.id.clone(),
                    decision: decision.decision.clone(),
                    severity: ContradictionSeverity::Indirect,
                    conflicting_text: text,
                    rejected_alternative: None,
                    explanation: format!(
                        "issue says '{}' about a term of binding decision '{}'",
                        phrase, decision.decision
                    ),
                });
            }
        }
    }

    let resolution = [
        ContradictionSeverity::Direct,
        ContradictionSeverity::Indirect,
        ContradictionSeverity::Potential,
    ]
    .into_iter()
    .find(|severity| contradictions.iter().any(|c| c.severity == *severity))
    .map_or(ContradictionResolution::None, resolution_for);

    ContradictionCheckResult {
        has_contradiction: !contradictions.is_empty(),
        contradictions,
        resolution,
    }
}

fn issue_text(issue: &ReviewIssue) -> String {
    match &issue.suggestion {
        Some(suggestion) => format!("{} {}", issue.description, suggestion),
        None => issue.description.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::review::IssueSeverity;
    use crate::test_support::design_decision;

    fn hooks_over_redux() -> DesignDecision {
        design_decision(
            "dec-1",
            "state-management",
            "Use React hooks for state management",
            &["Redux for state management"],
        )
    }

    fn issue(description: &str, suggestion: Option<&str>) -> ReviewIssue {
        ReviewIssue {
            severity: IssueSeverity::Major,
            category: "architecture".to_string(),
            description: description.to_string(),
            file: None,
            line: None,
            suggestion: suggestion.map(str::to_string),
        }
    }

    #[test]
    fn keywords_drop_stop_words_and_short_tokens() {
        assert_eq!(
            extract_keywords("Use the Redux store, or an ad-hoc Context!"),
            vec!["redux", "store", "ad-hoc", "context"]
        );
    }

    #[test]
    fn feedback_recommending_rejected_alternative_is_direct() {
        let result = check_for_contradictions("switch to Redux", &[], &[hooks_over_redux()]);
        assert!(result.has_contradiction);
        assert!(result.has_direct());
        assert_eq!(result.resolution, ContradictionResolution::Escalate);
        let found = &result.contradictions[0];
        assert_eq!(found.severity, ContradictionSeverity::Direct);
        assert_eq!(
            found.rejected_alternative.as_deref(),
            Some("Redux for state management")
        );
    }

    #[test]
    fn unrelated_feedback_has_no_contradiction() {
        let result = check_for_contradictions("add error handling", &[], &[hooks_over_redux()]);
        assert!(!result.has_contradiction);
        assert_eq!(result.resolution, ContradictionResolution::None);
    }

    /// Mentioning the alternative without recommending it is not a contradiction.
    #[test]
    fn mention_without_trigger_is_ignored() {
        let result = check_for_contradictions(
            "Good call not pulling in Redux here.",
            &[],
            &[hooks_over_redux()],
        );
        assert!(!result.has_contradiction);
    }

    #[test]
    fn negated_recommendation_upholds_the_decision() {
        for feedback in [
            "Good: keep hooks, do not use Redux here.",
            "You shouldn't switch to Redux for this.",
            "Instead of switching to Redux, lift the state up.",
        ] {
            let result = check_for_contradictions(feedback, &[], &[hooks_over_redux()]);
            assert!(!result.has_contradiction, "{feedback}");
        }
    }

    /// Negation in an earlier clause does not cancel a later recommendation.
    #[test]
    fn negation_is_scoped_to_its_clause() {
        let result = check_for_contradictions(
            "Don't keep the hooks; switch to Redux.",
            &[],
            &[hooks_over_redux()],
        );
        assert!(result.has_direct());
    }

    /// Shared words like "state" must not turn ordinary advice into a reversal.
    #[test]
    fn shared_terms_with_decision_do_not_trigger() {
        let result =
            check_for_contradictions("use state setters consistently", &[], &[hooks_over_redux()]);
        assert!(!result.has_contradiction);
    }

    #[test]
    fn issue_suggestion_recommending_alternative_is_direct() {
        let issues = vec![issue(
            "State is threaded through five components",
            Some("We recommend Redux to centralize it"),
        )];
        let result = check_for_contradictions("", &issues, &[hooks_over_redux()]);
        assert_eq!(result.contradictions.len(), 1);
        assert_eq!(
            result.contradictions[0].severity,
            ContradictionSeverity::Direct
        );
    }

    #[test]
    fn issue_criticizing_decision_terms_is_indirect() {
        let issues = vec![issue("Avoid hooks with side effects in render", None)];
        let result = check_for_contradictions("looks fine", &issues, &[hooks_over_redux()]);
        assert_eq!(result.contradictions.len(), 1);
        assert_eq!(
            result.contradictions[0].severity,
            ContradictionSeverity::Indirect
        );
        assert_eq!(result.resolution, ContradictionResolution::Warn);
        assert!(!result.has_direct());
    }

    #[test]
    fn contradictions_are_collected_across_decisions() {
        let rest = design_decision("dec-2", "api", "REST endpoints", &["GraphQL"]);
        let result = check_for_contradictions(
            "You should use GraphQL and switch to Redux.",
            &[],
            &[hooks_over_redux(), rest],
        );
        let ids: Vec<&str> = result
            .contradictions
            .iter()
            .map(|c| c.decision_id.as_str())
            .collect();
        assert_eq!(ids, vec!["dec-1", "dec-2"]);
    }

    #[test]
    fn potential_severity_resolves_to_note() {
        assert_eq!(
            resolution_for(ContradictionSeverity::Potential),
            ContradictionResolution::Note
        );
    }
}
