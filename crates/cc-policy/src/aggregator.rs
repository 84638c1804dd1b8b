// aggregator.rs — Reduce many policy evaluations to one decision.
//
// Methods:
//
// - most_restrictive: highest severity wins; ties go to the smallest policy_id
// - any_deny:         deny if any evaluation denies, else most_restrictive
// - all_allow:        allow iff every evaluation allows, else deny
// - majority:         most frequent decision; ties go to the higher severity
// - unanimous:        the shared decision if all agree, else require_approval
// - custom:           resolved by an external collaborator
//
// Every built-in method is a pure function of the evaluation *set*: permuting
// the input never changes the result.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cc_protocol::Decision;

use crate::error::PolicyError;
use crate::evaluation::PolicyEvaluation;

/// How a batch of evaluations is combined.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    AnyDeny,
    AllAllow,
    #[default]
    MostRestrictive,
    Majority,
    Unanimous,
    Custom,
}

impl AggregationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMethod::AnyDeny => "any_deny",
            AggregationMethod::AllAllow => "all_allow",
            AggregationMethod::MostRestrictive => "most_restrictive",
            AggregationMethod::Majority => "majority",
            AggregationMethod::Unanimous => "unanimous",
            AggregationMethod::Custom => "custom",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            AggregationMethod::AnyDeny,
            AggregationMethod::AllAllow,
            AggregationMethod::MostRestrictive,
            AggregationMethod::Majority,
            AggregationMethod::Unanimous,
            AggregationMethod::Custom,
        ]
        .into_iter()
        .find(|m| m.as_str() == s)
        .ok_or_else(|| PolicyError::UnknownMethod(s.to_string()))
    }
}

/// External collaborator that resolves `custom` aggregation.
///
/// The aggregator hands over the validated evaluations and records whatever
/// decision comes back; it implements no custom logic itself.
pub trait CustomAggregator: Send + Sync {
    /// Identifies the collaborator in errors and logs.
    fn name(&self) -> &str;

    fn resolve(&self, evaluations: &[PolicyEvaluation]) -> Result<Decision, PolicyError>;
}

/// The outcome of one aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedDecision {
    pub decision: Decision,
    pub method: AggregationMethod,
    /// The evaluation that determined the result, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deciding_policy: Option<String>,
    /// Every evaluation considered, in arrival order.
    pub evaluations: Vec<PolicyEvaluation>,
}

impl AggregatedDecision {
    pub fn policy_ids(&self) -> Vec<String> {
        self.evaluations.iter().map(|e| e.policy_id.clone()).collect()
    }

    /// Reasons attached to evaluations that were not plain `allow`.
    pub fn reasons(&self) -> Vec<String> {
        self.evaluations
            .iter()
            .filter(|e| e.decision != Decision::Allow)
            .filter_map(|e| {
                e.reason
                    .as_ref()
                    .map(|r| format!("{}: {}", e.policy_id, r))
            })
            .collect()
    }
}

/// Combines evaluations with one configured method.
#[derive(Clone, Default)]
pub struct PolicyAggregator {
    method: AggregationMethod,
    custom: Option<Arc<dyn CustomAggregator>>,
}

impl fmt::Debug for PolicyAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyAggregator")
            .field("method", &self.method)
            .field("custom", &self.custom.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl PolicyAggregator {
    pub fn new(method: AggregationMethod) -> Self {
        Self {
            method,
            custom: None,
        }
    }

    /// Attach the collaborator used when the method is `custom`.
    pub fn with_custom(mut self, custom: Arc<dyn CustomAggregator>) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn method(&self) -> AggregationMethod {
        self.method
    }

    /// Same aggregator with a different method, keeping the custom collaborator.
    pub fn using(&self, method: AggregationMethod) -> Self {
        Self {
            method,
            custom: self.custom.clone(),
        }
    }

    /// Validate and aggregate a batch of evaluations.
    pub fn aggregate(
        &self,
        evaluations: Vec<PolicyEvaluation>,
    ) -> Result<AggregatedDecision, PolicyError> {
        if evaluations.is_empty() {
            return Err(PolicyError::NoEvaluations);
        }
        for evaluation in &evaluations {
            evaluation.validate()?;
        }

        let (decision, deciding_policy) = match self.method {
            AggregationMethod::MostRestrictive => most_restrictive(&evaluations),
            AggregationMethod::AnyDeny => any_deny(&evaluations),
            AggregationMethod::AllAllow => all_allow(&evaluations),
            AggregationMethod::Majority => majority(&evaluations),
            AggregationMethod::Unanimous => unanimous(&evaluations),
            AggregationMethod::Custom => {
                let custom = self
                    .custom
                    .as_ref()
                    .ok_or(PolicyError::CustomAggregatorMissing)?;
                (custom.resolve(&evaluations)?, None)
            }
        };

        tracing::debug!(
            method = %self.method,
            decision = %decision,
            evaluations = evaluations.len(),
            deciding_policy = deciding_policy.as_deref().unwrap_or("-"),
            "aggregated policy evaluations"
        );

        Ok(AggregatedDecision {
            decision,
            method: self.method,
            deciding_policy,
            evaluations,
        })
    }
}

/// Highest severity first, then smallest policy_id.
fn most_restrictive_of<'a>(
    evaluations: impl Iterator<Item = &'a PolicyEvaluation>,
) -> Option<&'a PolicyEvaluation> {
    evaluations.max_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| b.policy_id.cmp(&a.policy_id))
    })
}

/// Smallest policy_id among evaluations with the given decision.
fn first_with(evaluations: &[PolicyEvaluation], decision: Decision) -> Option<String> {
    evaluations
        .iter()
        .filter(|e| e.decision == decision)
        .map(|e| e.policy_id.as_str())
        .min()
        .map(str::to_string)
}

fn most_restrictive(evaluations: &[PolicyEvaluation]) -> (Decision, Option<String>) {
    match most_restrictive_of(evaluations.iter()) {
        Some(winner) => (winner.decision, Some(winner.policy_id.clone())),
        // Callers reject empty input; deny is the safe answer regardless.
        None => (Decision::Deny, None),
    }
}

fn any_deny(evaluations: &[PolicyEvaluation]) -> (Decision, Option<String>) {
    match first_with(evaluations, Decision::Deny) {
        Some(policy_id) => (Decision::Deny, Some(policy_id)),
        None => most_restrictive(evaluations),
    }
}

fn all_allow(evaluations: &[PolicyEvaluation]) -> (Decision, Option<String>) {
    let blocking = most_restrictive_of(
        evaluations
            .iter()
            .filter(|e| e.decision != Decision::Allow),
    );
    match blocking {
        None => (Decision::Allow, None),
        Some(e) => (Decision::Deny, Some(e.policy_id.clone())),
    }
}

fn majority(evaluations: &[PolicyEvaluation]) -> (Decision, Option<String>) {
    let mut counts = [0usize; 4];
    for e in evaluations {
        counts[e.decision.severity() as usize] += 1;
    }
    // Ascending severity with `>=` makes the more severe decision win a tie.
    let mut winner = Decision::Allow;
    let mut best = 0;
    for decision in Decision::ALL {
        let count = counts[decision.severity() as usize];
        if count > 0 && count >= best {
            best = count;
            winner = decision;
        }
    }
    (winner, first_with(evaluations, winner))
}

fn unanimous(evaluations: &[PolicyEvaluation]) -> (Decision, Option<String>) {
    let first = evaluations[0].decision;
    if evaluations.iter().all(|e| e.decision == first) {
        (first, None)
    } else {
        (Decision::RequireApproval, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PolicySource;
    use chrono::{TimeZone, Utc};

    fn eval(policy_id: &str, decision: Decision) -> PolicyEvaluation {
        PolicyEvaluation::new(
            policy_id,
            PolicySource::Opa,
            decision,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    fn aggregate(method: AggregationMethod, evals: Vec<PolicyEvaluation>) -> AggregatedDecision {
        PolicyAggregator::new(method).aggregate(evals).unwrap()
    }

    /// Every permutation of a small slice (Heap's algorithm).
    fn permutations(items: &[PolicyEvaluation]) -> Vec<Vec<PolicyEvaluation>> {
        fn heap(k: usize, items: &mut Vec<PolicyEvaluation>, out: &mut Vec<Vec<PolicyEvaluation>>) {
            if k <= 1 {
                out.push(items.clone());
                return;
            }
            heap(k - 1, items, out);
            for i in 0..k - 1 {
                if k % 2 == 0 {
                    items.swap(i, k - 1);
                } else {
                    items.swap(0, k - 1);
                }
                heap(k - 1, items, out);
            }
        }
        let mut items = items.to_vec();
        let mut out = Vec::new();
        let k = items.len();
        heap(k, &mut items, &mut out);
        out
    }

    #[test]
    fn default_method_is_most_restrictive() {
        assert_eq!(AggregationMethod::default(), AggregationMethod::MostRestrictive);
    }

    #[test]
    fn most_restrictive_picks_highest_severity() {
        let result = aggregate(
            AggregationMethod::MostRestrictive,
            vec![eval("warn-policy", Decision::Warn), eval("deny-policy", Decision::Deny)],
        );
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.deciding_policy.as_deref(), Some("deny-policy"));
        assert_eq!(result.evaluations.len(), 2);
    }

    #[test]
    fn most_restrictive_ties_break_on_smallest_policy_id() {
        let result = aggregate(
            AggregationMethod::MostRestrictive,
            vec![eval("zeta", Decision::Warn), eval("alpha", Decision::Warn)],
        );
        assert_eq!(result.deciding_policy.as_deref(), Some("alpha"));
    }

    #[test]
    fn most_restrictive_and_majority_ignore_input_order() {
        let evals = vec![
            eval("p3", Decision::Warn),
            eval("p1", Decision::RequireApproval),
            eval("p2", Decision::Warn),
            eval("p0", Decision::Allow),
        ];
        for method in [AggregationMethod::MostRestrictive, AggregationMethod::Majority] {
            let baseline = aggregate(method, evals.clone());
            for perm in permutations(&evals) {
                let result = aggregate(method, perm);
                assert_eq!(result.decision, baseline.decision, "{}", method);
                assert_eq!(result.deciding_policy, baseline.deciding_policy, "{}", method);
            }
        }
    }

    #[test]
    fn any_deny_short_circuits_on_deny() {
        let result = aggregate(
            AggregationMethod::AnyDeny,
            vec![eval("b", Decision::Deny), eval("a", Decision::RequireApproval)],
        );
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.deciding_policy.as_deref(), Some("b"));
    }

    #[test]
    fn any_deny_falls_back_to_most_restrictive() {
        let result = aggregate(
            AggregationMethod::AnyDeny,
            vec![eval("a", Decision::Warn), eval("b", Decision::RequireApproval)],
        );
        assert_eq!(result.decision, Decision::RequireApproval);
    }

    #[test]
    fn all_allow_requires_every_allow() {
        let all = aggregate(
            AggregationMethod::AllAllow,
            vec![eval("a", Decision::Allow), eval("b", Decision::Allow)],
        );
        assert_eq!(all.decision, Decision::Allow);

        let one_warn = aggregate(
            AggregationMethod::AllAllow,
            vec![eval("a", Decision::Allow), eval("b", Decision::Warn)],
        );
        assert_eq!(one_warn.decision, Decision::Deny);
        assert_eq!(one_warn.deciding_policy.as_deref(), Some("b"));
    }

    #[test]
    fn majority_counts_occurrences() {
        let result = aggregate(
            AggregationMethod::Majority,
            vec![
                eval("a", Decision::Allow),
                eval("b", Decision::Allow),
                eval("c", Decision::Deny),
            ],
        );
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.deciding_policy.as_deref(), Some("a"));
    }

    #[test]
    fn majority_tie_goes_to_higher_severity() {
        let result = aggregate(
            AggregationMethod::Majority,
            vec![
                eval("a", Decision::Allow),
                eval("b", Decision::Warn),
                eval("c", Decision::Allow),
                eval("d", Decision::Warn),
            ],
        );
        assert_eq!(result.decision, Decision::Warn);
        assert_eq!(result.deciding_policy.as_deref(), Some("b"));
    }

    #[test]
    fn unanimous_requires_agreement() {
        let agree = aggregate(
            AggregationMethod::Unanimous,
            vec![eval("a", Decision::Warn), eval("b", Decision::Warn)],
        );
        assert_eq!(agree.decision, Decision::Warn);

        let disagree = aggregate(
            AggregationMethod::Unanimous,
            vec![eval("a", Decision::Allow), eval("b", Decision::Deny)],
        );
        assert_eq!(disagree.decision, Decision::RequireApproval);
    }

    #[test]
    fn severity_mismatch_is_rejected() {
        let mut bad = eval("a", Decision::Allow);
        bad.severity = 2;
        let result = PolicyAggregator::default().aggregate(vec![bad]);
        assert!(matches!(result, Err(PolicyError::SeverityMismatch { .. })));
    }

    #[test]
    fn empty_batch_is_rejected() {
        let result = PolicyAggregator::default().aggregate(vec![]);
        assert!(matches!(result, Err(PolicyError::NoEvaluations)));
    }

    struct AlwaysWarn;

    impl CustomAggregator for AlwaysWarn {
        fn name(&self) -> &str {
            "always-warn"
        }

        fn resolve(&self, _evaluations: &[PolicyEvaluation]) -> Result<Decision, PolicyError> {
            Ok(Decision::Warn)
        }
    }

    #[test]
    fn custom_delegates_to_collaborator() {
        let aggregator =
            PolicyAggregator::new(AggregationMethod::Custom).with_custom(Arc::new(AlwaysWarn));
        let result = aggregator.aggregate(vec![eval("a", Decision::Deny)]).unwrap();
        assert_eq!(result.decision, Decision::Warn);
        assert_eq!(result.method, AggregationMethod::Custom);
    }

    #[test]
    fn custom_without_collaborator_fails() {
        let result =
            PolicyAggregator::new(AggregationMethod::Custom).aggregate(vec![eval("a", Decision::Allow)]);
        assert!(matches!(result, Err(PolicyError::CustomAggregatorMissing)));
    }

    #[test]
    fn using_keeps_custom_collaborator() {
        let aggregator = PolicyAggregator::default().with_custom(Arc::new(AlwaysWarn));
        let custom = aggregator.using(AggregationMethod::Custom);
        let result = custom.aggregate(vec![eval("a", Decision::Allow)]).unwrap();
        assert_eq!(result.decision, Decision::Warn);
    }

    #[test]
    fn method_parses_from_wire_name() {
        assert_eq!(
            "any_deny".parse::<AggregationMethod>().unwrap(),
            AggregationMethod::AnyDeny
        );
        assert!("engine".parse::<AggregationMethod>().is_err());
    }

    #[test]
    fn reasons_skip_allow() {
        let result = aggregate(
            AggregationMethod::MostRestrictive,
            vec![
                eval("a", Decision::Allow).with_reason("fine"),
                eval("b", Decision::Warn).with_reason("large diff"),
            ],
        );
        assert_eq!(result.reasons(), vec!["b: large diff".to_string()]);
    }
}
