use crate::models::{CoreError, EvalRule, StopKind, StopSignal};
use crate::session::Session;

/// Result of the generic early-stop scan.
#[derive(Clone, Debug, PartialEq)]
pub enum EvalOutcome {
    Matched(bool),
    /// Every early-stop rule matched; carries the domain rules set aside, in order.
    Deferred(Vec<EvalRule>),
}

/// Checks every early-stop rule left to right against `signal`, removing each rule that
/// matches. Domain rules are skipped over and handed back once the scan is through.
/// Leaves `rules` empty unless the scan failed on a mismatch.
pub fn scan_rules(rules: &mut Vec<EvalRule>, signal: &StopSignal) -> EvalOutcome {
    let mut index = 0;
    while let Some(rule) = rules.get(index) {
        match rule {
            EvalRule::Domain { .. } => index += 1,
            EvalRule::EarlyStop { expected, .. } if *expected != signal.kind => {
                tracing::info!(
                    expected = %expected,
                    actual = %signal.kind,
                    "evaluation failed at stop kind"
                );
                return EvalOutcome::Matched(false);
            }
            EvalRule::EarlyStop {
                expected: StopKind::Ans,
                args,
            } if args.as_deref() != Some(signal.args.as_slice()) => {
                tracing::info!(
                    expected = ?args,
                    actual = ?signal.args,
                    "evaluation failed at answer"
                );
                return EvalOutcome::Matched(false);
            }
            EvalRule::EarlyStop { .. } => {
                rules.remove(index);
            }
        }
    }

    if rules.is_empty() {
        EvalOutcome::Matched(true)
    } else {
        EvalOutcome::Deferred(std::mem::take(rules))
    }
}

/// Category-specific judge for the rules the generic scan cannot decide.
pub trait CategoryEvaluator: Send + Sync {
    /// Load-time check of a definition's rules.
    fn validate(&self, _rules: &[EvalRule]) -> Result<(), CoreError> {
        Ok(())
    }

    fn evaluate(&self, session: &mut dyn Session, rules: &[EvalRule]) -> bool;
}

/// Evaluator for categories judged purely by how the episode stopped.
pub struct StopOnlyEvaluator;

impl CategoryEvaluator for StopOnlyEvaluator {
    fn validate(&self, rules: &[EvalRule]) -> Result<(), CoreError> {
        match rules.iter().find(|rule| !rule.is_early_stop()) {
            Some(EvalRule::Domain { kind, .. }) => Err(CoreError::config(format!(
                "category has no evaluator for '{kind}' rules"
            ))),
            _ => Ok(()),
        }
    }

    fn evaluate(&self, _session: &mut dyn Session, _rules: &[EvalRule]) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::{EvalOutcome, scan_rules};
    use crate::models::{EvalRule, StopKind, StopSignal};

    fn domain(kind: &str) -> EvalRule {
        EvalRule::Domain {
            kind: kind.to_string(),
            body: Map::new(),
        }
    }

    #[test]
    fn matching_answer_consumes_every_rule() {
        let mut rules = vec![EvalRule::answer(["42"])];
        let outcome = scan_rules(&mut rules, &StopSignal::new(StopKind::Ans, ["42"]));
        assert_eq!(outcome, EvalOutcome::Matched(true));
        assert!(rules.is_empty());
    }

    #[test]
    fn wrong_answer_fails_immediately() {
        let mut rules = vec![EvalRule::answer(["42"]), domain("val")];
        let outcome = scan_rules(&mut rules, &StopSignal::new(StopKind::Ans, ["7"]));
        assert_eq!(outcome, EvalOutcome::Matched(false));
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn wrong_stop_kind_fails() {
        let mut rules = vec![EvalRule::stop(StopKind::Done)];
        let outcome = scan_rules(&mut rules, &StopSignal::timeout());
        assert_eq!(outcome, EvalOutcome::Matched(false));
    }

    #[test]
    fn non_answer_kinds_ignore_arguments() {
        let mut rules = vec![EvalRule::EarlyStop {
            expected: StopKind::Done,
            args: Some(vec!["unused".to_string()]),
        }];
        let outcome = scan_rules(&mut rules, &StopSignal::new(StopKind::Done, ["other"]));
        assert_eq!(outcome, EvalOutcome::Matched(true));
    }

    #[test]
    fn domain_rules_after_a_consumed_stop_rule_are_deferred() {
        let mut rules = vec![EvalRule::stop(StopKind::Done), domain("var"), domain("eqn")];
        let outcome = scan_rules(&mut rules, &StopSignal::new(StopKind::Done, Vec::<String>::new()));
        assert_eq!(outcome, EvalOutcome::Deferred(vec![domain("var"), domain("eqn")]));
        assert!(rules.is_empty());
    }

    #[test]
    fn stop_rules_behind_a_domain_rule_are_still_checked() {
        let mut rules = vec![domain("eqn"), EvalRule::answer(["42"])];
        let outcome = scan_rules(&mut rules, &StopSignal::new(StopKind::Ans, ["7"]));
        assert_eq!(outcome, EvalOutcome::Matched(false));

        let mut rules = vec![domain("eqn"), EvalRule::answer(["42"]), domain("val")];
        let outcome = scan_rules(&mut rules, &StopSignal::new(StopKind::Ans, ["42"]));
        assert_eq!(outcome, EvalOutcome::Deferred(vec![domain("eqn"), domain("val")]));
    }

    #[test]
    fn answer_rule_alone_decides_the_verdict() {
        let signal = StopSignal::new(StopKind::Ans, ["7"]);
        let mut rules = vec![EvalRule::answer(["7"])];
        assert_eq!(scan_rules(&mut rules, &signal), EvalOutcome::Matched(true));

        let mut rules = vec![EvalRule::answer(["7"])];
        let failing = StopSignal::new(StopKind::Ans, ["8"]);
        assert_eq!(scan_rules(&mut rules, &failing), EvalOutcome::Matched(false));
        assert_eq!(rules.len(), 1);
    }
}
