//! Rule matching.

use super::alert::Alert;
use super::rule::RoutingRule;

/// Check a single rule against an alert.
///
/// A rule matches when it is enabled, its category equals the alert's, the
/// alert priority meets the rule floor and every condition holds.
pub fn rule_matches(rule: &RoutingRule, alert: &Alert) -> bool {
    if !rule.enabled {
        return false;
    }
    if rule.category != alert.category {
        return false;
    }
    if !alert.priority.meets(rule.priority) {
        return false;
    }
    rule.conditions.iter().all(|c| c.evaluate(alert))
}

/// Select every rule that applies to `alert`, preserving rule order.
pub fn match_rules<'a>(alert: &Alert, rules: &'a [RoutingRule]) -> Vec<&'a RoutingRule> {
    rules.iter().filter(|rule| rule_matches(rule, alert)).collect()
}
