//! Execution tiers and the tier classifier.
//!
//! Every command is placed into one of three tiers describing how
//! disruptive it is to the host environment. Tiers are totally ordered so a
//! batch can be reduced to its worst member.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::job::Command;

/// Disruptiveness class of a command or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Read-only or trivially cheap; runs inline at submission.
    Instant,
    /// Mutating but safe to interleave with other smooth work.
    Smooth,
    /// Needs exclusive access to the host (reloads, test runs, builds).
    Heavy,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Instant => write!(f, "instant"),
            Tier::Smooth => write!(f, "smooth"),
            Tier::Heavy => write!(f, "heavy"),
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "instant" => Ok(Tier::Instant),
            "smooth" => Ok(Tier::Smooth),
            "heavy" => Ok(Tier::Heavy),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// How an action rule matches a parameter value.
#[derive(Debug, Clone)]
pub enum ActionMatch {
    /// Value equals one of these strings (case-insensitive).
    Exact(Vec<String>),
    /// Value starts with one of these prefixes (case-insensitive).
    Prefix(Vec<String>),
    /// Value matches the regular expression.
    Pattern(Regex),
}

impl ActionMatch {
    fn matches(&self, value: &str) -> bool {
        match self {
            ActionMatch::Exact(values) => values.iter().any(|v| v.eq_ignore_ascii_case(value)),
            ActionMatch::Prefix(prefixes) => {
                let lower = value.to_ascii_lowercase();
                prefixes.iter().any(|p| lower.starts_with(&p.to_ascii_lowercase()))
            }
            ActionMatch::Pattern(re) => re.is_match(value),
        }
    }
}

/// Per-tool override: when `param` holds a matching string, use `tier`.
#[derive(Debug, Clone)]
pub struct ActionRule {
    param: String,
    matcher: ActionMatch,
    tier: Tier,
}

impl ActionRule {
    /// Match the `action` parameter against a list of exact values.
    pub fn actions(values: &[&str], tier: Tier) -> Self {
        Self {
            param: "action".to_string(),
            matcher: ActionMatch::Exact(values.iter().map(|v| v.to_string()).collect()),
            tier,
        }
    }

    /// Match the `action` parameter against a list of prefixes.
    pub fn prefixes(prefixes: &[&str], tier: Tier) -> Self {
        Self {
            param: "action".to_string(),
            matcher: ActionMatch::Prefix(prefixes.iter().map(|v| v.to_string()).collect()),
            tier,
        }
    }

    /// Match the `action` parameter against a regular expression.
    pub fn pattern(pattern: &str, tier: Tier) -> Result<Self, regex::Error> {
        Ok(Self {
            param: "action".to_string(),
            matcher: ActionMatch::Pattern(Regex::new(pattern)?),
            tier,
        })
    }

    /// Inspect a different parameter than `action`.
    pub fn on_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }

    /// Tier this rule assigns when it matches.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    fn matches(&self, params: &Value) -> bool {
        params
            .get(&self.param)
            .and_then(Value::as_str)
            .is_some_and(|v| self.matcher.matches(v))
    }
}

/// Maps (tool, declared tier, params) to an effective tier.
///
/// The rule table is fixed once the classifier is built; classification
/// itself never has side effects.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: HashMap<String, Vec<ActionRule>>,
}

impl Classifier {
    /// Create a classifier with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier preloaded with the read-only downgrades for the
    /// standard host management tools.
    pub fn with_default_rules() -> Self {
        Self::new()
            .rule(
                "manage_script",
                ActionRule::actions(&["read", "validate", "get_sha"], Tier::Instant),
            )
            .rule(
                "manage_scene",
                ActionRule::prefixes(&["get_", "list_"], Tier::Instant),
            )
            .rule(
                "manage_asset",
                ActionRule::actions(&["search", "get_info", "get_components"], Tier::Instant),
            )
            .rule(
                "manage_editor",
                ActionRule::actions(&["get_state", "get_selection", "get_tags"], Tier::Instant),
            )
            .rule(
                "run_tests",
                ActionRule::actions(&["list", "get_results"], Tier::Instant),
            )
    }

    /// Add an override rule for `tool`. Rules are tried in insertion order.
    pub fn rule(mut self, tool: impl Into<String>, rule: ActionRule) -> Self {
        self.rules.entry(tool.into()).or_default().push(rule);
        self
    }

    /// Effective tier of a single command.
    pub fn classify(&self, name: &str, declared: Tier, params: &Value) -> Tier {
        self.rules
            .get(name)
            .and_then(|rules| rules.iter().find(|r| r.matches(params)))
            .map(ActionRule::tier)
            .unwrap_or(declared)
    }

    /// Maximum effective tier over a batch; the whole batch runs under its
    /// worst member. An empty batch is `Instant`.
    pub fn classify_batch(commands: &[Command]) -> Tier {
        commands
            .iter()
            .map(|c| c.tier)
            .max()
            .unwrap_or(Tier::Instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(tool: &str, tier: Tier) -> Command {
        Command::new(tool, json!({}), tier, false)
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Instant < Tier::Smooth);
        assert!(Tier::Smooth < Tier::Heavy);
    }

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("HEAVY".parse::<Tier>().unwrap(), Tier::Heavy);
        assert_eq!(Tier::Smooth.to_string(), "smooth");
        assert!("urgent".parse::<Tier>().is_err());
    }

    #[test]
    fn test_classify_without_rules_returns_declared() {
        let classifier = Classifier::new();
        let tier = classifier.classify("manage_script", Tier::Heavy, &json!({"action": "read"}));
        assert_eq!(tier, Tier::Heavy);
    }

    #[test]
    fn test_default_rules_downgrade_read_only_actions() {
        let classifier = Classifier::with_default_rules();
        assert_eq!(
            classifier.classify("manage_script", Tier::Heavy, &json!({"action": "READ"})),
            Tier::Instant
        );
        assert_eq!(
            classifier.classify("manage_script", Tier::Heavy, &json!({"action": "create"})),
            Tier::Heavy
        );
        assert_eq!(
            classifier.classify("manage_scene", Tier::Smooth, &json!({"action": "get_hierarchy"})),
            Tier::Instant
        );
    }

    #[test]
    fn test_rule_ignores_non_string_params() {
        let classifier = Classifier::with_default_rules();
        assert_eq!(
            classifier.classify("manage_script", Tier::Heavy, &json!({"action": 3})),
            Tier::Heavy
        );
        assert_eq!(classifier.classify("manage_script", Tier::Heavy, &Value::Null), Tier::Heavy);
    }

    #[test]
    fn test_pattern_rule_on_custom_param() {
        let rule = ActionRule::pattern(r"^dry[-_]?run$", Tier::Smooth)
            .unwrap()
            .on_param("mode");
        let classifier = Classifier::new().rule("build", rule);
        assert_eq!(
            classifier.classify("build", Tier::Heavy, &json!({"mode": "dry_run"})),
            Tier::Smooth
        );
        assert_eq!(
            classifier.classify("build", Tier::Heavy, &json!({"action": "dry_run"})),
            Tier::Heavy
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let classifier = Classifier::new()
            .rule("tool", ActionRule::prefixes(&["get"], Tier::Instant))
            .rule("tool", ActionRule::actions(&["get_all"], Tier::Smooth));
        assert_eq!(
            classifier.classify("tool", Tier::Heavy, &json!({"action": "get_all"})),
            Tier::Instant
        );
    }

    #[test]
    fn test_classify_batch_takes_maximum() {
        let batch = vec![
            command("a", Tier::Instant),
            command("b", Tier::Heavy),
            command("c", Tier::Smooth),
        ];
        assert_eq!(Classifier::classify_batch(&batch), Tier::Heavy);

        let batch = vec![command("a", Tier::Instant), command("b", Tier::Smooth)];
        assert_eq!(Classifier::classify_batch(&batch), Tier::Smooth);
    }

    #[test]
    fn test_classify_batch_empty_is_instant() {
        assert_eq!(Classifier::classify_batch(&[]), Tier::Instant);
    }
}
