//! Reasoning-trace extraction.
//!
//! Providers return reasoning text under different field names. Routing
//! proxies such as OpenRouter rename `reasoning_content` to `reasoning`.

use serde_json::{Map, Value};

use openlike_core::types::REASONING_CONTENT_KEY;

/// Copy `source` on a response message into `target` in the message extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionRule {
    pub source: &'static str,
    pub target: &'static str,
}

/// Evaluated in order; the first rule with a value wins.
pub const REASONING_RULES: &[ExtractionRule] = &[
    ExtractionRule {
        source: "reasoning_content",
        target: REASONING_CONTENT_KEY,
    },
    ExtractionRule {
        source: "reasoning",
        target: REASONING_CONTENT_KEY,
    },
];

fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Apply `rules` to `fields`, writing at most one entry into `kwargs`.
/// Returns the rule that fired.
pub fn apply_rules(
    rules: &[ExtractionRule],
    fields: &Map<String, Value>,
    kwargs: &mut Map<String, Value>,
) -> Option<ExtractionRule> {
    let (rule, value) = rules.iter().find_map(|rule| {
        fields
            .get(rule.source)
            .filter(|v| has_value(v))
            .map(|v| (*rule, v.clone()))
    })?;
    kwargs.insert(rule.target.to_string(), value);
    Some(rule)
}

/// Apply [`REASONING_RULES`].
pub fn extract_reasoning(fields: &Map<String, Value>, kwargs: &mut Map<String, Value>) -> bool {
    apply_rules(REASONING_RULES, fields, kwargs).is_some()
}
