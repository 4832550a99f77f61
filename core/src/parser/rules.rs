use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::LineParser;
use super::ParsedEvent;
use crate::event_log::Payload;

/// One `pattern -> event type` rule. Named capture groups become payload
/// fields; captures that parse as integers are stored as numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Constant fields merged into every payload this rule produces.
    #[serde(default)]
    pub fields: Payload,
}

impl RuleSpec {
    pub fn new(pattern: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            event_type: event_type.into(),
            fields: Payload::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid pattern for rule `{event_type}`: {source}")]
    InvalidPattern {
        event_type: String,
        #[source]
        source: regex_lite::Error,
    },
    #[error("rule parser requires at least one rule")]
    Empty,
}

#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    event_type: String,
    fields: Payload,
}

/// Table-driven [`LineParser`]. Every rule is tried against every line, so a
/// single line may yield several events, in rule order.
#[derive(Debug)]
pub struct RuleParser {
    rules: Vec<CompiledRule>,
}

impl RuleParser {
    pub fn new(specs: &[RuleSpec]) -> Result<Self, RuleError> {
        if specs.is_empty() {
            return Err(RuleError::Empty);
        }
        let rules = specs
            .iter()
            .map(|spec| {
                let regex =
                    Regex::new(&spec.pattern).map_err(|source| RuleError::InvalidPattern {
                        event_type: spec.event_type.clone(),
                        source,
                    })?;
                Ok(CompiledRule {
                    regex,
                    event_type: spec.event_type.clone(),
                    fields: spec.fields.clone(),
                })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;
        Ok(Self { rules })
    }
}

impl LineParser for RuleParser {
    fn parse_line(&self, line: &str, _scalar: i64) -> Vec<ParsedEvent> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let captures = rule.regex.captures(line)?;
                let mut payload = rule.fields.clone();
                for name in rule.regex.capture_names().flatten() {
                    if let Some(found) = captures.name(name) {
                        payload.insert(name.to_string(), capture_value(found.as_str()));
                    }
                }
                Some(ParsedEvent {
                    event_type: rule.event_type.clone(),
                    payload,
                })
            })
            .collect()
    }
}

fn capture_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed.parse::<i64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::String(trimmed.to_string()),
    }
}
