//! Line-to-event extraction strategies.
//!
//! A [`LineParser`] sees one completed output line at a time together with the
//! carried scalar (the running "last known depth"). Parsers are pure: they never
//! block and never fail on input they do not recognise, they just return no
//! events. Each integrated program gets its own implementation; [`NoopParser`]
//! keeps the pipeline usable without any domain knowledge.

mod presets;
mod rules;
mod scalar;

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::event_log::Payload;

pub use presets::dungeon_rules;
pub use presets::galaxy_rules;
pub use rules::RuleError;
pub use rules::RuleParser;
pub use rules::RuleSpec;
pub use scalar::DEFAULT_SCALAR_PATTERN;
pub use scalar::ScalarTracker;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub event_type: String,
    pub payload: Payload,
}

impl ParsedEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Payload::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

pub trait LineParser: fmt::Debug + Send + Sync {
    fn parse_line(&self, line: &str, scalar: i64) -> Vec<ParsedEvent>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopParser;

impl LineParser for NoopParser {
    fn parse_line(&self, _line: &str, _scalar: i64) -> Vec<ParsedEvent> {
        Vec::new()
    }
}

/// Parser selection as it appears in configuration files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    #[default]
    None,
    Dungeon,
    Galaxy,
    /// Only the rules listed in the adapter configuration.
    Rules,
}

impl ParserKind {
    /// Builds the parser, appending `extra_rules` to any preset rule set.
    pub fn build(self, extra_rules: &[RuleSpec]) -> Result<Arc<dyn LineParser>, RuleError> {
        let mut specs = match self {
            ParserKind::None if extra_rules.is_empty() => return Ok(Arc::new(NoopParser)),
            ParserKind::None | ParserKind::Rules => Vec::new(),
            ParserKind::Dungeon => dungeon_rules(),
            ParserKind::Galaxy => galaxy_rules(),
        };
        specs.extend_from_slice(extra_rules);
        Ok(Arc::new(RuleParser::new(&specs)?))
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserKind::None => write!(f, "none"),
            ParserKind::Dungeon => write!(f, "dungeon"),
            ParserKind::Galaxy => write!(f, "galaxy"),
            ParserKind::Rules => write!(f, "rules"),
        }
    }
}
