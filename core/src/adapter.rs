//! Per-integration description of an upstream terminal program.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::parser::DEFAULT_SCALAR_PATTERN;
use crate::parser::LineParser;
use crate::parser::ParserKind;
use crate::parser::RuleError;
use crate::parser::RuleSpec;
use crate::parser::ScalarTracker;

pub const DEFAULT_ORIGIN: &str = "toybox";
pub const DEFAULT_SCALAR_KEY: &str = "depth";
pub const DEFAULT_SCALAR_INITIAL: i64 = 1;
pub const DEFAULT_CONTROL_PORT: u16 = 7420;

/// Fully resolved adapter: how to find the program, how to read its output,
/// and where its events are attributed.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSpec {
    pub id: String,
    pub origin: String,
    /// Environment variable holding an explicit command line that overrides
    /// every other resolution step.
    pub env_cmd_var: String,
    /// Executable names looked up on `PATH`, in priority order.
    pub candidates: Vec<String>,
    pub startup_args: Vec<String>,
    /// Explicit command line from the configuration file.
    pub command: Option<String>,
    pub parser: ParserKind,
    pub rules: Vec<RuleSpec>,
    pub scalar_pattern: String,
    pub scalar_key: String,
    pub scalar_initial: i64,
    pub control_port: u16,
}

impl AdapterSpec {
    pub fn preset(id: &str) -> Option<Self> {
        match id {
            "hethack" => Some(Self {
                candidates: vec!["hethack".to_string(), "nethack".to_string()],
                parser: ParserKind::Dungeon,
                control_port: 7421,
                ..Self::custom("hethack")
            }),
            "elite" => Some(Self {
                candidates: vec!["elite".to_string(), "newkind".to_string()],
                parser: ParserKind::Galaxy,
                control_port: 7422,
                ..Self::custom("elite")
            }),
            _ => None,
        }
    }

    /// Bare adapter for a program without a bundled preset: the override
    /// variable is `TOYBOX_<ID>_CMD` and the only candidate is `id` itself.
    pub fn custom(id: &str) -> Self {
        Self {
            id: id.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            env_cmd_var: default_env_cmd_var(id),
            candidates: vec![id.to_string()],
            startup_args: Vec::new(),
            command: None,
            parser: ParserKind::None,
            rules: Vec::new(),
            scalar_pattern: DEFAULT_SCALAR_PATTERN.to_string(),
            scalar_key: DEFAULT_SCALAR_KEY.to_string(),
            scalar_initial: DEFAULT_SCALAR_INITIAL,
            control_port: DEFAULT_CONTROL_PORT,
        }
    }

    pub fn preset_or_custom(id: &str) -> Self {
        Self::preset(id).unwrap_or_else(|| Self::custom(id))
    }

    /// Value of the `source` field on every event this adapter emits.
    pub fn source(&self) -> String {
        format!("{}:{}", self.origin, self.id)
    }

    pub fn build_parser(&self) -> Result<Arc<dyn LineParser>, RuleError> {
        self.parser.build(&self.rules)
    }

    pub fn scalar_tracker(&self) -> Result<ScalarTracker, regex_lite::Error> {
        ScalarTracker::new(&self.scalar_pattern, self.scalar_initial)
    }
}

fn default_env_cmd_var(id: &str) -> String {
    let normalized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("TOYBOX_{normalized}_CMD")
}

/// `[adapter]` table of the configuration file. Every field is optional and
/// overrides the preset selected by `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    pub id: Option<String>,
    pub origin: Option<String>,
    pub env_cmd_var: Option<String>,
    pub candidates: Option<Vec<String>>,
    pub startup_args: Option<Vec<String>>,
    pub command: Option<String>,
    pub parser: Option<ParserKind>,
    pub rules: Vec<RuleSpec>,
    pub scalar_pattern: Option<String>,
    pub scalar_key: Option<String>,
    pub scalar_initial: Option<i64>,
}

impl AdapterSettings {
    pub fn into_spec(self, fallback_id: &str) -> AdapterSpec {
        let id = self.id.unwrap_or_else(|| fallback_id.to_string());
        let mut spec = AdapterSpec::preset_or_custom(&id);
        if let Some(origin) = self.origin {
            spec.origin = origin;
        }
        if let Some(var) = self.env_cmd_var {
            spec.env_cmd_var = var;
        }
        if let Some(candidates) = self.candidates {
            spec.candidates = candidates;
        }
        if let Some(args) = self.startup_args {
            spec.startup_args = args;
        }
        if self.command.is_some() {
            spec.command = self.command;
        }
        if let Some(parser) = self.parser {
            spec.parser = parser;
        }
        spec.rules.extend(self.rules);
        if let Some(pattern) = self.scalar_pattern {
            spec.scalar_pattern = pattern;
        }
        if let Some(key) = self.scalar_key {
            spec.scalar_key = key;
        }
        if let Some(initial) = self.scalar_initial {
            spec.scalar_initial = initial;
        }
        spec
    }
}
