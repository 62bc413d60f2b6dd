//! Content rule model and rule list synthesis
//!
//! Rule lists use the content-blocker JSON dialect: an array of
//! `{ "trigger": {...}, "action": {...} }` objects. Bundled lists are extended
//! at compile time with the allow-list rule of their category and, for
//! cosmetic lists, a static rule that keeps top-level documents loadable.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error type for rule list validation.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule list is not a valid JSON rule array: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rule {index}: invalid url-filter '{filter}': {source}")]
    InvalidUrlFilter {
        index: usize,
        filter: String,
        source: regex::Error,
    },
    #[error("rule {index}: css-display-none requires a selector")]
    MissingSelector { index: usize },
    #[error("rule {index}: if-domain and unless-domain are mutually exclusive")]
    ConflictingDomains { index: usize },
}

// =============================================================================
// Rule Model
// =============================================================================

/// What a matching rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Block,
    BlockCookies,
    CssDisplayNone,
    IgnorePreviousRules,
    MakeHttps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// When a rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Trigger {
    pub url_filter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter_is_case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_domain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_domain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_type: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_top_url: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_top_url: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    pub trigger: Trigger,
    pub action: Action,
}

/// Parse and validate a rule list.
pub fn parse_rule_list(source: &str) -> Result<Vec<ContentRule>, RuleError> {
    let rules: Vec<ContentRule> = serde_json::from_str(source)?;

    for (index, rule) in rules.iter().enumerate() {
        if let Err(source) = Regex::new(&rule.trigger.url_filter) {
            return Err(RuleError::InvalidUrlFilter {
                index,
                filter: rule.trigger.url_filter.clone(),
                source,
            });
        }
        if rule.action.kind == ActionType::CssDisplayNone && rule.action.selector.is_none() {
            return Err(RuleError::MissingSelector { index });
        }
        if rule.trigger.if_domain.is_some() && rule.trigger.unless_domain.is_some() {
            return Err(RuleError::ConflictingDomains { index });
        }
    }

    Ok(rules)
}

// =============================================================================
// Synthesis
// =============================================================================

/// Static rule appended to cosmetic lists: never block first-party documents.
pub fn prevent_top_level_blocks_rule() -> Value {
    json!({
        "trigger": {
            "url-filter": ".*",
            "load-type": ["first-party"],
            "resource-type": ["document"]
        },
        "action": {
            "type": "ignore-previous-rules"
        }
    })
}

/// Build the compile input for one list.
///
/// `bundled` must be a JSON array. The allow-list rule comes after every
/// bundled rule so its `ignore-previous-rules` action covers all of them.
/// Unknown rule fields in the bundle are preserved.
pub fn synthesize_rule_list(
    bundled: &str,
    allow_rule: Option<&Value>,
    cosmetic: bool,
) -> Result<String, serde_json::Error> {
    let mut rules: Vec<Value> = serde_json::from_str(bundled)?;
    if let Some(rule) = allow_rule {
        rules.push(rule.clone());
    }
    if cosmetic {
        rules.push(prevent_top_level_blocks_rule());
    }
    serde_json::to_string(&rules)
}
