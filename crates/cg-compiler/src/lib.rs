//! ContentGuard Rule List Compiler
//!
//! This crate turns the bundled content rule lists plus the current
//! allow-lists into compiled rule lists, and keeps the compiled store in
//! step with the bundle across releases.

pub mod lifecycle;
pub mod marker;
pub mod rules;
pub mod store;

pub use lifecycle::{AllowListRules, CompileReport, RuleListCompiler, RuleListHost};
pub use marker::{JsonMarkerStore, MarkerError, MarkerStore, MemoryMarkerStore, BLOCKER_FILE_DATE_KEY};
pub use rules::{parse_rule_list, ContentRule, RuleError};
pub use store::{CompiledRuleList, DirRuleStore, MemoryRuleStore, RuleStore, RuleStoreError};
