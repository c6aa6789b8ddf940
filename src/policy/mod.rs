//! Combine policy: classification rules and the per-element processing flag.

pub mod processing;
pub mod rules;

pub use processing::ProcessingPolicy;
pub use rules::{ClassificationRules, CodeMatcher, GroupRule};
