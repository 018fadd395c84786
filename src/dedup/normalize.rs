//! Normalization of volatile payload fragments.
//!
//! Requests that differ only in run-to-run noise (embedded clock times and
//! the like) must fingerprint identically. Each rule is a regex whose matches
//! are replaced by a fixed placeholder; rules apply in order.

use std::borrow::Cow;

use regex::{NoExpand, Regex};

use crate::config::NormalizationRuleConfig;

/// One compiled substitution rule.
#[derive(Debug, Clone)]
pub struct NormalizationRule {
    pattern: Regex,
    replacement: String,
}

impl NormalizationRule {
    /// Compile a rule. The replacement is inserted literally (`$` is not special).
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(input, NoExpand(&self.replacement))
    }
}

/// Ordered rule set applied to canonical payload text.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    rules: Vec<NormalizationRule>,
}

impl Normalizer {
    pub fn new(rules: Vec<NormalizationRule>) -> Self {
        Self { rules }
    }

    /// Compile rules from configuration.
    pub fn from_config(rules: &[NormalizationRuleConfig]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|r| NormalizationRule::new(&r.pattern, r.replacement.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Apply every rule in order.
    pub fn normalize(&self, input: &str) -> String {
        let mut current = input.to_string();
        for rule in &self.rules {
            if let Cow::Owned(replaced) = rule.apply(&current) {
                current = replaced;
            }
        }
        current
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
