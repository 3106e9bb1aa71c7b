//! Node-name classification into architecture classes.
//!
//! An ordered list of prefix rules is tried against the node name; the
//! first match wins. Names matching no rule get the configured fallback,
//! which is the same for pods, the node view, and the cluster view. A
//! `None` fallback drops unclassified names everywhere.

use quotawatch_state::ArchClass;

use crate::error::ConfigError;

/// A single `prefix → class` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchRule {
    pub prefix: String,
    pub class: ArchClass,
}

impl ArchRule {
    pub fn new(prefix: impl Into<String>, class: ArchClass) -> Self {
        Self {
            prefix: prefix.into(),
            class,
        }
    }
}

/// Pure node-name classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    rules: Vec<ArchRule>,
    fallback: Option<ArchClass>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Self::default_rules(), Some(ArchClass::NonXc))
    }
}

impl Classifier {
    pub fn new(rules: Vec<ArchRule>, fallback: Option<ArchClass>) -> Self {
        Self { rules, fallback }
    }

    /// `kkh` (kylin on hygon x86) must precede `kk` (kylin on arm).
    pub fn default_rules() -> Vec<ArchRule> {
        vec![
            ArchRule::new("kkh", ArchClass::XcX86),
            ArchRule::new("kk", ArchClass::XcArm),
            ArchRule::new("b", ArchClass::NonXc),
        ]
    }

    /// Parse `prefix=class,prefix=class,...`.
    pub fn parse_rules(text: &str) -> Result<Vec<ArchRule>, ConfigError> {
        let mut rules = Vec::new();
        for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (prefix, class) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidRule(entry.to_string()))?;
            let prefix = prefix.trim();
            let class = ArchClass::from_name(class)
                .ok_or_else(|| ConfigError::InvalidRule(entry.to_string()))?;
            if prefix.is_empty() {
                return Err(ConfigError::InvalidRule(entry.to_string()));
            }
            rules.push(ArchRule::new(prefix, class));
        }
        if rules.is_empty() {
            return Err(ConfigError::InvalidRule(text.to_string()));
        }
        Ok(rules)
    }

    pub fn rules(&self) -> &[ArchRule] {
        &self.rules
    }

    pub fn fallback(&self) -> Option<ArchClass> {
        self.fallback
    }

    /// First matching rule, ignoring the fallback.
    pub fn match_rules(&self, node_name: &str) -> Option<ArchClass> {
        self.rules
            .iter()
            .find(|rule| node_name.starts_with(rule.prefix.as_str()))
            .map(|rule| rule.class)
    }

    /// Classify a node name; `None` means the name is dropped.
    pub fn classify(&self, node_name: &str) -> Option<ArchClass> {
        self.match_rules(node_name).or(self.fallback)
    }
}
