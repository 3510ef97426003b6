//! SSH client configuration: parsing and per-host resolution.
//!
//! The format is the practical subset of `ssh_config(5)` that matters for
//! picking identities and connection parameters:
//!
//! - `Key Value` and `Key=Value` lines
//! - `Host` blocks with `*`/`?` wildcards and `!` negation
//! - `Match` blocks with `all`, `host` and `user` criteria
//! - `Include` with globs, expanded in place
//!
//! [`parse`] produces an ordered list of [`ConfigRule`]s; [`resolve`] folds
//! that list into an [`EffectiveHostConfig`] for one hostname.

pub mod options;
mod parser;
pub mod pattern;
mod resolver;

use indexmap::IndexMap;
use serde::Serialize;

pub use parser::{parse, parse_str};
pub use pattern::Pattern;
pub use resolver::{resolve, EffectiveHostConfig};

/// One `Match` criterion.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchCriterion {
    /// Matches every host.
    All {
        /// `!all`
        negated: bool,
    },
    /// Hostname against a comma-separated pattern list.
    Host {
        /// Pattern list.
        patterns: Vec<Pattern>,
        /// `!host`
        negated: bool,
    },
    /// User against a comma-separated pattern list.
    User {
        /// Pattern list.
        patterns: Vec<Pattern>,
        /// `!user`
        negated: bool,
    },
}

/// What gates a rule block.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleScope {
    /// Options before the first `Host`/`Match` line. Always applies.
    Global,
    /// A `Host` line.
    Host {
        /// Space-separated patterns, in file order.
        patterns: Vec<Pattern>,
    },
    /// A `Match` line.
    Match {
        /// Supported criteria, all of which must hold.
        criteria: Vec<MatchCriterion>,
        /// Criteria this implementation cannot evaluate. A rule with any
        /// rejected criterion never applies.
        rejected: Vec<String>,
    },
}

/// A stored option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// First value declared inside the block.
    Single(String),
    /// Every value declared inside the block, in order.
    List(Vec<String>),
}

impl OptionValue {
    /// Iterates the value(s) in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::Single(v) => std::slice::from_ref(v),
            Self::List(vs) => vs,
        };
        slice.iter().map(String::as_str)
    }
}

/// One parsed `Host`/`Match` block.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigRule {
    /// The gate for this block.
    pub scope: RuleScope,
    /// Options keyed by canonical name, in first-declaration order.
    pub options: IndexMap<String, OptionValue>,
}

impl ConfigRule {
    pub(crate) fn new(scope: RuleScope) -> Self {
        Self {
            scope,
            options: IndexMap::new(),
        }
    }

    /// Looks up an option by name, ignoring case.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        let canonical = options::lookup(key).map_or(key, |spec| spec.name);
        self.options.get(canonical)
    }
}
