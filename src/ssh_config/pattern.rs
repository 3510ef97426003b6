//! OpenSSH-style wildcard patterns.
//!
//! Only `*` (any run, including none) and `?` (exactly one character) are
//! special. Everything else, including glob syntax that `globset` would
//! normally interpret (`[`, `]`, `{`, `}`, `\`), matches literally.
//! Matching is case-sensitive.

use globset::{GlobBuilder, GlobMatcher};
use serde::{Serialize, Serializer};

/// A single, possibly negated, wildcard pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    negated: bool,
    matcher: GlobMatcher,
}

impl Pattern {
    /// Parses a pattern token. A leading `!` negates it.
    ///
    /// Returns `None` for an empty pattern (a bare `!` included).
    pub fn parse(token: &str) -> Option<Self> {
        let (negated, body) = match token.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        if body.is_empty() {
            return None;
        }
        let matcher = compile(body)?;
        Some(Self {
            source: body.to_string(),
            negated,
            matcher,
        })
    }

    /// The pattern text without the negation marker.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern was written with a leading `!`.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Raw match, ignoring negation.
    pub fn matches(&self, candidate: &str) -> bool {
        self.matcher.is_match(candidate)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negated {
            write!(f, "!{}", self.source)
        } else {
            f.write_str(&self.source)
        }
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Evaluates a pattern list the way `Host` lines are evaluated.
///
/// The list matches when at least one positive pattern matches and no
/// negated pattern matches. A list of only negated patterns never matches.
pub fn list_matches(patterns: &[Pattern], candidate: &str) -> bool {
    let mut positive = false;
    for pattern in patterns {
        if pattern.matches(candidate) {
            if pattern.negated {
                return false;
            }
            positive = true;
        }
    }
    positive
}

/// Translates an OpenSSH pattern into a `globset` matcher.
fn compile(body: &str) -> Option<GlobMatcher> {
    let mut glob = String::with_capacity(body.len() + 8);
    for ch in body.chars() {
        match ch {
            '*' | '?' => glob.push(ch),
            '[' | ']' | '{' | '}' | '\\' => {
                glob.push('[');
                glob.push(ch);
                glob.push(']');
            }
            _ => glob.push(ch),
        }
    }

    match GlobBuilder::new(&glob)
        .literal_separator(false)
        .backslash_escape(false)
        .build()
    {
        Ok(g) => Some(g.compile_matcher()),
        Err(e) => {
            log::warn!("[ssh-config] Unusable pattern '{}': {}", body, e);
            None
        }
    }
}
