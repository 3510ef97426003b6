//! Folds parsed rules into the effective configuration for one host.

use indexmap::IndexMap;
use serde::Serialize;

use super::options;
use super::pattern::list_matches;
use super::{ConfigRule, MatchCriterion, OptionValue, RuleScope};

/// Merged configuration for one hostname.
///
/// Singular options hold the value from the first applicable rule that set
/// them. Accumulating options hold every applicable rule's values in rule
/// order, duplicates included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveHostConfig {
    /// The hostname that was resolved.
    pub host: String,
    /// First-match-wins options.
    pub options: IndexMap<String, String>,
    /// Accumulated list options.
    pub lists: IndexMap<String, Vec<String>>,
}

impl EffectiveHostConfig {
    /// Singular option by name (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(canonical(key)).map(String::as_str)
    }

    /// Accumulated values by name (case-insensitive). Empty when unset.
    pub fn list(&self, key: &str) -> &[String] {
        self.lists.get(canonical(key)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The host to connect to: `HostName` with `%h` substituted, or the
    /// resolved name itself.
    pub fn hostname(&self) -> String {
        let Some(template) = self.get("HostName") else {
            return self.host.clone();
        };
        substitute(template, |token| match token {
            'h' => Some(self.host.clone()),
            _ => None,
        })
    }

    /// Remote user, if configured.
    pub fn user(&self) -> Option<&str> {
        self.get("User")
    }

    /// Port, if configured and valid.
    pub fn port(&self) -> Option<u16> {
        self.get("Port").and_then(|p| p.parse().ok())
    }

    /// Substitutes `%%`, `%h`, `%n`, `%p`, `%r`, `%u` and `%d` tokens.
    ///
    /// `%h` is the resolved [`hostname`](Self::hostname) and `%n` the name
    /// as given. Unknown tokens are kept.
    pub fn expand_tokens(&self, value: &str, local_user: Option<&str>, home: Option<&str>) -> String {
        substitute(value, |token| match token {
            'h' => Some(self.hostname()),
            'n' => Some(self.host.clone()),
            'p' => Some(self.get("Port").unwrap_or("22").to_string()),
            'r' => Some(self.user().or(local_user).unwrap_or_default().to_string()),
            'u' => Some(local_user.unwrap_or_default().to_string()),
            'd' => Some(home.unwrap_or_default().to_string()),
            _ => None,
        })
    }
}

fn substitute(value: &str, token: impl Fn(char) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(t) => match token(t) {
                Some(replacement) => out.push_str(&replacement),
                None => {
                    out.push('%');
                    out.push(t);
                }
            },
            None => out.push('%'),
        }
    }
    out
}

fn canonical(key: &str) -> &str {
    options::lookup(key).map_or(key, |spec| spec.name)
}

/// Evaluates `rules` in order against `hostname`.
///
/// `Match user` criteria test the `User` established by earlier applicable
/// rules, falling back to `current_user`.
pub fn resolve(rules: &[ConfigRule], hostname: &str, current_user: &str) -> EffectiveHostConfig {
    let mut effective = EffectiveHostConfig {
        host: hostname.to_string(),
        ..EffectiveHostConfig::default()
    };

    for rule in rules {
        let user = effective.user().unwrap_or(current_user).to_string();
        if !applies(&rule.scope, hostname, &user) {
            continue;
        }

        for (key, value) in &rule.options {
            match value {
                OptionValue::List(values) => effective
                    .lists
                    .entry(key.clone())
                    .or_default()
                    .extend(values.iter().cloned()),
                OptionValue::Single(v) => {
                    effective.options.entry(key.clone()).or_insert_with(|| v.clone());
                }
            }
        }
    }

    log::debug!(
        "[ssh-config] Resolved {}: {} option(s), {} list(s)",
        hostname,
        effective.options.len(),
        effective.lists.len()
    );
    effective
}

fn applies(scope: &RuleScope, hostname: &str, user: &str) -> bool {
    match scope {
        RuleScope::Global => true,
        RuleScope::Host { patterns } => list_matches(patterns, hostname),
        RuleScope::Match { criteria, rejected } => {
            rejected.is_empty()
                && criteria.iter().all(|c| criterion_holds(c, hostname, user))
        }
    }
}

fn criterion_holds(criterion: &MatchCriterion, hostname: &str, user: &str) -> bool {
    let (hit, negated) = match criterion {
        MatchCriterion::All { negated } => (true, *negated),
        MatchCriterion::Host { patterns, negated } => (list_matches(patterns, hostname), *negated),
        MatchCriterion::User { patterns, negated } => (list_matches(patterns, user), *negated),
    };
    hit != negated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh_config::parse_str;
    use std::path::Path;

    fn rules(text: &str) -> Vec<ConfigRule> {
        parse_str(text, Path::new("/nonexistent/config")).unwrap()
    }

    #[test]
    fn test_first_match_wins_for_singular() {
        let r = rules("Host a.example.com\n  Port 22\nHost *.example.com\n  Port 2222\n");
        assert_eq!(resolve(&r, "a.example.com", "me").get("Port"), Some("22"));
        assert_eq!(resolve(&r, "b.example.com", "me").get("Port"), Some("2222"));
    }

    #[test]
    fn test_identity_files_accumulate_in_rule_order() {
        let r = rules(
            "Host *.example.com\n  IdentityFile ~/.ssh/wild\nHost a.example.com\n  IdentityFile ~/.ssh/a\nHost *\n  IdentityFile ~/.ssh/wild\n",
        );
        let eff = resolve(&r, "a.example.com", "me");
        assert_eq!(
            eff.list("identityfile"),
            &["~/.ssh/wild", "~/.ssh/a", "~/.ssh/wild"]
        );
    }

    #[test]
    fn test_negated_pattern_vetoes_rule() {
        let r = rules("Host *.example.com !secret.example.com\n  User shared\n");
        assert_eq!(resolve(&r, "www.example.com", "me").user(), Some("shared"));
        assert_eq!(resolve(&r, "secret.example.com", "me").user(), None);
    }

    #[test]
    fn test_host_matching_is_case_sensitive() {
        let r = rules("Host GitHub.com\n  User git\n");
        assert_eq!(resolve(&r, "github.com", "me").user(), None);
    }

    #[test]
    fn test_match_all_and_host() {
        let r = rules(
            "Match host *.corp\n  Port 2022\nMatch all\n  Port 22\n  User fallback\n",
        );
        assert_eq!(resolve(&r, "db.corp", "me").get("Port"), Some("2022"));
        assert_eq!(resolve(&r, "db.example", "me").get("Port"), Some("22"));
    }

    #[test]
    fn test_match_user_uses_current_user() {
        let r = rules("Match user deploy\n  IdentityFile ~/.ssh/deploy\n");
        assert_eq!(resolve(&r, "x", "deploy").list("IdentityFile").len(), 1);
        assert!(resolve(&r, "x", "alice").list("IdentityFile").is_empty());
    }

    #[test]
    fn test_match_user_prefers_configured_user() {
        let r = rules("Host x\n  User deploy\nMatch user deploy\n  Port 2200\n");
        assert_eq!(resolve(&r, "x", "alice").port(), Some(2200));
    }

    #[test]
    fn test_negated_match_criterion() {
        let r = rules("Match !host *.internal\n  ProxyJump bastion\n");
        assert_eq!(resolve(&r, "a.internal", "me").get("ProxyJump"), None);
        assert_eq!(resolve(&r, "a.public", "me").get("ProxyJump"), Some("bastion"));
    }

    #[test]
    fn test_rejected_criteria_never_apply() {
        let r = rules("Match exec true\n  Port 1\n");
        assert_eq!(resolve(&r, "x", "me").get("Port"), None);
    }

    #[test]
    fn test_global_options_apply_everywhere() {
        let r = rules("Compression yes\nHost x\n  Compression no\n");
        assert_eq!(resolve(&r, "x", "me").get("Compression"), Some("yes"));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let r = rules(
            "Host *\n  SendEnv LANG\n  Port 1\nHost x*\n  SendEnv LC_*\n  User u\n",
        );
        let a = serde_json::to_string(&resolve(&r, "xy", "me")).unwrap();
        let b = serde_json::to_string(&resolve(&r, "xy", "me")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hostname_token_expansion() {
        let r = rules("Host web\n  HostName %h.internal.example.com\n");
        let eff = resolve(&r, "web", "me");
        assert_eq!(eff.hostname(), "web.internal.example.com");
        assert_eq!(resolve(&r, "other", "me").hostname(), "other");
    }

    #[test]
    fn test_expand_tokens_for_identity_paths() {
        let r = rules("Host gh\n  HostName github.com\n  User git\n");
        let eff = resolve(&r, "gh", "alice");
        assert_eq!(
            eff.expand_tokens("%d/.ssh/%r@%h-%u%%", Some("alice"), Some("/home/alice")),
            "/home/alice/.ssh/git@github.com-alice%"
        );
    }
}
