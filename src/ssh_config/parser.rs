//! Turns configuration text into an ordered list of rule blocks.

use std::fs;
use std::path::{Component, Path, PathBuf};

use super::options::{self, OptionSpec};
use super::pattern::Pattern;
use super::{ConfigRule, MatchCriterion, OptionValue, RuleScope};
use crate::constants::MAX_INCLUDE_DEPTH;
use crate::error::{Error, Result};

/// Options whose value is the raw remainder of the line.
const RAW_VALUE_OPTIONS: &[&str] = &["ProxyCommand", "RemoteCommand"];

/// `Match` criteria that are recognised but not evaluated, and whether
/// they take an argument.
const UNSUPPORTED_CRITERIA: &[(&str, bool)] = &[
    ("canonical", false),
    ("final", false),
    ("exec", true),
    ("localuser", true),
    ("localnetwork", true),
    ("tagged", true),
    ("version", true),
];

/// Parses the file at `path`, expanding `Include` directives in place.
pub fn parse(path: &Path) -> Result<Vec<ConfigRule>> {
    let mut parser = Parser::new();
    let text = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
    parser.enter(path, &text, 0)?;
    Ok(parser.finish())
}

/// Parses in-memory text. Relative includes resolve against the directory
/// of `origin`.
pub fn parse_str(text: &str, origin: &Path) -> Result<Vec<ConfigRule>> {
    let mut parser = Parser::new();
    parser.enter(origin, text, 0)?;
    Ok(parser.finish())
}

struct Parser {
    rules: Vec<ConfigRule>,
    /// Files currently being parsed, outermost first.
    chain: Vec<PathBuf>,
}

impl Parser {
    fn new() -> Self {
        Self {
            rules: vec![ConfigRule::new(RuleScope::Global)],
            chain: Vec::new(),
        }
    }

    /// Blocks that ended up without options contribute nothing to
    /// resolution and are dropped.
    fn finish(mut self) -> Vec<ConfigRule> {
        self.rules.retain(|r| !r.options.is_empty());
        self.rules
    }

    fn current(&mut self) -> &mut ConfigRule {
        let last = self.rules.len() - 1;
        &mut self.rules[last]
    }

    fn enter(&mut self, path: &Path, text: &str, depth: usize) -> Result<()> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.chain.push(canonical);
        let result = self.parse_text(path, text, depth);
        self.chain.pop();
        result
    }

    fn parse_text(&mut self, path: &Path, text: &str, depth: usize) -> Result<()> {
        let text = normalize(text);

        for (idx, raw) in text.split('\n').enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, rest) = split_key_value(line)
                .ok_or_else(|| Error::syntax(path, line_no, "line has no keyword"))?;

            match key.to_ascii_lowercase().as_str() {
                "host" => self.open_host(path, line_no, rest)?,
                "match" => self.open_match(path, line_no, rest)?,
                "include" => self.include(path, line_no, rest, depth)?,
                _ => self.option(path, line_no, key, rest)?,
            }
        }
        Ok(())
    }

    fn open_host(&mut self, path: &Path, line_no: usize, rest: &str) -> Result<()> {
        let tokens = tokenize(rest, path, line_no)?;
        if tokens.is_empty() {
            return Err(Error::syntax(path, line_no, "Host requires at least one pattern"));
        }

        let mut patterns = Vec::with_capacity(tokens.len());
        for token in &tokens {
            match Pattern::parse(token) {
                Some(p) => patterns.push(p),
                None => log::warn!(
                    "[ssh-config] {}:{}: ignoring empty host pattern",
                    path.display(),
                    line_no
                ),
            }
        }

        self.rules.push(ConfigRule::new(RuleScope::Host { patterns }));
        Ok(())
    }

    fn open_match(&mut self, path: &Path, line_no: usize, rest: &str) -> Result<()> {
        let tokens = tokenize(rest, path, line_no)?;
        if tokens.is_empty() {
            return Err(Error::syntax(path, line_no, "Match requires criteria"));
        }

        let mut criteria = Vec::new();
        let mut rejected = Vec::new();
        let mut iter = tokens.iter();

        while let Some(token) = iter.next() {
            let (negated, name) = match token.strip_prefix('!') {
                Some(n) => (true, n),
                None => (false, token.as_str()),
            };
            let lower = name.to_ascii_lowercase();

            match lower.as_str() {
                "all" => criteria.push(MatchCriterion::All { negated }),
                "host" | "originalhost" | "user" => {
                    let arg = iter.next().ok_or_else(|| {
                        Error::syntax(path, line_no, format!("Match {lower} requires an argument"))
                    })?;
                    let patterns: Vec<Pattern> =
                        arg.split(',').filter_map(Pattern::parse).collect();
                    criteria.push(if lower == "user" {
                        MatchCriterion::User { patterns, negated }
                    } else {
                        MatchCriterion::Host { patterns, negated }
                    });
                }
                other => {
                    let takes_arg = UNSUPPORTED_CRITERIA
                        .iter()
                        .find(|(n, _)| *n == other)
                        .map_or(true, |(_, arg)| *arg);
                    let mut text = token.clone();
                    if takes_arg {
                        if let Some(arg) = iter.next() {
                            text.push(' ');
                            text.push_str(arg);
                        }
                    }
                    log::warn!(
                        "[ssh-config] {}:{}: unsupported Match criterion '{}'; block will not apply",
                        path.display(),
                        line_no,
                        text
                    );
                    rejected.push(text);
                }
            }
        }

        self.rules
            .push(ConfigRule::new(RuleScope::Match { criteria, rejected }));
        Ok(())
    }

    fn include(&mut self, path: &Path, line_no: usize, rest: &str, depth: usize) -> Result<()> {
        let tokens = tokenize(rest, path, line_no)?;
        if tokens.is_empty() {
            return Err(Error::syntax(path, line_no, "Include requires a path"));
        }
        if depth + 1 > MAX_INCLUDE_DEPTH {
            return Err(Error::syntax(
                path,
                line_no,
                format!("Include nesting deeper than {MAX_INCLUDE_DEPTH}"),
            ));
        }

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        for token in &tokens {
            let files = expand_include(token, base_dir);
            if files.is_empty() {
                log::debug!(
                    "[ssh-config] {}:{}: Include '{}' matched no files",
                    path.display(),
                    line_no,
                    token
                );
            }

            for file in files {
                let canonical = fs::canonicalize(&file).unwrap_or_else(|_| file.clone());
                if self.chain.contains(&canonical) {
                    return Err(Error::syntax(
                        path,
                        line_no,
                        format!("include cycle through {}", file.display()),
                    ));
                }

                let text = match fs::read_to_string(&file) {
                    Ok(t) => t,
                    Err(e) => {
                        log::warn!(
                            "[ssh-config] Skipping unreadable include {}: {}",
                            file.display(),
                            e
                        );
                        continue;
                    }
                };

                // The included file's blocks end with the file; restore the
                // enclosing scope for whatever follows the Include line.
                let enclosing = self.current().scope.clone();
                let before = self.rules.len();
                self.enter(&file, &text, depth + 1)?;
                if self.rules.len() != before {
                    self.rules.push(ConfigRule::new(enclosing));
                }
            }
        }
        Ok(())
    }

    fn option(&mut self, path: &Path, line_no: usize, key: &str, rest: &str) -> Result<()> {
        let Some(spec) = options::lookup(key) else {
            log::warn!(
                "[ssh-config] {}:{}: unknown option '{}' ignored",
                path.display(),
                line_no,
                key
            );
            return Ok(());
        };

        let value = option_value(spec, rest, path, line_no)?;
        if !spec.validator.accepts(&value) {
            log::warn!(
                "[ssh-config] {}:{}: invalid value for {}: '{}' ignored",
                path.display(),
                line_no,
                spec.name,
                value
            );
            return Ok(());
        }

        let rule = self.current();
        if spec.accumulate {
            match rule.options.get_mut(spec.name) {
                Some(OptionValue::List(values)) => values.push(value),
                _ => {
                    rule.options
                        .insert(spec.name.to_string(), OptionValue::List(vec![value]));
                }
            }
        } else if rule.options.contains_key(spec.name) {
            log::debug!(
                "[ssh-config] {}:{}: duplicate {} in block ignored",
                path.display(),
                line_no,
                spec.name
            );
        } else {
            rule.options
                .insert(spec.name.to_string(), OptionValue::Single(value));
        }
        Ok(())
    }
}

/// Strips a leading byte-order mark and normalises CRLF / CR to LF.
fn normalize(text: &str) -> String {
    text.strip_prefix('\u{feff}')
        .unwrap_or(text)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// Splits `Key Value`, `Key=Value` and `Key = Value`.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    if end == 0 {
        return None;
    }
    let (key, rest) = line.split_at(end);
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();
    Some((key, rest))
}

/// Whitespace tokenizer honouring double quotes.
fn tokenize(text: &str, path: &Path, line_no: usize) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for ch in text.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err(Error::syntax(path, line_no, "unterminated quote"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn option_value(spec: &OptionSpec, rest: &str, path: &Path, line_no: usize) -> Result<String> {
    let value = if RAW_VALUE_OPTIONS.contains(&spec.name) {
        rest.trim_end().to_string()
    } else {
        tokenize(rest, path, line_no)?.join(" ")
    };
    if value.is_empty() {
        return Err(Error::syntax(
            path,
            line_no,
            format!("missing argument for {}", spec.name),
        ));
    }
    Ok(value)
}

/// Expands `~`, environment variables and wildcards in an `Include`
/// argument. Matches are sorted per directory level; only regular files
/// are returned.
fn expand_include(token: &str, base_dir: &Path) -> Vec<PathBuf> {
    let expanded = shellexpand::full(token)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(token).into_owned());
    let path = PathBuf::from(expanded);
    let path = if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    };

    let mut candidates = vec![PathBuf::new()];
    for component in path.components() {
        let part = component.as_os_str();
        let text = part.to_string_lossy();
        let literal = matches!(component, Component::Prefix(_) | Component::RootDir)
            || !text.contains(&['*', '?'][..]);
        if literal {
            for candidate in &mut candidates {
                candidate.push(part);
            }
            continue;
        }

        let Some(pattern) = Pattern::parse(&text) else {
            return Vec::new();
        };
        let mut next = Vec::new();
        for dir in &candidates {
            let listing = if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir.as_path()
            };
            let Ok(entries) = fs::read_dir(listing) else {
                continue;
            };
            let mut names: Vec<_> = entries
                .flatten()
                .map(|e| e.file_name())
                .filter(|n| {
                    let n = n.to_string_lossy();
                    (!n.starts_with('.') || text.starts_with('.')) && pattern.matches(&n)
                })
                .collect();
            names.sort();
            next.extend(names.into_iter().map(|n| dir.join(n)));
        }
        candidates = next;
    }

    candidates.into_iter().filter(|p| p.is_file()).collect()
}
