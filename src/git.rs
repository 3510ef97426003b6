//! Git integration: credential helpers and `GIT_SSH_COMMAND`.
//!
//! Git runs `!`-prefixed `credential.helper` values through a shell and
//! reads `username=`/`password=` lines from them. [`CredentialHelper`]
//! renders such a helper for either shell family, escaping each value
//! exactly once for that dialect.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use crate::constants::SSH_DEFAULT_OPTIONS;
use crate::error::Error;

/// Shell family the helper is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperDialect {
    /// POSIX `sh` function syntax.
    Posix,
    /// `cmd.exe` `echo` lines chained with `&&`, started from the `sh`
    /// function git runs the helper through.
    Cmd,
}

impl HelperDialect {
    /// The dialect native to this platform.
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Cmd
        } else {
            Self::Posix
        }
    }
}

/// Builds credential helper references.
#[derive(Debug, Clone, Copy)]
pub struct CredentialHelper {
    dialect: HelperDialect,
}

impl CredentialHelper {
    /// Helper for an explicit dialect.
    pub fn new(dialect: HelperDialect) -> Self {
        Self { dialect }
    }

    /// Helper for the running platform.
    pub fn for_platform() -> Self {
        Self::new(HelperDialect::current())
    }

    /// Renders a `credential.helper` value that answers `get` with the
    /// given username and optional password.
    pub fn install(&self, username: &str, password: Option<&str>) -> crate::error::Result<String> {
        check_value(username)?;
        if let Some(p) = password {
            check_value(p)?;
        }

        let mut lines = vec![format!("username={username}")];
        if let Some(p) = password {
            lines.push(format!("password={p}"));
        }

        let helper = match self.dialect {
            HelperDialect::Posix => {
                let quoted: Vec<String> = lines.iter().map(|l| posix_quote(l)).collect();
                format!(
                    "!f() {{ test \"$1\" = get || return 0; printf '%s\\n' {}; }}; f",
                    quoted.join(" ")
                )
            }
            HelperDialect::Cmd => {
                // git appends the action, so `cmd` must never see it. The
                // body is single-quoted for `sh` and the doubled slashes
                // keep MSYS from rewriting the switches as paths.
                let echoes: Vec<String> = lines.iter().map(|l| format!("echo {}", cmd_escape(l))).collect();
                let body = format!("\"{}\"", echoes.join("&& "));
                format!(
                    "!f() {{ test \"$1\" = get || return 0; cmd //d //v:off //s //c {}; }}; f",
                    posix_quote(&body)
                )
            }
        };

        log::debug!(
            "[git] Rendered {:?} credential helper for {}",
            self.dialect,
            username
        );
        Ok(helper)
    }
}

/// Values travel on one protocol line each.
fn check_value(value: &str) -> crate::error::Result<()> {
    if value.contains(&['\n', '\r', '\0'][..]) {
        return Err(Error::InvalidCredential(
            "credential values cannot contain line breaks or NUL".to_string(),
        ));
    }
    Ok(())
}

/// Single-quotes `value` for `sh`; embedded quotes become `'\''`.
pub fn posix_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Caret-escapes every character `cmd.exe` treats specially on a command
/// line, `%` included.
pub fn cmd_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 2);
    for ch in value.chars() {
        if matches!(ch, '^' | '&' | '|' | '<' | '>' | '(' | ')' | '"' | '%') {
            out.push('^');
        }
        out.push(ch);
    }
    out
}

/// Username and password for HTTPS remotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Password or token.
    pub password: String,
}

/// Reads `GIT_USERNAME` and `GIT_PASSWORD`; both must be set.
pub fn credentials_from_env() -> Option<Credentials> {
    let username = std::env::var("GIT_USERNAME").ok().filter(|v| !v.is_empty())?;
    let password = std::env::var("GIT_PASSWORD").ok().filter(|v| !v.is_empty())?;
    Some(Credentials { username, password })
}

/// Builds `git <args>` with an inline helper that supplies `credentials`.
///
/// An empty `credential.helper` entry goes first so helpers from the
/// user's git config are not consulted.
pub fn git_command_with_credentials<I, S>(args: I, credentials: &Credentials) -> Result<Command>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let helper = CredentialHelper::for_platform()
        .install(&credentials.username, Some(&credentials.password))
        .context("Failed to build credential helper")?;

    let mut cmd = Command::new("git");
    cmd.arg("-c")
        .arg("credential.helper=")
        .arg("-c")
        .arg(format!("credential.helper={helper}"))
        .args(args);
    Ok(cmd)
}

/// Renders a `GIT_SSH_COMMAND` value.
///
/// Default options come first, then `-i <identity>` when given, then
/// `extra` options. Pairs with an empty key or value are skipped. Without
/// an identity ssh relies on the agent alone.
pub fn ssh_command(identity: Option<&Path>, extra: &[(String, String)]) -> String {
    let mut parts = vec!["ssh".to_string()];
    for (key, value) in SSH_DEFAULT_OPTIONS {
        parts.push("-o".to_string());
        parts.push(format!("{key}={value}"));
    }

    if let Some(identity) = identity {
        let identity = identity.to_string_lossy().replace('\\', "/");
        parts.push("-i".to_string());
        if identity.contains(|c: char| c.is_whitespace() || "'\"$`\\".contains(c)) {
            parts.push(posix_quote(&identity));
        } else {
            parts.push(identity);
        }
    }

    for (key, value) in extra {
        if key.trim().is_empty() || value.trim().is_empty() {
            log::warn!("[git] Skipping invalid SSH option {:?}={:?}", key, value);
            continue;
        }
        parts.push("-o".to_string());
        parts.push(format!("{key}={value}"));
    }

    parts.join(" ")
}

/// Checks that `ssh -T git@<hostname>` authenticates.
///
/// Git hosts exit 1 after a successful authentication without a shell, so
/// 0 and 1 both count as success.
pub fn test_connection(hostname: &str, agent_env: &[(String, String)]) -> Result<bool> {
    let mut cmd = Command::new("ssh");
    cmd.args(["-T", "-o", "BatchMode=yes"]);
    for (key, value) in SSH_DEFAULT_OPTIONS {
        cmd.arg("-o").arg(format!("{key}={value}"));
    }
    cmd.arg(format!("git@{hostname}"))
        .envs(agent_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null());

    let output = cmd
        .output()
        .with_context(|| format!("Failed to run ssh for {hostname}"))?;

    match output.status.code() {
        Some(0 | 1) => {
            log::debug!("[git] SSH connection test to {} succeeded", hostname);
            Ok(true)
        }
        code => {
            log::error!(
                "[git] SSH connection test to {} failed ({:?}): {}",
                hostname,
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Ok(false)
        }
    }
}
