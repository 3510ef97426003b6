//! Agent process backends.
//!
//! [`AgentBackend`] is the seam between the lifecycle manager and the
//! external `ssh-agent`/`ssh-add`/`ssh-keygen` binaries. The system backend
//! shells out to OpenSSH; tests substitute an in-memory fake.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde::{Deserialize, Serialize};

use super::askpass::Askpass;
use crate::constants::ASKPASS_SECRET_ENV;
use crate::error::{Error, Result};

/// Prefix of Windows named pipe paths.
const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Default pipe of the Windows OpenSSH agent service.
const WINDOWS_SERVICE_PIPE: &str = r"\\.\pipe\openssh-ssh-agent";

/// Platform family, selected once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPlatform {
    /// Agents listen on Unix domain sockets.
    Unix,
    /// Agents listen on named pipes.
    Windows,
}

impl AgentPlatform {
    /// The platform this binary was built for.
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

/// Where an agent listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "snake_case")]
pub enum Endpoint {
    /// Unix domain socket path.
    Socket(PathBuf),
    /// Windows named pipe, e.g. `\\.\pipe\openssh-ssh-agent`.
    NamedPipe(String),
}

impl Endpoint {
    /// Classifies an announced `SSH_AUTH_SOCK` value.
    pub fn from_announced(value: &str) -> Self {
        if value.starts_with(PIPE_PREFIX) {
            Self::NamedPipe(value.to_string())
        } else {
            Self::Socket(PathBuf::from(value))
        }
    }

    /// Value for `SSH_AUTH_SOCK`.
    pub fn as_env_value(&self) -> &OsStr {
        match self {
            Self::Socket(path) => path.as_os_str(),
            Self::NamedPipe(name) => OsStr::new(name),
        }
    }
}

/// A reachable agent: its endpoint and, when known, its process id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    /// Agent process id.
    pub pid: Option<u32>,
    /// Where the agent listens.
    pub endpoint: Endpoint,
}

impl AgentHandle {
    /// `SSH_AUTH_SOCK`/`SSH_AGENT_PID` pairs for child processes.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(
            "SSH_AUTH_SOCK".to_string(),
            self.endpoint.as_env_value().to_string_lossy().into_owned(),
        )];
        if let Some(pid) = self.pid {
            pairs.push(("SSH_AGENT_PID".to_string(), pid.to_string()));
        }
        pairs
    }
}

/// Result of asking the agent to load a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The key is now loaded.
    Added,
    /// The agent or loader rejected the key or passphrase.
    Rejected(String),
}

/// Operations the lifecycle manager needs from an agent implementation.
pub trait AgentBackend {
    /// Starts a new agent and returns its announced handle.
    fn start(&self) -> Result<AgentHandle>;

    /// Lists fingerprints loaded in the agent at `handle`.
    ///
    /// `Ok(None)` means the agent is not reachable.
    fn list_fingerprints(&self, handle: &AgentHandle) -> Result<Option<BTreeSet<String>>>;

    /// Fingerprint of a key file, if it can be computed.
    fn fingerprint(&self, key: &Path) -> Option<String>;

    /// Loads `key` into the agent, answering any passphrase prompt with
    /// `passphrase` non-interactively.
    fn add_key(&self, handle: &AgentHandle, key: &Path, passphrase: Option<&str>) -> Result<AddOutcome>;
}

/// Parses `ssh-agent -s` (or `-c`) output into a handle.
///
/// Accepts `VAR=value; export VAR;` and `setenv VAR value;` lines.
pub fn parse_agent_output(output: &str) -> Result<AgentHandle> {
    let mut sock = None;
    let mut pid = None;

    for line in output.lines() {
        let line = line.trim();
        let assignment = line
            .strip_prefix("setenv ")
            .and_then(|rest| rest.split_once(' '))
            .or_else(|| line.split_once('='));
        let Some((name, rest)) = assignment else {
            continue;
        };
        let value = rest.split(';').next().unwrap_or_default().trim();
        match name.trim() {
            "SSH_AUTH_SOCK" if !value.is_empty() => sock = Some(value.to_string()),
            "SSH_AGENT_PID" => pid = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    match sock {
        Some(sock) => Ok(AgentHandle {
            pid,
            endpoint: Endpoint::from_announced(&sock),
        }),
        None => Err(Error::AgentOutput(output.trim().chars().take(200).collect())),
    }
}

/// Extracts fingerprints from `ssh-add -l` / `ssh-keygen -lf` output.
///
/// Lines look like `256 SHA256:abc... comment (ED25519)`.
pub fn parse_fingerprints(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter(|fp| fp.contains(':'))
        .map(str::to_string)
        .collect()
}

/// Backend that runs the OpenSSH binaries.
#[derive(Debug, Clone)]
pub struct SystemAgentBackend {
    platform: AgentPlatform,
    agent_program: String,
    add_program: String,
    keygen_program: String,
}

impl SystemAgentBackend {
    /// Backend for the current platform using binaries from `PATH`.
    pub fn new() -> Self {
        Self {
            platform: AgentPlatform::current(),
            agent_program: "ssh-agent".to_string(),
            add_program: "ssh-add".to_string(),
            keygen_program: "ssh-keygen".to_string(),
        }
    }

    fn run(&self, program: &str, mut cmd: Command) -> Result<Output> {
        // Debug output of `cmd` would include the askpass secret
        log::debug!(
            "[agent] Running {} {:?}",
            program,
            cmd.get_args().collect::<Vec<_>>()
        );
        cmd.output().map_err(|source| Error::ProcessLaunch {
            program: program.to_string(),
            transient: source.kind() != std::io::ErrorKind::NotFound
                && source.kind() != std::io::ErrorKind::PermissionDenied,
            source,
        })
    }

    fn with_agent(program: &str, handle: &AgentHandle) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("SSH_AUTH_SOCK", handle.endpoint.as_env_value())
            .stdin(Stdio::null());
        match handle.pid {
            Some(pid) => cmd.env("SSH_AGENT_PID", pid.to_string()),
            None => cmd.env_remove("SSH_AGENT_PID"),
        };
        cmd
    }
}

impl Default for SystemAgentBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBackend for SystemAgentBackend {
    fn start(&self) -> Result<AgentHandle> {
        let mut cmd = Command::new(&self.agent_program);
        cmd.arg("-s").stdin(Stdio::null());
        let output = self.run(&self.agent_program, cmd)?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        match parse_agent_output(&stdout) {
            Ok(handle) => {
                log::info!("[agent] Started ssh-agent (pid {:?})", handle.pid);
                Ok(handle)
            }
            // The Windows agent runs as a service and does not announce itself.
            Err(_) if self.platform == AgentPlatform::Windows => {
                log::info!("[agent] Using the OpenSSH agent service pipe");
                Ok(AgentHandle {
                    pid: None,
                    endpoint: Endpoint::NamedPipe(WINDOWS_SERVICE_PIPE.to_string()),
                })
            }
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    log::error!("[agent] ssh-agent: {}", stderr.trim());
                }
                Err(e)
            }
        }
    }

    fn list_fingerprints(&self, handle: &AgentHandle) -> Result<Option<BTreeSet<String>>> {
        let mut cmd = Self::with_agent(&self.add_program, handle);
        cmd.arg("-l");
        let output = self.run(&self.add_program, cmd)?;

        // ssh-add exits 1 for an empty agent and 2 when it cannot connect
        match output.status.code() {
            Some(0) => Ok(Some(parse_fingerprints(&String::from_utf8_lossy(&output.stdout)))),
            Some(1) => Ok(Some(BTreeSet::new())),
            _ => Ok(None),
        }
    }

    fn fingerprint(&self, key: &Path) -> Option<String> {
        let mut cmd = Command::new(&self.keygen_program);
        cmd.arg("-lf").arg(key).stdin(Stdio::null());
        let output = self.run(&self.keygen_program, cmd).ok()?;
        if !output.status.success() {
            return None;
        }
        parse_fingerprints(&String::from_utf8_lossy(&output.stdout))
            .into_iter()
            .next()
    }

    fn add_key(&self, handle: &AgentHandle, key: &Path, passphrase: Option<&str>) -> Result<AddOutcome> {
        let mut cmd = Self::with_agent(&self.add_program, handle);
        cmd.arg(key);

        // Keep the helper alive until ssh-add has exited.
        let _askpass = match passphrase {
            Some(secret) => {
                let askpass = Askpass::create(self.platform)?;
                cmd.env("SSH_ASKPASS", askpass.path())
                    .env("SSH_ASKPASS_REQUIRE", "force")
                    .env(ASKPASS_SECRET_ENV, secret);
                if std::env::var_os("DISPLAY").is_none() {
                    cmd.env("DISPLAY", ":0");
                }
                Some(askpass)
            }
            None => {
                cmd.env("SSH_ASKPASS_REQUIRE", "never");
                None
            }
        };

        let output = self.run(&self.add_program, cmd)?;
        if output.status.success() {
            log::debug!("[agent] Added {}", key.display());
            return Ok(AddOutcome::Added);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        log::debug!("[agent] ssh-add rejected {}: {}", key.display(), stderr);
        Ok(AddOutcome::Rejected(stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sh_output() {
        let out = "SSH_AUTH_SOCK=/tmp/ssh-XXXXabc/agent.1234; export SSH_AUTH_SOCK;\n\
                   SSH_AGENT_PID=1235; export SSH_AGENT_PID;\n\
                   echo Agent pid 1235;\n";
        let handle = parse_agent_output(out).unwrap();
        assert_eq!(handle.pid, Some(1235));
        assert_eq!(
            handle.endpoint,
            Endpoint::Socket(PathBuf::from("/tmp/ssh-XXXXabc/agent.1234"))
        );
    }

    #[test]
    fn test_parse_csh_output() {
        let out = "setenv SSH_AUTH_SOCK /tmp/ssh-q/agent.9;\nsetenv SSH_AGENT_PID 10;\necho Agent pid 10;\n";
        let handle = parse_agent_output(out).unwrap();
        assert_eq!(handle.pid, Some(10));
        assert_eq!(handle.endpoint, Endpoint::Socket(PathBuf::from("/tmp/ssh-q/agent.9")));
    }

    #[test]
    fn test_parse_named_pipe() {
        let out = r"SSH_AUTH_SOCK=\\.\pipe\openssh-ssh-agent; export SSH_AUTH_SOCK;";
        let handle = parse_agent_output(out).unwrap();
        assert_eq!(handle.pid, None);
        assert_eq!(
            handle.endpoint,
            Endpoint::NamedPipe(r"\\.\pipe\openssh-ssh-agent".to_string())
        );
    }

    #[test]
    fn test_parse_without_socket_fails() {
        assert!(matches!(
            parse_agent_output("unable to start agent"),
            Err(Error::AgentOutput(_))
        ));
    }

    #[test]
    fn test_parse_fingerprints() {
        let out = "256 SHA256:AbCdEf user@host (ED25519)\n3072 SHA256:Zz9 other (RSA)\n";
        let fps = parse_fingerprints(out);
        assert!(fps.contains("SHA256:AbCdEf"));
        assert!(fps.contains("SHA256:Zz9"));
        assert_eq!(fps.len(), 2);
        assert!(parse_fingerprints("The agent has no identities.").is_empty());
    }

    #[test]
    fn test_env_pairs() {
        let handle = AgentHandle {
            pid: Some(7),
            endpoint: Endpoint::Socket(PathBuf::from("/tmp/a.sock")),
        };
        assert_eq!(
            handle.env_pairs(),
            vec![
                ("SSH_AUTH_SOCK".to_string(), "/tmp/a.sock".to_string()),
                ("SSH_AGENT_PID".to_string(), "7".to_string()),
            ]
        );
    }

    #[test]
    fn test_endpoint_serializes_tagged() {
        let json = serde_json::to_value(Endpoint::NamedPipe(r"\\.\pipe\x".to_string())).unwrap();
        assert_eq!(json["kind"], "named_pipe");
        assert_eq!(json["address"], r"\\.\pipe\x");
    }

    #[test]
    fn test_missing_binary_is_fatal() {
        let backend = SystemAgentBackend {
            agent_program: "definitely-not-an-ssh-agent-binary".to_string(),
            ..SystemAgentBackend::new()
        };
        let err = backend.start().unwrap_err();
        assert!(matches!(err, Error::ProcessLaunch { transient: false, .. }));
    }
}
