//! Error taxonomy for the agent core.
//!
//! Fatal conditions carry enough context (hostname, file, step) for the user
//! to act on them. Corrupted persisted state never shows up here: the session
//! store and settings loader degrade those to "absent" instead.

use std::path::PathBuf;

/// Result alias used by the core modules.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by config resolution, the credential cipher and the
/// agent lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed configuration text or an include cycle.
    #[error("{}:{line}: {message}", path.display())]
    ConfigSyntax {
        /// File the error was found in.
        path: PathBuf,
        /// 1-based line number, 0 when the error concerns the whole file.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// The stored secret could not be decrypted on this machine.
    ///
    /// Wrong machine context and corrupted ciphertext are deliberately
    /// indistinguishable.
    #[error("stored passphrase could not be decrypted on this machine; re-enter it with `config --prompt-passphrase`")]
    Decryption,

    /// The agent rejected the key or passphrase after every allowed attempt.
    #[error("{hostname}: agent rejected key {} after {attempts} attempt(s)", key.display())]
    Authentication {
        /// Host the setup was for.
        hostname: String,
        /// Identity file that could not be loaded.
        key: PathBuf,
        /// Number of attempts made.
        attempts: u32,
    },

    /// An agent binary could not be started.
    #[error("failed to launch `{program}` ({}): {source}", if *transient { "transient" } else { "check that OpenSSH is installed and on PATH" })]
    ProcessLaunch {
        /// Program that failed to start.
        program: String,
        /// Whether a retry may succeed.
        transient: bool,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The agent process started but its announcement could not be parsed.
    #[error("agent output did not announce an endpoint: {0}")]
    AgentOutput(String),

    /// Hostname failed validation.
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    /// No identity file could be found for the host.
    #[error("{hostname}: no identity file found{}", path.as_ref().map(|p| format!(" ({})", p.display())).unwrap_or_default())]
    IdentityNotFound {
        /// Host the lookup was for.
        hostname: String,
        /// The path that was tried, if any.
        path: Option<PathBuf>,
    },

    /// A credential value cannot be carried by the credential protocol.
    #[error("invalid credential value: {0}")]
    InvalidCredential(String),

    /// Filesystem error outside the degrade-to-absent paths.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization error while writing persisted state.
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds an [`Error::Io`] with a context message.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Builds an [`Error::ConfigSyntax`].
    pub fn syntax(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::ConfigSyntax {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Returns `true` for launch failures that are worth one retry.
    pub fn is_transient_launch(&self) -> bool {
        matches!(self, Self::ProcessLaunch { transient: true, .. })
    }
}
