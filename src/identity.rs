//! Identity file discovery and resolution.
//!
//! Works out which private key(s) to load for a host. Explicit `IdentityFile`
//! entries from the effective SSH config win; after that the configured
//! default, `SSH_IDENTITY_FILE` and finally the first conventional key in
//! `~/.ssh` are tried in that order.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::ssh_config::EffectiveHostConfig;

/// Conventional key file names, most preferred first.
pub const SSH_KEY_TYPES: &[&str] = &[
    "id_ed25519",
    "id_ecdsa",
    "id_ecdsa_sk",
    "id_ed25519_sk",
    "id_rsa",
    "id_dsa",
];

/// Marker that identifies inline private key material.
const INLINE_KEY_MARKER: &str = "-----BEGIN ";

/// A key to hand to the agent.
#[derive(Debug)]
pub enum Identity {
    /// A key file on disk.
    File(PathBuf),
    /// Key material written to a private temporary file.
    Inline(InlineKey),
}

impl Identity {
    /// Path to pass to the key loader.
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) => path,
            Self::Inline(key) => key.path(),
        }
    }
}

/// Private key material held in an owner-only temporary file.
///
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct InlineKey {
    file: NamedTempFile,
}

impl InlineKey {
    /// Writes `material` to a fresh temporary file, normalising CRLF to LF.
    pub fn write(material: &str) -> Result<Self> {
        let mut normalized = material.replace("\r\n", "\n");
        if !normalized.ends_with('\n') {
            normalized.push('\n');
        }

        let mut file = tempfile::Builder::new()
            .prefix("psa-key-")
            .tempfile()
            .map_err(|e| Error::io("Failed to create temporary key file", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::io("Failed to restrict temporary key file", e))?;
        }

        file.write_all(normalized.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| Error::io("Failed to write temporary key file", e))?;

        log::debug!("[identity] Wrote inline key to {}", file.path().display());
        Ok(Self { file })
    }

    /// Location of the temporary file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Returns `true` when `value` holds key material rather than a path.
pub fn is_inline_key(value: &str) -> bool {
    value.trim_start().starts_with(INLINE_KEY_MARKER)
}

/// Resolves identity files relative to one home directory.
#[derive(Debug, Clone)]
pub struct IdentityLocator {
    home: PathBuf,
    ssh_dir: PathBuf,
    local_user: String,
    env_identity: Option<String>,
}

impl IdentityLocator {
    /// Locator for the current user, reading `SSH_IDENTITY_FILE` once.
    pub fn from_env() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::io(
                "Could not determine home directory",
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })?;
        let local_user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        Ok(Self::new(home, local_user).with_env_identity(std::env::var("SSH_IDENTITY_FILE").ok()))
    }

    /// Locator rooted at `home`, with keys under `home/.ssh`.
    pub fn new(home: PathBuf, local_user: impl Into<String>) -> Self {
        let ssh_dir = home.join(".ssh");
        Self {
            home,
            ssh_dir,
            local_user: local_user.into(),
            env_identity: None,
        }
    }

    /// Sets the `SSH_IDENTITY_FILE` fallback.
    #[must_use]
    pub fn with_env_identity(mut self, identity: Option<String>) -> Self {
        self.env_identity = identity.filter(|s| !s.is_empty());
        self
    }

    /// The `.ssh` directory keys are looked up in.
    pub fn ssh_dir(&self) -> &Path {
        &self.ssh_dir
    }

    /// Conventional keys present in `~/.ssh`, preferred type first.
    ///
    /// A private key only counts when its `.pub` sibling exists. Numbered
    /// variants such as `id_rsa2` follow their base name, sorted.
    pub fn available_keys(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.ssh_dir) else {
            return Vec::new();
        };
        let names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();

        let has_pub = |name: &str| names.iter().any(|n| n == &format!("{name}.pub"));

        let mut keys = Vec::new();
        for key_type in SSH_KEY_TYPES {
            if names.iter().any(|n| n == key_type) && has_pub(key_type) {
                keys.push(self.ssh_dir.join(key_type));
            }

            let mut numbered: Vec<&String> = names
                .iter()
                .filter(|n| {
                    n.strip_prefix(key_type)
                        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()) && !rest.ends_with(".pub"))
                })
                .filter(|n| has_pub(n))
                .collect();
            numbered.sort();
            keys.extend(numbered.into_iter().map(|n| self.ssh_dir.join(n)));
        }
        keys
    }

    /// Expands `~`, environment variables and `%` tokens, resolving
    /// relative paths against `~/.ssh`.
    pub fn expand(&self, raw: &str, config: Option<&EffectiveHostConfig>) -> PathBuf {
        let home = self.home.to_string_lossy();
        let tokens = match config {
            Some(cfg) => cfg.expand_tokens(raw, Some(&self.local_user), Some(&home)),
            None => raw.replace("%d", &home).replace("%u", &self.local_user),
        };

        let expanded = if let Some(rest) = tokens.strip_prefix('~') {
            format!("{home}{rest}")
        } else {
            tokens
        };
        let expanded = shellexpand::env(&expanded).map_or(expanded.clone(), |c| c.into_owned());

        let path = PathBuf::from(expanded);
        if path.is_absolute() {
            path
        } else {
            self.ssh_dir.join(path)
        }
    }

    /// Identities to load for a host.
    ///
    /// Existing `IdentityFile` entries are all returned, in order. Without
    /// any, the first usable of `default_identity`, `SSH_IDENTITY_FILE` and
    /// the discovered keys is returned. `default_identity` may be inline key
    /// material.
    pub fn identities_for(
        &self,
        config: &EffectiveHostConfig,
        default_identity: Option<&str>,
    ) -> Result<Vec<Identity>> {
        let mut from_config = Vec::new();
        for raw in config.list("IdentityFile") {
            let path = self.expand(raw, Some(config));
            if path.is_file() {
                from_config.push(Identity::File(path));
            } else {
                log::debug!("[identity] Skipping missing IdentityFile {}", path.display());
            }
        }
        if !from_config.is_empty() {
            return Ok(from_config);
        }

        if let Some(value) = default_identity.filter(|v| !v.trim().is_empty()) {
            if is_inline_key(value) {
                return Ok(vec![Identity::Inline(InlineKey::write(value)?)]);
            }
            let path = self.expand(value, Some(config));
            if path.is_file() {
                return Ok(vec![Identity::File(path)]);
            }
            log::warn!("[identity] Configured identity {} does not exist", path.display());
        }

        if let Some(value) = &self.env_identity {
            let path = self.expand(value, Some(config));
            if path.is_file() {
                return Ok(vec![Identity::File(path)]);
            }
            log::warn!("[identity] SSH_IDENTITY_FILE {} does not exist", path.display());
        }

        match self.available_keys().into_iter().next() {
            Some(path) => Ok(vec![Identity::File(path)]),
            None => Err(Error::IdentityNotFound {
                hostname: config.host.clone(),
                path: config.list("IdentityFile").first().map(|raw| self.expand(raw, Some(config))),
            }),
        }
    }
}
