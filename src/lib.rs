//! persistent-ssh-agent - long-lived SSH authentication across invocations.
//!
//! The crate resolves per-host SSH parameters from `ssh_config` files,
//! keeps one `ssh-agent` alive and reused between runs, and stores the key
//! passphrase encrypted under a machine-bound key.
//!
//! # Modules
//!
//! - [`ssh_config`] - Config parsing and per-host resolution
//! - [`crypto`] - Machine-bound passphrase encryption
//! - [`agent`] - Agent session persistence and lifecycle
//! - [`identity`] - Identity file discovery
//! - [`git`] - Git credential helpers and `GIT_SSH_COMMAND`
//! - [`config`] - Settings loading/saving
//! - [`commands`] - CLI subcommand implementations

pub mod agent;
pub mod commands;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod git;
pub mod host;
pub mod identity;
pub mod ssh_config;

// Re-export commonly used types
pub use agent::{AgentLifecycleManager, AgentSession, AgentSessionStore, SetupOptions};
pub use config::Settings;
pub use crypto::{CredentialCipher, EncryptedSecret};
pub use error::{Error, Result};
pub use git::CredentialHelper;
pub use ssh_config::{resolve, EffectiveHostConfig};
