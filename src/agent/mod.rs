//! Agent lifecycle: discovery, reuse, start and key loading.
//!
//! [`AgentLifecycleManager::setup_for`] walks a fixed sequence for one host:
//!
//! 1. Load the persisted session and probe it
//! 2. Start a fresh agent when there is nothing reusable
//! 3. Pick identities from the effective host config
//! 4. Load each key not already present, retrying rejected passphrases
//! 5. Persist the updated fingerprint set
//!
//! ```text
//! NoSession ─► Probing ─► Reusable ─────────────► Ready
//!     │           └─────► Stale ──► Starting ──►   │
//!     └──────────────────────────►     ▲           │
//!                                Expired ◄─────────┘
//! ```
//!
//! Two processes cold-starting at once may each spawn an agent; the last
//! session written is the one later calls reuse.

pub mod askpass;
pub mod backend;
pub mod prompt;
pub mod session;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use zeroize::Zeroizing;

pub use backend::{AddOutcome, AgentBackend, AgentHandle, AgentPlatform, Endpoint, SystemAgentBackend};
pub use prompt::{NoPrompt, PassphraseProvider, TerminalPrompt};
pub use session::{AgentSession, AgentSessionStore};

use crate::constants::{DEFAULT_SESSION_TTL, MAX_PASSPHRASE_ATTEMPTS, SPAWN_RETRIES, SPAWN_RETRY_DELAY};
use crate::crypto::{CredentialCipher, EncryptedSecret};
use crate::error::{Error, Result};
use crate::host::is_valid_hostname;
use crate::identity::IdentityLocator;
use crate::ssh_config::EffectiveHostConfig;

/// Prefix for fingerprints derived from the key path when `ssh-keygen`
/// cannot compute one.
const FILE_FINGERPRINT_PREFIX: &str = "file:";

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No session loaded yet.
    NoSession,
    /// Checking whether the recorded agent still answers.
    Probing,
    /// The recorded agent answers and has not expired.
    Reusable,
    /// The recorded agent is unreachable or reuse is disabled.
    Stale,
    /// The recorded session is past its expiry.
    Expired,
    /// Spawning a new agent.
    Starting,
    /// Keys are loaded and the session is persisted.
    Ready,
}

/// Per-call knobs for [`AgentLifecycleManager`].
#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Reuse a live, unexpired recorded agent.
    pub reuse: bool,
    /// Lifetime of newly started sessions.
    pub ttl: Duration,
    /// Stored passphrase, tried first for every key.
    pub passphrase: Option<EncryptedSecret>,
    /// Identity used when the host config names none. May be inline key
    /// material.
    pub default_identity: Option<String>,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            reuse: true,
            ttl: DEFAULT_SESSION_TTL,
            passphrase: None,
            default_identity: None,
        }
    }
}

/// Result of a successful [`AgentLifecycleManager::setup_for`].
#[derive(Debug)]
pub struct SetupOutcome {
    /// The agent that now holds the keys.
    pub handle: AgentHandle,
    /// Whether an existing agent was reused.
    pub reused: bool,
    /// Keys added during this call.
    pub added: Vec<PathBuf>,
    /// Keys that were already loaded.
    pub skipped: Vec<PathBuf>,
}

impl SetupOutcome {
    /// Environment pairs that point child processes at the agent.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.handle.env_pairs()
    }
}

/// Bounded passphrase retry for one key.
enum Unlock {
    Attempt {
        number: u32,
        passphrase: Option<Zeroizing<String>>,
    },
    Loaded,
    Exhausted {
        attempts: u32,
    },
}

/// Orchestrates agent reuse, start and key loading.
pub struct AgentLifecycleManager<B> {
    backend: B,
    store: AgentSessionStore,
    cipher: CredentialCipher,
    locator: IdentityLocator,
    prompt: Box<dyn PassphraseProvider>,
    options: SetupOptions,
    state: AgentState,
}

impl<B: fmt::Debug> fmt::Debug for AgentLifecycleManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentLifecycleManager")
            .field("backend", &self.backend)
            .field("store", &self.store)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<B: AgentBackend> AgentLifecycleManager<B> {
    /// Builds a manager that prompts on the terminal for retries.
    pub fn new(
        backend: B,
        store: AgentSessionStore,
        cipher: CredentialCipher,
        locator: IdentityLocator,
        options: SetupOptions,
    ) -> Self {
        Self {
            backend,
            store,
            cipher,
            locator,
            prompt: Box::new(TerminalPrompt),
            options,
            state: AgentState::NoSession,
        }
    }

    /// Replaces the retry passphrase source.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl PassphraseProvider + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        self.state
    }

    fn transition(&mut self, next: AgentState) {
        if self.state != next {
            log::debug!("[agent] {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Makes sure an agent holds the identities `config` calls for.
    pub fn setup_for(&mut self, hostname: &str, config: &EffectiveHostConfig) -> Result<SetupOutcome> {
        if !is_valid_hostname(hostname) {
            return Err(Error::InvalidHostname(hostname.to_string()));
        }

        let (mut session, live, reused) = self.acquire_session()?;
        let handle = session.handle();

        let identities = self
            .locator
            .identities_for(config, self.options.default_identity.as_deref())?;

        let mut stored: Option<Option<Zeroizing<String>>> = None;
        let mut added = Vec::new();
        let mut skipped = Vec::new();

        for identity in &identities {
            let key = identity.path();
            let fingerprint = self
                .backend
                .fingerprint(key)
                .unwrap_or_else(|| format!("{FILE_FINGERPRINT_PREFIX}{}", key.display()));

            let recorded_unverifiable =
                session.fingerprints.contains(&fingerprint) && fingerprint.starts_with(FILE_FINGERPRINT_PREFIX);
            if live.contains(&fingerprint) || recorded_unverifiable {
                log::debug!("[agent] {} already loaded", key.display());
                session.fingerprints.insert(fingerprint);
                skipped.push(key.to_path_buf());
                continue;
            }

            if stored.is_none() {
                stored = Some(self.stored_passphrase()?);
            }
            let first = stored.as_ref().and_then(Option::as_ref).cloned();
            self.unlock(hostname, &handle, key, first)?;

            session.fingerprints.insert(fingerprint);
            added.push(key.to_path_buf());
            self.store.save(&session)?;
        }

        if added.is_empty() {
            self.store.save(&session)?;
        }

        self.transition(AgentState::Ready);
        log::info!(
            "[agent] {} ready: {} key(s) added, {} already loaded{}",
            hostname,
            added.len(),
            skipped.len(),
            if reused { " (reused agent)" } else { "" }
        );

        Ok(SetupOutcome {
            handle,
            reused,
            added,
            skipped,
        })
    }

    /// Deletes the persisted session so the next setup starts fresh.
    pub fn reset(&mut self) -> Result<()> {
        self.store.clear()?;
        self.transition(AgentState::NoSession);
        Ok(())
    }

    /// Returns a reusable session or starts a new one.
    fn acquire_session(&mut self) -> Result<(AgentSession, BTreeSet<String>, bool)> {
        self.transition(AgentState::NoSession);
        let now = Utc::now();

        if let Some(session) = self.store.load() {
            if !self.options.reuse {
                log::debug!("[agent] Reuse disabled, replacing recorded session");
                self.transition(AgentState::Stale);
            } else if session.is_expired(now) {
                log::info!("[agent] Recorded session expired at {}", session.expires_at);
                self.transition(AgentState::Expired);
            } else {
                self.transition(AgentState::Probing);
                let handle = session.handle();
                match self.with_spawn_retry(|b| b.list_fingerprints(&handle))? {
                    Some(live) => {
                        self.transition(AgentState::Reusable);
                        log::debug!("[agent] Reusing agent at {:?}", session.endpoint);
                        return Ok((session, live, true));
                    }
                    None => {
                        log::info!("[agent] Recorded agent is gone, starting a new one");
                        self.transition(AgentState::Stale);
                    }
                }
            }
        }

        self.transition(AgentState::Starting);
        let handle = self.with_spawn_retry(B::start)?;
        let session = AgentSession::new(&handle, now, self.options.ttl);
        self.store.save(&session)?;
        Ok((session, BTreeSet::new(), false))
    }

    fn stored_passphrase(&self) -> Result<Option<Zeroizing<String>>> {
        self.options
            .passphrase
            .as_ref()
            .map(|secret| self.cipher.decrypt_string(secret))
            .transpose()
    }

    /// Loads one key, re-asking for the passphrase within the attempt bound.
    fn unlock(
        &self,
        hostname: &str,
        handle: &AgentHandle,
        key: &Path,
        first: Option<Zeroizing<String>>,
    ) -> Result<()> {
        let mut state = Unlock::Attempt {
            number: 1,
            passphrase: first,
        };

        loop {
            state = match state {
                Unlock::Attempt { number, passphrase } => {
                    let secret = passphrase.as_ref().map(|p| p.as_str());
                    match self.with_spawn_retry(|b| b.add_key(handle, key, secret))? {
                        AddOutcome::Added => Unlock::Loaded,
                        AddOutcome::Rejected(reason) => {
                            log::warn!(
                                "[agent] {}: attempt {}/{} rejected for {}: {}",
                                hostname,
                                number,
                                MAX_PASSPHRASE_ATTEMPTS,
                                key.display(),
                                reason
                            );
                            if number >= MAX_PASSPHRASE_ATTEMPTS {
                                Unlock::Exhausted { attempts: number }
                            } else {
                                match self.prompt.passphrase(key, number + 1) {
                                    Some(next) => Unlock::Attempt {
                                        number: number + 1,
                                        passphrase: Some(next),
                                    },
                                    None => Unlock::Exhausted { attempts: number },
                                }
                            }
                        }
                    }
                }
                Unlock::Loaded => return Ok(()),
                Unlock::Exhausted { attempts } => {
                    return Err(Error::Authentication {
                        hostname: hostname.to_string(),
                        key: key.to_path_buf(),
                        attempts,
                    })
                }
            };
        }
    }

    /// Runs `op`, retrying transient launch failures.
    fn with_spawn_retry<T>(&self, op: impl Fn(&B) -> Result<T>) -> Result<T> {
        let mut retries = 0;
        loop {
            match op(&self.backend) {
                Err(e) if e.is_transient_launch() && retries < SPAWN_RETRIES => {
                    retries += 1;
                    log::warn!("[agent] {}; retrying", e);
                    std::thread::sleep(SPAWN_RETRY_DELAY);
                }
                other => return other,
            }
        }
    }
}
