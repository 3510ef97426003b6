//! Application-wide constants for persistent-ssh-agent.
//!
//! Tunables are grouped by the component that consumes them.

use std::time::Duration;

// ============================================================================
// Agent sessions
// ============================================================================

/// Default session time-to-live (24 hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(86_400);

/// Number of passphrase attempts per key before giving up.
pub const MAX_PASSPHRASE_ATTEMPTS: u32 = 3;

/// Extra attempts after a transient spawn failure.
pub const SPAWN_RETRIES: u32 = 1;

/// Delay before retrying a transient spawn failure.
pub const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(200);

/// File name of the persisted session record.
pub const SESSION_FILE_NAME: &str = "agent_session.json";

/// Environment variable carrying the passphrase to the askpass helper.
pub const ASKPASS_SECRET_ENV: &str = "PERSISTENT_SSH_AGENT_ASKPASS_SECRET";

// ============================================================================
// Credential cipher
// ============================================================================

/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Highest iteration count a stored secret may ask for.
pub const MAX_PBKDF2_ITERATIONS: u32 = PBKDF2_ITERATIONS * 10;

/// Random salt length in bytes.
pub const SALT_SIZE: usize = 16;

/// AES block / IV length in bytes.
pub const IV_SIZE: usize = 16;

/// Derived AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Format version written into new secrets.
pub const SECRET_VERSION: u8 = 1;

// ============================================================================
// SSH config parsing
// ============================================================================

/// Maximum `Include` nesting depth.
pub const MAX_INCLUDE_DEPTH: usize = 16;

// ============================================================================
// Settings
// ============================================================================

/// Environment override for the application directory.
pub const HOME_OVERRIDE_ENV: &str = "PERSISTENT_SSH_AGENT_HOME";

/// Default application directory name under `$HOME`.
pub const APP_DIR_NAME: &str = ".persistent_ssh_agent";

/// Settings file name.
pub const SETTINGS_FILE_NAME: &str = "config.json";

/// Default `ssh` options used when building `GIT_SSH_COMMAND`.
pub const SSH_DEFAULT_OPTIONS: &[(&str, &str)] = &[("StrictHostKeyChecking", "no")];
