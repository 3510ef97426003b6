//! Settings loading and persistence.
//!
//! Settings live in `config.json` inside the application directory
//! (`$PERSISTENT_SSH_AGENT_HOME`, else `~/.persistent_ssh_agent`). The stored
//! passphrase is always kept encrypted with [`CredentialCipher`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::agent::session::write_private;
use crate::agent::SetupOptions;
use crate::constants::{APP_DIR_NAME, DEFAULT_SESSION_TTL, HOME_OVERRIDE_ENV, SESSION_FILE_NAME, SETTINGS_FILE_NAME};
use crate::crypto::{CredentialCipher, EncryptedSecret};

/// Name under which the default identity is listed.
pub const DEFAULT_KEY_NAME: &str = "default";

/// Fields `import` accepts.
const IMPORTABLE_FIELDS: &[&str] = &["identity_file", "passphrase", "expiration_time", "reuse_agent", "keys"];

/// Persistent settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Default identity file (or inline key material).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    /// Encrypted key passphrase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<EncryptedSecret>,
    /// Session lifetime in seconds.
    #[serde(default = "default_expiration")]
    pub expiration_time: u64,
    /// Whether a live recorded agent is reused.
    #[serde(default = "default_reuse")]
    pub reuse_agent: bool,
    /// Named identity files.
    #[serde(default)]
    pub keys: IndexMap<String, String>,
}

fn default_expiration() -> u64 {
    DEFAULT_SESSION_TTL.as_secs()
}

fn default_reuse() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            identity_file: None,
            passphrase: None,
            expiration_time: default_expiration(),
            reuse_agent: default_reuse(),
            keys: IndexMap::new(),
        }
    }
}

impl Settings {
    /// Returns the application directory, without creating it.
    ///
    /// Selection order:
    /// 1. `PERSISTENT_SSH_AGENT_HOME`
    /// 2. `~/.persistent_ssh_agent`
    pub fn app_dir() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(HOME_OVERRIDE_ENV).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::home_dir()
            .context("Could not determine home directory")?
            .join(APP_DIR_NAME))
    }

    /// Path of the agent session record inside `dir`.
    pub fn session_path(dir: &Path) -> PathBuf {
        dir.join(SESSION_FILE_NAME)
    }

    /// Loads settings from the application directory with environment
    /// overrides applied.
    pub fn load() -> Result<Self> {
        Ok(Self::load_from(&Self::app_dir()?))
    }

    /// Loads settings from `dir` with environment overrides applied.
    pub fn load_from(dir: &Path) -> Self {
        let mut settings = Self::load_file(dir);
        settings.apply_env_overrides();
        settings
    }

    /// Loads settings from `dir` without environment overrides.
    ///
    /// A missing file yields defaults; a corrupted one is logged and also
    /// yields defaults.
    pub fn load_file(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE_NAME);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                log::warn!("[config] Could not read {}: {}", path.display(), e);
                return Self::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("[config] Ignoring corrupted {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// `SSH_IDENTITY_FILE` is not applied here: it ranks below the stored
    /// identity and is consulted by [`crate::identity::IdentityLocator`].
    fn apply_env_overrides(&mut self) {
        if let Ok(expiration) = std::env::var("PERSISTENT_SSH_AGENT_EXPIRATION") {
            match expiration.parse::<u64>() {
                Ok(seconds) => self.expiration_time = seconds,
                Err(_) => log::warn!("[config] Ignoring invalid PERSISTENT_SSH_AGENT_EXPIRATION={}", expiration),
            }
        }

        if let Ok(reuse) = std::env::var("PERSISTENT_SSH_AGENT_REUSE") {
            match parse_bool(&reuse) {
                Some(value) => self.reuse_agent = value,
                None => log::warn!("[config] Ignoring invalid PERSISTENT_SSH_AGENT_REUSE={}", reuse),
            }
        }
    }

    /// Writes settings to `dir` atomically with owner-only permissions.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(SETTINGS_FILE_NAME);
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize settings")?;
        write_private(&path, &json).with_context(|| format!("Failed to save {}", path.display()))?;
        log::debug!("[config] Saved {}", path.display());
        Ok(())
    }

    /// Sets the default identity.
    pub fn set_identity_file(&mut self, identity: impl Into<String>) {
        self.identity_file = Some(identity.into());
    }

    /// Encrypts and stores `passphrase`.
    pub fn set_passphrase(&mut self, cipher: &CredentialCipher, passphrase: &str) {
        self.passphrase = Some(cipher.encrypt(passphrase.as_bytes()));
    }

    /// Decrypts the stored passphrase, if any.
    pub fn passphrase(&self, cipher: &CredentialCipher) -> Result<Option<Zeroizing<String>>> {
        self.passphrase
            .as_ref()
            .map(|secret| cipher.decrypt_string(secret))
            .transpose()
            .context("Failed to unlock stored passphrase")
    }

    /// Sets the session lifetime in hours.
    pub fn set_expiration_hours(&mut self, hours: u64) {
        self.expiration_time = hours.saturating_mul(3600);
    }

    /// Sets whether live agents are reused.
    pub fn set_reuse_agent(&mut self, reuse: bool) {
        self.reuse_agent = reuse;
    }

    /// Session lifetime.
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_time)
    }

    /// The default identity followed by the named keys.
    pub fn list_keys(&self) -> IndexMap<String, String> {
        let mut keys = IndexMap::new();
        if let Some(identity) = &self.identity_file {
            keys.insert(DEFAULT_KEY_NAME.to_string(), identity.clone());
        }
        for (name, path) in &self.keys {
            keys.insert(name.clone(), path.clone());
        }
        keys
    }

    /// Adds or replaces a named key. `default` sets the default identity.
    pub fn add_key(&mut self, name: &str, identity: impl Into<String>) {
        if name == DEFAULT_KEY_NAME {
            self.set_identity_file(identity);
        } else {
            self.keys.insert(name.to_string(), identity.into());
        }
    }

    /// Removes a named key. Returns whether anything was removed.
    pub fn remove_key(&mut self, name: &str) -> bool {
        if name == DEFAULT_KEY_NAME {
            return self.identity_file.take().is_some();
        }
        self.keys.shift_remove(name).is_some()
    }

    /// Removes every key, the default identity included.
    pub fn remove_all_keys(&mut self) {
        self.identity_file = None;
        self.keys.clear();
    }

    /// Resets everything to defaults.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Settings as JSON. The encrypted passphrase is only included when
    /// `include_sensitive` is set.
    pub fn export(&self, include_sensitive: bool) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self).context("Failed to serialize settings")?;
        if !include_sensitive {
            if let Some(map) = value.as_object_mut() {
                map.remove("passphrase");
            }
        }
        Ok(value)
    }

    /// Merges fields from an exported JSON object.
    ///
    /// Only fields present in `value` change; `keys` entries are merged
    /// by name. Unknown fields are rejected before anything is applied.
    pub fn import(&mut self, value: &serde_json::Value) -> Result<()> {
        let map = value
            .as_object()
            .context("Settings import must be a JSON object")?;

        if let Some(unknown) = map.keys().find(|k| !IMPORTABLE_FIELDS.contains(&k.as_str())) {
            anyhow::bail!("Unknown settings field: {}", unknown);
        }

        let mut merged = self.clone();
        if let Some(v) = map.get("identity_file") {
            merged.identity_file = serde_json::from_value(v.clone()).context("Invalid identity_file")?;
        }
        if let Some(v) = map.get("passphrase") {
            merged.passphrase = serde_json::from_value(v.clone()).context("Invalid passphrase")?;
        }
        if let Some(v) = map.get("expiration_time") {
            merged.expiration_time = serde_json::from_value(v.clone()).context("Invalid expiration_time")?;
        }
        if let Some(v) = map.get("reuse_agent") {
            merged.reuse_agent = serde_json::from_value(v.clone()).context("Invalid reuse_agent")?;
        }
        if let Some(v) = map.get("keys") {
            let keys: IndexMap<String, String> = serde_json::from_value(v.clone()).context("Invalid keys")?;
            merged.keys.extend(keys);
        }

        *self = merged;
        Ok(())
    }

    /// Agent setup options derived from these settings.
    pub fn setup_options(&self) -> SetupOptions {
        SetupOptions {
            reuse: self.reuse_agent,
            ttl: self.expiration(),
            passphrase: self.passphrase.clone(),
            default_identity: self.identity_file.clone(),
        }
    }
}

/// Parses `1/true/yes/on` and `0/false/no/off`, case-insensitively.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MachineFingerprint;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialises tests that touch the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn cipher() -> CredentialCipher {
        CredentialCipher::with_fingerprint(MachineFingerprint {
            machine_id: "m".to_string(),
            hostname: "h".to_string(),
            username: "u".to_string(),
            home: "/home/u".to_string(),
        })
        .with_iterations(10)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_file(dir.path());
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.expiration_time, 86_400);
        assert!(settings.reuse_agent);
    }

    #[test]
    fn test_corrupted_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.json"), "{{{").unwrap();
        assert_eq!(Settings::load_file(dir.path()), Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.set_identity_file("~/.ssh/id_ed25519");
        settings.set_expiration_hours(2);
        settings.set_reuse_agent(false);
        settings.add_key("work", "~/.ssh/work");
        settings.set_passphrase(&cipher(), "pw");
        settings.save(dir.path()).unwrap();

        let loaded = Settings::load_file(dir.path());
        assert_eq!(loaded, settings);
        assert_eq!(loaded.expiration_time, 7200);
        assert_eq!(loaded.passphrase(&cipher()).unwrap().unwrap().as_str(), "pw");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app");
        Settings::default().save(&app).unwrap();
        let mode = fs::metadata(app.join("config.json")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_passphrase_is_not_stored_in_clear() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.set_passphrase(&cipher(), "very-secret-passphrase");
        settings.save(dir.path()).unwrap();
        let raw = fs::read_to_string(dir.path().join("config.json")).unwrap();
        assert!(!raw.contains("very-secret-passphrase"));
    }

    #[test]
    fn test_list_add_remove_keys() {
        let mut settings = Settings::default();
        settings.add_key("default", "~/.ssh/id_rsa");
        settings.add_key("work", "~/.ssh/work");
        settings.add_key("home", "~/.ssh/home");

        let names: Vec<String> = settings.list_keys().keys().cloned().collect();
        assert_eq!(names, ["default", "work", "home"]);

        assert!(settings.remove_key("work"));
        assert!(!settings.remove_key("work"));
        assert!(settings.remove_key("default"));
        assert_eq!(settings.list_keys().len(), 1);

        settings.remove_all_keys();
        assert!(settings.list_keys().is_empty());
    }

    #[test]
    fn test_export_hides_passphrase_by_default() {
        let mut settings = Settings::default();
        settings.set_passphrase(&cipher(), "pw");
        assert!(settings.export(false).unwrap().get("passphrase").is_none());
        assert!(settings.export(true).unwrap().get("passphrase").is_some());
    }

    #[test]
    fn test_import_merges() {
        let mut settings = Settings::default();
        settings.add_key("a", "ka");
        settings
            .import(&serde_json::json!({"keys": {"b": "kb"}, "expiration_time": 60}))
            .unwrap();
        assert_eq!(settings.keys.len(), 2);
        assert_eq!(settings.expiration_time, 60);
        assert!(settings.reuse_agent);
    }

    #[test]
    fn test_import_rejects_unknown_fields() {
        let mut settings = Settings::default();
        let err = settings
            .import(&serde_json::json!({"expiration_time": 5, "bogus": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("bogus"));
        assert_eq!(settings.expiration_time, 86_400);
    }

    #[test]
    fn test_import_rejects_wrong_types() {
        let mut settings = Settings::default();
        assert!(settings.import(&serde_json::json!({"reuse_agent": "maybe"})).is_err());
        assert!(settings.import(&serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut a = Settings::default();
        a.set_identity_file("x");
        a.set_passphrase(&cipher(), "pw");
        let mut b = Settings::default();
        b.import(&a.export(true).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_env_overrides_keep_stored_identity() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var("SSH_IDENTITY_FILE", "/keys/env");
        std::env::set_var("PERSISTENT_SSH_AGENT_EXPIRATION", "120");
        std::env::set_var("PERSISTENT_SSH_AGENT_REUSE", "no");

        let mut settings = Settings::default();
        settings.set_identity_file("/keys/stored");
        settings.apply_env_overrides();

        std::env::remove_var("SSH_IDENTITY_FILE");
        std::env::remove_var("PERSISTENT_SSH_AGENT_EXPIRATION");
        std::env::remove_var("PERSISTENT_SSH_AGENT_REUSE");

        assert_eq!(settings.identity_file.as_deref(), Some("/keys/stored"));
        assert_eq!(settings.expiration_time, 120);
        assert!(!settings.reuse_agent);
    }

    #[test]
    fn test_app_dir_override() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var(HOME_OVERRIDE_ENV, "/tmp/psa-home");
        let dir = Settings::app_dir().unwrap();
        std::env::remove_var(HOME_OVERRIDE_ENV);
        assert_eq!(dir, PathBuf::from("/tmp/psa-home"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_setup_options() {
        let mut settings = Settings::default();
        settings.set_expiration_hours(1);
        settings.set_reuse_agent(false);
        let options = settings.setup_options();
        assert_eq!(options.ttl, Duration::from_secs(3600));
        assert!(!options.reuse);
    }
}
