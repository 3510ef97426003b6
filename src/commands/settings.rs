//! Settings commands.
//!
//! ```bash
//! persistent-ssh-agent config --identity-file ~/.ssh/id_ed25519 --expiration 12
//! persistent-ssh-agent config --prompt-passphrase
//! persistent-ssh-agent add --name work --identity-file ~/.ssh/work
//! persistent-ssh-agent list
//! persistent-ssh-agent export --output settings.json
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::agent::session::write_private;
use crate::config::Settings;
use crate::crypto::CredentialCipher;
use crate::error::Error;
use crate::identity::is_inline_key;

/// Changes requested by `config`.
#[derive(Debug, Default)]
pub struct ConfigureArgs {
    /// New default identity.
    pub identity_file: Option<String>,
    /// New passphrase, given on the command line.
    pub passphrase: Option<String>,
    /// Read the passphrase from the terminal instead.
    pub prompt_passphrase: bool,
    /// Session lifetime in hours.
    pub expiration_hours: Option<u64>,
    /// Whether live agents are reused.
    pub reuse_agent: Option<bool>,
}

impl ConfigureArgs {
    fn is_empty(&self) -> bool {
        self.identity_file.is_none()
            && self.passphrase.is_none()
            && !self.prompt_passphrase
            && self.expiration_hours.is_none()
            && self.reuse_agent.is_none()
    }
}

/// Applies `args` to the stored settings, or prints them when `args` is empty.
pub fn configure(dir: &Path, args: ConfigureArgs) -> Result<()> {
    let mut settings = Settings::load_file(dir);

    if args.is_empty() {
        println!("{}", serde_json::to_string_pretty(&settings.export(false)?)?);
        return Ok(());
    }

    if let Some(identity) = args.identity_file {
        if !is_inline_key(&identity) {
            let expanded = shellexpand::tilde(&identity);
            if !Path::new(expanded.as_ref()).exists() {
                log::warn!("[config] Identity file {} does not exist yet", identity);
            }
        }
        settings.set_identity_file(identity);
    }

    let passphrase = match (args.passphrase, args.prompt_passphrase) {
        (Some(p), _) => Some(Zeroizing::new(p)),
        (None, true) => Some(Zeroizing::new(
            rpassword::prompt_password("Enter passphrase: ").context("Failed to read passphrase")?,
        )),
        (None, false) => None,
    };
    if let Some(passphrase) = passphrase {
        settings.set_passphrase(&CredentialCipher::new(), &passphrase);
    }

    if let Some(hours) = args.expiration_hours {
        settings.set_expiration_hours(hours);
    }
    if let Some(reuse) = args.reuse_agent {
        settings.set_reuse_agent(reuse);
    }

    settings.save(dir)?;
    println!("Configuration saved");
    Ok(())
}

/// Adds or replaces a named key.
pub fn add_key(dir: &Path, name: &str, identity: &str) -> Result<()> {
    anyhow::ensure!(!name.trim().is_empty(), "Key name cannot be empty");
    let mut settings = Settings::load_file(dir);
    settings.add_key(name, identity);
    settings.save(dir)?;
    println!("Added key '{}'", name);
    Ok(())
}

/// Prints the configured keys.
pub fn list(dir: &Path) -> Result<()> {
    let settings = Settings::load_file(dir);
    let keys = settings.list_keys();
    if keys.is_empty() {
        println!("No keys configured");
        return Ok(());
    }
    for (name, identity) in &keys {
        let shown = if is_inline_key(identity) { "<inline key>" } else { identity.as_str() };
        println!("{name}: {shown}");
    }
    if let Some(status) = passphrase_status(&settings, &CredentialCipher::new()) {
        println!("passphrase: {status}");
    }
    Ok(())
}

/// Whether the stored passphrase unlocks here. Imported settings carry a
/// passphrase bound to the machine that exported them.
fn passphrase_status(settings: &Settings, cipher: &CredentialCipher) -> Option<&'static str> {
    match settings.passphrase(cipher) {
        Ok(Some(_)) => Some("stored"),
        Ok(None) => None,
        Err(e) => {
            log::debug!("[config] {:#}", e);
            Some("stored, but not decryptable on this machine")
        }
    }
}

/// Removes one named key or all of them.
pub fn remove(dir: &Path, name: Option<&str>, all: bool) -> Result<()> {
    let mut settings = Settings::load_file(dir);
    match (name, all) {
        (_, true) => {
            settings.remove_all_keys();
            println!("Removed all keys");
        }
        (Some(name), false) => {
            anyhow::ensure!(settings.remove_key(name), "No key named '{}'", name);
            println!("Removed key '{}'", name);
        }
        (None, false) => anyhow::bail!("Specify --name or --all"),
    }
    settings.save(dir)
}

/// Writes the settings as JSON to `output`, or stdout.
pub fn export(dir: &Path, output: Option<&Path>, include_sensitive: bool) -> Result<()> {
    let value = Settings::load_file(dir).export(include_sensitive)?;
    let json = serde_json::to_string_pretty(&value)?;
    match output {
        Some(path) => {
            let written = if include_sensitive {
                write_private(path, json.as_bytes())
            } else {
                fs::write(path, &json).map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))
            };
            written.with_context(|| format!("Failed to export settings to {}", path.display()))?;
            println!("Exported settings to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Merges settings from a JSON file.
pub fn import(dir: &Path, file: &Path) -> Result<()> {
    let content = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {} as JSON", file.display()))?;

    let mut settings = Settings::load_file(dir);
    settings.import(&value)?;
    settings.save(dir)?;
    println!("Imported settings from {}", file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MachineFingerprint;
    use tempfile::TempDir;

    fn cipher_for(machine_id: &str) -> CredentialCipher {
        CredentialCipher::with_fingerprint(MachineFingerprint {
            machine_id: machine_id.to_string(),
            hostname: "box".to_string(),
            username: "dev".to_string(),
            home: "/home/dev".to_string(),
        })
        .with_iterations(10)
    }

    #[test]
    fn test_passphrase_status() {
        let mut settings = Settings::default();
        assert_eq!(passphrase_status(&settings, &cipher_for("a")), None);

        settings.set_passphrase(&cipher_for("a"), "pw");
        assert_eq!(passphrase_status(&settings, &cipher_for("a")), Some("stored"));
        assert_eq!(
            passphrase_status(&settings, &cipher_for("b")),
            Some("stored, but not decryptable on this machine")
        );
    }

    fn saved_with_passphrase(dir: &Path) {
        let mut settings = Settings::default();
        settings.set_identity_file("~/.ssh/id_ed25519");
        settings.set_passphrase(&CredentialCipher::new().with_iterations(10), "pw");
        settings.save(dir).unwrap();
    }

    #[test]
    fn test_sensitive_export_is_owner_only() {
        let dir = TempDir::new().unwrap();
        saved_with_passphrase(dir.path());
        let out = dir.path().join("export.json");

        export(dir.path(), Some(&out), true).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert!(value.get("passphrase").is_some());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&out).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_plain_export_drops_passphrase() {
        let dir = TempDir::new().unwrap();
        saved_with_passphrase(dir.path());
        let out = dir.path().join("export.json");

        export(dir.path(), Some(&out), false).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert!(value.get("passphrase").is_none());
        assert_eq!(value["identity_file"], "~/.ssh/id_ed25519");
    }
}
