//! Machine-bound encryption for the stored key passphrase.
//!
//! The key is derived with PBKDF2-HMAC-SHA256 from a fingerprint of the
//! current execution context (machine id, hostname, user, home directory),
//! so a secret copied to another machine or account cannot be decrypted.
//! Encryption is AES-256-CBC with PKCS#7 padding; the salt and IV travel
//! with the ciphertext.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::prelude::{Engine, BASE64_STANDARD};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::constants::{IV_SIZE, KEY_SIZE, MAX_PBKDF2_ITERATIONS, PBKDF2_ITERATIONS, SALT_SIZE, SECRET_VERSION};
use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// The tuple a secret is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineFingerprint {
    /// Stable machine identifier.
    pub machine_id: String,
    /// Host name.
    pub hostname: String,
    /// Current login name.
    pub username: String,
    /// Home directory path.
    pub home: String,
}

impl MachineFingerprint {
    /// Collects the fingerprint of the running process.
    ///
    /// Every component is readable without privileges. Missing values fall
    /// back to fixed placeholders rather than failing.
    pub fn current() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let home = dirs::home_dir()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            machine_id: machine_id(&hostname),
            hostname,
            username,
            home,
        }
    }

    fn key_material(&self) -> Zeroizing<Vec<u8>> {
        let mut ikm = Zeroizing::new(Vec::new());
        for part in [&self.machine_id, &self.hostname, &self.username, &self.home] {
            ikm.extend_from_slice(part.as_bytes());
            ikm.push(0);
        }
        ikm
    }
}

/// Reads the platform machine id, falling back to a hash of the hostname.
fn machine_id(hostname: &str) -> String {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = std::fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }

    if let Some(id) = platform_machine_id() {
        return id;
    }

    log::debug!("[crypto] No machine id available, deriving one from the hostname");
    hex_digest(hostname.as_bytes())
}

#[cfg(target_os = "macos")]
fn platform_machine_id() -> Option<String> {
    let out = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .find(|l| l.contains("IOPlatformUUID"))
        .and_then(|l| l.split('"').nth(3))
        .map(str::to_string)
}

#[cfg(windows)]
fn platform_machine_id() -> Option<String> {
    let out = std::process::Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .ok()?;
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .find(|l| l.contains("MachineGuid"))
        .and_then(|l| l.split_whitespace().last())
        .map(str::to_string)
}

#[cfg(not(any(target_os = "macos", windows)))]
fn platform_machine_id() -> Option<String> {
    None
}

fn hex_digest(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{b:02x}")).collect()
}

/// A passphrase encrypted at rest.
///
/// Binary fields are base64 encoded so the record embeds cleanly in the
/// JSON settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// PBKDF2 salt.
    pub salt: String,
    /// CBC initialization vector.
    pub iv: String,
    /// Padded ciphertext.
    pub ciphertext: String,
    /// PBKDF2 iteration count used for this secret.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Record format version.
    #[serde(default = "default_version")]
    pub version: u8,
}

fn default_iterations() -> u32 {
    PBKDF2_ITERATIONS
}

fn default_version() -> u8 {
    SECRET_VERSION
}

/// Encrypts and decrypts secrets under one [`MachineFingerprint`].
#[derive(Debug, Clone)]
pub struct CredentialCipher {
    fingerprint: MachineFingerprint,
    iterations: u32,
}

impl CredentialCipher {
    /// Cipher bound to the current machine and user.
    pub fn new() -> Self {
        Self::with_fingerprint(MachineFingerprint::current())
    }

    /// Cipher bound to an explicit fingerprint.
    pub fn with_fingerprint(fingerprint: MachineFingerprint) -> Self {
        Self {
            fingerprint,
            iterations: PBKDF2_ITERATIONS,
        }
    }

    /// Overrides the iteration count for new secrets.
    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    fn derive_key(&self, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(&self.fingerprint.key_material(), salt, iterations, &mut *key);
        key
    }

    /// Encrypts `plaintext` with a fresh salt and IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> EncryptedSecret {
        let salt = rand::random::<[u8; SALT_SIZE]>();
        let iv = rand::random::<[u8; IV_SIZE]>();
        let key = self.derive_key(&salt, self.iterations);

        let cipher = Aes256CbcEnc::new(key.as_slice().into(), iv.as_slice().into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        EncryptedSecret {
            salt: BASE64_STANDARD.encode(salt),
            iv: BASE64_STANDARD.encode(iv),
            ciphertext: BASE64_STANDARD.encode(ciphertext),
            iterations: self.iterations,
            version: SECRET_VERSION,
        }
    }

    /// Decrypts `secret`.
    ///
    /// Every failure, from bad base64 to a padding mismatch caused by a
    /// different fingerprint, is reported as [`Error::Decryption`]. Records
    /// asking for more than [`MAX_PBKDF2_ITERATIONS`] are refused before any
    /// key derivation.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<Zeroizing<Vec<u8>>> {
        let decode = |field: &str| BASE64_STANDARD.decode(field).map_err(|_| Error::Decryption);
        let salt = decode(&secret.salt)?;
        let iv = decode(&secret.iv)?;
        let ciphertext = decode(&secret.ciphertext)?;

        if secret.version != SECRET_VERSION
            || iv.len() != IV_SIZE
            || secret.iterations == 0
            || secret.iterations > MAX_PBKDF2_ITERATIONS
            || ciphertext.is_empty()
            || ciphertext.len() % IV_SIZE != 0
        {
            return Err(Error::Decryption);
        }

        let key = self.derive_key(&salt, secret.iterations);
        let cipher = Aes256CbcDec::new(key.as_slice().into(), iv.as_slice().into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| Error::Decryption)
    }

    /// Decrypts `secret` as UTF-8 text.
    pub fn decrypt_string(&self, secret: &EncryptedSecret) -> Result<Zeroizing<String>> {
        let bytes = self.decrypt(secret)?;
        std::str::from_utf8(&bytes)
            .map(|s| Zeroizing::new(s.to_string()))
            .map_err(|_| Error::Decryption)
    }
}

impl Default for CredentialCipher {
    fn default() -> Self {
        Self::new()
    }
}
