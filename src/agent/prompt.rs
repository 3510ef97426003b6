//! Passphrase sources for retry attempts.

use std::path::Path;

use zeroize::Zeroizing;

/// Supplies a passphrase after the stored one was rejected.
pub trait PassphraseProvider {
    /// Asks for the passphrase of `key`. `attempt` is 1-based and counts
    /// every try including the first. `None` stops retrying.
    fn passphrase(&self, key: &Path, attempt: u32) -> Option<Zeroizing<String>>;
}

/// Prompts on the controlling terminal when stdin is a TTY.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PassphraseProvider for TerminalPrompt {
    fn passphrase(&self, key: &Path, attempt: u32) -> Option<Zeroizing<String>> {
        if !atty::is(atty::Stream::Stdin) {
            log::debug!("[prompt] stdin is not a terminal, not prompting");
            return None;
        }
        rpassword::prompt_password(format!(
            "Enter passphrase for {} (attempt {}): ",
            key.display(),
            attempt
        ))
        .map(Zeroizing::new)
        .map_err(|e| log::warn!("[prompt] Failed to read passphrase: {}", e))
        .ok()
    }
}

/// Never supplies a passphrase.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl PassphraseProvider for NoPrompt {
    fn passphrase(&self, _key: &Path, _attempt: u32) -> Option<Zeroizing<String>> {
        None
    }
}
