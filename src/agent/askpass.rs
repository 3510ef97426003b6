//! Throwaway `SSH_ASKPASS` helper.
//!
//! `ssh-add` only reads passphrases from a terminal or an askpass program.
//! The helper written here echoes the secret from an environment variable
//! set on the `ssh-add` child, so the passphrase never touches disk.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::backend::AgentPlatform;
use crate::constants::ASKPASS_SECRET_ENV;
use crate::error::{Error, Result};

/// An askpass script inside a private temporary directory.
#[derive(Debug)]
pub struct Askpass {
    _dir: TempDir,
    path: PathBuf,
}

impl Askpass {
    /// Writes the helper for `platform`.
    pub fn create(platform: AgentPlatform) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("psa-askpass-")
            .tempdir()
            .map_err(|e| Error::io("Failed to create askpass directory", e))?;

        let (name, body) = script(platform);
        let path = dir.path().join(name);
        std::fs::write(&path, body).map_err(|e| Error::io("Failed to write askpass helper", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| Error::io("Failed to make askpass helper executable", e))?;
        }

        Ok(Self { _dir: dir, path })
    }

    /// Path to put in `SSH_ASKPASS`.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn script(platform: AgentPlatform) -> (&'static str, String) {
    match platform {
        AgentPlatform::Unix => (
            "askpass.sh",
            format!("#!/bin/sh\nprintf '%s\\n' \"${ASKPASS_SECRET_ENV}\"\n"),
        ),
        // Delayed expansion prints the value without re-parsing & | < > ^
        AgentPlatform::Windows => (
            "askpass.cmd",
            format!("@echo off\r\nsetlocal EnableDelayedExpansion\r\necho(!{ASKPASS_SECRET_ENV}!\r\n"),
        ),
    }
}
