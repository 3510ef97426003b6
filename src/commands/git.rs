//! Git credential helper command.

use anyhow::{Context, Result};

use crate::git::{credentials_from_env, CredentialHelper};

/// Prints a `credential.helper` value for the given credentials.
///
/// Missing arguments fall back to `GIT_USERNAME` / `GIT_PASSWORD`.
pub fn credential_helper(username: Option<&str>, password: Option<&str>) -> Result<()> {
    let env = credentials_from_env();
    let username = username
        .map(str::to_string)
        .or_else(|| env.as_ref().map(|c| c.username.clone()))
        .context("No username given and GIT_USERNAME/GIT_PASSWORD are not set")?;
    let password = password
        .map(str::to_string)
        .or_else(|| env.map(|c| c.password));

    let helper = CredentialHelper::for_platform().install(&username, password.as_deref())?;
    println!("{helper}");
    Ok(())
}
