//! CLI subcommand implementations.
//!
//! Commands are organized into submodules by domain:
//!
//! - [`settings`] - Settings and named keys (config, add, list, remove, export, import)
//! - [`session`] - Agent setup, config resolution and reset
//! - [`git`] - Git credential helper output
//!
//! Every command takes the application directory explicitly so it can be
//! pointed at a scratch directory.

pub mod git;
pub mod session;
pub mod settings;

#[doc(inline)]
pub use git::credential_helper;
#[doc(inline)]
pub use session::{git_ssh_command, reset, resolve, setup};
#[doc(inline)]
pub use settings::{add_key, configure, export, import, list, remove};
