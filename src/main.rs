//! persistent-ssh-agent CLI.
//!
//! See the `persistent_ssh_agent` library for the core functionality.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use persistent_ssh_agent::commands::{self, session::SetupArgs, settings::ConfigureArgs};
use persistent_ssh_agent::Settings;

// CLI
#[derive(Parser)]
#[command(name = "persistent-ssh-agent")]
#[command(version)]
#[command(about = "Reusable ssh-agent sessions for git and ssh")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change settings
    Config {
        /// Default identity file or inline private key
        #[arg(long)]
        identity_file: Option<String>,
        /// Passphrase to store encrypted
        #[arg(long, conflicts_with = "prompt_passphrase")]
        passphrase: Option<String>,
        /// Read the passphrase from the terminal
        #[arg(long)]
        prompt_passphrase: bool,
        /// Session lifetime in hours
        #[arg(long = "expiration")]
        expiration_hours: Option<u64>,
        /// Reuse a live agent across runs
        #[arg(long)]
        reuse_agent: Option<bool>,
    },
    /// Start or reuse an agent for a host and print shell exports
    #[command(alias = "test")]
    Setup {
        /// Hostname or SSH remote URL
        hostname: String,
        /// Identity file to use instead of the configured one
        #[arg(long)]
        identity_file: Option<String>,
        /// Always start a fresh agent
        #[arg(long)]
        no_reuse: bool,
        /// Verify the connection with `ssh -T git@<host>`
        #[arg(long)]
        check: bool,
        /// SSH config file to read
        #[arg(long = "ssh-config")]
        ssh_config: Option<PathBuf>,
    },
    /// Print the effective SSH configuration for a host as JSON
    Resolve {
        /// Hostname to resolve
        hostname: String,
        /// SSH config file to read
        #[arg(long = "ssh-config")]
        ssh_config: Option<PathBuf>,
        /// Local user for `Match user`
        #[arg(long)]
        user: Option<String>,
    },
    /// Add or replace a named key
    Add {
        /// Key name ("default" sets the default identity)
        #[arg(long)]
        name: String,
        /// Identity file or inline private key
        #[arg(long)]
        identity_file: String,
    },
    /// List configured keys
    List,
    /// Remove a named key or all keys
    Remove {
        /// Key name
        #[arg(long, conflicts_with = "all")]
        name: Option<String>,
        /// Remove every key
        #[arg(long)]
        all: bool,
    },
    /// Export settings as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Include the encrypted passphrase
        #[arg(long)]
        include_sensitive: bool,
    },
    /// Import settings from a JSON file
    Import {
        /// JSON file to merge
        file: PathBuf,
    },
    /// Print a git `credential.helper` value
    GitCredentialHelper {
        /// Username (falls back to GIT_USERNAME)
        #[arg(long)]
        username: Option<String>,
        /// Password or token (falls back to GIT_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },
    /// Set up the agent and print a GIT_SSH_COMMAND value
    GitSshCommand {
        /// Hostname or SSH remote URL
        hostname: String,
        /// Identity file to use instead of the configured one
        #[arg(long)]
        identity_file: Option<String>,
    },
    /// Forget the recorded agent session
    Reset {
        /// Also reset every stored setting
        #[arg(long)]
        settings: bool,
    },
}

fn run(cli: Cli) -> Result<bool> {
    let dir = Settings::app_dir()?;

    match cli.command {
        Commands::Config {
            identity_file,
            passphrase,
            prompt_passphrase,
            expiration_hours,
            reuse_agent,
        } => {
            let args = ConfigureArgs {
                identity_file,
                passphrase,
                prompt_passphrase,
                expiration_hours,
                reuse_agent,
            };
            commands::configure(&dir, args)?;
        }
        Commands::Setup {
            hostname,
            identity_file,
            no_reuse,
            check,
            ssh_config,
        } => {
            let args = SetupArgs {
                identity_file,
                no_reuse,
                check,
                ssh_config,
            };
            return commands::setup(&dir, &hostname, &args);
        }
        Commands::Resolve {
            hostname,
            ssh_config,
            user,
        } => {
            commands::resolve(&hostname, ssh_config.as_deref(), user.as_deref())?;
        }
        Commands::Add { name, identity_file } => {
            commands::add_key(&dir, &name, &identity_file)?;
        }
        Commands::List => {
            commands::list(&dir)?;
        }
        Commands::Remove { name, all } => {
            commands::remove(&dir, name.as_deref(), all)?;
        }
        Commands::Export {
            output,
            include_sensitive,
        } => {
            commands::export(&dir, output.as_deref(), include_sensitive)?;
        }
        Commands::Import { file } => {
            commands::import(&dir, &file)?;
        }
        Commands::GitCredentialHelper { username, password } => {
            commands::credential_helper(username.as_deref(), password.as_deref())?;
        }
        Commands::GitSshCommand {
            hostname,
            identity_file,
        } => {
            let args = SetupArgs {
                identity_file,
                ..SetupArgs::default()
            };
            commands::git_ssh_command(&dir, &hostname, &args)?;
        }
        Commands::Reset { settings } => {
            commands::reset(&dir, settings)?;
        }
    }

    Ok(true)
}

fn main() {
    let cli = Cli::parse();

    // stdout carries command output only
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
