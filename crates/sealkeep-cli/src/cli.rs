use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sealkeep_core::StrategyChoice;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "sealkeep",
    about = "Protect a secret key with the current identity and keep a recovery copy",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Sealing strategy to use instead of the saved one (identity-bound or hardware-credential).
    #[arg(long, global = true)]
    pub strategy: Option<StrategyChoice>,

    /// Answer yes to overwrite confirmations.
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Seal a key for a resource (or the shared `default` store).
    Protect(ProtectArgs),
    /// Print or write the key protected for a resource.
    Unprotect {
        id: String,
        /// Write raw key bytes to this file instead of printing hex.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Write an emergency recovery document for a protected key.
    Export {
        id: String,
        /// Destination file; asked for when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Protect the document with a password instead of a random embedded key.
        #[arg(long)]
        password: bool,
        /// Mark the key as the only factor of its login.
        #[arg(long)]
        exclusive: bool,
    },
    /// Restore a key from an emergency recovery document.
    Import {
        /// Recovery document; asked for when omitted.
        file: Option<PathBuf>,
        /// Resource the key belongs to now, when it has moved since the export.
        #[arg(long)]
        resource: Option<String>,
    },
    /// List record files for a strategy.
    List,
    /// Remove records by identifier or record filename.
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show or change stored settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Seal, read back and remove a probe record.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ProtectArgs {
    pub id: String,
    /// Read the key bytes from this file.
    #[arg(long, conflicts_with = "generate", required_unless_present = "generate")]
    pub key_file: Option<PathBuf>,
    /// Generate a new random key.
    #[arg(long)]
    pub generate: bool,
    /// The key is the only factor of its login; enables auto-login.
    #[arg(long)]
    pub exclusive: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SettingsCommand {
    /// Print the stored settings.
    Show,
    /// Set the active sealing strategy; asks when omitted.
    Strategy { strategy: Option<StrategyChoice> },
    /// Manage the auto-login list.
    #[command(subcommand)]
    AutoLogin(AutoLoginCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AutoLoginCommand {
    Add { id: String },
    Remove { id: String },
    Enable { id: String },
    Disable { id: String },
    /// Whether new entries start enabled.
    Default {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protect_with_generated_key() {
        let cli = Cli::try_parse_from(["sealkeep", "protect", "default", "--generate"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Protect(ProtectArgs {
                id: "default".into(),
                key_file: None,
                generate: true,
                exclusive: false,
            })
        );
    }

    #[test]
    fn protect_requires_a_key_source() {
        assert!(Cli::try_parse_from(["sealkeep", "protect", "db"]).is_err());
        assert!(Cli::try_parse_from([
            "sealkeep",
            "protect",
            "db",
            "--generate",
            "--key-file",
            "k.bin"
        ])
        .is_err());
    }

    #[test]
    fn parses_global_strategy_after_subcommand() {
        let cli = Cli::try_parse_from(["sealkeep", "list", "--strategy", "hardware"])
            .expect("parse should succeed");
        assert_eq!(cli.strategy, Some(StrategyChoice::HardwareCredential));
        assert_eq!(cli.command, Command::List);
    }

    #[test]
    fn parses_auto_login_default() {
        let cli = Cli::try_parse_from(["sealkeep", "settings", "auto-login", "default", "false"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Settings(SettingsCommand::AutoLogin(AutoLoginCommand::Default {
                enabled: false
            }))
        );
    }

    #[test]
    fn parses_export_flags() {
        let cli = Cli::try_parse_from([
            "sealkeep",
            "export",
            "/db/a.kdbx",
            "-o",
            "a.xml",
            "--password",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Export {
                id: "/db/a.kdbx".into(),
                output: Some(PathBuf::from("a.xml")),
                password: true,
                exclusive: false,
            }
        );
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["sealkeep", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }
}
