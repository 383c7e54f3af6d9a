mod cli;
mod config;
mod decisions;
mod keys;
mod settings;
mod storage;

use clap::Parser;
use color_eyre::Result;
use sealkeep_core::store::ProtectedStore;
use sealkeep_service::KeyStoreService;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    cli::{Command, ConfigCommand},
    decisions::TerminalDecisions,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let decisions = TerminalDecisions::new(cli.yes);

    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Settings(cmd) => {
            let mut settings = storage::settings_from_config(&config)?;
            let hardware = storage::hardware_supported().await;
            settings::handle(cmd, &mut settings, &decisions, hardware)?
        }
        Command::Health => run_health_check(&config, cli.strategy).await?,
        command => run_key_command(command, &config, cli.strategy, decisions).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("sealkeep {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_key_command(
    command: Command,
    config: &config::Config,
    flag: Option<sealkeep_core::StrategyChoice>,
    decisions: TerminalDecisions,
) -> Result<()> {
    let mut settings = storage::settings_from_config(config)?;
    let strategy = storage::resolve_strategy(flag, config, &settings);

    // Listing and removal only touch files, so they work for either strategy
    // without constructing its sealer.
    if let Command::List | Command::Remove { .. } = &command {
        let store = storage::engine_from_config(config, sealkeep_core::StrategyChoice::IdentityBound).await?;
        return dispatch(command, store, &mut settings, &decisions, strategy).await;
    }

    let decisions = match &command {
        Command::Export { password, .. } => decisions.with_password(*password),
        _ => decisions,
    };
    let store = storage::engine_from_config(config, strategy).await?;
    dispatch(command, store, &mut settings, &decisions, strategy).await
}

async fn dispatch<S: ProtectedStore>(
    command: Command,
    store: S,
    settings: &mut sealkeep_core::settings::ConfigurationStore,
    decisions: &TerminalDecisions,
    strategy: sealkeep_core::StrategyChoice,
) -> Result<()> {
    let mut session = keys::Session {
        service: KeyStoreService::new(store),
        settings,
        decisions,
    };
    match command {
        Command::Protect(args) => session.protect(args).await,
        Command::Unprotect { id, output } => session.unprotect(id, output).await,
        Command::Export {
            id,
            output,
            exclusive,
            ..
        } => session.export(id, output, exclusive).await,
        Command::Import { file, resource } => session.import(file, resource).await,
        Command::List => session.list(strategy).await,
        Command::Remove { ids } => session.remove(strategy, ids).await,
        other => Err(color_eyre::eyre::eyre!("{other:?} is not a key command")),
    }
}

/// Runs a quick seal/unseal health check of the configured strategy.
async fn run_health_check(
    config: &config::Config,
    flag: Option<sealkeep_core::StrategyChoice>,
) -> Result<()> {
    let settings = storage::settings_from_config(config)?;
    let strategy = storage::resolve_strategy(flag, config, &settings);
    let store = storage::engine_from_config(config, strategy).await?;
    run_store_health(store).await?;
    println!("Storage ({strategy}): ok");
    Ok(())
}

async fn run_store_health<S: ProtectedStore>(store: S) -> Result<()> {
    KeyStoreService::new(store).health_check().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn health_check_with_test_store_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_engine(dir.path());
        run_store_health(store)
            .await
            .expect("health check should succeed");
    }

    #[tokio::test]
    async fn list_runs_against_test_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = sealkeep_core::settings::ConfigurationStore::load(
            sealkeep_core::settings::MemoryDocumentStore::default(),
        );
        dispatch(
            Command::List,
            storage::test_engine(dir.path()),
            &mut settings,
            &TerminalDecisions::default(),
            sealkeep_core::StrategyChoice::HardwareCredential,
        )
        .await
        .expect("list should succeed");
    }
}
