use color_eyre::Result;
use sealkeep_core::{
    host::HostDecisions, settings::ConfigurationStore, strategy::select_strategy, KeyStoreError,
    LogicalIdentifier,
};

use crate::cli::{AutoLoginCommand, SettingsCommand};

/// Execute a settings subcommand against the persisted settings.
pub fn handle(
    cmd: SettingsCommand,
    settings: &mut ConfigurationStore,
    decisions: &dyn HostDecisions,
    hardware_supported: bool,
) -> Result<()> {
    match cmd {
        SettingsCommand::Show => print!("{}", render(settings)),
        SettingsCommand::Strategy { strategy } => {
            let preference = match strategy {
                Some(strategy) => strategy,
                None => decisions
                    .choose_strategy(hardware_supported)
                    .ok_or(KeyStoreError::Cancelled)?,
            };
            let chosen = select_strategy(preference, hardware_supported)?;
            settings.set_active_strategy(chosen)?;
            println!("Active strategy: {chosen}");
        }
        SettingsCommand::AutoLogin(cmd) => auto_login(cmd, settings)?,
    }
    Ok(())
}

fn auto_login(cmd: AutoLoginCommand, settings: &mut ConfigurationStore) -> Result<()> {
    match cmd {
        AutoLoginCommand::Add { id } => {
            let id = LogicalIdentifier::new(id);
            if settings.add_auto_login(&id)? {
                println!("Added {id}.");
            } else {
                println!("{id} is already in the list.");
            }
        }
        AutoLoginCommand::Remove { id } => {
            let id = LogicalIdentifier::new(id);
            report(settings.remove_auto_login(&id)?, &id, "Removed");
        }
        AutoLoginCommand::Enable { id } => {
            let id = LogicalIdentifier::new(id);
            report(settings.set_auto_login_enabled(&id, true)?, &id, "Enabled");
        }
        AutoLoginCommand::Disable { id } => {
            let id = LogicalIdentifier::new(id);
            report(settings.set_auto_login_enabled(&id, false)?, &id, "Disabled");
        }
        AutoLoginCommand::Default { enabled } => {
            settings.set_auto_login_by_default(enabled)?;
            println!("New auto-login entries start {}.", on_off(enabled));
        }
    }
    Ok(())
}

fn report(found: bool, id: &LogicalIdentifier, verb: &str) {
    if found {
        println!("{verb} {id}.");
    } else {
        println!("{id} is not in the auto-login list.");
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn render(settings: &ConfigurationStore) -> String {
    let mut out = format!(
        "Version: {}\nActive strategy: {}\nAuto-login by default: {}\n",
        settings.version(),
        settings.active_strategy(),
        on_off(settings.auto_login_by_default()),
    );
    if let Some(dir) = settings.last_directory() {
        out.push_str(&format!("Last directory: {}\n", dir.display()));
    }
    if settings.auto_logins().is_empty() {
        out.push_str("Auto-login: none\n");
    } else {
        out.push_str("Auto-login:\n");
        for entry in settings.auto_logins() {
            out.push_str(&format!(
                "  {} ({})\n",
                entry.identifier,
                on_off(entry.enabled)
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use sealkeep_core::{settings::MemoryDocumentStore, StrategyChoice};

    use super::*;
    use crate::decisions::TerminalDecisions;

    fn settings() -> ConfigurationStore {
        ConfigurationStore::load(MemoryDocumentStore::default())
    }

    #[test]
    fn hardware_strategy_rejected_without_support() {
        let mut store = settings();
        let err = handle(
            SettingsCommand::Strategy {
                strategy: Some(StrategyChoice::HardwareCredential),
            },
            &mut store,
            &TerminalDecisions::default(),
            false,
        )
        .expect_err("unsupported");
        assert_eq!(
            err.downcast_ref::<KeyStoreError>(),
            Some(&KeyStoreError::PlatformUnsupported)
        );
        assert_eq!(store.active_strategy(), StrategyChoice::IdentityBound);

        handle(
            SettingsCommand::Strategy {
                strategy: Some(StrategyChoice::HardwareCredential),
            },
            &mut store,
            &TerminalDecisions::default(),
            true,
        )
        .unwrap();
        assert_eq!(store.active_strategy(), StrategyChoice::HardwareCredential);
    }

    #[test]
    fn auto_login_commands_update_entries() {
        let mut store = settings();
        let decisions = TerminalDecisions::default();
        let run = |store: &mut ConfigurationStore, cmd| {
            handle(SettingsCommand::AutoLogin(cmd), store, &decisions, false).unwrap()
        };

        run(&mut store, AutoLoginCommand::Default { enabled: false });
        run(&mut store, AutoLoginCommand::Add { id: "/db/A.kdbx".into() });
        assert_eq!(store.auto_login(&LogicalIdentifier::new("/db/a.kdbx")), Some(false));

        run(&mut store, AutoLoginCommand::Enable { id: "/DB/a.kdbx".into() });
        assert_eq!(store.auto_login(&LogicalIdentifier::new("/db/a.kdbx")), Some(true));

        let shown = render(&store);
        assert!(shown.contains("/db/A.kdbx (enabled)"));
        assert!(shown.contains("Auto-login by default: disabled"));

        run(&mut store, AutoLoginCommand::Remove { id: "/db/a.kdbx".into() });
        assert!(store.auto_logins().is_empty());
    }
}
