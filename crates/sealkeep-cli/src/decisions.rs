//! Terminal implementations of the host decision functions.

use std::{
    io::{self, BufRead, IsTerminal, Write},
    path::{Path, PathBuf},
};

use sealkeep_core::{
    host::{FilePurpose, HostDecisions, RecoveryProtection},
    LogicalIdentifier, SecretKey, StrategyChoice,
};
use sealkeep_recovery::codec::{password_is_truncated, MAX_PASSWORD_LEN};
use tracing::warn;
use zeroize::Zeroizing;

/// Recovery password for non-interactive runs.
pub const PASSWORD_ENV_VAR: &str = "SEALKEEP_RECOVERY_PASSWORD";

/// Prompts on the controlling terminal. Without a terminal every question is
/// answered with its safe default (no overwrite, no file, no password).
#[derive(Debug, Clone, Default)]
pub struct TerminalDecisions {
    /// Answer yes to overwrite confirmations.
    pub assume_yes: bool,
    /// `--password` was given on export; otherwise a random key is embedded.
    pub use_password: bool,
}

impl TerminalDecisions {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            use_password: false,
        }
    }

    pub fn with_password(mut self, use_password: bool) -> Self {
        self.use_password = use_password;
        self
    }
}

impl HostDecisions for TerminalDecisions {
    fn confirm_overwrite(&self, id: &LogicalIdentifier) -> bool {
        if self.assume_yes {
            return true;
        }
        ask_line(&format!(
            "A different key is already protected for {id}. Replace it? [y/N] "
        ))
        .map(|answer| is_yes(&answer))
        .unwrap_or(false)
    }

    fn choose_strategy(&self, hardware_supported: bool) -> Option<StrategyChoice> {
        let choices: Vec<StrategyChoice> = StrategyChoice::ALL
            .into_iter()
            .filter(|c| hardware_supported || *c != StrategyChoice::HardwareCredential)
            .collect();
        for (idx, choice) in choices.iter().enumerate() {
            eprintln!("  {}) {choice}", idx + 1);
        }
        let answer = ask_line("Strategy: ")?;
        parse_choice(&answer, &choices)
    }

    fn enter_password(&self) -> Option<RecoveryProtection> {
        if !self.use_password {
            return Some(RecoveryProtection::RandomKey);
        }
        if let Some(password) = env_password() {
            return checked_password(password).map(RecoveryProtection::Password);
        }
        if !io::stdin().is_terminal() {
            warn!("no terminal and {PASSWORD_ENV_VAR} is not set");
            return None;
        }

        let first = Zeroizing::new(rpassword::prompt_password("Recovery password: ").ok()?);
        let second = Zeroizing::new(rpassword::prompt_password("Confirm password: ").ok()?);
        if *first != *second {
            eprintln!("Passwords do not match.");
            return None;
        }
        checked_password(SecretKey::from_slice(first.as_bytes())).map(RecoveryProtection::Password)
    }

    fn verify_password(&self) -> Option<SecretKey> {
        if let Some(password) = env_password() {
            return Some(password);
        }
        if !io::stdin().is_terminal() {
            warn!("no terminal and {PASSWORD_ENV_VAR} is not set");
            return None;
        }
        let password = Zeroizing::new(rpassword::prompt_password("Recovery password: ").ok()?);
        Some(SecretKey::from_slice(password.as_bytes()))
    }

    fn pick_file(&self, purpose: FilePurpose, initial_dir: Option<&Path>) -> Option<PathBuf> {
        let label = match purpose {
            FilePurpose::SaveRecoveryDocument => "Save recovery document to",
            FilePurpose::OpenRecoveryDocument => "Recovery document to open",
            FilePurpose::LocateResource => "Current location of the resource (empty to keep)",
        };
        let prompt = match initial_dir {
            Some(dir) => format!("{label} [{}]: ", dir.display()),
            None => format!("{label}: "),
        };
        let answer = ask_line(&prompt)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return None;
        }
        let path = PathBuf::from(answer);
        match initial_dir {
            Some(dir) if path.is_relative() => Some(dir.join(path)),
            _ => Some(path),
        }
    }
}

fn env_password() -> Option<SecretKey> {
    let value = Zeroizing::new(std::env::var(PASSWORD_ENV_VAR).ok()?);
    if value.is_empty() {
        return None;
    }
    Some(SecretKey::from_slice(value.as_bytes()))
}

/// Enforce the recovery password rules: non-empty, warn past the derivation limit.
fn checked_password(password: SecretKey) -> Option<SecretKey> {
    if password.is_empty() {
        eprintln!("An empty password is not allowed.");
        return None;
    }
    if password_is_truncated(password.as_bytes()) {
        eprintln!("Only the first {MAX_PASSWORD_LEN} bytes of the password are used.");
    }
    Some(password)
}

fn ask_line(prompt: &str) -> Option<String> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return None;
    }
    eprint!("{prompt}");
    io::stderr().flush().ok()?;
    let mut line = String::new();
    stdin.lock().read_line(&mut line).ok()?;
    Some(line)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn parse_choice(answer: &str, choices: &[StrategyChoice]) -> Option<StrategyChoice> {
    let answer = answer.trim();
    if let Ok(idx) = answer.parse::<usize>() {
        return choices.get(idx.checked_sub(1)?).copied();
    }
    answer
        .parse::<StrategyChoice>()
        .ok()
        .filter(|choice| choices.contains(choice))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn strategy_choice_by_number_or_name() {
        let both = StrategyChoice::ALL;
        assert_eq!(parse_choice("1\n", &both), Some(StrategyChoice::IdentityBound));
        assert_eq!(
            parse_choice("hardware", &both),
            Some(StrategyChoice::HardwareCredential)
        );
        assert_eq!(parse_choice("0", &both), None);
        assert_eq!(parse_choice("3", &both), None);

        let identity_only = [StrategyChoice::IdentityBound];
        assert_eq!(parse_choice("hardware", &identity_only), None);
    }

    #[test]
    fn password_rules() {
        assert_eq!(checked_password(SecretKey::default()), None);
        let long = SecretKey::from_slice(&[b'x'; 40]);
        assert_eq!(checked_password(long.clone()), Some(long));
    }

    #[test]
    fn random_key_unless_password_requested() {
        let decisions = TerminalDecisions::new(false);
        assert_eq!(
            decisions.enter_password(),
            Some(RecoveryProtection::RandomKey)
        );
    }

    #[test]
    fn assume_yes_confirms_without_prompt() {
        assert!(TerminalDecisions::new(true).confirm_overwrite(&LogicalIdentifier::new("db")));
    }
}
