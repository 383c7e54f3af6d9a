use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::KeyStoreError;

/// Which sealing mechanism protects a key, and which record subdirectory holds it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyChoice {
    /// Sealed under the current user identity.
    #[default]
    IdentityBound,
    /// Encrypted with a key derived from a hardware-backed credential.
    HardwareCredential,
}

impl StrategyChoice {
    pub const ALL: [StrategyChoice; 2] = [
        StrategyChoice::IdentityBound,
        StrategyChoice::HardwareCredential,
    ];

    /// Record subdirectory under the product data directory.
    pub fn subfolder(self) -> &'static str {
        match self {
            StrategyChoice::IdentityBound => "identity",
            StrategyChoice::HardwareCredential => "hardware",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyChoice::IdentityBound => "identity-bound",
            StrategyChoice::HardwareCredential => "hardware-credential",
        }
    }
}

impl fmt::Display for StrategyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity-bound" | "identity" => Ok(StrategyChoice::IdentityBound),
            "hardware-credential" | "hardware" => Ok(StrategyChoice::HardwareCredential),
            other => Err(format!(
                "unknown strategy `{other}` (expected identity-bound or hardware-credential)"
            )),
        }
    }
}

/// Resolve the strategy to construct from the stored preference and the platform probe.
pub fn select_strategy(
    preference: StrategyChoice,
    hardware_supported: bool,
) -> Result<StrategyChoice, KeyStoreError> {
    match preference {
        StrategyChoice::HardwareCredential if !hardware_supported => {
            Err(KeyStoreError::PlatformUnsupported)
        }
        choice => Ok(choice),
    }
}
