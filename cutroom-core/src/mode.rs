//! Runtime mode selection.

use serde::{Deserialize, Serialize};

/// Which rendering backend a Cutroom process drives.
///
/// Production spawns the real ffmpeg binary for every job. Development swaps in
/// the simulated renderer so the control plane can be exercised on machines
/// without a transcoding toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Production,
    #[default]
    Development,
}

impl RuntimeMode {
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Reads `CUTROOM_MODE`, falling back to development.
    pub fn from_env() -> Self {
        std::env::var("CUTROOM_MODE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
        }
    }
}

impl std::str::FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            other => Err(format!(
                "Unknown runtime mode '{other}', expected production or development"
            )),
        }
    }
}
