//! Engine configuration.

use serde::{Deserialize, Serialize};

/// How invalidation targets that resolve to a single params value are published.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarPolicy {
    /// Recompute and `broadcast` immediately, one call per target.
    #[default]
    Immediate,
    /// Treat the value as a one-element list and go through `batch_broadcast`.
    Batched,
}

impl std::str::FromStr for ScalarPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "batched" => Ok(Self::Batched),
            other => Err(format!("unknown scalar policy '{other}'")),
        }
    }
}

/// Tunables for the execution pipeline and fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Publishing policy for single-params targets.
    pub scalar_policy: ScalarPolicy,
}
