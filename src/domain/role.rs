use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FlowError, Result};

/// Functional category of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchRole {
    Main,
    Develop,
    Feature,
    Release,
    #[serde(alias = "hotfix")]
    Maintenance,
}

impl BranchRole {
    pub const ALL: [BranchRole; 5] = [
        BranchRole::Main,
        BranchRole::Develop,
        BranchRole::Feature,
        BranchRole::Release,
        BranchRole::Maintenance,
    ];

    /// Long-lived roles are never deleted and never have a fork parent
    pub fn is_permanent(self) -> bool {
        matches!(self, BranchRole::Main | BranchRole::Develop)
    }

    /// Roles whose branch is deleted after it lands
    pub fn is_ephemeral(self) -> bool {
        !self.is_permanent()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BranchRole::Main => "main",
            BranchRole::Develop => "develop",
            BranchRole::Feature => "feature",
            BranchRole::Release => "release",
            BranchRole::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for BranchRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BranchRole {
    type Err = FlowError;

    /// Accepts the role names plus `hotfix` as an alias for maintenance
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "main" | "master" => Ok(BranchRole::Main),
            "develop" => Ok(BranchRole::Develop),
            "feature" => Ok(BranchRole::Feature),
            "release" => Ok(BranchRole::Release),
            "maintenance" | "hotfix" => Ok(BranchRole::Maintenance),
            other => Err(FlowError::classification(
                other,
                "unknown role, expected one of main, develop, feature, release, hotfix",
            )),
        }
    }
}
