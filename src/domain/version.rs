use crate::error::{FlowError, Result};
use std::fmt;
use std::str::FromStr;

/// Semantic version, ordered by major, then minor, then patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Create a new version
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    /// Parse version from a string (e.g., "v1.2.3" -> Version(1,2,3))
    pub fn parse(tag: &str) -> Result<Self> {
        // Remove 'v' or 'V' prefix
        let clean_tag = tag.trim().trim_start_matches('v').trim_start_matches('V');

        let parts: Vec<&str> = clean_tag.split('.').collect();
        if parts.len() != 3 {
            return Err(FlowError::version(format!(
                "Invalid version format: '{}' - expected X.Y.Z",
                tag
            )));
        }

        let major = parts[0]
            .parse::<u32>()
            .map_err(|_| FlowError::version(format!("Invalid major version: {}", parts[0])))?;
        let minor = parts[1]
            .parse::<u32>()
            .map_err(|_| FlowError::version(format!("Invalid minor version: {}", parts[1])))?;
        let patch = parts[2]
            .parse::<u32>()
            .map_err(|_| FlowError::version(format!("Invalid patch version: {}", parts[2])))?;

        Ok(Version {
            major,
            minor,
            patch,
        })
    }

    /// Bump version according to bump type
    ///
    /// Fails when the bumped component would overflow.
    pub fn bump(&self, bump_type: VersionBump) -> Result<Self> {
        let bumped = match bump_type {
            VersionBump::Major => self.major.checked_add(1).map(|major| Version::new(major, 0, 0)),
            VersionBump::Minor => self
                .minor
                .checked_add(1)
                .map(|minor| Version::new(self.major, minor, 0)),
            VersionBump::Patch => self
                .patch
                .checked_add(1)
                .map(|patch| Version::new(self.major, self.minor, patch)),
        };
        bumped.ok_or_else(|| FlowError::version(format!("cannot bump {} any further", self)))
    }
}

impl FromStr for Version {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Version bump type decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBump {
    Major,
    Minor,
    Patch,
}
