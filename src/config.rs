use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::domain::{BranchRole, TagPattern};
use crate::error::{FlowError, Result};

/// File name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "gitflow.toml";

/// Represents the complete configuration for gitflow.
///
/// Contains the reserved branch names, prefix rules, tag format, policy switches,
/// remote synchronisation and behavior options.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub branches: BranchesConfig,

    #[serde(default)]
    pub prefixes: PrefixesConfig,

    /// Explicit role assignments for branch names that match no prefix
    #[serde(default)]
    pub roles: HashMap<String, BranchRole>,

    #[serde(default)]
    pub tags: TagsConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub behavior: BehaviorConfig,
}

fn default_main() -> String {
    "main".to_string()
}

fn default_develop() -> String {
    "develop".to_string()
}

/// The two reserved long-lived branch names.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BranchesConfig {
    #[serde(default = "default_main")]
    pub main: String,

    #[serde(default = "default_develop")]
    pub develop: String,
}

impl Default for BranchesConfig {
    fn default() -> Self {
        BranchesConfig {
            main: default_main(),
            develop: default_develop(),
        }
    }
}

fn default_feature_prefixes() -> Vec<String> {
    vec!["feature/".to_string()]
}

fn default_release_prefixes() -> Vec<String> {
    vec!["release/".to_string()]
}

fn default_maintenance_prefixes() -> Vec<String> {
    vec!["hotfix/".to_string(), "maintenance/".to_string()]
}

/// Name prefixes that map a branch to its role.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrefixesConfig {
    #[serde(default = "default_feature_prefixes")]
    pub feature: Vec<String>,

    #[serde(default = "default_release_prefixes")]
    pub release: Vec<String>,

    #[serde(default = "default_maintenance_prefixes")]
    pub maintenance: Vec<String>,
}

impl Default for PrefixesConfig {
    fn default() -> Self {
        PrefixesConfig {
            feature: default_feature_prefixes(),
            release: default_release_prefixes(),
            maintenance: default_maintenance_prefixes(),
        }
    }
}

impl PrefixesConfig {
    /// First prefix configured for a role, used when naming new branches
    pub fn primary(&self, role: BranchRole) -> Option<&str> {
        let list = match role {
            BranchRole::Feature => &self.feature,
            BranchRole::Release => &self.release,
            BranchRole::Maintenance => &self.maintenance,
            BranchRole::Main | BranchRole::Develop => return None,
        };
        list.first().map(String::as_str)
    }
}

fn default_tag_pattern() -> String {
    "{version}".to_string()
}

/// Release tag naming.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TagsConfig {
    #[serde(default = "default_tag_pattern")]
    pub pattern: String,
}

impl Default for TagsConfig {
    fn default() -> Self {
        TagsConfig {
            pattern: default_tag_pattern(),
        }
    }
}

impl TagsConfig {
    pub fn compile(&self) -> Result<TagPattern> {
        TagPattern::new(self.pattern.clone())
    }
}

fn default_true() -> bool {
    true
}

/// Policy switches layered on top of the fixed role tables.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PolicyConfig {
    /// Refuse to open a second release branch while one is open
    #[serde(default = "default_true")]
    pub single_release: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            single_release: true,
        }
    }
}

fn default_remote() -> String {
    "origin".to_string()
}

/// Remote synchronisation around merges.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Pull source and target before merging
    #[serde(default)]
    pub fetch: bool,

    /// Push advanced branches and new tags after a successful operation
    #[serde(default)]
    pub push: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            remote: default_remote(),
            fetch: false,
            push: false,
        }
    }
}

/// Configuration for behavior customization.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct BehaviorConfig {
    /// Keep ephemeral branches after they land
    #[serde(default)]
    pub keep_branches: bool,
}

impl Config {
    /// Reject configurations the classifier could not work with.
    pub fn validate(&self) -> Result<()> {
        if self.branches.main.is_empty() || self.branches.develop.is_empty() {
            return Err(FlowError::config("main and develop names must not be empty"));
        }
        if self.branches.main == self.branches.develop {
            return Err(FlowError::config(format!(
                "main and develop must be different branches, both are '{}'",
                self.branches.main
            )));
        }
        let all_prefixes = self
            .prefixes
            .feature
            .iter()
            .chain(&self.prefixes.release)
            .chain(&self.prefixes.maintenance);
        for prefix in all_prefixes {
            if prefix.is_empty() {
                return Err(FlowError::config("branch prefixes must not be empty"));
            }
        }
        for (name, role) in &self.roles {
            if role.is_permanent() {
                return Err(FlowError::config(format!(
                    "'{}' cannot be pinned to {}; use [branches] instead",
                    name, role
                )));
            }
        }
        self.tags.compile()?;
        Ok(())
    }
}

/// Loads configuration from file or returns defaults.
///
/// Attempts to load configuration in the following order:
/// 1. Custom path provided as parameter
/// 2. `gitflow.toml` in current directory
/// 3. `.gitflow.toml` in the user config directory
/// 4. Default configuration if no file found
///
/// # Returns
/// * `Ok(Config)` - Loaded or default configuration
/// * `Err` - If file exists but cannot be read, parsed or validated
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config_str = if let Some(path) = config_path {
        fs::read_to_string(path)?
    } else if Path::new(CONFIG_FILE_NAME).exists() {
        fs::read_to_string(CONFIG_FILE_NAME)?
    } else if let Some(config_dir) = dirs::config_dir() {
        let config_path = config_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if config_path.exists() {
            fs::read_to_string(config_path)?
        } else {
            return Ok(Config::default());
        }
    } else {
        return Ok(Config::default());
    };

    parse_config(&config_str)
}

/// Parse and validate configuration text.
pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(text).map_err(|e| FlowError::config(format!("invalid TOML: {}", e)))?;
    config.validate()?;
    Ok(config)
}
