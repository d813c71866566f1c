//! Branch role resolution from names and lineage.
//!
//! Rules are tried in order: names pinned in `[roles]`, then name prefixes
//! (longest match wins), then the two reserved names for main and develop.
//! A name that matches none of them needs an explicit role from the caller.

use std::collections::HashMap;

use crate::config::Config;
use crate::domain::BranchRole;
use crate::error::{FlowError, Result};

/// Assigns roles to branches. Pure: no I/O, no backend access.
#[derive(Debug, Clone)]
pub struct BranchClassifier {
    main: String,
    develop: String,
    /// Sorted longest first so the most specific prefix wins
    prefixes: Vec<(String, BranchRole)>,
    pinned: HashMap<String, BranchRole>,
}

impl BranchClassifier {
    pub fn new(config: &Config) -> Self {
        let mut prefixes: Vec<(String, BranchRole)> = Vec::new();
        for prefix in &config.prefixes.feature {
            prefixes.push((prefix.clone(), BranchRole::Feature));
        }
        for prefix in &config.prefixes.release {
            prefixes.push((prefix.clone(), BranchRole::Release));
        }
        for prefix in &config.prefixes.maintenance {
            prefixes.push((prefix.clone(), BranchRole::Maintenance));
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        BranchClassifier {
            main: config.branches.main.clone(),
            develop: config.branches.develop.clone(),
            prefixes,
            pinned: config.roles.clone(),
        }
    }

    pub fn main_name(&self) -> &str {
        &self.main
    }

    pub fn develop_name(&self) -> &str {
        &self.develop
    }

    /// Name of the branch holding a permanent role
    pub fn reserved_name(&self, role: BranchRole) -> Option<&str> {
        match role {
            BranchRole::Main => Some(&self.main),
            BranchRole::Develop => Some(&self.develop),
            _ => None,
        }
    }

    /// Resolve the role of `name` given its recorded fork parent.
    pub fn classify(&self, name: &str, fork_parent: Option<&str>) -> Result<BranchRole> {
        self.classify_with(name, fork_parent, None)
    }

    /// Like [`classify`](Self::classify), but accepts a caller-supplied role for
    /// names no rule covers. An explicit role that contradicts a rule is rejected.
    pub fn classify_with(
        &self,
        name: &str,
        fork_parent: Option<&str>,
        explicit: Option<BranchRole>,
    ) -> Result<BranchRole> {
        validate_name(name)?;

        let derived = self.derive(name, fork_parent)?;
        match (derived, explicit) {
            (Some(role), None) => Ok(role),
            (Some(role), Some(requested)) if role == requested => Ok(role),
            (Some(role), Some(requested)) => Err(FlowError::classification(
                name,
                format!("name implies {} but {} was requested", role, requested),
            )),
            (None, Some(requested)) if requested.is_permanent() => {
                Err(FlowError::classification(
                    name,
                    format!(
                        "only '{}' can be {}",
                        self.reserved_name(requested).unwrap_or_default(),
                        requested
                    ),
                ))
            }
            (None, Some(requested)) => Ok(requested),
            (None, None) => Err(FlowError::classification(
                name,
                "no prefix rule matches and it is not a reserved name; supply a role",
            )),
        }
    }

    fn derive(&self, name: &str, fork_parent: Option<&str>) -> Result<Option<BranchRole>> {
        if name == self.main {
            return Ok(Some(BranchRole::Main));
        }
        if name == self.develop {
            return Ok(Some(BranchRole::Develop));
        }
        if let Some(role) = self.pinned.get(name) {
            return Ok(Some(*role));
        }

        for (prefix, role) in &self.prefixes {
            if let Some(rest) = name.strip_prefix(prefix.as_str()) {
                if rest.is_empty() {
                    return Err(FlowError::classification(
                        name,
                        format!("'{}' is a bare prefix", prefix),
                    ));
                }
                return Ok(Some(*role));
            }
        }

        if fork_parent.is_none() {
            tracing::debug!(branch = name, "unrecognised branch without lineage");
        }
        Ok(None)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FlowError::classification(name, "empty branch name"));
    }
    if !git2::Reference::is_valid_name(&format!("refs/heads/{}", name)) {
        return Err(FlowError::classification(name, "not a valid git branch name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn classifier() -> BranchClassifier {
        BranchClassifier::new(&Config::default())
    }

    #[test]
    fn test_reserved_names() {
        let c = classifier();
        assert_eq!(c.classify("main", None).unwrap(), BranchRole::Main);
        assert_eq!(c.classify("develop", None).unwrap(), BranchRole::Develop);
    }

    #[test]
    fn test_prefixes() {
        let c = classifier();
        assert_eq!(
            c.classify("feature/login", Some("develop")).unwrap(),
            BranchRole::Feature
        );
        assert_eq!(c.classify("release/1.0", None).unwrap(), BranchRole::Release);
        assert_eq!(
            c.classify("hotfix/crash", None).unwrap(),
            BranchRole::Maintenance
        );
        assert_eq!(
            c.classify("maintenance/2.x", None).unwrap(),
            BranchRole::Maintenance
        );
    }

    #[test]
    fn test_unknown_name_fails() {
        let c = classifier();
        let err = c.classify("wip", None).unwrap_err();
        assert!(matches!(err, FlowError::Classification { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_unknown_name_with_lineage_still_needs_role() {
        let c = classifier();
        assert!(c.classify("spike", Some("develop")).is_err());
        assert_eq!(
            c.classify_with("spike", Some("develop"), Some(BranchRole::Feature))
                .unwrap(),
            BranchRole::Feature
        );
    }

    #[test]
    fn test_explicit_role_must_agree_with_prefix() {
        let c = classifier();
        assert!(c
            .classify_with("release/2.0", None, Some(BranchRole::Feature))
            .is_err());
        assert_eq!(
            c.classify_with("release/2.0", None, Some(BranchRole::Release))
                .unwrap(),
            BranchRole::Release
        );
    }

    #[test]
    fn test_explicit_permanent_role_for_other_name_rejected() {
        let c = classifier();
        assert!(c
            .classify_with("trunk", None, Some(BranchRole::Main))
            .is_err());
    }

    #[test]
    fn test_bare_prefix_rejected() {
        assert!(classifier().classify("feature/", None).is_err());
    }

    #[test]
    fn test_invalid_git_name_rejected() {
        assert!(classifier().classify("feature/a..b", None).is_err());
        assert!(classifier().classify("", None).is_err());
    }

    #[test]
    fn test_custom_config() {
        let config = parse_config(
            r#"
[branches]
main = "master"
develop = "dev"

[prefixes]
feature = ["feat/", "feature/"]

[roles]
"legacy-fix" = "hotfix"
"#,
        )
        .unwrap();
        let c = BranchClassifier::new(&config);
        assert_eq!(c.classify("master", None).unwrap(), BranchRole::Main);
        assert_eq!(c.classify("dev", None).unwrap(), BranchRole::Develop);
        assert_eq!(c.classify("feat/x", None).unwrap(), BranchRole::Feature);
        assert_eq!(
            c.classify("legacy-fix", None).unwrap(),
            BranchRole::Maintenance
        );
        assert!(c.classify("main", None).is_err());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let config = parse_config(
            r#"
[prefixes]
feature = ["release/feature-"]
"#,
        )
        .unwrap();
        let c = BranchClassifier::new(&config);
        assert_eq!(
            c.classify("release/feature-x", None).unwrap(),
            BranchRole::Feature
        );
        assert_eq!(c.classify("release/1.0", None).unwrap(), BranchRole::Release);
    }
}
