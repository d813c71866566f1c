use std::fmt;

/// Non-fatal conditions worth telling the operator about.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowWarning {
    /// A release or hotfix landed on main without a version
    UntaggedLanding { source: String, target: String },
    /// The source was already contained in the target; no merge commit made
    AlreadyMerged { source: String, target: String },
    /// Local state is complete but publishing it failed
    PushFailed { refname: String, reason: String },
    /// Branches no classification rule covers
    UnclassifiedBranches { names: Vec<String> },
}

impl fmt::Display for FlowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowWarning::UntaggedLanding { source, target } => {
                write!(
                    f,
                    "'{}' landed on '{}' without a version tag; use 'release finish' or 'hotfix finish' to tag",
                    source, target
                )
            }
            FlowWarning::AlreadyMerged { source, target } => {
                write!(f, "'{}' was already merged into '{}'", source, target)
            }
            FlowWarning::PushFailed { refname, reason } => {
                write!(f, "Could not push {}: {}", refname, reason)
            }
            FlowWarning::UnclassifiedBranches { names } => {
                write!(
                    f,
                    "Ignoring branches with no role (pin them under [roles]): {}",
                    names.join(", ")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_failed_display() {
        let warning = FlowWarning::PushFailed {
            refname: "refs/tags/1.0.0".to_string(),
            reason: "network unreachable".to_string(),
        };
        let msg = warning.to_string();
        assert!(msg.contains("refs/tags/1.0.0"));
        assert!(msg.contains("network unreachable"));
    }

    #[test]
    fn test_unclassified_display_lists_names() {
        let warning = FlowWarning::UnclassifiedBranches {
            names: vec!["wip".to_string(), "spike".to_string()],
        };
        assert!(warning.to_string().contains("wip, spike"));
    }
}
