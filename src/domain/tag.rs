use chrono::{DateTime, Utc};

use crate::domain::{CommitId, Version};
use crate::error::{FlowError, Result};

/// An immutable release tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub version: Version,
    pub commit: CommitId,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(
        name: impl Into<String>,
        version: Version,
        commit: CommitId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Tag {
            name: name.into(),
            version,
            commit,
            created_at,
        }
    }
}

/// Tag naming pattern (e.g., "{version}", "v{version}", "release-{version}")
#[derive(Debug, Clone)]
pub struct TagPattern {
    pattern: String,
    matcher: regex::Regex,
}

impl TagPattern {
    /// Compile a pattern; it must contain the `{version}` placeholder
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if !pattern.contains("{version}") {
            return Err(FlowError::config(format!(
                "tag pattern '{}' must contain {{version}} placeholder",
                pattern
            )));
        }

        // Escape everything, then replace {version} with a capture
        let escaped = regex::escape(&pattern);
        let regex_pattern = escaped.replace(r"\{version\}", r"(\d+\.\d+\.\d+)");
        let matcher = regex::Regex::new(&format!("^{}$", regex_pattern))
            .map_err(|e| FlowError::config(format!("invalid tag pattern '{}': {}", pattern, e)))?;

        Ok(TagPattern { pattern, matcher })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Example: pattern="v{version}", version=1.2.3 -> "v1.2.3"
    pub fn format(&self, version: &Version) -> String {
        self.pattern.replace("{version}", &version.to_string())
    }

    /// Version carried by a tag name, if the name follows this pattern
    pub fn extract(&self, tag: &str) -> Option<Version> {
        let captures = self.matcher.captures(tag)?;
        Version::parse(captures.get(1)?.as_str()).ok()
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.extract(tag).is_some()
    }
}

impl Default for TagPattern {
    fn default() -> Self {
        TagPattern {
            pattern: "{version}".to_string(),
            matcher: regex::Regex::new(r"^(\d+\.\d+\.\d+)$").expect("static pattern compiles"),
        }
    }
}
