//! Startup conditions gating a service's (re)start.

use std::fmt;
use std::path::PathBuf;
use tracing::error;

/// Prefix of a file-existence condition.
const FILE_PREFIX: &str = "file:";

/// A parsed startup condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// No condition, always ready
    Always,
    /// Ready once the path exists
    FileExists(PathBuf),
    /// Syntax we do not understand, never ready
    Unrecognized(String),
}

impl Condition {
    /// Parse the optional condition string of a descriptor.
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Condition::Always,
            Some(raw) => raw,
        };

        match raw.strip_prefix(FILE_PREFIX) {
            Some(path) if path.starts_with('/') => Condition::FileExists(PathBuf::from(path)),
            _ => Condition::Unrecognized(raw.to_string()),
        }
    }

    /// Evaluate the condition against the filesystem right now.
    ///
    /// Silent; callers decide how often an unmet condition is worth a log line.
    pub fn is_ready(&self) -> bool {
        match self {
            Condition::Always => true,
            Condition::FileExists(path) => path.exists(),
            Condition::Unrecognized(_) => false,
        }
    }

    /// Whether the condition string could not be understood.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Condition::Unrecognized(_))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "none"),
            Condition::FileExists(path) => write!(f, "{}{}", FILE_PREFIX, path.display()),
            Condition::Unrecognized(raw) => write!(f, "{} (unrecognized)", raw),
        }
    }
}

/// Check whether an optional condition string is currently satisfied.
pub fn is_ready(condition: Option<&str>) -> bool {
    let condition = Condition::parse(condition);
    if let Condition::Unrecognized(raw) = &condition {
        error!(
            target: "supervisor",
            condition = %raw,
            "Unrecognized condition, treating as never ready"
        );
    }
    condition.is_ready()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_condition_is_ready() {
        assert!(is_ready(None));
        assert!(is_ready(Some("")));
        assert!(is_ready(Some("   ")));
    }

    #[test]
    fn test_file_condition() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("ready");
        let condition = format!("file:{}", marker.display());

        assert!(!is_ready(Some(&condition)));
        std::fs::write(&marker, b"").unwrap();
        assert!(is_ready(Some(&condition)));
    }

    #[test]
    fn test_directory_counts_as_existing() {
        let temp = TempDir::new().unwrap();
        let condition = format!("file:{}", temp.path().display());
        assert!(is_ready(Some(&condition)));
    }

    #[test]
    fn test_unrecognized_is_never_ready() {
        assert!(!is_ready(Some("port:8080")));
        assert!(!is_ready(Some("file:relative/path")));
        assert!(!is_ready(Some("file:")));
        assert!(!is_ready(Some("FILE:/tmp")));
        assert!(Condition::parse(Some("port:8080")).is_unrecognized());
        assert!(!Condition::parse(Some("file:/tmp")).is_unrecognized());
    }

    #[test]
    fn test_parse() {
        assert_eq!(Condition::parse(None), Condition::Always);
        assert_eq!(
            Condition::parse(Some("file:/tmp/ready")),
            Condition::FileExists(PathBuf::from("/tmp/ready"))
        );
        assert_eq!(
            Condition::parse(Some("http://x")),
            Condition::Unrecognized("http://x".to_string())
        );
        assert_eq!(
            Condition::parse(Some("file:/tmp/ready")).to_string(),
            "file:/tmp/ready"
        );
    }
}
