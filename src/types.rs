use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of filesystem change reported by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
    /// Rename whose direction the backend could not tell us. Resolved into
    /// `Added` or `Removed` by checking whether the path still exists.
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "updated",
            ChangeKind::Removed => "deleted",
            ChangeKind::Renamed => "renamed",
        };
        f.write_str(s)
    }
}

/// A single path change as reported by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangedPath {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangedPath {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Flags set through `__DOTNET_WATCH_TEST_FLAGS` by automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestFlags {
    pub running_as_test: bool,
    pub mock_browser: bool,
    pub elevate_waiting_for_changes_message_severity: bool,
}

impl TestFlags {
    pub fn is_empty(&self) -> bool {
        *self == TestFlags::default()
    }
}

impl FromStr for TestFlags {
    type Err = String;

    /// Parses a comma separated list such as `RunningAsTest,MockBrowser`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = TestFlags::default();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "runningastest" => flags.running_as_test = true,
                "mockbrowser" => flags.mock_browser = true,
                "elevatewaitingforchangesmessageseverity" => {
                    flags.elevate_waiting_for_changes_message_severity = true
                }
                other => return Err(format!("unknown test flag: {other}")),
            }
        }
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse_case_insensitively() {
        let flags: TestFlags = "RunningAsTest, mockbrowser".parse().unwrap();
        assert!(flags.running_as_test);
        assert!(flags.mock_browser);
        assert!(!flags.elevate_waiting_for_changes_message_severity);
    }

    #[test]
    fn test_flags_reject_unknown_names() {
        assert!("Nope".parse::<TestFlags>().is_err());
        assert!("".parse::<TestFlags>().unwrap().is_empty());
    }
}
