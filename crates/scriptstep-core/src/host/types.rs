//! Value types exchanged over the interactive-host contract.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Console colors an engine may ask the host to write with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleColor {
    Black,
    DarkBlue,
    DarkGreen,
    DarkCyan,
    DarkRed,
    DarkMagenta,
    DarkYellow,
    #[default]
    Gray,
    DarkGray,
    Blue,
    Green,
    Cyan,
    Red,
    Magenta,
    Yellow,
    White,
}

/// Progress report for a long-running engine operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressRecord {
    pub activity_id: i32,
    pub activity: String,
    pub status_description: String,
    pub current_operation: String,
    /// Percent complete, or -1 when unknown.
    pub percent_complete: i32,
}

impl ProgressRecord {
    pub fn new(activity: impl Into<String>, current_operation: impl Into<String>, percent: i32) -> Self {
        Self {
            activity_id: 0,
            activity: activity.into(),
            status_description: String::new(),
            current_operation: current_operation.into(),
            percent_complete: percent,
        }
    }
}

/// A field the engine wants the user to fill in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub label: String,
    pub default_value: Option<String>,
}

/// One option of a choice prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceDescription {
    pub label: String,
    pub help_message: String,
}

/// Secret text read from the host. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// Credential returned from a credential prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_name: String,
    pub password: SecretString,
}

/// Width/height pair in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u16,
    pub height: u16,
}

/// Cursor position in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coordinates {
    pub x: u16,
    pub y: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_debug_is_redacted() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretString(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_progress_record_new() {
        let record = ProgressRecord::new("Copy", "file.txt", 40);
        assert_eq!(record.current_operation, "file.txt");
        assert_eq!(record.percent_complete, 40);
    }
}
