// ABOUTME: Error types with structured exit codes for CLI
// ABOUTME: Maps remote, tree, markup and filesystem failures to exit codes and report kinds

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Remote rejected credentials: {0}")]
    RemoteAuth(String),

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote store timed out: {0}")]
    RemoteTimeout(String),

    #[error("Invalid remote tree: {0}")]
    InvalidTree(String),

    #[error("Unparsable markup at line {line}: {message}")]
    UnparsableMarkup { line: usize, message: String },

    #[error("No remote folder is recorded for the directory of {}; download the folder structure first", .path.display())]
    UnresolvedParent { path: PathBuf },

    #[error("Nothing matches {0}")]
    NotFound(String),

    #[error("Selector {0} matches more than one remote node; use the remote id instead")]
    Ambiguous(String),

    #[error("Invalid local path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::RemoteTimeout(e.to_string());
        }
        match e.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Error::RemoteAuth(e.to_string())
            }
            _ => Error::RemoteUnavailable(e.to_string()),
        }
    }
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::RemoteAuth(_) => 2,
            Error::RemoteUnavailable(_) => 3,
            Error::RemoteTimeout(_) => 4,
            Error::InvalidTree(_) => 5,
            Error::UnparsableMarkup { .. } => 6,
            Error::UnresolvedParent { .. } => 7,
            Error::NotFound(_) | Error::Ambiguous(_) => 8,
            Error::InvalidPath { .. } => 9,
            Error::Parse(_) => 10,
            Error::Filesystem(_) => 11,
            Error::Config(_) => 12,
        }
    }

    /// Stable name used as `error_kind` in sync reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::RemoteAuth(_) => "remote_auth",
            Error::RemoteUnavailable(_) => "remote_unavailable",
            Error::RemoteTimeout(_) => "remote_timeout",
            Error::InvalidTree(_) => "invalid_tree",
            Error::UnparsableMarkup { .. } => "unparsable_markup",
            Error::UnresolvedParent { .. } => "unresolved_parent",
            Error::NotFound(_) => "not_found",
            Error::Ambiguous(_) => "ambiguous",
            Error::InvalidPath { .. } => "invalid_path",
            Error::Parse(_) => "parse",
            Error::Filesystem(_) => "filesystem",
            Error::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(Error::RemoteAuth("test".into()).exit_code(), 2);
        assert_eq!(
            Error::UnparsableMarkup {
                line: 3,
                message: "unterminated block".into()
            }
            .exit_code(),
            6
        );
        assert_eq!(
            Error::UnresolvedParent {
                path: PathBuf::from("Bestiary/Orc.org")
            }
            .exit_code(),
            7
        );
        assert_eq!(Error::Config("test".into()).exit_code(), 12);
    }

    #[test]
    fn test_error_kinds_are_distinct_for_taxonomy() {
        let kinds = [
            Error::RemoteAuth(String::new()).kind(),
            Error::RemoteUnavailable(String::new()).kind(),
            Error::RemoteTimeout(String::new()).kind(),
            Error::InvalidTree(String::new()).kind(),
            Error::Filesystem(std::io::Error::new(std::io::ErrorKind::Other, "x")).kind(),
        ];
        let mut deduped = kinds.to_vec();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), kinds.len());
    }

    #[test]
    fn test_unresolved_parent_message_names_path() {
        let err = Error::UnresolvedParent {
            path: PathBuf::from("Lore/New.org"),
        };
        assert!(err.to_string().contains("Lore/New.org"));
    }
}
