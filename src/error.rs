//! DFScore Error Types

use thiserror::Error;

/// Result type alias for DFScore operations
pub type Result<T> = std::result::Result<T, Error>;

/// DFScore error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] serde_json::Error),

    // Path / metadata errors (mirror the fixed exception taxonomy)
    #[error("The path does not exist: \"{0}\" not found")]
    NotFound(String),

    #[error("A directory with the same name already exists")]
    AlreadyExistsDirectory,

    #[error("The resource already exists")]
    AlreadyExists,

    #[error("Parent directory \"{0}\" does not exist")]
    NotParent(String),

    #[error("Cannot create the directory: \"{0}\" is not a directory")]
    NotDirectory(String),

    #[error("The directory is not empty")]
    NotEmpty,

    #[error("Root Directory: the operation you required is not allowed")]
    RootDirectory,

    #[error("Itself subdirectory: the operation you required is not allowed")]
    ItselfSubdir,

    #[error("Access denied: the operation you required is not allowed on {0}")]
    AccessDenied(String),

    #[error("Access denied at least on one resource: \"{0}\"")]
    AccessDeniedAtLeastOne(String),

    #[error("Operation not allowed: you MUST be root")]
    RootNecessary,

    #[error("invalid mode {0}")]
    InvalidMod(String),

    // User / group errors
    #[error("The user does not exist: {0}")]
    UserNotFound(String),

    #[error("The group does not exist: {0}")]
    GroupNotFound(String),

    #[error("The user already exists")]
    UserAlreadyExists,

    #[error("The group already exists")]
    GroupAlreadyExists,

    #[error("The group {0} is the main group of a user: please remove the user first")]
    MainUserGroup(String),

    // Command parsing errors
    #[error("Invalid syntax, the syntax should be like: {0}")]
    InvalidSyntax(String),

    #[error("Command not found")]
    CommandNotFound,

    // Transfer errors
    #[error("Unable to get the file")]
    GetFile,

    // Cluster / replication errors
    #[error("No master name node available")]
    NoMaster,

    #[error("Not the master: current master is {0}")]
    NotMaster(String),

    #[error("Storage node not found: {0}")]
    StorageNodeNotFound(String),

    #[error("Quorum not reached: {reached}/{required}")]
    QuorumNotReached { reached: usize, required: usize },

    // Network / I/O errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Document store error: {0}")]
    Store(#[from] rusqlite::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// True for errors that spec.md's propagation policy treats as a
    /// per-command failure: log a warning, the command ends, the caller
    /// (shell loop, RPC handler) continues serving further requests.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::AlreadyExists
                | Error::AlreadyExistsDirectory
                | Error::NotParent(_)
                | Error::NotDirectory(_)
                | Error::NotEmpty
                | Error::RootDirectory
                | Error::ItselfSubdir
                | Error::AccessDenied(_)
                | Error::AccessDeniedAtLeastOne(_)
                | Error::RootNecessary
                | Error::InvalidMod(_)
                | Error::UserNotFound(_)
                | Error::GroupNotFound(_)
                | Error::UserAlreadyExists
                | Error::GroupAlreadyExists
                | Error::MainUserGroup(_)
                | Error::InvalidSyntax(_)
                | Error::CommandNotFound
                | Error::GetFile
        )
    }

    /// True for errors that should halt the owning control loop (the
    /// failure-detection loop, the heartbeat sender) rather than just
    /// failing the current operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ShuttingDown | Error::Internal(_))
    }

    /// Stable name used as the `kind` field of an RPC fault, so clients
    /// can pattern-match on it the way the original implementation
    /// matched on the Python exception class name.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "Config",
            Error::ConfigParse(_) => "ConfigParse",
            Error::NotFound(_) => "NotFound",
            Error::AlreadyExistsDirectory => "AlreadyExistsDirectory",
            Error::AlreadyExists => "AlreadyExists",
            Error::NotParent(_) => "NotParent",
            Error::NotDirectory(_) => "NotDirectory",
            Error::NotEmpty => "NotEmpty",
            Error::RootDirectory => "RootDirectory",
            Error::ItselfSubdir => "ItselfSubdir",
            Error::AccessDenied(_) => "AccessDenied",
            Error::AccessDeniedAtLeastOne(_) => "AccessDeniedAtLeastOne",
            Error::RootNecessary => "RootNecessary",
            Error::InvalidMod(_) => "InvalidMod",
            Error::UserNotFound(_) => "UserNotFound",
            Error::GroupNotFound(_) => "GroupNotFound",
            Error::UserAlreadyExists => "UserAlreadyExists",
            Error::GroupAlreadyExists => "GroupAlreadyExists",
            Error::MainUserGroup(_) => "MainUserGroup",
            Error::InvalidSyntax(_) => "InvalidSyntax",
            Error::CommandNotFound => "CommandNotFound",
            Error::GetFile => "GetFile",
            Error::NoMaster => "NoMaster",
            Error::NotMaster(_) => "NotMaster",
            Error::StorageNodeNotFound(_) => "StorageNodeNotFound",
            Error::QuorumNotReached { .. } => "QuorumNotReached",
            Error::Network(_) => "Network",
            Error::ConnectionFailed { .. } => "ConnectionFailed",
            Error::Io(_) => "Io",
            Error::Http(_) => "Http",
            Error::Store(_) => "Store",
            Error::Internal(_) => "Internal",
            Error::Cancelled => "Cancelled",
            Error::ShuttingDown => "ShuttingDown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failures_are_not_fatal() {
        let e = Error::NotFound("/foo".into());
        assert!(e.is_command_failure());
        assert!(!e.is_fatal());
    }

    #[test]
    fn kind_is_stable_for_fault_matching() {
        assert_eq!(Error::RootDirectory.kind(), "RootDirectory");
        assert_eq!(Error::ItselfSubdir.kind(), "ItselfSubdir");
    }
}
