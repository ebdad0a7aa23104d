//! Error types for mysh.

use thiserror::Error;

/// Defined failures of the line pipeline and the session tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Input (or its variable expansion) does not fit the line buffer.
    #[error("line too long (limit is {limit} bytes)")]
    LineTooLong { limit: usize },

    /// The line splits into more tokens than a command may carry.
    #[error("too many tokens (limit is {limit})")]
    TooManyTokens { limit: usize },

    #[error("alias limit reached ({0})")]
    AliasTableFull(usize),

    /// Builtin names can never be shadowed by an alias.
    #[error("alias name cannot be another built-in command: {0}")]
    ReservedAliasName(String),

    #[error("alias not found: {0}")]
    AliasNotFound(String),

    #[error("maximum number of variables ({0}) reached, use 'freevar NAME' to make space")]
    VariableTableFull(usize),

    #[error("variable name too long (limit is {limit} bytes): {name}")]
    VariableNameTooLong { name: String, limit: usize },

    #[error("variable '{0}' wasn't set")]
    VariableNotFound(String),

    #[error("command number {requested} does not exist, currently only {available} commands in history")]
    HistoryIndexOutOfRange { requested: usize, available: usize },

    #[error("prompt text too long (limit is {0} characters)")]
    PromptTooLong(usize),

    #[error("invalid color '{0}', try 'colorlist'")]
    UnknownColor(String),
}

/// Convenience Result type for table and parser operations.
pub type Result<T> = std::result::Result<T, ShellError>;
