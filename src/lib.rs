//! mysh - small command interpreter
//!
//! Features:
//! - Builtins for files, processes, aliases, variables and history replay
//! - External programs with `<`/`>` redirection and `&` background jobs
//! - Multi-stage pipelines through the `pipes` builtin
//! - Interactive (line editing) and batch (script, piped stdin) modes

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod shell;
pub mod task;

pub use shell::Shell;
