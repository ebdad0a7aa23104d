//! Startup configuration.
//!
//! Settings are layered, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`MYSH_PROMPT`, `MYSH_PROCFS`, `MYSH_DEBUG`)
//! 3. Default values

use std::path::PathBuf;

use tracing::warn;

use crate::cli::Args;
use crate::error::{Result, ShellError};
use crate::shell::{DEFAULT_PROCFS, DEFAULT_PROMPT, PROMPT_TEXT_MAX_LENGTH};

/// Name of the startup file in the home directory.
pub const RC_FILE: &str = ".myshrc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prompt: String,
    pub procfs: PathBuf,
    pub debug_level: i32,
    /// Run `~/.myshrc` before reading input.
    pub load_rc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            procfs: PathBuf::from(DEFAULT_PROCFS),
            debug_level: 0,
            load_rc: true,
        }
    }
}

impl Config {
    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (for testing).
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prompt) = lookup("MYSH_PROMPT") {
            self.prompt = prompt;
        }

        if let Some(procfs) = lookup("MYSH_PROCFS") {
            if !procfs.is_empty() {
                self.procfs = PathBuf::from(procfs);
            }
        }

        if let Some(level) = lookup("MYSH_DEBUG") {
            match level.trim().parse() {
                Ok(level) => self.debug_level = level,
                Err(_) => warn!(value = %level, "ignoring invalid MYSH_DEBUG"),
            }
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(ref prompt) = args.prompt {
            self.prompt = prompt.clone();
        }
        if let Some(ref procfs) = args.procfs {
            self.procfs = procfs.clone();
        }
        if let Some(level) = args.debug {
            self.debug_level = level;
        }
        if args.norc {
            self.load_rc = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.chars().count() > PROMPT_TEXT_MAX_LENGTH {
            return Err(ShellError::PromptTooLong(PROMPT_TEXT_MAX_LENGTH));
        }
        Ok(())
    }

    /// Load configuration with the full priority chain.
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Startup file location, if a home directory is known.
    pub fn rc_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(RC_FILE))
    }
}
