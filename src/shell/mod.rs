//! Shell core module

pub mod builtin;
pub mod executor;
pub mod input;
pub mod parser;
pub mod procfs;
pub mod tables;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use tracing::warn;

use crate::config::Config;
use crate::task::Reaper;
use input::{InputResult, LineSource};
use tables::{AliasTable, History, VarTable};

/// Size of the line buffer; lines (after expansion) hold at most one byte less.
pub const BUFFER_SIZE: usize = 512;
pub const MAX_TOKENS: usize = 64;
pub const HISTORY_SIZE: usize = 32;
pub const MAX_ALIASES: usize = 32;
pub const MAX_VARIABLES: usize = 32;
/// Variable names are limited to one byte less than this.
pub const MAX_VARNAME_LENGTH: usize = 32;
pub const PROMPT_TEXT_MAX_LENGTH: usize = 8;
pub const DEFAULT_PROMPT: &str = "mysh";
pub const DEFAULT_PROCFS: &str = "/proc";

/// Colors accepted by `setcolor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptColor {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
}

impl PromptColor {
    pub const ALL: [PromptColor; 6] = [
        PromptColor::Red,
        PromptColor::Green,
        PromptColor::Yellow,
        PromptColor::Blue,
        PromptColor::Magenta,
        PromptColor::Cyan,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PromptColor::Red => "red",
            PromptColor::Green => "green",
            PromptColor::Yellow => "yellow",
            PromptColor::Blue => "blue",
            PromptColor::Magenta => "magenta",
            PromptColor::Cyan => "cyan",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    fn paint(self, text: &str) -> String {
        let text = text.bold();
        match self {
            PromptColor::Red => text.red(),
            PromptColor::Green => text.green(),
            PromptColor::Yellow => text.yellow(),
            PromptColor::Blue => text.blue(),
            PromptColor::Magenta => text.magenta(),
            PromptColor::Cyan => text.cyan(),
        }
        .to_string()
    }
}

/// Main shell state
pub struct Shell {
    /// Prompt text, without the trailing `>`
    pub prompt: String,
    pub color: Option<PromptColor>,
    /// Non-zero enables the per-line trace on the output stream
    pub debug_level: i32,
    /// Result of the last command (see `status`)
    pub exit_status: i32,
    /// Root of the procfs tree used by `pids` and `pinfo`
    pub procfs: PathBuf,
    pub aliases: AliasTable,
    pub vars: VarTable,
    pub history: History,
    /// History entry to prime the next input line with
    pub replay: Option<usize>,
    pub should_exit: bool,
    /// Collects finished background children
    pub reaper: Reaper,
    /// Where builtins and traces write
    pub out: Box<dyn Write>,
}

impl Shell {
    pub fn new() -> Result<Self> {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Result<Self> {
        Ok(Self {
            prompt: config.prompt.clone(),
            color: None,
            debug_level: config.debug_level,
            exit_status: 0,
            procfs: config.procfs.clone(),
            aliases: AliasTable::default(),
            vars: VarTable::default(),
            history: History::default(),
            replay: None,
            should_exit: false,
            reaper: Reaper::spawn()?,
            out: Box::new(io::stdout()),
        })
    }

    /// Replace the output stream (embedding, tests).
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Prompt as shown by interactive sources.
    pub fn prompt_string(&self) -> String {
        match self.color {
            Some(color) => format!("{}>", color.paint(&self.prompt)),
            None => format!("{}>", self.prompt),
        }
    }

    /// Consume the replay cursor, returning the history entry it points at.
    pub fn take_replay(&mut self) -> Option<String> {
        let index = self.replay.take()?;
        self.history.get(index).map(str::to_string)
    }

    /// Run one raw input line through the whole pipeline.
    pub fn process_line(&mut self, line: &str) {
        if History::should_record(line) {
            self.history.push(line);
        }

        if self.debug_level > 0 {
            self.trace(format_args!("Input line: '{}'", line));
        }

        let tokens = parser::expand_variables(line, &self.vars).and_then(|l| parser::tokenize(&l));
        let mut tokens = match tokens {
            Ok(tokens) => tokens,
            Err(err) => {
                eprintln!("mysh: {}", err);
                self.exit_status = 1;
                return;
            }
        };
        if tokens.is_empty() {
            return;
        }

        parser::map_aliases(&mut tokens, &self.aliases);

        if self.debug_level > 0 {
            for (i, token) in tokens.iter().enumerate() {
                self.trace(format_args!("Token {}: '{}'", i, token));
            }
        }

        let redirects = parser::extract_redirects(&mut tokens);

        if self.debug_level > 0 {
            if let Some(input) = &redirects.input {
                self.trace(format_args!("Input redirect: '{}'", input));
            }
            if let Some(output) = &redirects.output {
                self.trace(format_args!("Output redirect: '{}'", output));
            }
        }

        if tokens.is_empty() {
            return;
        }

        executor::dispatch(self, &tokens, &redirects);
    }

    /// Read and execute lines until `exit` or end of input; returns the final status.
    pub fn run(&mut self, source: &mut dyn LineSource) -> i32 {
        loop {
            self.flush_output();

            let replay = self.take_replay();
            if let Some(entry) = &replay {
                // interactive editors show the entry themselves
                if !source.is_interactive() {
                    if let Err(err) = write!(self.out, "{}>{}", self.prompt, entry) {
                        warn!(error = %err, "failed to echo replayed line");
                    }
                    self.flush_output();
                }
            }

            let prompt = self.prompt_string();
            match source.read_line(&prompt, replay.as_deref()) {
                Ok(InputResult::Line(line)) => self.process_line(&line),
                Ok(InputResult::Interrupt) => continue,
                Ok(InputResult::Eof) => break,
                Err(err) => {
                    eprintln!("mysh: {:#}", err);
                    self.exit_status = executor::error_status(&err);
                    break;
                }
            }

            if self.should_exit {
                break;
            }
        }

        self.flush_output();
        self.exit_status
    }

    fn flush_output(&mut self) {
        if let Err(err) = self.out.flush() {
            warn!(error = %err, "failed to flush output");
        }
    }

    fn trace(&mut self, args: std::fmt::Arguments<'_>) {
        if let Err(err) = writeln!(self.out, "{}", args) {
            warn!(error = %err, "failed to write debug trace");
        }
    }
}
