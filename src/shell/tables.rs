//! Bounded session tables: aliases, variables and command history

use std::collections::VecDeque;

use super::builtin::Builtin;
use super::{HISTORY_SIZE, MAX_ALIASES, MAX_VARIABLES, MAX_VARNAME_LENGTH};
use crate::error::{Result, ShellError};

/// Alias name -> literal replacement text, in insertion order.
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: Vec<(String, String)>,
    capacity: usize,
}

impl AliasTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Register `name`, or replace the expansion of an existing alias.
    pub fn add(&mut self, name: &str, expansion: &str) -> Result<()> {
        if Builtin::from_name(name).is_some() {
            return Err(ShellError::ReservedAliasName(name.to_string()));
        }

        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = expansion.to_string();
            return Ok(());
        }

        if self.entries.len() >= self.capacity {
            return Err(ShellError::AliasTableFull(self.capacity));
        }

        self.entries.push((name.to_string(), expansion.to_string()));
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        let Some(idx) = self.entries.iter().position(|(n, _)| n == name) else {
            return Err(ShellError::AliasNotFound(name.to_string()));
        };
        self.entries.remove(idx);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.as_str())
    }

    pub fn list(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, e)| (n.as_str(), e.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::with_capacity(MAX_ALIASES)
    }
}

/// Shell variables used by `$name` expansion.
#[derive(Debug, Clone)]
pub struct VarTable {
    entries: Vec<(String, String)>,
    capacity: usize,
}

impl VarTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Insert or overwrite a variable.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        if name.len() >= MAX_VARNAME_LENGTH {
            return Err(ShellError::VariableNameTooLong {
                name: name.to_string(),
                limit: MAX_VARNAME_LENGTH - 1,
            });
        }

        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
            return Ok(());
        }

        if self.entries.len() >= self.capacity {
            return Err(ShellError::VariableTableFull(self.capacity));
        }

        self.entries.push((name.to_string(), value.to_string()));
        Ok(())
    }

    pub fn unset(&mut self, name: &str) -> Result<()> {
        let Some(idx) = self.entries.iter().position(|(n, _)| n == name) else {
            return Err(ShellError::VariableNotFound(name.to_string()));
        };
        self.entries.remove(idx);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn list(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for VarTable {
    fn default() -> Self {
        Self::with_capacity(MAX_VARIABLES)
    }
}

/// Fixed-size FIFO of raw input lines; the oldest entry is dropped when full.
#[derive(Debug, Clone)]
pub struct History {
    lines: VecDeque<String>,
    capacity: usize,
}

impl History {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Whether a raw line belongs in history at all.
    ///
    /// The listing command and the replay commands are never recorded, so
    /// replaying does not shift the entries it refers to.
    pub fn should_record(line: &str) -> bool {
        let line = line.trim();
        !(line.is_empty() || line == "history" || line == "!!" || line.starts_with("!n"))
    }

    pub fn push(&mut self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// Absolute index of the `n`-th most recent entry (`n == 1` is the last one).
    pub fn index_from_end(&self, n: usize) -> Result<usize> {
        if n == 0 || n > self.lines.len() {
            return Err(ShellError::HistoryIndexOutOfRange {
                requested: n,
                available: self.lines.len(),
            });
        }
        Ok(self.lines.len() - n)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(HISTORY_SIZE)
    }
}
