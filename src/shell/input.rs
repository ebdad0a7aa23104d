//! Line sources for the read loop
//!
//! Interactive sessions read through a `rustyline` editor; scripts, `-c`
//! fallbacks and piped stdin read plain lines from any `BufRead`.

use std::io::BufRead;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(Debug, PartialEq, Eq)]
pub enum InputResult {
    Line(String),
    Interrupt,
    Eof,
}

/// Something the shell can pull input lines from.
pub trait LineSource {
    /// Read the next line.
    ///
    /// `initial` is a history entry being replayed: the returned line starts
    /// with it and continues with whatever the user supplies next.
    fn read_line(&mut self, prompt: &str, initial: Option<&str>) -> Result<InputResult>;

    /// Interactive sources show the prompt; batch sources stay silent.
    fn is_interactive(&self) -> bool;
}

/// Terminal input with line editing.
pub struct InteractiveSource {
    editor: DefaultEditor,
}

impl InteractiveSource {
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().context("failed to initialize line editor")?;
        Ok(Self { editor })
    }
}

impl LineSource for InteractiveSource {
    fn read_line(&mut self, prompt: &str, initial: Option<&str>) -> Result<InputResult> {
        let read = match initial {
            Some(initial) => self.editor.readline_with_initial(prompt, (initial, "")),
            None => self.editor.readline(prompt),
        };

        match read {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(InputResult::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(InputResult::Interrupt),
            Err(ReadlineError::Eof) => Ok(InputResult::Eof),
            Err(err) => Err(err).context("failed to read input"),
        }
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

/// Non-interactive input: stdin that is not a terminal, or a script file.
pub struct BatchSource<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> BatchSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> LineSource for BatchSource<R> {
    fn read_line(&mut self, _prompt: &str, initial: Option<&str>) -> Result<InputResult> {
        self.buf.clear();
        let n = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .context("failed to read input")?;

        if n == 0 {
            // a replay armed on the last line still runs
            return Ok(match initial {
                Some(initial) => InputResult::Line(initial.to_string()),
                None => InputResult::Eof,
            });
        }

        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }

        let line = match initial {
            Some(initial) => format!("{}{}", initial, text),
            None => text,
        };
        Ok(InputResult::Line(line))
    }

    fn is_interactive(&self) -> bool {
        false
    }
}
