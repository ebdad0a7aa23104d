//! Command-line interface for mysh.

use std::ffi::OsString;
use std::path::PathBuf;

use thiserror::Error;

/// Command-line arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    /// Single line to execute instead of reading input.
    pub command: Option<String>,
    /// Initial prompt text.
    pub prompt: Option<String>,
    /// Root of the procfs tree.
    pub procfs: Option<PathBuf>,
    /// Initial debug level.
    pub debug: Option<i32>,
    /// Skip the startup file.
    pub norc: bool,
    /// Script file to run in batch mode.
    pub script: Option<PathBuf>,
    pub help: bool,
    pub version: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator; the first item is the program name.
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('c') | Long("command") => {
                result.command = Some(parser.value()?.parse()?);
            }
            Short('p') | Long("prompt") => {
                result.prompt = Some(parser.value()?.parse()?);
            }
            Long("procfs") => {
                result.procfs = Some(parser.value()?.parse()?);
            }
            Short('d') | Long("debug") => {
                let value: String = parser.value()?.parse()?;
                result.debug = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("debug", value))?,
                );
            }
            Long("norc") => {
                result.norc = true;
            }
            Value(val) if result.script.is_none() => {
                result.script = Some(PathBuf::from(val));
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"mysh {version}
Small command interpreter with builtins, pipelines and background jobs

USAGE:
    mysh [OPTIONS] [SCRIPT]

ARGS:
    <SCRIPT>                Run the file in batch mode

OPTIONS:
    -c, --command <LINE>    Execute a single line and exit
    -p, --prompt <TEXT>     Initial prompt text (at most 8 characters)
        --procfs <DIR>      Root of the procfs tree [default: /proc]
    -d, --debug <LEVEL>     Initial debug level
        --norc              Do not run ~/.myshrc
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    MYSH_PROMPT             Prompt text (overridden by --prompt)
    MYSH_PROCFS             procfs root (overridden by --procfs)
    MYSH_DEBUG              Debug level (overridden by --debug)
    MYSH_LOG                Diagnostic log filter [default: mysh=warn]

Type 'help' in the shell for built-in commands."#
    );
}

/// Print version.
pub fn print_version() {
    println!("mysh {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error(transparent)]
    Lexopt(#[from] lexopt::Error),

    #[error("invalid value for --{0}: '{1}'")]
    InvalidValue(&'static str, String),

    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
}
