//! mysh - small command interpreter
//!
//! Usage:
//!   mysh                  Interactive shell (batch when stdin is not a terminal)
//!   mysh -c "command"     Execute single line
//!   mysh script.mysh      Execute script file

use std::fs::{self, File};
use std::io::{self, BufReader, IsTerminal, Write};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use mysh::cli::{self, Args};
use mysh::config::Config;
use mysh::logging;
use mysh::shell::input::{BatchSource, InteractiveSource};
use mysh::Shell;

fn main() {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("mysh: {}", err);
            eprintln!("Try 'mysh --help' for more information.");
            std::process::exit(2);
        }
    };

    if args.help {
        cli::print_help();
        return;
    }
    if args.version {
        cli::print_version();
        return;
    }

    logging::init();

    let code = match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("mysh: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}

fn run(args: &Args) -> Result<i32> {
    let config = Config::load(args).context("invalid configuration")?;
    let mut shell = Shell::with_config(&config)?;

    if config.load_rc {
        load_myshrc(&mut shell);
        if shell.should_exit {
            return Ok(shell.exit_status);
        }
    }

    if let Some(command) = &args.command {
        shell.process_line(command);
        shell.out.flush().context("failed to flush output")?;
        return Ok(shell.exit_status);
    }

    if let Some(path) = &args.script {
        let file =
            File::open(path).with_context(|| format!("cannot open '{}'", path.display()))?;
        let mut source = BatchSource::new(BufReader::new(file));
        return Ok(shell.run(&mut source));
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        let mut source = InteractiveSource::new()?;
        Ok(shell.run(&mut source))
    } else {
        // a BufReader rather than the stdin lock: builtins such as cpcat read stdin too
        let mut source = BatchSource::new(BufReader::new(stdin));
        Ok(shell.run(&mut source))
    }
}

fn load_myshrc(shell: &mut Shell) {
    let Some(path) = Config::rc_path() else {
        return;
    };

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot read startup file");
            return;
        }
    };

    debug!(path = %path.display(), "running startup file");
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        shell.process_line(line);
        if shell.should_exit {
            break;
        }
    }

    // replays are only meaningful for interactive input
    shell.replay = None;
}
