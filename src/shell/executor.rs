//! Command executor - builtins, external programs and pipelines

use std::ffi::CString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, dup, dup2, execvp, fork, ForkResult, Pid};
use os_pipe::{PipeReader, PipeWriter};
use tracing::{debug, trace};

use super::builtin::Builtin;
use super::parser::{self, Redirects};
use super::Shell;

const STDIN_FILENO: RawFd = 0;
const STDOUT_FILENO: RawFd = 1;

/// Status for a spawn/exec failure.
const EXEC_FAILED: i32 = 127;

/// Exit status for a failed handler: the OS error code behind it, or 1.
pub fn error_status(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| {
            e.downcast_ref::<io::Error>()
                .and_then(io::Error::raw_os_error)
                .or_else(|| e.downcast_ref::<Errno>().map(|errno| *errno as i32))
        })
        .unwrap_or(1)
}

fn report(err: &anyhow::Error) -> i32 {
    eprintln!("mysh: {:#}", err);
    error_status(err)
}

/// Route a parsed command to its builtin or to an external program.
pub fn dispatch(shell: &mut Shell, tokens: &[String], redirects: &Redirects) {
    match Builtin::from_name(&tokens[0]) {
        Some(builtin) => run_builtin(shell, builtin, &tokens[1..], redirects),
        None => run_external(shell, tokens, redirects),
    }
}

fn open_input(path: &str) -> Result<File> {
    File::open(path).with_context(|| format!("cannot open '{}'", path))
}

fn open_output(path: &str) -> Result<File> {
    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("cannot open '{}'", path))
}

fn child_status(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(..) => Some(1),
        _ => None,
    }
}

/// Block until `pid` terminates and return its status (1 if killed by a signal).
pub fn wait_for(pid: Pid) -> nix::Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(code) = child_status(status) {
                    trace!(pid = pid.as_raw(), code, "child finished");
                    return Ok(code);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Block until any child terminates and return its pid and status; `None`
/// when there are no children left.
pub fn wait_any() -> nix::Result<Option<(Pid, i32)>> {
    loop {
        match waitpid(None::<Pid>, None) {
            Ok(status) => {
                if let (Some(pid), Some(code)) = (status.pid(), child_status(status)) {
                    trace!(pid = pid.as_raw(), code, "child finished");
                    return Ok(Some((pid, code)));
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(None),
            Err(err) => return Err(err),
        }
    }
}

fn spawn_external(tokens: &[String], redirects: &Redirects) -> Result<std::process::Child, i32> {
    let mut cmd = Command::new(&tokens[0]);
    cmd.args(&tokens[1..]);

    if let Some(path) = &redirects.output {
        let file = open_output(path).map_err(|e| report(&e))?;
        cmd.stdout(Stdio::from(file));
    }
    if let Some(path) = &redirects.input {
        let file = open_input(path).map_err(|e| report(&e))?;
        cmd.stdin(Stdio::from(file));
    }

    cmd.spawn().map_err(|err| {
        eprintln!("mysh: {}: {}", tokens[0], err);
        EXEC_FAILED
    })
}

/// Run a program found through `PATH`, in the foreground or in the background.
fn run_external(shell: &mut Shell, tokens: &[String], redirects: &Redirects) {
    let _ = shell.out.flush();

    let child = match spawn_external(tokens, redirects) {
        Ok(child) => child,
        Err(status) => {
            shell.exit_status = status;
            return;
        }
    };
    let pid = Pid::from_raw(child.id() as i32);
    debug!(program = %tokens[0], pid = pid.as_raw(), background = redirects.background, "spawned");

    if redirects.background {
        shell.reaper.register(pid);
        return;
    }

    let mut child = child;
    shell.exit_status = match child.wait() {
        Ok(status) => status.code().unwrap_or(1),
        Err(err) => report(&anyhow::Error::new(err).context("wait")),
    };
}

/// Standard descriptors remapped onto redirect targets for the current process.
///
/// Dropping the guard flushes stdout, restores the saved descriptors and
/// closes the copies.
struct StdioRedirect {
    saved_stdin: Option<RawFd>,
    saved_stdout: Option<RawFd>,
}

impl StdioRedirect {
    fn apply(redirects: &Redirects) -> Result<Self> {
        let mut guard = StdioRedirect {
            saved_stdin: None,
            saved_stdout: None,
        };

        if let Some(path) = &redirects.input {
            let file = open_input(path)?;
            guard.saved_stdin = Some(dup(STDIN_FILENO).context("dup stdin")?);
            dup2(file.as_raw_fd(), STDIN_FILENO).context("dup2 stdin")?;
        }

        if let Some(path) = &redirects.output {
            let file = open_output(path)?;
            io::stdout().flush()?;
            guard.saved_stdout = Some(dup(STDOUT_FILENO).context("dup stdout")?);
            dup2(file.as_raw_fd(), STDOUT_FILENO).context("dup2 stdout")?;
        }

        trace!(input = ?redirects.input, output = ?redirects.output, "remapped stdio");
        Ok(guard)
    }
}

impl Drop for StdioRedirect {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        for (saved, target) in [
            (self.saved_stdin.take(), STDIN_FILENO),
            (self.saved_stdout.take(), STDOUT_FILENO),
        ] {
            if let Some(fd) = saved {
                let _ = dup2(fd, target);
                let _ = close(fd);
            }
        }
    }
}

/// Writer on the process stdout descriptor, independent of `io::stdout()`.
///
/// Forked children use this so they never touch a lock another thread may have
/// held at fork time.
fn fd_stdout() -> Box<dyn Write> {
    match dup(STDOUT_FILENO) {
        // SAFETY: `fd` was just returned by dup and is owned by nothing else.
        Ok(fd) => Box::new(unsafe { File::from_raw_fd(fd) }),
        Err(_) => Box::new(io::sink()),
    }
}

fn run_handler(shell: &mut Shell, builtin: Builtin, args: &[String]) -> i32 {
    match builtin.run(shell, args) {
        Ok(status) => status,
        Err(err) => report(&err),
    }
}

fn child_exit(status: i32) -> ! {
    // SAFETY: _exit skips atexit handlers and stdio teardown that belong to the parent.
    unsafe { nix::libc::_exit(status) }
}

/// Run a builtin in-process, or in a forked child when backgrounded.
fn run_builtin(shell: &mut Shell, builtin: Builtin, args: &[String], redirects: &Redirects) {
    if shell.debug_level > 0 {
        let mode = if redirects.background { "background" } else { "foreground" };
        let _ = writeln!(shell.out, "Executing builtin '{}' in {}", builtin.name(), mode);
    }
    let _ = shell.out.flush();

    let guard = if redirects.is_redirected() {
        match StdioRedirect::apply(redirects) {
            Ok(guard) => Some(guard),
            Err(err) => {
                shell.exit_status = report(&err);
                return;
            }
        }
    } else {
        None
    };

    if redirects.background {
        // SAFETY: the child only runs the handler and leaves through _exit.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                shell.out = fd_stdout();
                let status = run_handler(shell, builtin, args);
                let _ = shell.out.flush();
                child_exit(status);
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(builtin = builtin.name(), pid = child.as_raw(), "forked background builtin");
                shell.reaper.register(child);
            }
            Err(errno) => {
                shell.exit_status = report(&anyhow::Error::new(errno).context("fork"));
            }
        }
        drop(guard);
        return;
    }

    let previous = redirects
        .output
        .is_some()
        .then(|| std::mem::replace(&mut shell.out, Box::new(io::stdout())));

    let status = run_handler(shell, builtin, args);

    let _ = shell.out.flush();
    if let Some(previous) = previous {
        shell.out = previous;
    }
    drop(guard);

    shell.exit_status = status;
}

fn exec_program(tokens: &[String]) -> Result<()> {
    let argv = tokens
        .iter()
        .map(|t| CString::new(t.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("argument contains a NUL byte")?;
    execvp(&argv[0], &argv).with_context(|| format!("{}", tokens[0]))?;
    Ok(())
}

/// Body of pipeline stage `index`; never returns.
fn exec_stage(
    shell: &mut Shell,
    index: usize,
    stage: &str,
    pipes: Vec<(PipeReader, PipeWriter)>,
) -> ! {
    let wired = (|| -> Result<()> {
        if index > 0 {
            dup2(pipes[index - 1].0.as_raw_fd(), STDIN_FILENO).context("dup2 stdin")?;
        }
        if index < pipes.len() {
            dup2(pipes[index].1.as_raw_fd(), STDOUT_FILENO).context("dup2 stdout")?;
        }
        Ok(())
    })();
    drop(pipes);

    if let Err(err) = wired {
        child_exit(report(&err));
    }

    let tokens = parser::expand_variables(stage, &shell.vars).and_then(|l| parser::tokenize(&l));
    let tokens = match tokens {
        Ok(tokens) if !tokens.is_empty() => tokens,
        Ok(_) => child_exit(0),
        Err(err) => {
            eprintln!("mysh: {}", err);
            child_exit(1);
        }
    };

    match Builtin::from_name(&tokens[0]) {
        Some(builtin) => {
            shell.out = fd_stdout();
            let status = run_handler(shell, builtin, &tokens[1..]);
            let _ = shell.out.flush();
            child_exit(status);
        }
        None => {
            if let Err(err) = exec_program(&tokens) {
                eprintln!("mysh: {:#}", err);
            }
            child_exit(EXEC_FAILED);
        }
    }
}

/// Connect `stages` through pipes, run them concurrently and wait for all of them.
///
/// The result is the status of the last child waited on, i.e. the last stage.
pub fn run_pipeline(shell: &mut Shell, stages: &[String]) -> Result<i32> {
    shell.out.flush()?;
    io::stdout().flush()?;

    let mut pipes = Vec::with_capacity(stages.len().saturating_sub(1));
    for _ in 1..stages.len() {
        pipes.push(os_pipe::pipe().context("pipe")?);
    }

    let mut children: Vec<Pid> = Vec::with_capacity(stages.len());
    for (index, stage) in stages.iter().enumerate() {
        // SAFETY: the child wires its descriptors, then execs or leaves through _exit.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => exec_stage(shell, index, stage, pipes),
            Ok(ForkResult::Parent { child }) => {
                debug!(stage = %stage, pid = child.as_raw(), "started pipeline stage");
                children.push(child);
            }
            Err(errno) => {
                drop(pipes);
                for pid in children {
                    let _ = wait_for(pid);
                }
                return Err(anyhow::Error::new(errno).context("fork"));
            }
        }
    }
    drop(pipes);

    let mut status = 0;
    for pid in children {
        status = wait_for(pid).with_context(|| format!("waitpid {}", pid))?;
    }
    Ok(status)
}
