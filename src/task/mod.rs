//! Background job reaping
//!
//! Background children (external programs and forked builtins) are registered
//! here and collected by a dedicated thread. The thread only ever waits on
//! pids it was given, so foreground waits keep their exit statuses.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct State {
    pids: HashSet<Pid>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of the reaper thread and its pid registry.
pub struct Reaper {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn spawn() -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("reaper".into())
            .spawn(move || reap_loop(&worker))
            .context("failed to start reaper thread")?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Hand a background child over for collection.
    pub fn register(&self, pid: Pid) {
        self.shared.lock().pids.insert(pid);
        self.shared.wakeup.notify_all();
        debug!(pid = pid.as_raw(), "registered background child");
    }

    /// Number of registered children not yet collected.
    pub fn pending(&self) -> usize {
        self.shared.lock().pids.len()
    }

    /// Stop tracking `pid`, which an explicit wait has already collected.
    pub fn unregister(&self, pid: Pid) {
        if self.shared.lock().pids.remove(&pid) {
            debug!(pid = pid.as_raw(), "unregistered background child");
        }
    }

    #[cfg(test)]
    pub fn is_tracked(&self, pid: Pid) -> bool {
        self.shared.lock().pids.contains(&pid)
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        // set under the lock so the worker cannot miss the wakeup
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Whether `pid` is gone: exited, killed, or already collected elsewhere.
fn try_reap(pid: Pid) -> bool {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(WaitStatus::Exited(_, code)) => {
            debug!(pid = pid.as_raw(), code, "reaped background child");
            true
        }
        Ok(WaitStatus::Signaled(_, signal, _)) => {
            debug!(pid = pid.as_raw(), ?signal, "reaped background child");
            true
        }
        // stopped / continued: still ours to collect later
        Ok(_) => false,
        Err(Errno::EINTR) => false,
        Err(Errno::ECHILD) => {
            trace!(pid = pid.as_raw(), "child already collected");
            true
        }
        Err(err) => {
            debug!(pid = pid.as_raw(), error = %err, "dropping unwaitable pid");
            true
        }
    }
}

fn reap_loop(shared: &Shared) {
    let mut state = shared.lock();

    loop {
        if state.shutdown {
            break;
        }

        if state.pids.is_empty() {
            state = shared
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        }

        let snapshot: Vec<Pid> = state.pids.iter().copied().collect();
        drop(state);

        let finished: Vec<Pid> = snapshot.into_iter().filter(|&pid| try_reap(pid)).collect();

        state = shared.lock();
        for pid in &finished {
            state.pids.remove(pid);
        }

        if state.pids.is_empty() || state.shutdown {
            continue;
        }

        state = shared
            .wakeup
            .wait_timeout(state, POLL_INTERVAL)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}
