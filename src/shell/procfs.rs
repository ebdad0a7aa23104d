//! Process listing from a procfs tree

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    pub state: char,
    pub name: String,
}

/// Numeric subdirectories of `root`, sorted.
pub fn list_pids(root: &Path) -> Result<Vec<i32>> {
    let entries = fs::read_dir(root)
        .with_context(|| format!("cannot read '{}'", root.display()))?;

    let mut pids: Vec<i32> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
        .filter(|&pid: &i32| pid > 0)
        .collect();

    pids.sort_unstable();
    Ok(pids)
}

/// Parse the first line of `/proc/<pid>/stat`.
///
/// The command name sits in parentheses and may itself contain spaces or
/// parentheses, so it spans from the first `(` to the last `)`.
pub fn parse_stat(line: &str) -> Option<ProcessInfo> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    if close < open {
        return None;
    }

    let pid = line[..open].trim().parse().ok()?;
    let name = line[open + 1..close].to_string();

    let mut rest = line[close + 1..].split_whitespace();
    let state = rest.next()?.chars().next()?;
    let ppid = rest.next()?.parse().ok()?;

    Some(ProcessInfo { pid, ppid, state, name })
}

/// Every process whose `stat` record can be read and parsed, sorted by pid.
pub fn list_processes(root: &Path) -> Result<Vec<ProcessInfo>> {
    let mut processes = Vec::new();

    for pid in list_pids(root)? {
        let path = root.join(pid.to_string()).join("stat");
        // processes can exit while we scan
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping unreadable stat");
                continue;
            }
        };
        if let Some(info) = content.lines().next().and_then(parse_stat) {
            processes.push(info);
        }
    }

    processes.sort_by_key(|p| p.pid);
    Ok(processes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_proc() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (pid, stat) in [
            (42, "42 (worker) S 1 42 42 0 -1"),
            (7, "7 (a (b) c) R 42 7 7 0 -1"),
            (100, "garbage"),
        ] {
            let p = dir.path().join(pid.to_string());
            fs::create_dir(&p).unwrap();
            fs::write(p.join("stat"), format!("{}\n", stat)).unwrap();
        }
        fs::create_dir(dir.path().join("self_like")).unwrap();
        fs::create_dir(dir.path().join("0")).unwrap();
        fs::write(dir.path().join("99"), "not a dir").unwrap();
        dir
    }

    #[test]
    fn test_list_pids_numeric_dirs_sorted() {
        let dir = fake_proc();
        assert_eq!(list_pids(dir.path()).unwrap(), vec![7, 42, 100]);
    }

    #[test]
    fn test_parse_stat_plain_and_nested_parens() {
        let info = parse_stat("42 (worker) S 1 42").unwrap();
        assert_eq!(
            info,
            ProcessInfo { pid: 42, ppid: 1, state: 'S', name: "worker".into() }
        );

        let info = parse_stat("7 (a (b) c) R 42").unwrap();
        assert_eq!(info.name, "a (b) c");
        assert_eq!(info.ppid, 42);

        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_list_processes_skips_bad_records() {
        let dir = fake_proc();
        let procs = list_processes(dir.path()).unwrap();
        let pids: Vec<_> = procs.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![7, 42]);
    }

    #[test]
    fn test_list_pids_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_pids(&dir.path().join("nope")).is_err());
    }
}
