//! Best-effort process and repository introspection.
//!
//! Every probe here may fail (process gone, tool missing, not a repository).
//! Failures resolve to `None` or empty values and are retried on the next
//! refresh cycle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{ExternalTerminal, SessionInfo};

/// Upper bound on the shell -> CLI -> tool chain we follow
const MAX_DESCENDANT_DEPTH: usize = 16;

const SHELL_NAMES: &[&str] = &["zsh", "bash", "fish", "sh", "tcsh", "csh"];

async fn run(program: &str, args: &[&str], cwd: Option<&Path>) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).stderr(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    match cmd.output().await {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(_) => None,
        Err(e) => {
            debug!(program, error = %e, "Introspection command failed");
            None
        }
    }
}

/// Short command name of a process
pub async fn process_name(pid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    if let Ok(comm) = tokio::fs::read_to_string(format!("/proc/{}/comm", pid)).await {
        let comm = comm.trim();
        if !comm.is_empty() {
            return Some(comm.to_string());
        }
    }
    let pid = pid.to_string();
    let out = run("ps", &["-o", "comm=", "-p", &pid], None).await?;
    let name = out.trim();
    (!name.is_empty()).then(|| name.to_string())
}

async fn first_child(pid: u32) -> Option<u32> {
    let pid = pid.to_string();
    let out = run("pgrep", &["-P", &pid], None).await?;
    out.lines().find_map(|l| l.trim().parse().ok())
}

/// Follow the first child at each level down to the deepest live process.
///
/// When several children exist only the first is followed; concurrent
/// children are not disambiguated. A failed probe keeps the last good pid.
pub async fn deepest_descendant(root: u32) -> u32 {
    let mut current = root;
    for _ in 0..MAX_DESCENDANT_DEPTH {
        match first_child(current).await {
            Some(child) if child != current => current = child,
            _ => break,
        }
    }
    current
}

/// Current working directory of a process
pub async fn working_dir(pid: u32) -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    if let Ok(path) = tokio::fs::read_link(format!("/proc/{}/cwd", pid)).await {
        return Some(path);
    }
    let pid = pid.to_string();
    let out = run("lsof", &["-a", "-p", &pid, "-d", "cwd", "-Fn"], None).await?;
    parse_lsof_cwd(&out).map(PathBuf::from)
}

fn parse_lsof_cwd(out: &str) -> Option<&str> {
    out.lines()
        .find_map(|l| l.strip_prefix('n'))
        .filter(|p| !p.is_empty())
}

/// Repository name (from the common git dir's parent) and current branch.
///
/// Linked worktrees share the main checkout's common dir, so they report the
/// main repository's name. Returns empty strings outside a repository.
pub async fn repo_identity(cwd: &Path) -> (String, String) {
    let Some(common) = run("git", &["rev-parse", "--git-common-dir"], Some(cwd)).await else {
        return (String::new(), String::new());
    };
    let repo = repo_name_from_common_dir(cwd, common.trim());
    let branch = run("git", &["rev-parse", "--abbrev-ref", "HEAD"], Some(cwd))
        .await
        .map(|b| b.trim().to_string())
        .unwrap_or_default();
    (repo, branch)
}

fn repo_name_from_common_dir(cwd: &Path, common: &str) -> String {
    if common.is_empty() {
        return String::new();
    }
    let common = cwd.join(common);
    let common = common.canonicalize().unwrap_or(common);
    common
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Resolve cwd and repository identity starting from a session's shell pid
pub async fn session_info(root_pid: u32) -> SessionInfo {
    let leaf = deepest_descendant(root_pid).await;
    let cwd = match working_dir(leaf).await {
        Some(cwd) => cwd,
        None => match working_dir(root_pid).await {
            Some(cwd) => cwd,
            None => return SessionInfo::default(),
        },
    };
    let (git_repo, git_branch) = repo_identity(&cwd).await;
    SessionInfo {
        cwd: cwd.to_string_lossy().into_owned(),
        git_repo,
        git_branch,
    }
}

/// Interactive shells on a tty that this engine does not own, one per cwd
pub async fn discover_terminals(owned: &[u32]) -> Vec<ExternalTerminal> {
    let Some(table) = run("ps", &["-axo", "pid=,tty=,comm="], None).await else {
        return Vec::new();
    };
    let own_pid = std::process::id();
    let mut seen = HashSet::new();
    let mut terminals = Vec::new();

    for candidate in parse_process_table(&table) {
        if candidate.pid == own_pid || owned.contains(&candidate.pid) {
            continue;
        }
        let Some(cwd) = working_dir(candidate.pid).await else {
            continue;
        };
        let cwd = cwd.to_string_lossy().into_owned();
        if cwd.is_empty() || !seen.insert(cwd.clone()) {
            continue;
        }
        terminals.push(ExternalTerminal { cwd, ..candidate });
    }
    terminals
}

fn parse_process_table(table: &str) -> Vec<ExternalTerminal> {
    table
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let tty = parts.next()?;
            let comm = parts.collect::<Vec<_>>().join(" ");
            if tty == "?" || tty == "??" || tty.is_empty() {
                return None;
            }
            let shell = base_name(comm.trim_start_matches('-'));
            if !SHELL_NAMES.contains(&shell.as_str()) {
                return None;
            }
            Some(ExternalTerminal {
                pid,
                tty: tty.to_string(),
                shell,
                cwd: String::new(),
            })
        })
        .collect()
}

/// Last path component of a process name ("/bin/zsh" -> "zsh")
pub fn base_name(name: &str) -> String {
    name.rsplit('/').next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsof_cwd() {
        let out = "p123\nfcwd\nn/Users/me/project\n";
        assert_eq!(parse_lsof_cwd(out), Some("/Users/me/project"));
        assert_eq!(parse_lsof_cwd("p123\n"), None);
    }

    #[test]
    fn test_parse_process_table_keeps_tty_shells() {
        let table = "  101 ttys001  -zsh\n  102 ??       /usr/sbin/cron\n  103 pts/2    /bin/bash\n  104 pts/3    vim\n";
        let found = parse_process_table(table);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].pid, 101);
        assert_eq!(found[0].shell, "zsh");
        assert_eq!(found[1].tty, "pts/2");
        assert_eq!(found[1].shell, "bash");
    }

    #[test]
    fn test_repo_name_uses_common_dir_parent() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("myrepo");
        std::fs::create_dir_all(main.join(".git")).unwrap();
        assert_eq!(repo_name_from_common_dir(&main, ".git"), "myrepo");

        let worktree = dir.path().join("wt");
        std::fs::create_dir_all(&worktree).unwrap();
        let common = main.join(".git");
        assert_eq!(
            repo_name_from_common_dir(&worktree, common.to_str().unwrap()),
            "myrepo"
        );
        assert_eq!(repo_name_from_common_dir(&worktree, ""), "");
    }

    #[tokio::test]
    async fn test_repo_identity_outside_repo_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, branch) = repo_identity(dir.path()).await;
        // tempdirs are normally outside any checkout
        if repo.is_empty() {
            assert!(branch.is_empty());
        }
    }

    #[tokio::test]
    async fn test_deepest_descendant_follows_child_chain() {
        let mut shell = Command::new("sh")
            .args(["-c", "sleep 5; true"])
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = shell.id().unwrap();

        // The shell forks sleep shortly after starting
        let mut leaf_name = None;
        for _ in 0..50 {
            let leaf = deepest_descendant(pid).await;
            if leaf != pid {
                leaf_name = process_name(leaf).await;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        shell.kill().await.unwrap();
        assert_eq!(leaf_name.as_deref(), Some("sleep"));
    }

    #[tokio::test]
    async fn test_deepest_descendant_of_leaf_is_itself() {
        let me = std::process::id();
        let leaf = deepest_descendant(u32::MAX - 1).await;
        assert_eq!(leaf, u32::MAX - 1);
        assert!(process_name(me).await.is_some());
    }
}
