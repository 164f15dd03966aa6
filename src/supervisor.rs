//! The supervisor: one stenographer process per active session file.
//!
//! Every cycle it enumerates session files whose mtime is fresh, spawns a
//! `scrivener steno` child for each new one, and retires children whose
//! sessions have gone stale — SIGTERM first, SIGKILL after the grace
//! period. The handle map is process-local and rebuildable: children log to
//! per-session files and persist their own positions, so a supervisor
//! restart loses nothing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::{expand_tilde, ScrivenerConfig};
use crate::steno::records::SessionKind;

/// An active session file and which producer wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveSession {
    pub path: PathBuf,
    pub kind: SessionKind,
}

/// Enumerate session files with mtime within `stale_threshold`.
///
/// Claude sessions are `**/*.jsonl` under the projects root, excluding
/// `agent-*` scratch files. Gemini sessions are `*/chats/*.json` under the
/// tmp root. Unreadable entries are skipped.
pub fn discover_sessions(
    claude_dir: &Path,
    gemini_dir: &Path,
    stale_threshold: Duration,
) -> Vec<ActiveSession> {
    let now = SystemTime::now();
    let mut sessions = Vec::new();

    let mut claude_files = Vec::new();
    collect_files(claude_dir, &mut claude_files);
    for path in claude_files {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let is_session = path.extension().and_then(|e| e.to_str()) == Some("jsonl")
            && !name.map(|n| n.starts_with("agent-")).unwrap_or(true);
        if is_session && is_fresh(&path, now, stale_threshold) {
            sessions.push(ActiveSession {
                path,
                kind: SessionKind::Claude,
            });
        }
    }

    let mut gemini_files = Vec::new();
    collect_files(gemini_dir, &mut gemini_files);
    for path in gemini_files {
        let in_chats = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n == "chats")
            .unwrap_or(false);
        let is_session = in_chats && path.extension().and_then(|e| e.to_str()) == Some("json");
        if is_session && is_fresh(&path, now, stale_threshold) {
            sessions.push(ActiveSession {
                path,
                kind: SessionKind::Gemini,
            });
        }
    }

    sessions
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

fn is_fresh(path: &Path, now: SystemTime, stale_threshold: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| now.duration_since(mtime).ok())
        .map(|age| age < stale_threshold)
        .unwrap_or(false)
}

/// The reconciliation delta: sessions to spawn for and children to retire.
pub fn diff_sessions(
    active: &[ActiveSession],
    running: &HashSet<PathBuf>,
) -> (Vec<ActiveSession>, Vec<PathBuf>) {
    let active_paths: HashSet<&PathBuf> = active.iter().map(|s| &s.path).collect();

    let to_spawn = active
        .iter()
        .filter(|s| !running.contains(&s.path))
        .cloned()
        .collect();
    let to_retire = running
        .iter()
        .filter(|p| !active_paths.contains(p))
        .cloned()
        .collect();

    (to_spawn, to_retire)
}

pub struct Supervisor {
    config: ScrivenerConfig,
    children: HashMap<PathBuf, Child>,
}

impl Supervisor {
    pub fn new(config: ScrivenerConfig) -> Self {
        Self {
            config,
            children: HashMap::new(),
        }
    }

    /// Spawn a stenographer child for one session, logging to its own file.
    fn spawn_steno(&mut self, session: &ActiveSession) -> Result<()> {
        let logs_dir = self.config.logs_dir();
        std::fs::create_dir_all(&logs_dir)?;

        let stem = session
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".into());
        let log_path = logs_dir.join(format!("steno-{stem}.log"));
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;
        let stderr_file = log_file.try_clone()?;

        let exe = std::env::current_exe().context("cannot locate own executable")?;
        let child = Command::new(exe)
            .arg("steno")
            .arg("--session")
            .arg(&session.path)
            .arg("--source")
            .arg(session.kind.source_tag())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .context("failed to spawn stenographer")?;

        info!(
            session = %session.path.display(),
            pid = child.id().unwrap_or(0),
            "stenographer spawned"
        );
        self.children.insert(session.path.clone(), child);
        Ok(())
    }

    /// Retire one child: SIGTERM, wait out the grace period, then SIGKILL.
    async fn retire(&mut self, path: &Path) {
        let Some(mut child) = self.children.remove(path) else {
            return;
        };
        let grace = Duration::from_secs(self.config.supervisor.grace_period_seconds);

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(session = %path.display(), %status, "stenographer exited");
            }
            Ok(Err(e)) => {
                warn!(session = %path.display(), error = %e, "error waiting for stenographer");
            }
            Err(_) => {
                warn!(session = %path.display(), "grace period expired; killing");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }

    /// Drop handles for children that exited on their own.
    fn reap_exited(&mut self) {
        let exited: Vec<PathBuf> = self
            .children
            .iter_mut()
            .filter_map(|(path, child)| match child.try_wait() {
                Ok(Some(status)) => {
                    info!(session = %path.display(), %status, "stenographer exited on its own");
                    Some(path.clone())
                }
                _ => None,
            })
            .collect();
        for path in exited {
            self.children.remove(&path);
        }
    }

    /// One supervision cycle.
    pub async fn cycle(&mut self) {
        self.reap_exited();

        let active = discover_sessions(
            &expand_tilde(&self.config.supervisor.claude_dir),
            &expand_tilde(&self.config.supervisor.gemini_dir),
            Duration::from_secs(self.config.supervisor.stale_threshold_seconds),
        );
        let running: HashSet<PathBuf> = self.children.keys().cloned().collect();
        let (to_spawn, to_retire) = diff_sessions(&active, &running);

        for session in &to_spawn {
            if let Err(e) = self.spawn_steno(session) {
                warn!(session = %session.path.display(), error = %e, "spawn failed");
            }
        }
        for path in &to_retire {
            self.retire(path).await;
        }

        info!(instances = self.children.len(), "supervising stenographers");
    }

    /// Terminate every child. Called on shutdown.
    pub async fn shutdown(&mut self) {
        let paths: Vec<PathBuf> = self.children.keys().cloned().collect();
        for path in paths {
            self.retire(&path).await;
        }
    }
}

/// Run the supervisor until shutdown (or one cycle with `once`).
pub async fn run(config: &ScrivenerConfig, once: bool) -> Result<()> {
    let interval = Duration::from_secs(config.supervisor.check_interval_seconds);
    let mut supervisor = Supervisor::new(config.clone());

    info!(
        claude_dir = %config.supervisor.claude_dir,
        gemini_dir = %config.supervisor.gemini_dir,
        "supervisor started"
    );

    loop {
        supervisor.cycle().await;

        if once {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = crate::steno::shutdown_signal() => {
                info!("supervisor shutting down; terminating children");
                break;
            }
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "{}").unwrap();
    }

    #[test]
    fn discovers_fresh_claude_and_gemini_sessions() {
        let root = tempfile::tempdir().unwrap();
        let claude = root.path().join("claude/projects");
        let gemini = root.path().join("gemini/tmp");

        touch(&claude.join("proj-a/session-1.jsonl"));
        touch(&claude.join("proj-a/agent-scratch.jsonl")); // excluded
        touch(&claude.join("proj-a/notes.txt")); // wrong extension
        touch(&gemini.join("hash123/chats/chat-1.json"));
        touch(&gemini.join("hash123/other/nope.json")); // not under chats/

        let sessions = discover_sessions(&claude, &gemini, Duration::from_secs(300));
        assert_eq!(sessions.len(), 2);

        let kinds: Vec<SessionKind> = sessions.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SessionKind::Claude));
        assert!(kinds.contains(&SessionKind::Gemini));
    }

    #[test]
    fn stale_sessions_are_not_active() {
        let root = tempfile::tempdir().unwrap();
        let claude = root.path().join("projects");
        touch(&claude.join("p/old.jsonl"));

        // Zero threshold: everything counts as stale.
        let sessions = discover_sessions(&claude, &root.path().join("none"), Duration::ZERO);
        assert!(sessions.is_empty());
    }

    #[test]
    fn missing_roots_yield_no_sessions() {
        let root = tempfile::tempdir().unwrap();
        let sessions = discover_sessions(
            &root.path().join("no-claude"),
            &root.path().join("no-gemini"),
            Duration::from_secs(300),
        );
        assert!(sessions.is_empty());
    }

    #[test]
    fn diff_computes_spawns_and_retirements() {
        let a = ActiveSession {
            path: PathBuf::from("/s/a.jsonl"),
            kind: SessionKind::Claude,
        };
        let b = ActiveSession {
            path: PathBuf::from("/s/b.jsonl"),
            kind: SessionKind::Claude,
        };
        let running: HashSet<PathBuf> =
            [PathBuf::from("/s/b.jsonl"), PathBuf::from("/s/gone.jsonl")]
                .into_iter()
                .collect();

        let (to_spawn, to_retire) = diff_sessions(&[a.clone(), b], &running);
        assert_eq!(to_spawn, vec![a]);
        assert_eq!(to_retire, vec![PathBuf::from("/s/gone.jsonl")]);
    }

    #[test]
    fn diff_is_empty_at_steady_state() {
        let a = ActiveSession {
            path: PathBuf::from("/s/a.jsonl"),
            kind: SessionKind::Claude,
        };
        let running: HashSet<PathBuf> = [PathBuf::from("/s/a.jsonl")].into_iter().collect();
        let (to_spawn, to_retire) = diff_sessions(&[a], &running);
        assert!(to_spawn.is_empty());
        assert!(to_retire.is_empty());
    }
}
