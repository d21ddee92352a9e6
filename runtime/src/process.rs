//! Process Manager: tracks at most one live [`TrackedProcess`] per project scope and
//! reacts to process exit in the background. Grounded on vesta-project-launcher's
//! `ProcessRegistry` (`Arc<RwLock<HashMap<String, GameInstance>>>` plus a background
//! monitoring task), adapted here to watch each spawned child directly instead of
//! polling a PID table, and to use `sysinfo` only for the attach-to-foreign-pid path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::Mutex;

crate::trait_event_handler! {
    pub trait Handler {
        fn on_process_event(event: Event<'_>);
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    Attached { scope: &'a Path, pid: u32 },
    Detached { scope: &'a Path },
    Exited { scope: &'a Path, exit_code: Option<i32> },
    KillRequested { scope: &'a Path, force: bool },
    KillFailed { scope: &'a Path },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no tracked process for this scope")]
    NotTracked,
}

/// Per-scope process state. `Initial` has no entry in the map at all; an entry always
/// starts `Attached` and terminates in `Exited` or is removed on `Detached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Attached,
    Exited { exit_code: Option<i32> },
    Detached,
}

/// Callback invoked from the background exit-watcher task, since a generic `impl
/// Handler` cannot be captured into a `'static` spawned future. Construct one from a
/// concrete [`Handler`] at the call site that needs exit notifications delivered
/// asynchronously (e.g. forwarding into a UI event bus).
pub type ExitListener = Arc<dyn Fn(&Path, Option<i32>) + Send + Sync>;

struct Entry {
    state: Arc<Mutex<State>>,
    pid: u32,
}

/// Guards the scope→entry map with one mutex; listeners are always invoked outside
/// the lock, per the shared-resource policy for the process manager map.
pub struct ProcessManager {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// The canonical scope key for a project directory: its realpath if it exists,
    /// else a normalized absolute path.
    pub fn scope_of(project_dir: &Path) -> PathBuf {
        std::fs::canonicalize(project_dir).unwrap_or_else(|_| {
            if project_dir.is_absolute() {
                project_dir.to_path_buf()
            } else {
                std::env::current_dir().map(|cwd| cwd.join(project_dir)).unwrap_or_else(|_| project_dir.to_path_buf())
            }
        })
    }

    pub async fn state(&self, scope: &Path) -> Option<State> {
        let entries = self.entries.lock().await;
        let entry = entries.get(scope)?;
        Some(*entry.state.lock().await)
    }

    /// Register a process this core just spawned, and start watching its exit in the
    /// background. Displaces and emits `Detached` for any existing entry at `scope`.
    pub async fn attach_launched(&self, scope: PathBuf, mut child: Child, listener: Option<ExitListener>, mut handler: impl Handler) -> u32 {
        let pid = child.id().unwrap_or(0);
        let state = Arc::new(Mutex::new(State::Attached));

        self.displace(&scope, &mut handler).await;
        self.entries.lock().await.insert(scope.clone(), Entry { state: state.clone(), pid });
        handler.on_process_event(Event::Attached { scope: &scope, pid });

        let watch_scope = scope.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let exit_code = status.ok().and_then(|s| s.code());
            let mut guard = state.lock().await;
            if *guard == State::Attached {
                *guard = State::Exited { exit_code };
                drop(guard);
                if let Some(listener) = listener {
                    listener(&watch_scope, exit_code);
                }
            }
        });

        pid
    }

    /// Register a foreign PID this core did not spawn, only if the OS reports it
    /// alive. Returns `false` (without registering) if the PID is not running.
    pub async fn attach_to_pid(&self, scope: PathBuf, pid: u32, mut handler: impl Handler) -> bool {
        use sysinfo::{Pid, System};
        let mut system = System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        if system.process(Pid::from_u32(pid)).is_none() {
            return false;
        }

        self.displace(&scope, &mut handler).await;
        self.entries.lock().await.insert(scope.clone(), Entry { state: Arc::new(Mutex::new(State::Attached)), pid });
        handler.on_process_event(Event::Attached { scope: &scope, pid });
        true
    }

    /// Remove tracking for `scope` without killing the underlying process.
    pub async fn detach(&self, scope: &Path, mut handler: impl Handler) -> Result<(), Error> {
        let entry = self.entries.lock().await.remove(scope).ok_or(Error::NotTracked)?;
        *entry.state.lock().await = State::Detached;
        handler.on_process_event(Event::Detached { scope });
        Ok(())
    }

    /// Graceful terminate; escalate to a force-kill if still alive after `force`.
    /// Emits `KillRequested` then `Exited` on success, or `KillFailed` otherwise.
    pub async fn kill(&self, scope: &Path, force: bool, mut handler: impl Handler) -> Result<(), Error> {
        let pid = {
            let entries = self.entries.lock().await;
            entries.get(scope).ok_or(Error::NotTracked)?.pid
        };

        handler.on_process_event(Event::KillRequested { scope, force });

        let terminated = terminate(pid, false) || (force && terminate(pid, true));

        if terminated {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(scope) {
                *entry.state.lock().await = State::Exited { exit_code: None };
            }
            handler.on_process_event(Event::Exited { scope, exit_code: None });
            Ok(())
        } else {
            handler.on_process_event(Event::KillFailed { scope });
            Ok(())
        }
    }

    async fn displace(&self, scope: &Path, handler: &mut impl Handler) {
        if let Some(entry) = self.entries.lock().await.remove(scope) {
            *entry.state.lock().await = State::Detached;
            handler.on_process_event(Event::Detached { scope });
        }
    }
}

/// Send a graceful-terminate signal, or force-kill when `force`. On Windows there is
/// no distinct graceful signal; both cases terminate the process outright.
fn terminate(pid: u32, force: bool) -> bool {
    use sysinfo::{Pid, System};
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    let Some(process) = system.process(Pid::from_u32(pid)) else { return false };

    #[cfg(unix)]
    {
        if force {
            process.kill_with(sysinfo::Signal::Kill).unwrap_or(false)
        } else {
            process.kill_with(sysinfo::Signal::Term).unwrap_or(false)
        }
    }
    #[cfg(not(unix))]
    {
        let _ = force;
        process.kill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_launched_then_detach() {
        let manager = ProcessManager::new();
        let scope = PathBuf::from("/tmp/project-a");

        let mut child = tokio::process::Command::new(if cfg!(windows) { "cmd" } else { "sleep" })
            .args(if cfg!(windows) { vec!["/c", "timeout 5"] } else { vec!["5"] })
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        manager.attach_launched(scope.clone(), child, None, ()).await;
        assert_eq!(manager.state(&scope).await, Some(State::Attached));

        manager.detach(&scope, ()).await.unwrap();
        assert!(manager.state(&scope).await.is_none());

        let _ = terminate(pid, true);
    }

    #[tokio::test]
    async fn attach_to_pid_rejects_dead_pid() {
        let manager = ProcessManager::new();
        let scope = PathBuf::from("/tmp/project-b");
        let attached = manager.attach_to_pid(scope.clone(), u32::MAX - 1, ()).await;
        assert!(!attached);
        assert!(manager.state(&scope).await.is_none());
    }
}
