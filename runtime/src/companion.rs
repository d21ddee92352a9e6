//! Companion Bridge Interface: the contract a running game's companion mod exposes
//! over its local WebSocket, consumed (not implemented) by this core to drive a
//! graceful stop before falling back to a hard kill via the process manager.

use std::path::Path;
use std::time::Duration;

use crate::process::ProcessManager;

#[derive(Debug, Clone)]
pub struct BridgeResponse {
    pub ok: bool,
    pub message: String,
}

/// Operations exposed by a running instance's companion mod. Implementations talk to
/// the per-session WebSocket the Launch Composer published the token for; this core
/// only calls through the trait, it never implements the wire protocol itself.
#[async_trait::async_trait]
pub trait CompanionBridge: Send + Sync {
    async fn ping(&self, timeout: Duration) -> BridgeResponse;
    async fn close_game(&self, timeout: Duration) -> BridgeResponse;
    async fn reload_server(&self) -> BridgeResponse;
    async fn send_command(&self, text: &str) -> BridgeResponse;
}

const PING_TIMEOUT: Duration = Duration::from_millis(1500);
const CLOSE_GAME_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const POLL_DEADLINE: Duration = Duration::from_secs(8);
const FORCE_KILL_WAIT: Duration = Duration::from_secs(4);

/// Run the graceful-stop sequence from spec §4.11:
/// 1. If the companion isn't reachable (ping fails within 1.5s) or `force` was
///    requested, go straight to the force-kill path and wait up to 4s.
/// 2. Otherwise call `closeGame` with a 15s timeout, then poll for exit every 200ms
///    up to 8s.
/// 3. On timeout, fall back to the force-kill path.
pub async fn stop_game(
    processes: &ProcessManager,
    scope: &Path,
    bridge: Option<&dyn CompanionBridge>,
    force: bool,
    handler: impl crate::process::Handler,
) -> Result<(), crate::process::Error> {
    let companion_reachable = !force && match bridge {
        Some(bridge) => bridge.ping(PING_TIMEOUT).await.ok,
        None => false,
    };

    if !companion_reachable {
        return force_kill(processes, scope, handler).await;
    }

    let bridge = bridge.expect("companion_reachable implies bridge is Some");
    let close = bridge.close_game(CLOSE_GAME_TIMEOUT).await;
    if !close.ok {
        return force_kill(processes, scope, handler).await;
    }

    let deadline = tokio::time::Instant::now() + POLL_DEADLINE;
    while tokio::time::Instant::now() < deadline {
        if matches!(processes.state(scope).await, Some(crate::process::State::Exited { .. }) | None) {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    force_kill(processes, scope, handler).await
}

async fn force_kill(processes: &ProcessManager, scope: &Path, handler: impl crate::process::Handler) -> Result<(), crate::process::Error> {
    processes.kill(scope, true, handler).await?;

    let deadline = tokio::time::Instant::now() + FORCE_KILL_WAIT;
    while tokio::time::Instant::now() < deadline {
        if matches!(processes.state(scope).await, Some(crate::process::State::Exited { .. }) | None) {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct UnresponsiveBridge {
        close_calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl CompanionBridge for UnresponsiveBridge {
        async fn ping(&self, _timeout: Duration) -> BridgeResponse {
            BridgeResponse { ok: true, message: String::new() }
        }
        async fn close_game(&self, _timeout: Duration) -> BridgeResponse {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            // Simulate the companion accepting the request but the game never exiting.
            BridgeResponse { ok: true, message: String::new() }
        }
        async fn reload_server(&self) -> BridgeResponse {
            BridgeResponse { ok: true, message: String::new() }
        }
        async fn send_command(&self, _text: &str) -> BridgeResponse {
            BridgeResponse { ok: true, message: String::new() }
        }
    }

    #[tokio::test]
    async fn stop_game_falls_back_to_force_kill_when_game_never_exits() {
        let manager = ProcessManager::new();
        let scope = std::path::PathBuf::from("/tmp/companion-test-scope");

        let mut child = tokio::process::Command::new(if cfg!(windows) { "cmd" } else { "sleep" })
            .args(if cfg!(windows) { vec!["/c", "timeout 30"] } else { vec!["30"] })
            .spawn()
            .unwrap();
        let _ = child.id();
        manager.attach_launched(scope.clone(), child, None, ()).await;

        let close_calls = Arc::new(AtomicUsize::new(0));
        let bridge = UnresponsiveBridge { close_calls: close_calls.clone() };

        let started = std::time::Instant::now();
        stop_game(&manager, &scope, Some(&bridge), false, ()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(close_calls.load(Ordering::SeqCst), 1);
        assert!(elapsed < Duration::from_secs(15), "should fall back well before the poll deadline plus slack: {elapsed:?}");
    }
}
