//! Heartbeat sender to the current master name node
//!
//! A storage node sends its id as a WebSocket text frame every 2
//! seconds. Five consecutive failures against the current target walk
//! the configured name node list, highest priority first, until one
//! answers; if none do, it sleeps 5 seconds and starts the walk over.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::RwLock;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
const FAILURE_THRESHOLD: u32 = 5;
const RETRY_SLEEP: Duration = Duration::from_secs(5);
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Name nodes in priority order (highest priority first), and which one
/// the heartbeat loop currently believes is master.
pub struct MasterAddress {
    candidates: Vec<String>,
    current: AtomicUsize,
    resolved: RwLock<Option<String>>,
}

impl MasterAddress {
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates, current: AtomicUsize::new(0), resolved: RwLock::new(None) }
    }

    pub async fn current(&self) -> Option<String> {
        self.resolved.read().await.clone()
    }

    fn target(&self) -> Option<&str> {
        self.candidates.get(self.current.load(Ordering::SeqCst)).map(String::as_str)
    }

    fn advance(&self) {
        let next = (self.current.load(Ordering::SeqCst) + 1) % self.candidates.len().max(1);
        self.current.store(next, Ordering::SeqCst);
    }

    async fn mark_resolved(&self, addr: &str) {
        *self.resolved.write().await = Some(addr.to_string());
    }
}

/// Runs forever, sending one heartbeat frame per tick to whichever name
/// node the failover walk currently targets.
pub async fn run(sn_id: String, master: std::sync::Arc<MasterAddress>) {
    if master.candidates.is_empty() {
        tracing::warn!("no name nodes configured, heartbeat loop idle");
        return;
    }
    let mut consecutive_failures = 0u32;
    loop {
        let Some(target) = master.target().map(str::to_string) else {
            tokio::time::sleep(RETRY_SLEEP).await;
            continue;
        };
        match send_heartbeat(&target, &sn_id).await {
            Ok(()) => {
                consecutive_failures = 0;
                master.mark_resolved(&target).await;
            }
            Err(err) => {
                consecutive_failures += 1;
                tracing::warn!(target = %target, error = %err, consecutive_failures, "heartbeat failed");
                if consecutive_failures >= FAILURE_THRESHOLD {
                    consecutive_failures = 0;
                    master.advance();
                    if master.current.load(Ordering::SeqCst) == 0 {
                        tokio::time::sleep(RETRY_SLEEP).await;
                    }
                }
            }
        }
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
    }
}

async fn send_heartbeat(target: &str, sn_id: &str) -> anyhow::Result<()> {
    let url = format!("ws://{target}/heartbeat");
    let (mut socket, _) = connect_async(url).await?;
    socket.send(Message::Text(sn_id.to_string())).await?;
    match tokio::time::timeout(ACK_TIMEOUT, socket.next()).await {
        Ok(Some(Ok(_))) => Ok(()),
        Ok(Some(Err(err))) => Err(err.into()),
        Ok(None) => Err(anyhow::anyhow!("heartbeat socket closed before acknowledgment")),
        Err(_) => Err(anyhow::anyhow!("heartbeat acknowledgment timed out")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_wraps_around_candidate_list() {
        let master = MasterAddress::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(master.target(), Some("a"));
        master.advance();
        assert_eq!(master.target(), Some("b"));
        master.advance();
        assert_eq!(master.target(), Some("c"));
        master.advance();
        assert_eq!(master.target(), Some("a"));
    }

    #[tokio::test]
    async fn resolved_starts_empty_until_marked() {
        let master = MasterAddress::new(vec!["a".into()]);
        assert_eq!(master.current().await, None);
        master.mark_resolved("a").await;
        assert_eq!(master.current().await, Some("a".to_string()));
    }
}
