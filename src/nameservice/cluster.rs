//! Per-storage-node liveness state
//!
//! Only the name node currently acting as master runs this: one countdown
//! per storage node, reset on every heartbeat, decremented by its own
//! per-SN task. Receiving a heartbeat from any SN is itself the signal
//! that this process is the master — there is no separate election
//! message exchanged between name nodes.

use std::collections::HashMap;

use tokio::sync::RwLock;

const INITIAL_COUNTDOWN: i64 = 10;

#[derive(Debug, Clone, Copy)]
struct SnState {
    countdown: i64,
    recovered: bool,
}

/// What happened to a storage node's countdown on a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Countdown is still positive.
    StillLive,
    /// Countdown just reached zero this tick: disaster recovery should run.
    JustDied,
    /// Countdown was already at zero on a previous tick.
    AlreadyDead,
    /// This SN is live again and its `recovered` flag is set: a trash
    /// flush should run.
    ReadyToFlush,
}

pub struct ClusterState {
    is_master: RwLock<bool>,
    sns: RwLock<HashMap<String, SnState>>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self {
            is_master: RwLock::new(false),
            sns: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_master(&self) -> bool {
        *self.is_master.read().await
    }

    /// Record a heartbeat from `sn_id`. Returns `true` the first time this
    /// process transitions to master because of it.
    pub async fn record_heartbeat(&self, sn_id: &str) -> bool {
        let became_master = {
            let mut flag = self.is_master.write().await;
            let was = *flag;
            *flag = true;
            !was
        };
        if became_master {
            tracing::info!("receiving heartbeats: taking on the master role");
        }
        let mut sns = self.sns.write().await;
        sns.entry(sn_id.to_string())
            .and_modify(|s| s.countdown = INITIAL_COUNTDOWN)
            .or_insert(SnState {
                countdown: INITIAL_COUNTDOWN,
                recovered: false,
            });
        became_master
    }

    /// Every SN identifier known to the cluster (heartbeated at least once).
    pub async fn known_nodes(&self) -> Vec<String> {
        self.sns.read().await.keys().cloned().collect()
    }

    /// SNs whose countdown is currently positive.
    pub async fn live_nodes(&self) -> Vec<String> {
        self.sns
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.countdown > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn is_live(&self, sn_id: &str) -> bool {
        self.sns
            .read()
            .await
            .get(sn_id)
            .map(|s| s.countdown > 0)
            .unwrap_or(false)
    }

    /// Decrement `sn_id`'s countdown by one second, reporting the
    /// resulting transition. Unknown SNs are treated as already dead.
    pub async fn tick(&self, sn_id: &str) -> Tick {
        let mut sns = self.sns.write().await;
        let Some(state) = sns.get_mut(sn_id) else {
            return Tick::AlreadyDead;
        };
        if state.countdown > 0 {
            if state.recovered {
                return Tick::ReadyToFlush;
            }
            state.countdown -= 1;
            if state.countdown == 0 {
                Tick::JustDied
            } else {
                Tick::StillLive
            }
        } else {
            Tick::AlreadyDead
        }
    }

    pub async fn mark_recovered(&self, sn_id: &str) {
        if let Some(s) = self.sns.write().await.get_mut(sn_id) {
            s.recovered = true;
        }
    }

    pub async fn clear_recovered(&self, sn_id: &str) {
        if let Some(s) = self.sns.write().await.get_mut(sn_id) {
            s.recovered = false;
        }
    }

    /// Interval the per-SN countdown task should sleep before its next
    /// tick: 1 s while live, 10 s once declared dead.
    pub async fn next_tick_interval(&self, sn_id: &str) -> std::time::Duration {
        let live = self.is_live(sn_id).await;
        std::time::Duration::from_secs(if live { 1 } else { 10 })
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_heartbeat_grants_master_role_once() {
        let cluster = ClusterState::new();
        assert!(cluster.record_heartbeat("sn1").await);
        assert!(!cluster.record_heartbeat("sn1").await);
        assert!(cluster.is_master().await);
    }

    #[tokio::test]
    async fn countdown_reaches_zero_and_reports_just_died() {
        let cluster = ClusterState::new();
        cluster.record_heartbeat("sn1").await;
        for _ in 0..9 {
            assert_eq!(cluster.tick("sn1").await, Tick::StillLive);
        }
        assert_eq!(cluster.tick("sn1").await, Tick::JustDied);
        assert_eq!(cluster.tick("sn1").await, Tick::AlreadyDead);
        assert!(!cluster.is_live("sn1").await);
    }

    #[tokio::test]
    async fn heartbeat_resets_countdown() {
        let cluster = ClusterState::new();
        cluster.record_heartbeat("sn1").await;
        cluster.tick("sn1").await;
        cluster.tick("sn1").await;
        cluster.record_heartbeat("sn1").await;
        for _ in 0..9 {
            assert_eq!(cluster.tick("sn1").await, Tick::StillLive);
        }
        assert_eq!(cluster.tick("sn1").await, Tick::JustDied);
    }

    #[tokio::test]
    async fn recovered_flag_yields_ready_to_flush() {
        let cluster = ClusterState::new();
        cluster.record_heartbeat("sn1").await;
        cluster.mark_recovered("sn1").await;
        assert_eq!(cluster.tick("sn1").await, Tick::ReadyToFlush);
        cluster.clear_recovered("sn1").await;
        assert_eq!(cluster.tick("sn1").await, Tick::StillLive);
    }
}
