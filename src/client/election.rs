//! Client-side master election
//!
//! Before each command the client asks every storage node who it
//! believes the master name node is, then takes the most frequently
//! reported answer, ties resolved by first occurrence. This is a quorum
//! over storage nodes, not over name nodes themselves — a name node
//! could misreport its own role, a storage node has no reason to.

use serde::Deserialize;

use crate::config::DfsConfig;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct MasterReply {
    master: Option<String>,
}

pub async fn elect_master(config: &DfsConfig, http: &reqwest::Client) -> Result<String> {
    let mut tallies: Vec<(String, usize)> = Vec::new();
    for setting in config.datanodes_setting.values() {
        let url = format!("http://{}:{}/master", setting.host, setting.port);
        let Ok(resp) = http.get(&url).send().await else { continue };
        let Ok(body) = resp.json::<MasterReply>().await else { continue };
        let Some(master) = body.master else { continue };
        match tallies.iter_mut().find(|(m, _)| *m == master) {
            Some((_, count)) => *count += 1,
            None => tallies.push((master, 1)),
        }
    }
    pick_mode(tallies).ok_or(Error::NoMaster)
}

/// First-occurrence-wins mode: only replace the running winner on a
/// strictly higher count, never on a tie.
fn pick_mode(tallies: Vec<(String, usize)>) -> Option<String> {
    let mut best: Option<(String, usize)> = None;
    for (candidate, count) in tallies {
        let replace = match &best {
            Some((_, best_count)) => count > *best_count,
            None => true,
        };
        if replace {
            best = Some((candidate, count));
        }
    }
    best.map(|(m, _)| m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_picks_highest_frequency() {
        let tallies = vec![("N1".to_string(), 2), ("N2".to_string(), 1)];
        assert_eq!(pick_mode(tallies), Some("N1".to_string()));
    }

    #[test]
    fn ties_resolve_to_first_occurrence() {
        let tallies = vec![("N1".to_string(), 1), ("N2".to_string(), 1)];
        assert_eq!(pick_mode(tallies), Some("N1".to_string()));
    }

    #[test]
    fn empty_tallies_yield_none() {
        assert_eq!(pick_mode(Vec::new()), None);
    }
}
