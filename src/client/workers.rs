//! Bounded worker pool for chunk read/write jobs
//!
//! A mutex guards queue pop/push; each worker acquires it only long
//! enough to dequeue one job, then runs the job outside the lock.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::storagenode::server::encode_latin1;

/// `(primary SN, chunk name, payload slice, secondary list)`.
pub struct WriteJob {
    pub primary: String,
    pub chunk_name: String,
    pub payload: Vec<u8>,
    pub secondaries: Vec<String>,
}

/// `(SN list ordered primary-first, chunk name, sequence number)`.
pub struct ReadJob {
    pub nodes: Vec<String>,
    pub chunk_name: String,
    pub sequence: usize,
}

/// Drains every write job through `concurrency` workers. A failed PUT is
/// logged and dropped, never retried at this level; the recovery loop
/// reconciles eventually.
pub async fn run_writes(http: reqwest::Client, jobs: Vec<WriteJob>, concurrency: usize) {
    let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
    let mut handles = Vec::new();
    for _ in 0..concurrency.max(1) {
        let queue = queue.clone();
        let http = http.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let job = queue.lock().await.pop_front();
                let Some(job) = job else { break };
                let form = [
                    ("chunk_name", job.chunk_name.clone()),
                    ("chunk_payload", encode_latin1(&job.payload)),
                    ("chunk_replicas", job.secondaries.join(",")),
                ];
                if let Err(err) = http.put(format!("http://{}/chunk", job.primary)).form(&form).send().await {
                    tracing::warn!(primary = %job.primary, chunk = %job.chunk_name, error = %err, "chunk write failed, not retried");
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

/// Drains every read job through `concurrency` workers, trying each SN
/// in `job.nodes` in order until one answers; reassembles the final
/// payload by sequence number once every job has resolved (or failed).
pub async fn run_reads(http: reqwest::Client, jobs: Vec<ReadJob>, concurrency: usize) -> Result<Vec<u8>> {
    let total = jobs.len();
    let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
    let results: Arc<Mutex<Vec<Option<Vec<u8>>>>> = Arc::new(Mutex::new(vec![None; total]));
    let mut handles = Vec::new();
    for _ in 0..concurrency.max(1) {
        let queue = queue.clone();
        let http = http.clone();
        let results = results.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let job = queue.lock().await.pop_front();
                let Some(job) = job else { break };
                let mut payload = None;
                for node in &job.nodes {
                    let Ok(resp) = http.get(format!("http://{}/chunk/{}", node, job.chunk_name)).send().await else { continue };
                    if !resp.status().is_success() {
                        continue;
                    }
                    if let Ok(bytes) = resp.bytes().await {
                        payload = Some(bytes.to_vec());
                        break;
                    }
                }
                if let Some(bytes) = payload {
                    results.lock().await[job.sequence] = Some(bytes);
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
    let results = Arc::try_unwrap(results)
        .map_err(|_| Error::Internal("worker pool handles outlived the job queue".into()))?
        .into_inner();
    let mut out = Vec::with_capacity(total);
    for (sequence, chunk) in results.into_iter().enumerate() {
        match chunk {
            Some(bytes) => out.extend(bytes),
            None => {
                tracing::warn!(sequence, "chunk unavailable on every replica in its SN list");
                return Err(Error::GetFile);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_job_list_yields_empty_payload() {
        let http = reqwest::Client::new();
        let bytes = run_reads(http, Vec::new(), 4).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn unreachable_nodes_fail_with_get_file() {
        let http = reqwest::Client::new();
        let jobs = vec![ReadJob { nodes: vec!["127.0.0.1:1".to_string()], chunk_name: "1_0".to_string(), sequence: 0 }];
        let result = run_reads(http, jobs, 2).await;
        assert!(matches!(result, Err(Error::GetFile)));
    }
}
