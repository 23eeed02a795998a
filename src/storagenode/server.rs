//! Storage node chunk HTTP surface
//!
//! Every body here is form-encoded; chunk payloads travel as Latin-1
//! (ISO-8859-1) text so arbitrary bytes survive the form layer: byte
//! values 0-255 map one-to-one onto Unicode scalars 0-255, so the
//! encode/decode pair below is exact and lossless.

use std::sync::Arc;

use axum::extract::{Form, Path as AxPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storagenode::chunkstore::ChunkStore;
use crate::storagenode::heartbeat::MasterAddress;

pub fn encode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub fn decode_latin1(s: &str) -> Vec<u8> {
    s.chars().map(|c| c as u32 as u8).collect()
}

pub struct StorageNodeService {
    pub id: String,
    chunks: ChunkStore,
    http: reqwest::Client,
    master: Arc<MasterAddress>,
}

impl StorageNodeService {
    pub fn new(id: impl Into<String>, chunks: ChunkStore, master: Arc<MasterAddress>) -> Self {
        Self { id: id.into(), chunks, http: reqwest::Client::new(), master }
    }

    /// PUT `chunk_name`/`payload` locally, then relay to the first SN in
    /// `replicas` (with the remainder of the list) so replication chains
    /// one hop at a time instead of the writer fanning out to everyone.
    pub async fn put_chunk(&self, chunk_name: &str, payload: &[u8], replicas: &[String]) -> Result<()> {
        self.chunks.write(chunk_name, payload).await?;
        if let Some((next, rest)) = replicas.split_first() {
            let body = PutChunkForm {
                chunk_name: chunk_name.to_string(),
                chunk_payload: encode_latin1(payload),
                chunk_replicas: rest.join(","),
            };
            if let Err(err) = self.http.put(format!("{next}/chunk")).form(&body).send().await {
                tracing::warn!(next = %next, error = %err, "replication hop failed");
            }
        }
        Ok(())
    }

    pub async fn copy_prefix(&self, old_prefix: &str, new_prefix: &str) -> Result<()> {
        let mut seq = 0u64;
        loop {
            let old_name = format!("{old_prefix}_{seq}");
            if !self.chunks.exists(&old_name).await {
                break;
            }
            let bytes = self.chunks.read(&old_name).await?;
            self.chunks.write(&format!("{new_prefix}_{seq}"), &bytes).await?;
            seq += 1;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutChunkForm {
    pub chunk_name: String,
    pub chunk_payload: String,
    #[serde(default)]
    pub chunk_replicas: String,
}

#[derive(Debug, Deserialize)]
pub struct DeletePrefixesForm {
    pub prefixes: String,
}

#[derive(Debug, Deserialize)]
pub struct CopyPrefixForm {
    pub old_prefix: String,
    pub new_prefix: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoveryPutForm {
    /// `chunk_name:new_replica` pairs, comma-separated.
    pub moves: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoveryDeleteForm {
    pub chunks: String,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if matches!(self.0, Error::NotFound(_)) { StatusCode::NOT_FOUND } else { StatusCode::INTERNAL_SERVER_ERROR };
        (status, self.0.to_string()).into_response()
    }
}

async fn h_get_chunk(State(service): State<Arc<StorageNodeService>>, AxPath(name): AxPath<String>) -> std::result::Result<Vec<u8>, ApiError> {
    Ok(service.chunks.read(&name).await?)
}

async fn h_put_chunk(State(service): State<Arc<StorageNodeService>>, Form(form): Form<PutChunkForm>) -> std::result::Result<StatusCode, ApiError> {
    let bytes = decode_latin1(&form.chunk_payload);
    let replicas: Vec<String> = form.chunk_replicas.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
    service.put_chunk(&form.chunk_name, &bytes, &replicas).await?;
    Ok(StatusCode::OK)
}

async fn h_delete_prefixes(State(service): State<Arc<StorageNodeService>>, Form(form): Form<DeletePrefixesForm>) -> StatusCode {
    for prefix in form.prefixes.split(',').filter(|s| !s.is_empty()) {
        let mut seq = 0u64;
        loop {
            let name = format!("{prefix}_{seq}");
            if !service.chunks.exists(&name).await {
                break;
            }
            let _ = service.chunks.delete(&name).await;
            seq += 1;
        }
    }
    StatusCode::OK
}

async fn h_copy_prefix(State(service): State<Arc<StorageNodeService>>, Form(form): Form<CopyPrefixForm>) -> std::result::Result<StatusCode, ApiError> {
    service.copy_prefix(&form.old_prefix, &form.new_prefix).await?;
    Ok(StatusCode::OK)
}

async fn h_recovery_put(State(service): State<Arc<StorageNodeService>>, Form(form): Form<RecoveryPutForm>) -> std::result::Result<StatusCode, ApiError> {
    for pair in form.moves.split(',').filter(|s| !s.is_empty()) {
        let Some((chunk, new_replica)) = pair.split_once(':') else { continue };
        if let Ok(bytes) = service.chunks.read(chunk).await {
            service.put_chunk(chunk, &bytes, &[new_replica.to_string()]).await?;
        }
    }
    Ok(StatusCode::OK)
}

async fn h_recovery_delete(State(service): State<Arc<StorageNodeService>>, Form(form): Form<RecoveryDeleteForm>) -> StatusCode {
    for chunk in form.chunks.split(',').filter(|s| !s.is_empty()) {
        let _ = service.chunks.delete(chunk).await;
    }
    StatusCode::OK
}

#[derive(Debug, Serialize)]
struct MasterReply {
    master: Option<String>,
}

async fn h_get_master(State(service): State<Arc<StorageNodeService>>) -> axum::Json<MasterReply> {
    axum::Json(MasterReply { master: service.master.current().await })
}

pub fn router(service: Arc<StorageNodeService>) -> Router {
    Router::new()
        .route("/chunk", put(h_put_chunk))
        .route("/chunk/:name", get(h_get_chunk))
        .route("/chunks", delete(h_delete_prefixes))
        .route("/chunks/copy", post(h_copy_prefix))
        .route("/recovery", put(h_recovery_put))
        .route("/recovery", delete(h_recovery_delete))
        .route("/master", get(h_get_master))
        .route("/health", get(|| async { StatusCode::OK }))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_roundtrips_every_byte_value() {
        let bytes: Vec<u8> = (0..=255).collect();
        let encoded = encode_latin1(&bytes);
        assert_eq!(decode_latin1(&encoded), bytes);
    }

    #[tokio::test]
    async fn copy_prefix_duplicates_contiguous_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = ChunkStore::open(dir.path()).await.unwrap();
        chunks.write("1_0", b"a").await.unwrap();
        chunks.write("1_1", b"b").await.unwrap();
        let master = Arc::new(MasterAddress::new(vec![]));
        let service = StorageNodeService::new("A", chunks, master);
        service.copy_prefix("1", "2").await.unwrap();
        assert_eq!(service.chunks.read("2_0").await.unwrap(), b"a");
        assert_eq!(service.chunks.read("2_1").await.unwrap(), b"b");
    }
}
