//! Storage node: chunk storage, its HTTP surface, and the heartbeat
//! sender that keeps the current master name node informed.

pub mod chunkstore;
pub mod heartbeat;
pub mod server;

pub use chunkstore::ChunkStore;
pub use heartbeat::MasterAddress;
pub use server::{router, StorageNodeService};
