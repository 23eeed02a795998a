//! Name node
//!
//! The master serves every RPC verb and owns the document store;
//! followers only ever apply mutation batches handed to them by the
//! current master. `cluster` tracks storage node liveness (and, through
//! that, which name node is currently master); `recovery` reacts to the
//! liveness transitions `cluster` reports.

pub mod cluster;
pub mod follower;
pub mod master;
pub mod path;
pub mod recovery;

pub use cluster::ClusterState;
pub use master::{router, MasterService};
