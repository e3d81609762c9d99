//! Run state: the blackboard every component reads and writes
//!
//! [`TaskStore`] is an actor owning the in-memory authoritative state;
//! [`RunPatch`] is the only mutation vocabulary. The checkpointer persists
//! what this module holds.

mod messages;
mod patch;
mod store;

pub use messages::{StoreCommand, StoreError, StoreResponse};
pub use patch::{apply_patch, RunPatch};
pub use store::TaskStore;
