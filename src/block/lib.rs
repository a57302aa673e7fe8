//! Block-server core: the single-file block store formats, the in-memory
//! container cache, the background compressor and preserve-rewrite tasks,
//! and the `BlockService` that ties them together behind a wire protocol
//! (spec.md §3–§7).

pub mod block_id;
pub mod compressor;
pub mod container;
pub mod error;
pub mod metrics;
pub mod node_set;
pub mod preserve;
pub mod service;
pub mod store;
pub mod wire;

pub use block_id::{BlockId, DataAddress, NodeReference};
pub use error::{Error, Result};
pub use node_set::{NodeSet, NodeSetData};
pub use service::{BlockPeer, BlockService, ManagerClient};
pub use wire::{BlockCommand, BlockReply, ExternalThrowable};
