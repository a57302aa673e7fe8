//! `BlockStore`: a block's single-file on-disk format, as one of two tagged
//! variants (spec.md §9 "Inheritance → tagged variants").

pub mod compressed;
pub mod mutable;

use std::path::Path;

use crate::block_id::BlockId;
use crate::error::Result;
use crate::node_set::NodeSet;

pub use compressed::CompressedBlockStore;
pub use mutable::MutableBlockStore;

/// A block's backing store: either append-only and writable, or read-only
/// and deflate-packed. `change_store` (see [`crate::container::BlockContainer`])
/// replaces one variant with the other; there is no further polymorphism.
pub enum BlockStore {
	Mutable(MutableBlockStore),
	Compressed(CompressedBlockStore),
}

impl BlockStore {
	pub fn open_mutable(block_id: BlockId, path: &Path) -> Result<(Self, bool)> {
		let (store, created) = MutableBlockStore::open(block_id, path)?;
		Ok((BlockStore::Mutable(store), created))
	}

	pub fn open_compressed(block_id: BlockId, path: &Path) -> Result<Self> {
		Ok(BlockStore::Compressed(CompressedBlockStore::open(
			block_id, path,
		)?))
	}

	pub fn is_compressed(&self) -> bool {
		matches!(self, BlockStore::Compressed(_))
	}

	pub fn put_data(&mut self, data_id: u32, buf: &[u8]) -> Result<()> {
		match self {
			BlockStore::Mutable(s) => s.put_data(data_id, buf),
			BlockStore::Compressed(s) => s.put_data(data_id, buf),
		}
	}

	pub fn get_data(&mut self, data_id: u32) -> Result<NodeSet> {
		match self {
			BlockStore::Mutable(s) => s.get_data(data_id),
			BlockStore::Compressed(s) => s.get_data(data_id),
		}
	}

	pub fn remove_data(&mut self, data_id: u32) -> Result<bool> {
		match self {
			BlockStore::Mutable(s) => s.remove_data(data_id),
			BlockStore::Compressed(s) => s.remove_data(data_id),
		}
	}

	pub fn max_data_id(&mut self) -> Result<Option<u32>> {
		match self {
			BlockStore::Mutable(s) => s.max_data_id(),
			BlockStore::Compressed(s) => Ok(s.max_data_id()),
		}
	}

	pub fn checksum(&mut self) -> Result<i64> {
		match self {
			BlockStore::Mutable(s) => s.checksum(),
			BlockStore::Compressed(s) => s.checksum(),
		}
	}

	pub fn fsync(&mut self) -> Result<()> {
		match self {
			BlockStore::Mutable(s) => s.fsync(),
			BlockStore::Compressed(s) => s.fsync(),
		}
	}

	pub fn path(&self) -> &Path {
		match self {
			BlockStore::Mutable(s) => s.path(),
			BlockStore::Compressed(s) => s.path(),
		}
	}
}
