//! `BlockContainer` (spec.md §3, §4.D): a reference-counted runtime handle
//! around a block's backing store.

use std::path::PathBuf;
use std::sync::Mutex;

use mckoi_util::time::now_msec;

use crate::block_id::BlockId;
use crate::error::Result;
use crate::store::BlockStore;

struct Inner {
	store: Option<BlockStore>,
	is_compressed: bool,
	lock_count: u32,
	last_write: u64,
}

/// Runtime handle to one block's backing store. Owned uniquely by the
/// service's container map; handlers borrow it for a request via
/// [`BlockContainer::open`]/[`BlockContainer::close`].
pub struct BlockContainer {
	pub block_id: BlockId,
	data_dir: PathBuf,
	inner: Mutex<Inner>,
}

impl BlockContainer {
	/// Build a (closed) container for a block known to exist on disk,
	/// recorded as compressed or mutable by `is_compressed`.
	pub fn new(block_id: BlockId, data_dir: PathBuf, is_compressed: bool) -> Self {
		BlockContainer {
			block_id,
			data_dir,
			inner: Mutex::new(Inner {
				store: None,
				is_compressed,
				lock_count: 0,
				last_write: 0,
			}),
		}
	}

	pub fn mutable_path(&self) -> PathBuf {
		self.data_dir.join(self.block_id.to_filename())
	}

	pub fn compressed_path(&self) -> PathBuf {
		self.data_dir
			.join(format!("{}.mcd", self.block_id.to_filename()))
	}

	pub fn is_compressed(&self) -> bool {
		self.inner.lock().unwrap().is_compressed
	}

	pub fn last_write(&self) -> u64 {
		self.inner.lock().unwrap().last_write
	}

	pub fn touch_last_write(&self) {
		self.inner.lock().unwrap().last_write = now_msec();
	}

	/// Open the underlying store if this is the first open, otherwise just
	/// increment the lock count. Returns whether this call newly created a
	/// fresh mutable file on disk (only possible on the first open of a
	/// block that had never been written to).
	pub fn open(&self) -> Result<bool> {
		let mut inner = self.inner.lock().unwrap();
		if inner.lock_count > 0 {
			inner.lock_count += 1;
			return Ok(false);
		}

		let (store, created) = if inner.is_compressed {
			let store = BlockStore::open_compressed(self.block_id, &self.compressed_path())?;
			(store, false)
		} else {
			BlockStore::open_mutable(self.block_id, &self.mutable_path())?
		};

		inner.store = Some(store);
		inner.lock_count = 1;
		Ok(created)
	}

	pub fn close(&self) {
		let mut inner = self.inner.lock().unwrap();
		if inner.lock_count == 0 {
			return;
		}
		inner.lock_count -= 1;
		if inner.lock_count == 0 {
			inner.store = None;
		}
	}

	/// Run `f` against the open store. Panics if the container is not
	/// currently open; callers must bracket with [`BlockContainer::open`].
	pub fn with_store<T>(&self, f: impl FnOnce(&mut BlockStore) -> Result<T>) -> Result<T> {
		let mut inner = self.inner.lock().unwrap();
		let store = inner
			.store
			.as_mut()
			.expect("with_store called on a closed BlockContainer");
		f(store)
	}

	/// Swap this container's backing store, atomically with respect to
	/// readers holding the container mutex: `to_compressed = true` for the
	/// background compressor's Mutable→Compressed swap (after the `.mcd`
	/// file has been written and renamed into place), `to_compressed =
	/// false` for `preserveNodesInBlock`'s Compressed→Mutable' swap (after
	/// the rewritten `.rew` file has been renamed into the mutable path).
	pub fn change_store(&self, to_compressed: bool) -> Result<()> {
		let mut inner = self.inner.lock().unwrap();
		if inner.lock_count > 0 {
			inner.store = None;
			let store = if to_compressed {
				BlockStore::open_compressed(self.block_id, &self.compressed_path())?
			} else {
				let (store, _) = BlockStore::open_mutable(self.block_id, &self.mutable_path())?;
				store
			};
			inner.store = Some(store);
		}
		inner.is_compressed = to_compressed;
		Ok(())
	}
}

impl PartialEq for BlockContainer {
	fn eq(&self, other: &Self) -> bool {
		self.block_id == other.block_id
	}
}
impl Eq for BlockContainer {}

impl PartialOrd for BlockContainer {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for BlockContainer {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.block_id.cmp(&other.block_id)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::store::mutable::MutableBlockStore;
	use crate::store::compressed;
	use mktemp::Temp;

	#[test]
	fn open_close_tracks_lock_count() {
		let dir = Temp::new_dir().unwrap();
		let block_id = BlockId::new(0, 1);
		let container = BlockContainer::new(block_id, dir.as_path().to_path_buf(), false);

		let created = container.open().unwrap();
		assert!(created);
		container.open().unwrap();
		container.close();
		container
			.with_store(|store| {
				store.put_data(0, b"hi")?;
				Ok(())
			})
			.unwrap();
		container.close();
	}

	#[test]
	fn change_store_swaps_to_compressed() {
		let dir = Temp::new_dir().unwrap();
		let block_id = BlockId::new(0, 1);
		let container = BlockContainer::new(block_id, dir.as_path().to_path_buf(), false);

		container.open().unwrap();
		container
			.with_store(|store| store.put_data(0, b"payload"))
			.unwrap();

		let mutable_path = container.mutable_path();
		let (mut mutable, _) = MutableBlockStore::open(block_id, &mutable_path).unwrap();
		compressed::compress(&mut mutable, &container.compressed_path(), 24, 4096).unwrap();

		container.change_store(true).unwrap();
		assert!(container.is_compressed());

		let result = container.with_store(|store| store.get_data(0));
		assert!(result.is_ok());
		container.close();
	}
}
