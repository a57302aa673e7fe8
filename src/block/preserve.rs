//! `preserveNodesInBlock` (spec.md §4.F): rewrite a long-compressed block,
//! discarding every node not named by the caller's address list, to
//! reclaim space once enough of a block's contents have been garbage
//! collected elsewhere.

use std::sync::Arc;

use tracing::info;

use crate::block_id::{BlockId, DataAddress};
use crate::error::{Error, Result};
use crate::service::BlockService;
use crate::store::compressed;
use crate::store::mutable::MutableBlockStore;

/// Validate, stage, and (if worthwhile) install a rewritten block that
/// keeps only the nodes named by `addrs`.
///
/// Preconditions (all fail the whole call, spec.md §4.F):
/// - every address in `addrs` must name `block_id`
/// - no `data_id` may appear twice
/// - the block's container must already be compressed
/// - the container must have a recorded `last_write` older than
///   `preserve_min_age_secs`
pub async fn preserve_nodes_in_block(
	service: &Arc<BlockService>,
	block_id: BlockId,
	addrs: &[DataAddress],
) -> Result<()> {
	for addr in addrs {
		if addr.block_id != block_id {
			return Err(Error::Message(format!(
				"preserveNodesInBlock: address for {:?} does not belong to {:?}",
				addr.block_id, block_id
			)));
		}
	}

	let mut data_ids: Vec<u32> = addrs.iter().map(|a| a.data_id).collect();
	data_ids.sort_unstable();
	for w in data_ids.windows(2) {
		if w[0] == w[1] {
			return Err(Error::Message(format!(
				"preserveNodesInBlock: duplicate data_id {} for {:?}",
				w[0], block_id
			)));
		}
	}

	let container = service
		.container_for(block_id)
		.ok_or_else(|| Error::Message(format!("{:?} not present", block_id)))?;

	if !container.is_compressed() {
		return Err(Error::Message(format!(
			"preserveNodesInBlock: {:?} is not yet compressed",
			block_id
		)));
	}

	let last_write = container.last_write();
	let min_age_ms = service.config.preserve_min_age_secs.saturating_mul(1000);
	if last_write == 0 || mckoi_util::time::now_msec().saturating_sub(last_write) < min_age_ms {
		return Err(Error::Message(format!(
			"preserveNodesInBlock: {:?} has not aged enough to be rewritten",
			block_id
		)));
	}

	container.open()?;
	let scan = container.with_store(|store| {
		let max_id = store.max_data_id()?;
		let n = match max_id {
			None => 0usize,
			Some(m) => m as usize + 1,
		};
		let mut nodes = Vec::with_capacity(n);
		for data_id in 0..n as u32 {
			let bytes = match store.get_data(data_id) {
				Ok(set) => set.iter().next().unwrap().map(|(_, b)| b).unwrap_or_default(),
				Err(Error::DataIdNotPresent(_)) => Vec::new(),
				Err(e) => return Err(e),
			};
			nodes.push(bytes);
		}
		Ok(nodes)
	});
	container.close();
	let nodes = scan?;

	let keep: std::collections::HashSet<u32> = data_ids.into_iter().collect();
	let mut disposed_bytes: u64 = 0;
	// `.rew` is itself a mutable-format file: the rewrite keeps only the
	// requested nodes, it does not recompress them (spec.md §4.F "Compressed
	// → Mutable'"). There is no separate staging-then-compress step.
	let rew_path = service.data_dir().join(format!("{}.rew", block_id.to_filename()));
	if rew_path.exists() {
		std::fs::remove_file(&rew_path)?;
	}

	{
		let (mut staging, _) = MutableBlockStore::open(block_id, &rew_path)?;
		for (data_id, payload) in nodes.iter().enumerate() {
			if keep.contains(&(data_id as u32)) {
				staging.put_data(data_id as u32, payload)?;
			} else {
				disposed_bytes += payload.len() as u64;
			}
		}
		staging.fsync()?;
	}

	if disposed_bytes < service.config.preserve_disposal_threshold {
		std::fs::remove_file(&rew_path)?;
		info!(
			"preserveNodesInBlock({:?}): only {} bytes disposable, skipping rewrite",
			block_id, disposed_bytes
		);
		return Ok(());
	}

	// Install `.rew` as the block's new mutable store: back up the current
	// compressed store, rename `.rew` into the block's (extensionless)
	// mutable path, and only drop the backup once the swap has succeeded.
	let mutable_path = container.mutable_path();
	let compressed_path = container.compressed_path();
	let backup_path = service.data_dir().join(format!("{}.bak", block_id.to_filename()));
	if backup_path.exists() {
		std::fs::remove_file(&backup_path)?;
	}

	std::fs::rename(&compressed_path, &backup_path)?;
	match std::fs::rename(&rew_path, &mutable_path) {
		Ok(()) => {
			std::fs::remove_file(&backup_path)?;
		}
		Err(e) => {
			// Best effort: put the original store back so the block stays readable.
			std::fs::rename(&backup_path, &compressed_path)?;
			return Err(Error::Io(e));
		}
	}

	container.change_store(false)?;
	info!(
		"preserveNodesInBlock({:?}): rewrote block, disposed {} bytes",
		block_id, disposed_bytes
	);

	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use mckoi_util::background::BackgroundRunner;
	use mckoi_util::config::{CompressionConfig, Config};
	use mktemp::Temp;
	use tokio::sync::watch;

	fn test_config(dir: &Temp) -> Config {
		Config {
			node_directory: dir.as_path().to_path_buf(),
			access_list_size: 32,
			fsync_delay_secs: 5,
			compression: CompressionConfig {
				group_max_nodes: 24,
				group_max_bytes: 4096,
			},
			static_age_secs: 180,
			compress_gc_delay_secs: 300,
			preserve_min_age_secs: 0,
			preserve_disposal_threshold: 1,
			stream_part_size: 16 * 1024,
		}
	}

	#[tokio::test]
	async fn rewrite_keeps_only_named_nodes() {
		let dir = Temp::new_dir().unwrap();
		let (_stop_tx, stop_rx) = watch::channel(false);
		let (bg, _handle) = BackgroundRunner::new(1, stop_rx);
		let service = BlockService::start(test_config(&dir), bg).unwrap();

		let block_id = BlockId::new(0, 1);
		for i in 0..5u32 {
			let addr = DataAddress::new(block_id, i).unwrap();
			service
				.write_to_block(addr, vec![i as u8; 2000])
				.await
				.unwrap();
		}

		let container = service.container_for(block_id).unwrap();
		container.open().unwrap();
		let mutable_path = container.mutable_path();
		let compressed_path = container.compressed_path();
		let (mut source, _) = MutableBlockStore::open(block_id, &mutable_path).unwrap();
		compressed::compress(&mut source, &compressed_path, 24, 4096).unwrap();
		std::fs::remove_file(&mutable_path).unwrap();
		container.change_store(true).unwrap();
		container.close();

		let keep_addrs = vec![DataAddress::new(block_id, 1).unwrap()];
		preserve_nodes_in_block(&service, block_id, &keep_addrs)
			.await
			.unwrap();

		let kept = service.read_from_block(keep_addrs[0]).await.unwrap();
		let (_, payload) = kept.iter().next().unwrap().unwrap();
		assert_eq!(payload, vec![1u8; 2000]);

		// The rewrite must actually flip the block back to a Mutable store
		// (spec.md §4.F "Compressed → Mutable'"), not just preserve the kept
		// bytes under the old compressed store.
		let container = service.container_for(block_id).unwrap();
		assert!(!container.is_compressed());

		// A data_id that was disposed of by the rewrite must be writable
		// again, since the block is no longer a read-only compressed store.
		service
			.write_to_block(DataAddress::new(block_id, 0).unwrap(), vec![9u8; 10])
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn rejects_address_from_another_block() {
		let dir = Temp::new_dir().unwrap();
		let (_stop_tx, stop_rx) = watch::channel(false);
		let (bg, _handle) = BackgroundRunner::new(1, stop_rx);
		let service = BlockService::start(test_config(&dir), bg).unwrap();

		let block_id = BlockId::new(0, 1);
		let other = DataAddress::new(BlockId::new(0, 2), 0).unwrap();
		let err = preserve_nodes_in_block(&service, block_id, &[other])
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Message(_)));
	}
}
