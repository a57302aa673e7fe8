//! `BackgroundCompressor` (spec.md §4.E "Compression function"): a
//! [`Worker`] that sweeps newly-written blocks, compresses the ones that
//! have gone static, and schedules deletion of their old mutable file.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use mckoi_util::background::worker::{Worker, WorkerStatus};
use mckoi_util::error::Error as UtilError;
use mckoi_util::time::now_msec;

use crate::block_id::BlockId;
use crate::service::BlockService;
use crate::store::compressed;
use crate::store::mutable::MutableBlockStore;

const PER_CONTAINER_PAUSE: Duration = Duration::from_millis(200);
const SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// One container is known-static once it has carried no write for
/// `static_age_secs` *and* no manager has since allocated a later block in
/// the same manager sequence (spec.md §4.E `is_known_static`).
pub struct BackgroundCompressor {
	service: Arc<BlockService>,
}

impl BackgroundCompressor {
	pub fn new(service: Arc<BlockService>) -> Self {
		BackgroundCompressor { service }
	}

	/// Classify one entry drained from `compression_add_list` (spec.md §4.E
	/// step 2): an already-compressed container is dropped from the list for
	/// good, a not-yet-static one is put back for a later sweep, and a
	/// known-static one is compressed.
	fn classify(&self, block_id: BlockId) -> SweepAction {
		let container = match self.service.container_for(block_id) {
			Some(c) => c,
			None => return SweepAction::Drop,
		};
		if container.is_compressed() {
			return SweepAction::Drop;
		}

		let last_write = container.last_write();
		if last_write == 0 {
			return SweepAction::Requeue;
		}
		let age_ms = self.service.config.static_age_secs.saturating_mul(1000);
		if now_msec().saturating_sub(last_write) < age_ms {
			return SweepAction::Requeue;
		}

		let max_known = self
			.service
			.max_known_block_id
			.lock()
			.unwrap()
			.get(&block_id.manager_key())
			.copied();
		let is_static = match max_known {
			Some(max_id) => block_id < max_id,
			None => false,
		};

		if !is_static {
			// Reset the age clock so the next static check on this block is
			// amortized to once per `static_age_secs` rather than re-running
			// every sweep (spec.md §4.E `is_known_static`).
			container.touch_last_write();
			return SweepAction::Requeue;
		}
		SweepAction::Compress
	}

	fn compress_one(&self, block_id: BlockId) -> Result<(), UtilError> {
		let container = self
			.service
			.container_for(block_id)
			.ok_or_else(|| UtilError::message(format!("{:?} disappeared before compression", block_id)))?;

		let mutable_path = container.mutable_path();
		let compressed_path = container.compressed_path();
		let tmp_path = self.service.data_dir().join(format!("{}.tempc", block_id.to_filename()));

		let (mut source, _) = MutableBlockStore::open(block_id, &mutable_path)
			.map_err(|e| UtilError::message(e.to_string()))?;

		let group_cfg = &self.service.config.compression;
		compressed::compress(&mut source, &tmp_path, group_cfg.group_max_nodes, group_cfg.group_max_bytes)
			.map_err(|e| UtilError::message(e.to_string()))?;

		std::fs::rename(&tmp_path, &compressed_path).map_err(UtilError::Io)?;

		container
			.change_store(true)
			.map_err(|e| UtilError::message(e.to_string()))?;

		self.service
			.metrics
			.compression_runs
			.add(&opentelemetry::Context::current(), 1, &[]);

		let delay = Duration::from_secs(self.service.config.compress_gc_delay_secs);
		self.service.clone().spawn_deletion(mutable_path, delay);

		Ok(())
	}
}

#[async_trait]
impl Worker for BackgroundCompressor {
	fn name(&self) -> String {
		"Block compressor".into()
	}

	async fn work(
		&mut self,
		_must_exit: &mut watch::Receiver<bool>,
	) -> Result<WorkerStatus, UtilError> {
		let next = {
			let mut list = self.service.compression_add_list.lock().unwrap();
			if list.is_empty() {
				None
			} else {
				Some(list.remove(0))
			}
		};

		let block_id = match next {
			Some(id) => id,
			None => return Ok(WorkerStatus::Idle),
		};

		match self.classify(block_id) {
			SweepAction::Drop => {
				// Already compressed: spec.md §4.E step 2 drops it from the
				// list for good rather than requeuing it forever.
			}
			SweepAction::Requeue => {
				self.service.compression_add_list.lock().unwrap().push(block_id);
			}
			SweepAction::Compress => {
				if let Err(e) = self.compress_one(block_id) {
					warn!("compression of {:?} failed: {}", block_id, e);
				} else {
					info!("compressed {:?}", block_id);
				}
			}
		}

		tokio::time::sleep(PER_CONTAINER_PAUSE).await;
		Ok(WorkerStatus::Busy)
	}

	async fn wait_for_work(&mut self, _must_exit: &watch::Receiver<bool>) -> WorkerStatus {
		tokio::time::sleep(SWEEP_INTERVAL).await;
		WorkerStatus::Busy
	}
}

/// Outcome of classifying one block drained from `compression_add_list`.
#[derive(Debug, PartialEq, Eq)]
enum SweepAction {
	/// Already compressed, or its container has vanished: drop for good.
	Drop,
	/// Not yet known-static: put back on the list for a later sweep.
	Requeue,
	/// Known-static: compress it now.
	Compress,
}
