//! `BlockService` (spec.md §4.F): the top-level process — container map and
//! LRU access list, request dispatch, fsync scheduler, block-to-block
//! streaming copy, preserve-nodes rewrite, availability map, and manager
//! notification.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::Context;
use rand::Rng;
use tracing::{error, info, warn};

use mckoi_util::background::BackgroundRunner;
use mckoi_util::config::Config;
use mckoi_util::time::now_msec;

use crate::block_id::{BlockId, DataAddress, NodeReference};
use crate::compressor::BackgroundCompressor;
use crate::container::BlockContainer;
use crate::error::{Error, Result};
use crate::metrics::BlockServiceMetrics;
use crate::node_set::NodeSet;
use crate::preserve::preserve_nodes_in_block;
use crate::wire::{BlockCommand, BlockReply};

const GUID_FILE: &str = "block_server_guid";

/// Callback surface a `BlockService` uses to reach another block server
/// during `sendBlockTo` streaming. The actual transport (TCP framing) is a
/// spec.md non-goal; tests and embedders supply an in-process or
/// RPC-backed implementation.
#[async_trait]
pub trait BlockPeer: Send + Sync {
	async fn send_block_part(
		&self,
		block_id: BlockId,
		pos: u64,
		file_type: u8,
		buf: Vec<u8>,
	) -> Result<()>;
	async fn send_block_complete(&self, block_id: BlockId, file_type: u8) -> Result<()>;
}

/// Callback surface used to notify managers of a new block replica
/// location. Managers are an external collaborator (spec.md §1).
#[async_trait]
pub trait ManagerClient: Send + Sync {
	async fn internal_add_block_server_mapping(&self, block_id: BlockId, dest_guid: i64)
		-> Result<()>;
}

struct PathLockState {
	containers: HashMap<BlockId, Arc<BlockContainer>>,
	access_list: VecDeque<BlockId>,
	pending_sync: HashSet<BlockId>,
}

/// Top-level block-server process.
pub struct BlockService {
	pub(crate) data_dir: std::path::PathBuf,
	pub(crate) config: Config,

	path_lock: Mutex<PathLockState>,
	block_upload_lock: tokio::sync::Mutex<()>,
	process_id_seq: AtomicU64,
	pub(crate) compression_add_list: Mutex<Vec<BlockId>>,
	pub(crate) max_known_block_id: Mutex<HashMap<u8, BlockId>>,

	stop_state: OnceLock<Error>,
	server_guid: i64,

	background: Arc<BackgroundRunner>,
	pub(crate) metrics: BlockServiceMetrics,

	peers: Mutex<HashMap<String, Arc<dyn BlockPeer>>>,
	managers: Mutex<Vec<Arc<dyn ManagerClient>>>,
}

impl BlockService {
	/// Start a block service over `config.node_directory`: read or create
	/// the server guid, recover the on-disk block set, and launch the
	/// background compressor and fsync scheduling.
	pub fn start(config: Config, background: Arc<BackgroundRunner>) -> Result<Arc<Self>> {
		std::fs::create_dir_all(&config.node_directory)?;
		let data_dir = config.node_directory.clone();

		let server_guid = read_or_create_guid(&data_dir)?;

		let mut containers = HashMap::new();
		let mut compression_add_list = Vec::new();
		for (block_id, is_compressed) in scan_block_directory(&data_dir)? {
			containers.insert(
				block_id,
				Arc::new(BlockContainer::new(block_id, data_dir.clone(), is_compressed)),
			);
			compression_add_list.push(block_id);
		}

		let service = Arc::new(BlockService {
			data_dir,
			config,
			path_lock: Mutex::new(PathLockState {
				containers,
				access_list: VecDeque::new(),
				pending_sync: HashSet::new(),
			}),
			block_upload_lock: tokio::sync::Mutex::new(()),
			process_id_seq: AtomicU64::new(1),
			compression_add_list: Mutex::new(compression_add_list),
			max_known_block_id: Mutex::new(HashMap::new()),
			stop_state: OnceLock::new(),
			server_guid,
			background: background.clone(),
			metrics: BlockServiceMetrics::new(),
			peers: Mutex::new(HashMap::new()),
			managers: Mutex::new(Vec::new()),
		});

		background.spawn_worker(BackgroundCompressor::new(service.clone()));

		Ok(service)
	}

	pub fn register_peer(&self, name: impl Into<String>, peer: Arc<dyn BlockPeer>) {
		self.peers.lock().unwrap().insert(name.into(), peer);
	}

	pub fn register_manager(&self, manager: Arc<dyn ManagerClient>) {
		self.managers.lock().unwrap().push(manager);
	}

	pub fn server_guid(&self) -> i64 {
		self.server_guid
	}

	fn check_stop_state(&self) -> Result<()> {
		if let Some(e) = self.stop_state.get() {
			return Err(Error::StopState(e.to_string()));
		}
		Ok(())
	}

	fn enter_stop_state(&self, e: Error) {
		error!("BlockService entering stop state: {}", e);
		let _ = self.stop_state.set(e);
	}

	fn next_process_id(&self) -> u64 {
		self.process_id_seq.fetch_add(1, Ordering::SeqCst)
	}

	// ---- container cache discipline ----

	/// Whether `block_id` already has a file on disk, and if so whether it is
	/// the compressed (`.mcd`) or mutable variant.
	fn block_on_disk(&self, block_id: BlockId) -> Option<bool> {
		if self
			.data_dir
			.join(format!("{}.mcd", block_id.to_filename()))
			.exists()
		{
			Some(true)
		} else if self.data_dir.join(block_id.to_filename()).exists() {
			Some(false)
		} else {
			None
		}
	}

	/// Resolve or create the container for `block_id`, promote it to the
	/// head of the LRU access list, evict the tail if the list now exceeds
	/// the configured bound, and open the returned container. The caller
	/// must call [`BlockContainer::close`] exactly once when done.
	///
	/// `create_if_missing` must only be set by `writeToBlock`: per spec.md
	/// §4.F's state machine, a block transitions `Absent → Mutable` solely
	/// on a first write or a completed block-stream, never on a read. Every
	/// other caller passes `false` and gets [`Error::BlockNotPresent`]
	/// instead of silently materializing an empty block file on disk.
	///
	/// The access list only bounds how many containers are kept open; an
	/// evicted container's entry stays in the container map (cheap once its
	/// store is `None`) so directory-wide lookups never need to rebuild it.
	fn fetch(&self, block_id: BlockId, create_if_missing: bool) -> Result<Arc<BlockContainer>> {
		let mut state = self.path_lock.lock().unwrap();

		if !state.containers.contains_key(&block_id) {
			let is_compressed = match self.block_on_disk(block_id) {
				Some(is_compressed) => is_compressed,
				None if create_if_missing => false,
				None => return Err(Error::BlockNotPresent(block_id)),
			};
			state.containers.insert(
				block_id,
				Arc::new(BlockContainer::new(block_id, self.data_dir.clone(), is_compressed)),
			);
		}
		let container = state.containers.get(&block_id).unwrap().clone();

		state.access_list.retain(|id| *id != block_id);
		state.access_list.push_back(block_id);

		let mut evicted = None;
		if state.access_list.len() > self.config.access_list_size {
			if let Some(evict_id) = state.access_list.pop_front() {
				evicted = state.containers.get(&evict_id).cloned();
			}
		}
		drop(state);

		if let Some(c) = evicted {
			if c.block_id != block_id {
				c.close();
			}
		}

		container.open()?;
		Ok(container)
	}

	fn schedule_fsync(self: &Arc<Self>, container: Arc<BlockContainer>) {
		let block_id = container.block_id;
		{
			let mut state = self.path_lock.lock().unwrap();
			if !state.pending_sync.insert(block_id) {
				return;
			}
		}

		let service = self.clone();
		let delay = Duration::from_secs(self.config.fsync_delay_secs);
		self.background.spawn(async move {
			tokio::time::sleep(delay).await;
			let still_scheduled = {
				let mut state = service.path_lock.lock().unwrap();
				state.pending_sync.remove(&block_id)
			};
			if !still_scheduled {
				return Ok(());
			}
			if let Some(container) = service.path_lock.lock().unwrap().containers.get(&block_id).cloned() {
				if let Err(e) = container.open() {
					warn!("fsync: could not reopen {:?}: {}", block_id, e);
					return Ok(());
				}
				let res = container.with_store(|s| s.fsync());
				container.close();
				if let Err(e) = res {
					service.metrics.fsync_failures.add(&Context::current(), 1, &[]);
					warn!("fsync failed for {:?}: {}", block_id, e);
					service.enter_stop_state(Error::message(format!(
						"fsync failed for {:?}: {}",
						block_id, e
					)));
				}
			}
			Ok(())
		});
	}

	// ---- command handlers ----

	pub async fn write_to_block(
		self: &Arc<Self>,
		addr: DataAddress,
		buf: Vec<u8>,
	) -> Result<()> {
		self.check_stop_state()?;
		let container = self.fetch(addr.block_id, true)?;
		let start = std::time::Instant::now();
		let res = container.with_store(|store| store.put_data(addr.data_id, &buf));
		self.metrics.block_write_duration.record(
			&Context::current(),
			start.elapsed().as_secs_f64(),
			&[],
		);
		if res.is_ok() {
			self.metrics
				.bytes_written
				.add(&Context::current(), buf.len() as u64, &[]);
			container.touch_last_write();
			self.mark_new_on_disk(addr.block_id);
			self.schedule_fsync(container.clone());
		}
		container.close();
		res
	}

	/// `readFromBlock`: returns a possibly-multi-node `NodeSet`. The caller
	/// is expected to pass a full request batch through
	/// [`BlockService::handle_batch`] so duplicate reads of node ids already
	/// returned within the batch get suppressed, per spec.md.
	pub async fn read_from_block(&self, addr: DataAddress) -> Result<NodeSet> {
		self.check_stop_state()?;
		let container = self.fetch(addr.block_id, false)?;
		let start = std::time::Instant::now();
		let res = container.with_store(|store| store.get_data(addr.data_id));
		self.metrics.block_read_duration.record(
			&Context::current(),
			start.elapsed().as_secs_f64(),
			&[],
		);
		if let Ok(set) = &res {
			self.metrics
				.bytes_read
				.add(&Context::current(), set.byte_len() as u64, &[]);
		}
		container.close();
		res
	}

	/// Process a batch of commands, suppressing `readFromBlock` requests
	/// whose node id was already delivered by an earlier read in this same
	/// batch (spec.md §4.F, scenario S6).
	pub async fn handle_batch(self: &Arc<Self>, commands: Vec<BlockCommand>) -> Vec<BlockReply> {
		let mut seen: HashSet<NodeReference> = HashSet::new();
		let mut replies = Vec::with_capacity(commands.len());

		for command in commands {
			if let BlockCommand::ReadFromBlock { addr } = &command {
				if seen.contains(&addr.node_reference()) {
					continue;
				}
			}

			let reply = self.handle_one(command).await;
			if let BlockReply::NodeSet(set) = &reply {
				for id in &set.node_ids {
					seen.insert(*id);
				}
			}
			replies.push(reply);
		}

		replies
	}

	async fn handle_one(self: &Arc<Self>, command: BlockCommand) -> BlockReply {
		let result = self.dispatch(command).await;
		match result {
			Ok(reply) => reply,
			Err(e) => BlockReply::Error(e.to_external_throwable()),
		}
	}

	async fn dispatch(self: &Arc<Self>, command: BlockCommand) -> Result<BlockReply> {
		match command {
			BlockCommand::WriteToBlock { addr, buf, .. } => {
				self.write_to_block(addr, buf).await?;
				Ok(BlockReply::Ok)
			}
			BlockCommand::ReadFromBlock { addr } => {
				let set = self.read_from_block(addr).await?;
				Ok(BlockReply::NodeSet(set))
			}
			BlockCommand::RollbackNodes { addrs } => {
				self.rollback_nodes(&addrs).await?;
				Ok(BlockReply::Ok)
			}
			BlockCommand::DeleteBlock { .. } => Ok(BlockReply::Ok),
			BlockCommand::ServerGuid => Ok(BlockReply::I64(self.server_guid)),
			BlockCommand::BlockSetReport => {
				let ids = self.block_set_report()?;
				Ok(BlockReply::ServerGuidAndBlocks(self.server_guid, ids))
			}
			BlockCommand::Poll { .. } => Ok(BlockReply::Ok),
			BlockCommand::NotifyCurrentBlockId { block_id } => {
				self.notify_current_block_id(block_id);
				Ok(BlockReply::Ok)
			}
			BlockCommand::BlockChecksum { block_id } => {
				let sum = self.block_checksum(block_id)?;
				Ok(BlockReply::I64(sum))
			}
			BlockCommand::SendBlockTo {
				block_id,
				dest,
				dest_guid,
				managers,
			} => {
				let pid = self.send_block_to(block_id, dest, dest_guid, managers);
				Ok(BlockReply::ProcessId(pid))
			}
			BlockCommand::SendBlockPart {
				block_id,
				pos,
				file_type,
				buf,
				size,
			} => {
				self.send_block_part(block_id, pos, file_type, &buf, size)
					.await?;
				Ok(BlockReply::Ok)
			}
			BlockCommand::SendBlockComplete {
				block_id,
				file_type,
			} => {
				self.send_block_complete(block_id, file_type).await?;
				Ok(BlockReply::Ok)
			}
			BlockCommand::PreserveNodesInBlock { block_id, addrs } => {
				let pid = self.preserve_nodes_in_block(block_id, addrs);
				Ok(BlockReply::ProcessId(pid))
			}
			BlockCommand::CreateAvailabilityMapForBlocks { block_ids } => {
				let map = self.create_availability_map(&block_ids);
				Ok(BlockReply::AvailabilityMap(map))
			}
		}
	}

	pub async fn rollback_nodes(self: &Arc<Self>, addrs: &[DataAddress]) -> Result<()> {
		self.check_stop_state()?;
		for addr in addrs {
			let container = self.fetch(addr.block_id, false)?;
			let res = container.with_store(|store| store.remove_data(addr.data_id));
			if res.is_ok() {
				container.touch_last_write();
				self.schedule_fsync(container.clone());
			}
			container.close();
			res?;
		}
		Ok(())
	}

	pub fn notify_current_block_id(&self, block_id: BlockId) {
		let mut map = self.max_known_block_id.lock().unwrap();
		map.insert(block_id.manager_key(), block_id);
	}

	pub fn block_checksum(&self, block_id: BlockId) -> Result<i64> {
		self.check_stop_state()?;
		let container = self.fetch(block_id, false)?;
		let res = container.with_store(|store| store.checksum());
		container.close();
		res
	}

	pub fn block_set_report(&self) -> Result<Vec<BlockId>> {
		self.check_stop_state()?;
		Ok(scan_block_directory(&self.data_dir)?
			.into_iter()
			.map(|(id, _)| id)
			.collect())
	}

	pub fn create_availability_map(&self, block_ids: &[BlockId]) -> Vec<u8> {
		block_ids
			.iter()
			.map(|id| {
				let mutable = self.data_dir.join(id.to_filename());
				let compressed = self.data_dir.join(format!("{}.mcd", id.to_filename()));
				if mutable.exists() || compressed.exists() {
					1
				} else {
					0
				}
			})
			.collect()
	}

	fn mark_new_on_disk(&self, block_id: BlockId) {
		let mut add_list = self.compression_add_list.lock().unwrap();
		if !add_list.contains(&block_id) {
			add_list.push(block_id);
		}
	}

	// ---- sendBlockPart / sendBlockComplete (incoming stream) ----

	fn staging_path(&self, block_id: BlockId, file_type: u8) -> std::path::PathBuf {
		let ext = if file_type == 1 { "tmpc1" } else { "tmpc2" };
		self.data_dir.join(format!("{}.{}", block_id.to_filename(), ext))
	}

	pub async fn send_block_part(
		&self,
		block_id: BlockId,
		pos: u64,
		file_type: u8,
		buf: &[u8],
		_size: u64,
	) -> Result<()> {
		self.check_stop_state()?;
		let _guard = self.block_upload_lock.lock().await;

		let path = self.staging_path(block_id, file_type);
		let existing_len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

		if pos != existing_len {
			return Err(Error::BadFrame {
				expected: existing_len,
				got: pos,
			});
		}

		use std::io::Write;
		let mut f = std::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)?;
		f.write_all(buf)?;
		Ok(())
	}

	pub async fn send_block_complete(&self, block_id: BlockId, file_type: u8) -> Result<()> {
		self.check_stop_state()?;
		let _guard = self.block_upload_lock.lock().await;

		let staging = self.staging_path(block_id, file_type);
		let dest = if file_type == 1 {
			self.data_dir.join(block_id.to_filename())
		} else {
			self.data_dir.join(format!("{}.mcd", block_id.to_filename()))
		};

		if dest.exists() {
			return Err(Error::Message(format!(
				"{:?} already has a block file of this type",
				block_id
			)));
		}
		std::fs::rename(&staging, &dest)?;

		let mut state = self.path_lock.lock().unwrap();
		state
			.containers
			.entry(block_id)
			.or_insert_with(|| {
				Arc::new(BlockContainer::new(
					block_id,
					self.data_dir.clone(),
					file_type != 1,
				))
			});
		drop(state);
		self.mark_new_on_disk(block_id);

		Ok(())
	}

	// ---- sendBlockTo (outgoing streaming copy) ----

	pub fn send_block_to(
		self: &Arc<Self>,
		block_id: BlockId,
		dest: String,
		dest_guid: i64,
		managers: Vec<String>,
	) -> u64 {
		let process_id = self.next_process_id();
		let service = self.clone();
		self.background.spawn(async move {
			if let Err(e) = service
				.run_send_block_to(block_id, &dest, dest_guid, &managers)
				.await
			{
				error!("sendBlockTo({:?} -> {}) failed: {}", block_id, dest, e);
			}
			Ok(())
		});
		process_id
	}

	async fn run_send_block_to(
		&self,
		block_id: BlockId,
		dest: &str,
		dest_guid: i64,
		managers: &[String],
	) -> Result<()> {
		let mutable_path = self.data_dir.join(block_id.to_filename());
		let compressed_path = self.data_dir.join(format!("{}.mcd", block_id.to_filename()));

		let (path, file_type) = if compressed_path.exists() {
			(compressed_path, 2u8)
		} else if mutable_path.exists() {
			(mutable_path, 1u8)
		} else {
			return Err(Error::Message(format!("{:?} not present locally", block_id)));
		};

		let peer = self
			.peers
			.lock()
			.unwrap()
			.get(dest)
			.cloned()
			.ok_or_else(|| Error::ServiceNotConnected(dest.to_string()))?;

		let data = std::fs::read(&path)?;
		let part_size = self.config.stream_part_size;
		let mut pos = 0u64;
		for chunk in data.chunks(part_size) {
			peer.send_block_part(block_id, pos, file_type, chunk.to_vec())
				.await?;
			pos += chunk.len() as u64;
		}
		peer.send_block_complete(block_id, file_type).await?;
		self.metrics
			.stream_send_counter
			.add(&Context::current(), 1, &[]);

		let managers_snapshot = self.managers.lock().unwrap().clone();
		let _ = managers; // manager addresses are resolved by the caller's manager registry
		for manager in managers_snapshot {
			if let Err(e) = manager
				.internal_add_block_server_mapping(block_id, dest_guid)
				.await
			{
				error!(
					"internalAddBlockServerMapping({:?}, {}) failed: {}",
					block_id, dest_guid, e
				);
			}
		}
		Ok(())
	}

	// ---- preserveNodesInBlock ----

	pub fn preserve_nodes_in_block(self: &Arc<Self>, block_id: BlockId, addrs: Vec<DataAddress>) -> u64 {
		let process_id = self.next_process_id();
		let service = self.clone();
		self.background.spawn(async move {
			tokio::time::sleep(Duration::from_secs(1)).await;
			if let Err(e) = preserve_nodes_in_block(&service, block_id, &addrs).await {
				error!("preserveNodesInBlock({:?}) failed: {}", block_id, e);
			}
			Ok(())
		});
		process_id
	}

	/// Look up the (possibly closed) container the service currently holds
	/// for `block_id`, without going through the LRU-opening `fetch` path.
	/// Exposed for embedders and tests that need to inspect container state
	/// directly (e.g. reading `max_data_id` or forcing a `change_store`).
	pub fn container_for(&self, block_id: BlockId) -> Option<Arc<BlockContainer>> {
		self.path_lock.lock().unwrap().containers.get(&block_id).cloned()
	}

	pub(crate) fn data_dir(&self) -> &std::path::Path {
		&self.data_dir
	}

	/// Remove `path` after `delay`, ignoring a missing file. Used by the
	/// compressor to reclaim a mutable file once its compressed replacement
	/// has been live long enough that no in-flight reader can still expect
	/// the old store (spec.md §4.E).
	pub(crate) fn spawn_deletion(self: Arc<Self>, path: std::path::PathBuf, delay: Duration) {
		self.background.clone().spawn(async move {
			tokio::time::sleep(delay).await;
			match std::fs::remove_file(&path) {
				Ok(()) | Err(_) if !path.exists() => {}
				Err(e) => warn!("could not remove {}: {}", path.display(), e),
			}
			Ok(())
		});
	}

	pub async fn shutdown(&self) {
		info!("BlockService shutting down");
		let mut state = self.path_lock.lock().unwrap();
		for (_, container) in state.containers.drain() {
			// Best-effort: close any still-open containers.
			container.close();
		}
		state.access_list.clear();
		state.pending_sync.clear();
	}
}

fn read_or_create_guid(data_dir: &std::path::Path) -> Result<i64> {
	let path = data_dir.join(GUID_FILE);
	if let Ok(contents) = std::fs::read_to_string(&path) {
		if let Ok(guid) = contents.trim().parse::<i64>() {
			return Ok(guid);
		}
	}

	let millis = now_msec() as i64;
	let rand_part = rand::thread_rng().gen::<i64>() & 0x0FFF_FFFF;
	let guid = (millis << 16) ^ rand_part;
	std::fs::write(&path, guid.to_string())?;
	Ok(guid)
}

/// Enumerate the node directory, recovering `BlockId`s from `<id>` and
/// `<id>.mcd` filenames. Staging files (`.tempc`, `.tmpc1`, `.tmpc2`,
/// `.rew`) and the guid file are ignored.
fn scan_block_directory(data_dir: &std::path::Path) -> Result<Vec<(BlockId, bool)>> {
	let mut found = HashMap::new();
	for entry in std::fs::read_dir(data_dir)? {
		let entry = entry?;
		let name = entry.file_name();
		let name = match name.to_str() {
			Some(n) => n,
			None => continue,
		};
		if name == GUID_FILE {
			continue;
		}

		if let Some(stem) = name.strip_suffix(".mcd") {
			if let Some(id) = BlockId::parse_filename(stem) {
				found.insert(id, true);
			}
		} else if !name.contains('.') {
			if let Some(id) = BlockId::parse_filename(name) {
				found.entry(id).or_insert(false);
			}
		}
	}
	Ok(found.into_iter().collect())
}

#[cfg(test)]
mod test {
	use super::*;
	use mckoi_util::config::Config;
	use mktemp::Temp;
	use tokio::sync::watch;

	fn test_config(dir: &Temp) -> Config {
		Config {
			node_directory: dir.as_path().to_path_buf(),
			access_list_size: 32,
			fsync_delay_secs: 5,
			compression: mckoi_util::config::CompressionConfig {
				group_max_nodes: 24,
				group_max_bytes: 4096,
			},
			static_age_secs: 180,
			compress_gc_delay_secs: 300,
			preserve_min_age_secs: 7 * 24 * 60 * 60,
			preserve_disposal_threshold: 51_200,
			stream_part_size: 16 * 1024,
		}
	}

	#[tokio::test]
	async fn write_then_read_round_trip() {
		let dir = Temp::new_dir().unwrap();
		let (_stop_tx, stop_rx) = watch::channel(false);
		let (bg, _handle) = BackgroundRunner::new(1, stop_rx);
		let service = BlockService::start(test_config(&dir), bg).unwrap();

		let addr = DataAddress::new(BlockId::new(0, 7), 3).unwrap();
		service
			.write_to_block(addr, vec![0xAA, 0xBB, 0xCC])
			.await
			.unwrap();

		let set = service.read_from_block(addr).await.unwrap();
		let (_, payload) = set.iter().next().unwrap().unwrap();
		assert_eq!(payload, vec![0xAA, 0xBB, 0xCC]);

		service.shutdown().await;
	}

	#[tokio::test]
	async fn availability_map_reflects_disk() {
		let dir = Temp::new_dir().unwrap();
		let (_stop_tx, stop_rx) = watch::channel(false);
		let (bg, _handle) = BackgroundRunner::new(1, stop_rx);
		let service = BlockService::start(test_config(&dir), bg).unwrap();

		let present = BlockId::new(0, 1);
		let absent = BlockId::new(0, 2);
		let addr = DataAddress::new(present, 0).unwrap();
		service.write_to_block(addr, vec![1, 2, 3]).await.unwrap();

		let map = service.create_availability_map(&[present, absent]);
		assert_eq!(map, vec![1, 0]);
	}

	#[tokio::test]
	async fn duplicate_read_in_batch_is_suppressed() {
		let dir = Temp::new_dir().unwrap();
		let (_stop_tx, stop_rx) = watch::channel(false);
		let (bg, _handle) = BackgroundRunner::new(1, stop_rx);
		let service = BlockService::start(test_config(&dir), bg).unwrap();

		let block_id = BlockId::new(0, 1);
		let addr0 = DataAddress::new(block_id, 0).unwrap();
		service.write_to_block(addr0, vec![9, 9, 9]).await.unwrap();

		let commands = vec![
			BlockCommand::ReadFromBlock { addr: addr0 },
			BlockCommand::ReadFromBlock { addr: addr0 },
		];
		let replies = service.handle_batch(commands).await;
		assert_eq!(replies.len(), 1);
	}
}
