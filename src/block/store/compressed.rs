//! Compressed block file format (spec.md §3, §4.B "Compressed") and the
//! compression routine that turns a [`MutableBlockStore`] into one
//! (spec.md §4.E "Compression function").

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use crc32fast::Hasher;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::block_id::{BlockId, NodeReference};
use crate::error::{Error, Result};
use crate::node_set::NodeSet;
use crate::store::mutable::MutableBlockStore;

const TERMINATOR_SIZE: u64 = 6;

/// A read-only, deflate-packed block file.
pub struct CompressedBlockStore {
	block_id: BlockId,
	path: PathBuf,
	file: File,
	/// `(position, length)` / `(-(group_leader + 1), 0)` for every used
	/// slot, in order. The payload region starts right after
	/// `header.len() * 6 + 6` (terminator) bytes.
	header: Vec<(i32, i16)>,
}

impl CompressedBlockStore {
	pub fn open(block_id: BlockId, path: &Path) -> Result<Self> {
		let mut file = OpenOptions::new().read(true).open(path)?;

		let mut header = Vec::new();
		loop {
			let position = file.read_i32::<BigEndian>().map_err(|_| {
				Error::Corrupt(format!("{}: truncated compressed header", path.display()))
			})?;
			let length = file.read_i16::<BigEndian>().map_err(|_| {
				Error::Corrupt(format!("{}: truncated compressed header", path.display()))
			})?;
			if position == 0 && length == 0 {
				break;
			}
			header.push((position, length));
		}

		Ok(CompressedBlockStore {
			block_id,
			path: path.to_path_buf(),
			file,
			header,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn header_bytes_len(&self) -> u64 {
		self.header.len() as u64 * 6 + TERMINATOR_SIZE
	}

	pub fn max_data_id(&self) -> Option<u32> {
		if self.header.is_empty() {
			None
		} else {
			Some(self.header.len() as u32 - 1)
		}
	}

	fn group_leader_index(&self, data_id: u32) -> Result<usize> {
		let (offset, _) = *self
			.header
			.get(data_id as usize)
			.ok_or(Error::DataIdNotPresent(data_id))?;
		if offset >= 0 {
			Ok(data_id as usize)
		} else {
			Ok((-(offset + 1)) as usize)
		}
	}

	/// All `data_id`s belonging to the group starting at `leader`, and the
	/// group's decompressed node payloads, in order.
	fn read_group(&mut self, leader: usize) -> Result<(Vec<u32>, Vec<Vec<u8>>)> {
		let (position, length) = self.header[leader];
		if position < 0 {
			return Err(Error::Corrupt(format!(
				"{}: slot {} is not a group leader",
				self.path.display(),
				leader
			)));
		}

		let mut members = vec![leader as u32];
		let mut j = leader + 1;
		while j < self.header.len() {
			let (off, _) = self.header[j];
			if off < 0 && (-(off + 1)) as usize == leader {
				members.push(j as u32);
				j += 1;
			} else {
				break;
			}
		}

		let mut frame = vec![0u8; length as usize];
		self.file
			.seek(SeekFrom::Start(self.header_bytes_len() + position as u64))?;
		self.file.read_exact(&mut frame)?;

		let mut decoder = flate2::read::DeflateDecoder::new(std::io::Cursor::new(frame));
		let mut payloads = Vec::with_capacity(members.len());
		for _ in &members {
			let len = decoder
				.read_u16::<BigEndian>()
				.map_err(|e| Error::Corrupt(format!("decompressing group: {}", e)))?;
			let mut buf = vec![0u8; len as usize];
			decoder
				.read_exact(&mut buf)
				.map_err(|e| Error::Corrupt(format!("decompressing group: {}", e)))?;
			payloads.push(buf);
		}

		Ok((members, payloads))
	}

	pub fn get_data(&mut self, data_id: u32) -> Result<NodeSet> {
		let leader = self.group_leader_index(data_id)?;
		let (position, length) = self.header[leader];

		let mut frame = vec![0u8; length as usize];
		self.file
			.seek(SeekFrom::Start(self.header_bytes_len() + position as u64))?;
		self.file.read_exact(&mut frame)?;

		let (members, _) = self.read_group(leader)?;
		let node_ids: Vec<NodeReference> = members
			.iter()
			.map(|id| self.block_id.node_reference(*id))
			.collect();

		Ok(NodeSet::compressed_group(node_ids, Bytes::from(frame)))
	}

	pub fn put_data(&mut self, _data_id: u32, _buf: &[u8]) -> Result<()> {
		Err(Error::NotSupported)
	}

	pub fn remove_data(&mut self, _data_id: u32) -> Result<bool> {
		Err(Error::NotSupported)
	}

	pub fn checksum(&mut self) -> Result<i64> {
		let mut hasher = Hasher::new();
		let mut i = 0usize;
		while i < self.header.len() {
			let (offset, _) = self.header[i];
			if offset < 0 {
				i += 1;
				continue;
			}
			let (members, payloads) = self.read_group(i)?;
			for payload in &payloads {
				hasher.update(payload);
			}
			i += members.len();
		}
		Ok(hasher.finalize() as i64)
	}

	pub fn fsync(&mut self) -> Result<()> {
		// Read-only store; nothing to flush.
		Ok(())
	}

	pub fn close(self) {}
}

/// Compress `source`'s current contents into a new compressed store at
/// `dest_path`, using the streaming greedy grouping algorithm of spec.md
/// §4.E: grow a group until it would exceed `group_max_nodes` members or
/// `group_max_bytes` of compressed output, then start a new group.
///
/// A data_id whose mutable slot was tombstoned compresses to an empty-node
/// placeholder rather than being omitted: the compressed header format has
/// no slot encoding for "absent", only group-leader/back-pointer slots, so
/// there is no interior hole it could represent.
pub fn compress(
	source: &mut MutableBlockStore,
	dest_path: &Path,
	group_max_nodes: usize,
	group_max_bytes: usize,
) -> Result<()> {
	let n = match source.max_data_id()? {
		None => 0usize,
		Some(m) => m as usize + 1,
	};

	let mut raw_nodes = Vec::with_capacity(n);
	for data_id in 0..n as u32 {
		let bytes = match source.get_data(data_id) {
			Ok(set) => set.iter().next().unwrap().map(|(_, b)| b).unwrap_or_default(),
			Err(Error::DataIdNotPresent(_)) => Vec::new(),
			Err(e) => return Err(e),
		};
		raw_nodes.push(bytes);
	}

	let mut header: Vec<(i32, i16)> = vec![(0, 0); n];
	let mut frames: Vec<u8> = Vec::new();
	let mut position: u64 = 0;

	let mut i = 0usize;
	while i < n {
		let mut group_end = i + 1;
		let mut frame = encode_group(&raw_nodes[i..group_end])?;

		while group_end < n && group_end - i < group_max_nodes {
			let candidate = encode_group(&raw_nodes[i..group_end + 1])?;
			if candidate.len() > group_max_bytes {
				break;
			}
			frame = candidate;
			group_end += 1;
		}

		let frame_len = i16::try_from(frame.len())
			.map_err(|_| Error::Corrupt("compressed group frame exceeds 32767 bytes".into()))?;
		let frame_position = i32::try_from(position)
			.map_err(|_| Error::Corrupt("compressed block exceeds addressable range".into()))?;

		header[i] = (frame_position, frame_len);
		for j in (i + 1)..group_end {
			header[j] = (-((i as i32) + 1), 0);
		}

		position += frame.len() as u64;
		frames.extend_from_slice(&frame);
		i = group_end;
	}

	let mut out = OpenOptions::new()
		.write(true)
		.create_new(true)
		.open(dest_path)?;
	for (offset, length) in &header {
		out.write_i32::<BigEndian>(*offset)?;
		out.write_i16::<BigEndian>(*length)?;
	}
	out.write_i32::<BigEndian>(0)?;
	out.write_i16::<BigEndian>(0)?;
	out.write_all(&frames)?;
	out.sync_all()?;

	Ok(())
}

fn encode_group(nodes: &[Vec<u8>]) -> Result<Vec<u8>> {
	let mut raw = Vec::new();
	for node in nodes {
		raw.write_u16::<BigEndian>(node.len() as u16)
			.expect("writing to a Vec cannot fail");
		raw.extend_from_slice(node);
	}

	let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(&raw)?;
	Ok(encoder.finish()?)
}

#[cfg(test)]
mod test {
	use super::*;
	use mktemp::Temp;

	fn temp_dir() -> Temp {
		Temp::new_dir().unwrap()
	}

	fn make_mutable(dir: &Temp, block_id: BlockId, nodes: &[&[u8]]) -> PathBuf {
		let path = dir.as_path().join(block_id.to_filename());
		let (mut store, _) = MutableBlockStore::open(block_id, &path).unwrap();
		for (i, n) in nodes.iter().enumerate() {
			store.put_data(i as u32, n).unwrap();
		}
		store.fsync().unwrap();
		path
	}

	#[test]
	fn compression_round_trip_preserves_bytes() {
		let dir = temp_dir();
		let block_id = BlockId::new(0, 1);
		let nodes: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 200]).collect();
		let node_refs: Vec<&[u8]> = nodes.iter().map(|v| v.as_slice()).collect();
		let mutable_path = make_mutable(&dir, block_id, &node_refs);

		let compressed_path = dir.as_path().join(format!("{}.mcd", block_id.to_filename()));
		let (mut source, _) = MutableBlockStore::open(block_id, &mutable_path).unwrap();
		compress(&mut source, &compressed_path, 24, 4096).unwrap();

		let mut cstore = CompressedBlockStore::open(block_id, &compressed_path).unwrap();
		for (i, expected) in nodes.iter().enumerate() {
			let set = cstore.get_data(i as u32).unwrap();
			let got = set
				.iter()
				.find(|r| r.as_ref().map(|(id, _)| *id == block_id.node_reference(i as u32)).unwrap_or(false))
				.unwrap()
				.unwrap()
				.1;
			assert_eq!(&got, expected);
		}
	}

	#[test]
	fn compressed_store_rejects_mutation() {
		let dir = temp_dir();
		let block_id = BlockId::new(0, 2);
		let mutable_path = make_mutable(&dir, block_id, &[b"a", b"b"]);
		let compressed_path = dir.as_path().join(format!("{}.mcd", block_id.to_filename()));
		let (mut source, _) = MutableBlockStore::open(block_id, &mutable_path).unwrap();
		compress(&mut source, &compressed_path, 24, 4096).unwrap();

		let mut cstore = CompressedBlockStore::open(block_id, &compressed_path).unwrap();
		assert!(matches!(cstore.put_data(0, b"x"), Err(Error::NotSupported)));
		assert!(matches!(cstore.remove_data(0), Err(Error::NotSupported)));
	}

	#[test]
	fn checksum_matches_before_and_after_compression() {
		let dir = temp_dir();
		let block_id = BlockId::new(0, 3);
		let nodes: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; 50]).collect();
		let node_refs: Vec<&[u8]> = nodes.iter().map(|v| v.as_slice()).collect();
		let mutable_path = make_mutable(&dir, block_id, &node_refs);

		let (mut source, _) = MutableBlockStore::open(block_id, &mutable_path).unwrap();
		let before = source.checksum().unwrap();

		let compressed_path = dir.as_path().join(format!("{}.mcd", block_id.to_filename()));
		compress(&mut source, &compressed_path, 24, 4096).unwrap();
		let mut cstore = CompressedBlockStore::open(block_id, &compressed_path).unwrap();
		let after = cstore.checksum().unwrap();

		assert_eq!(before, after);
	}
}
