//! Mutable block file format (spec.md §3, §4.B "Mutable").
//!
//! Fixed 16384-entry header (6 bytes each: `i32` offset, `i16` length)
//! followed by an append-only node payload region.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use crc32fast::Hasher;

use crate::block_id::{BlockId, MAX_DATA_ID};
use crate::error::{Error, Result};
use crate::node_set::NodeSet;

pub const HEADER_ENTRIES: usize = MAX_DATA_ID as usize;
pub const ENTRY_SIZE: u64 = 6;
pub const HEADER_SIZE: u64 = HEADER_ENTRIES as u64 * ENTRY_SIZE;

/// An append-only block file accepting writes and tombstones.
pub struct MutableBlockStore {
	pub(crate) block_id: BlockId,
	path: PathBuf,
	file: File,
}

fn entry_offset(data_id: u32) -> u64 {
	data_id as u64 * ENTRY_SIZE
}

fn decode_entry(buf: &[u8; 6]) -> (i32, i16) {
	let offset = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
	let length = i16::from_be_bytes([buf[4], buf[5]]);
	(offset, length)
}

fn encode_entry(offset: i32, length: i16) -> [u8; 6] {
	let mut buf = [0u8; 6];
	buf[0..4].copy_from_slice(&offset.to_be_bytes());
	buf[4..6].copy_from_slice(&length.to_be_bytes());
	buf
}

impl MutableBlockStore {
	/// Open (creating if absent) the mutable store for `block_id` at `path`.
	/// Returns whether the underlying file was newly created.
	pub fn open(block_id: BlockId, path: &Path) -> Result<(Self, bool)> {
		let created = !path.exists();

		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(path)?;

		if created {
			let zeros = vec![0u8; HEADER_SIZE as usize];
			file.write_all(&zeros)?;
			file.sync_all()?;
		}

		Ok((
			MutableBlockStore {
				block_id,
				path: path.to_path_buf(),
				file,
			},
			created,
		))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read_entry(&mut self, data_id: u32) -> Result<(i32, i16)> {
		let mut buf = [0u8; 6];
		self.file.seek(SeekFrom::Start(entry_offset(data_id)))?;
		self.file.read_exact(&mut buf)?;
		Ok(decode_entry(&buf))
	}

	fn write_entry(&mut self, data_id: u32, offset: i32, length: i16) -> Result<()> {
		self.file.seek(SeekFrom::Start(entry_offset(data_id)))?;
		self.file.write_all(&encode_entry(offset, length))?;
		Ok(())
	}

	pub fn put_data(&mut self, data_id: u32, buf: &[u8]) -> Result<()> {
		if data_id >= MAX_DATA_ID {
			return Err(Error::OutOfRange(data_id));
		}
		let (offset, length) = self.read_entry(data_id)?;
		if offset != 0 || length != 0 {
			return Err(Error::Message(format!(
				"duplicate write to data_id {}",
				data_id
			)));
		}

		let write_at = self.file.seek(SeekFrom::End(0))?;
		self.file.write_all(buf)?;

		let offset = i32::try_from(write_at)
			.map_err(|_| Error::Corrupt("block file exceeds addressable offset range".into()))?;
		let length = i16::try_from(buf.len())
			.map_err(|_| Error::Message("node payload exceeds 65535 bytes".into()))?;
		self.write_entry(data_id, offset, length)?;

		Ok(())
	}

	pub fn remove_data(&mut self, data_id: u32) -> Result<bool> {
		if data_id >= MAX_DATA_ID {
			return Err(Error::OutOfRange(data_id));
		}
		let (offset, length) = self.read_entry(data_id)?;
		if offset == 0 && length == 0 {
			return Ok(false);
		}
		if offset < 0 {
			// Already tombstoned: leave as-is, do not re-negate.
			return Ok(false);
		}
		self.write_entry(data_id, -offset, 0)?;
		Ok(true)
	}

	pub fn get_data(&mut self, data_id: u32) -> Result<NodeSet> {
		if data_id >= MAX_DATA_ID {
			return Err(Error::OutOfRange(data_id));
		}
		let (offset, length) = self.read_entry(data_id)?;
		if (offset == 0 && length == 0) || offset < 0 {
			return Err(Error::DataIdNotPresent(data_id));
		}

		let mut payload = vec![0u8; length as usize];
		self.file.seek(SeekFrom::Start(offset as u64))?;
		self.file.read_exact(&mut payload)?;

		let node_id = self.block_id.node_reference(data_id);
		Ok(NodeSet::single(node_id, Bytes::from(payload)))
	}

	/// Scan the header from slot 0 until the first unused `(0, 0)` slot.
	/// Returns `None` if slot 0 is already unused.
	pub fn max_data_id(&mut self) -> Result<Option<u32>> {
		for i in 0..HEADER_ENTRIES as u32 {
			let (offset, length) = self.read_entry(i)?;
			if offset == 0 && length == 0 {
				return Ok(if i == 0 { None } else { Some(i - 1) });
			}
		}
		Ok(Some(HEADER_ENTRIES as u32 - 1))
	}

	/// CRC32 (the spec's "Adler-32 or equivalent 64-bit rolling sum") over
	/// all live node payload bytes, in slot order.
	pub fn checksum(&mut self) -> Result<i64> {
		let max = match self.max_data_id()? {
			None => return Ok(0),
			Some(m) => m,
		};
		let mut hasher = Hasher::new();
		for i in 0..=max {
			let (offset, length) = self.read_entry(i)?;
			if offset <= 0 {
				continue;
			}
			let mut payload = vec![0u8; length as usize];
			self.file.seek(SeekFrom::Start(offset as u64))?;
			self.file.read_exact(&mut payload)?;
			hasher.update(&payload);
		}
		Ok(hasher.finalize() as i64)
	}

	pub fn fsync(&mut self) -> Result<()> {
		self.file.sync_all()?;
		Ok(())
	}

	pub fn close(self) {
		// File is closed on drop; nothing else to do for a mutable store.
	}
}
