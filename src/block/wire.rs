//! Wire protocol types (spec.md §6): command/reply framing, argument
//! encoding primitives, and `ExternalThrowable`.
//!
//! The socket/TCP framing loop itself is out of scope (spec.md §1 lists TCP
//! framing as a non-goal); this module only gives the typed, encodable
//! shapes that a transport would decode a request into and that
//! [`crate::service::BlockService`] consumes and produces.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::block_id::{BlockId, DataAddress};
use crate::node_set::NodeSet;

/// The class name, message, and stack trace of a server-side failure,
/// carried back to the caller as a reply frame instead of a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalThrowable {
	pub class_name: String,
	pub message: String,
	pub stack_trace: String,
}

impl ExternalThrowable {
	pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
		write_string(w, &self.class_name)?;
		write_string(w, &self.message)?;
		write_string(w, &self.stack_trace)?;
		Ok(())
	}

	pub fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
		Ok(ExternalThrowable {
			class_name: read_string(r)?,
			message: read_string(r)?,
			stack_trace: read_string(r)?,
		})
	}
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
	let bytes = s.as_bytes();
	w.write_u32::<BigEndian>(bytes.len() as u32)?;
	w.write_all(bytes)
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
	let len = r.read_u32::<BigEndian>()?;
	let mut buf = vec![0u8; len as usize];
	r.read_exact(&mut buf)?;
	String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_bytes<W: Write>(w: &mut W, b: &[u8]) -> io::Result<()> {
	w.write_u32::<BigEndian>(b.len() as u32)?;
	w.write_all(b)
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
	let len = r.read_u32::<BigEndian>()?;
	let mut buf = vec![0u8; len as usize];
	r.read_exact(&mut buf)?;
	Ok(buf)
}

pub fn write_block_id<W: Write>(w: &mut W, id: &BlockId) -> io::Result<()> {
	w.write_i64::<BigEndian>(id.high as i64)?;
	w.write_i64::<BigEndian>(id.low as i64)
}

pub fn read_block_id<R: Read>(r: &mut R) -> io::Result<BlockId> {
	let high = r.read_i64::<BigEndian>()? as u64;
	let low = r.read_i64::<BigEndian>()? as u64;
	Ok(BlockId::new(high, low))
}

pub fn write_data_address<W: Write>(w: &mut W, addr: &DataAddress) -> io::Result<()> {
	w.write_i32::<BigEndian>(addr.data_id as i32)?;
	write_block_id(w, &addr.block_id)
}

pub fn read_data_address<R: Read>(r: &mut R) -> io::Result<DataAddress> {
	let data_id = r.read_i32::<BigEndian>()? as u32;
	let block_id = read_block_id(r)?;
	Ok(DataAddress { block_id, data_id })
}

pub fn write_block_id_vec<W: Write>(w: &mut W, ids: &[BlockId]) -> io::Result<()> {
	w.write_u32::<BigEndian>(ids.len() as u32)?;
	for id in ids {
		write_block_id(w, id)?;
	}
	Ok(())
}

pub fn read_block_id_vec<R: Read>(r: &mut R) -> io::Result<Vec<BlockId>> {
	let n = r.read_u32::<BigEndian>()?;
	(0..n).map(|_| read_block_id(r)).collect()
}

pub fn write_data_address_vec<W: Write>(w: &mut W, addrs: &[DataAddress]) -> io::Result<()> {
	w.write_u32::<BigEndian>(addrs.len() as u32)?;
	for a in addrs {
		write_data_address(w, a)?;
	}
	Ok(())
}

pub fn read_data_address_vec<R: Read>(r: &mut R) -> io::Result<Vec<DataAddress>> {
	let n = r.read_u32::<BigEndian>()?;
	(0..n).map(|_| read_data_address(r)).collect()
}

/// A single on-the-wire manager identifier, as referenced by `sendBlockTo`.
pub type ManagerAddr = String;

/// One of the commands a block server accepts, already decoded from the
/// framed message stream (spec.md §4.F command table). A real transport
/// decodes `(name: string, args...)` frames into this enum.
#[derive(Clone, Debug)]
pub enum BlockCommand {
	WriteToBlock {
		addr: DataAddress,
		buf: Vec<u8>,
		off: u32,
		len: u32,
	},
	ReadFromBlock {
		addr: DataAddress,
	},
	RollbackNodes {
		addrs: Vec<DataAddress>,
	},
	DeleteBlock {
		block_id: BlockId,
	},
	ServerGuid,
	BlockSetReport,
	Poll {
		message: String,
	},
	NotifyCurrentBlockId {
		block_id: BlockId,
	},
	BlockChecksum {
		block_id: BlockId,
	},
	SendBlockTo {
		block_id: BlockId,
		dest: String,
		dest_guid: i64,
		managers: Vec<ManagerAddr>,
	},
	SendBlockPart {
		block_id: BlockId,
		pos: u64,
		file_type: u8,
		buf: Vec<u8>,
		size: u64,
	},
	SendBlockComplete {
		block_id: BlockId,
		file_type: u8,
	},
	PreserveNodesInBlock {
		block_id: BlockId,
		addrs: Vec<DataAddress>,
	},
	CreateAvailabilityMapForBlocks {
		block_ids: Vec<BlockId>,
	},
}

/// A reply frame: either `("R", value)` or `("E", ExternalThrowable)`.
#[derive(Clone, Debug)]
pub enum BlockReply {
	Ok,
	NodeSet(NodeSet),
	I64(i64),
	ProcessId(u64),
	ServerGuidAndBlocks(i64, Vec<BlockId>),
	AvailabilityMap(Vec<u8>),
	Error(ExternalThrowable),
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn external_throwable_round_trips() {
		let t = ExternalThrowable {
			class_name: "BlockReadError$DataIdNotPresent".into(),
			message: "data_id 3 not present".into(),
			stack_trace: "".into(),
		};
		let mut buf = Vec::new();
		t.encode(&mut buf).unwrap();
		let mut cursor = Cursor::new(buf);
		let decoded = ExternalThrowable::decode(&mut cursor).unwrap();
		assert_eq!(decoded, t);
	}

	#[test]
	fn data_address_round_trips() {
		let addr = DataAddress::new(BlockId::new(1, 2), 42).unwrap();
		let mut buf = Vec::new();
		write_data_address(&mut buf, &addr).unwrap();
		let mut cursor = Cursor::new(buf);
		let decoded = read_data_address(&mut cursor).unwrap();
		assert_eq!(decoded, addr);
	}
}
