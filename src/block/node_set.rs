//! The `NodeSet` wire type (spec.md §3, §4.C): a lazy grouping of the node
//! binaries belonging to one block, used to amortize network round-trips.

use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use flate2::read::DeflateDecoder;

use crate::block_id::NodeReference;

const VARIANT_SINGLE_UNCOMPRESSED: u8 = 1;
const VARIANT_COMPRESSED_GROUP: u8 = 2;

/// The two wire encodings a `NodeSet` may carry.
#[derive(Clone, Debug)]
pub enum NodeSetData {
	/// One node, stored verbatim.
	SingleUncompressed { payload: Bytes },
	/// Several nodes sharing one DEFLATE frame, each prefixed in the
	/// decompressed stream by a `u16` length (`0` for an empty node).
	CompressedGroup { frame: Bytes },
}

/// A lazy sequence of node binaries belonging to a single block.
#[derive(Clone, Debug)]
pub struct NodeSet {
	pub node_ids: Vec<NodeReference>,
	pub data: NodeSetData,
}

impl NodeSet {
	pub fn single(node_id: NodeReference, payload: Bytes) -> Self {
		NodeSet {
			node_ids: vec![node_id],
			data: NodeSetData::SingleUncompressed { payload },
		}
	}

	pub fn compressed_group(node_ids: Vec<NodeReference>, frame: Bytes) -> Self {
		NodeSet {
			node_ids,
			data: NodeSetData::CompressedGroup { frame },
		}
	}

	pub fn variant_tag(&self) -> u8 {
		match self.data {
			NodeSetData::SingleUncompressed { .. } => VARIANT_SINGLE_UNCOMPRESSED,
			NodeSetData::CompressedGroup { .. } => VARIANT_COMPRESSED_GROUP,
		}
	}

	fn encoded_bytes(&self) -> &Bytes {
		match &self.data {
			NodeSetData::SingleUncompressed { payload } => payload,
			NodeSetData::CompressedGroup { frame } => frame,
		}
	}

	/// Size in bytes of the wire payload actually transferred for this set,
	/// for the `bytes_read`/`bytes_written` metrics.
	pub fn byte_len(&self) -> usize {
		self.encoded_bytes().len()
	}

	/// Iterate the nodes in this set in order. For a compressed group, all
	/// items share one decompressor: skipping an item or iterating out of
	/// order invalidates subsequent reads, as specified.
	pub fn iter(&self) -> NodeSetIter<'_> {
		match &self.data {
			NodeSetData::SingleUncompressed { payload } => NodeSetIter {
				node_ids: &self.node_ids,
				next: 0,
				source: IterSource::Single(Some(payload.clone())),
			},
			NodeSetData::CompressedGroup { frame } => NodeSetIter {
				node_ids: &self.node_ids,
				next: 0,
				source: IterSource::Compressed(DeflateDecoder::new(Cursor::new(frame.clone()))),
			},
		}
	}

	/// Encode onto the message stream: `u8 variant; u32 n; n x (i64 high,
	/// i64 low); u32 encoded_len; encoded_len bytes`.
	pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
		w.write_u8(self.variant_tag())?;
		w.write_u32::<BigEndian>(self.node_ids.len() as u32)?;
		for id in &self.node_ids {
			w.write_i64::<BigEndian>(id.high as i64)?;
			w.write_i64::<BigEndian>(id.low as i64)?;
		}
		let bytes = self.encoded_bytes();
		w.write_u32::<BigEndian>(bytes.len() as u32)?;
		w.write_all(bytes)?;
		Ok(())
	}

	pub fn decode<R: Read>(r: &mut R) -> io::Result<NodeSet> {
		let variant = r.read_u8()?;
		let n = r.read_u32::<BigEndian>()?;
		let mut node_ids = Vec::with_capacity(n as usize);
		for _ in 0..n {
			let high = r.read_i64::<BigEndian>()? as u64;
			let low = r.read_i64::<BigEndian>()? as u64;
			node_ids.push(NodeReference { high, low });
		}
		let encoded_len = r.read_u32::<BigEndian>()?;
		let mut buf = vec![0u8; encoded_len as usize];
		r.read_exact(&mut buf)?;
		let bytes = Bytes::from(buf);

		let data = match variant {
			VARIANT_SINGLE_UNCOMPRESSED => NodeSetData::SingleUncompressed { payload: bytes },
			VARIANT_COMPRESSED_GROUP => NodeSetData::CompressedGroup { frame: bytes },
			other => {
				return Err(io::Error::new(
					io::ErrorKind::InvalidData,
					format!("unknown NodeSet variant tag {}", other),
				))
			}
		};

		Ok(NodeSet { node_ids, data })
	}
}

enum IterSource {
	Single(Option<Bytes>),
	Compressed(DeflateDecoder<Cursor<Bytes>>),
}

/// Iterator over the `(NodeReference, bytes)` pairs of a [`NodeSet`]. Must be
/// driven to completion, in order, for a compressed group.
pub struct NodeSetIter<'a> {
	node_ids: &'a [NodeReference],
	next: usize,
	source: IterSource,
}

impl<'a> Iterator for NodeSetIter<'a> {
	type Item = io::Result<(NodeReference, Vec<u8>)>;

	fn next(&mut self) -> Option<Self::Item> {
		let id = *self.node_ids.get(self.next)?;
		self.next += 1;

		let payload = match &mut self.source {
			IterSource::Single(slot) => match slot.take() {
				Some(bytes) => bytes.to_vec(),
				None => {
					return Some(Err(io::Error::new(
						io::ErrorKind::UnexpectedEof,
						"single-node NodeSet iterated more than once",
					)))
				}
			},
			IterSource::Compressed(decoder) => {
				let len = match decoder.read_u16::<BigEndian>() {
					Ok(l) => l,
					Err(e) => return Some(Err(e)),
				};
				let mut buf = vec![0u8; len as usize];
				if let Err(e) = decoder.read_exact(&mut buf) {
					return Some(Err(e));
				}
				buf
			}
		};

		Some(Ok((id, payload)))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::block_id::BlockId;
	use std::io::Cursor as StdCursor;

	#[test]
	fn single_node_round_trips_through_iter() {
		let id = BlockId::new(0, 1).node_reference(3);
		let set = NodeSet::single(id, Bytes::from_static(b"hello"));
		let mut it = set.iter();
		let (got_id, payload) = it.next().unwrap().unwrap();
		assert_eq!(got_id, id);
		assert_eq!(payload, b"hello");
		assert!(it.next().is_none());
	}

	#[test]
	fn wire_encoding_round_trips() {
		let id = BlockId::new(9, 2).node_reference(0);
		let set = NodeSet::single(id, Bytes::from_static(b"payload-bytes"));

		let mut buf = Vec::new();
		set.encode(&mut buf).unwrap();

		let mut cursor = StdCursor::new(buf);
		let decoded = NodeSet::decode(&mut cursor).unwrap();
		assert_eq!(decoded.node_ids, set.node_ids);

		let (_, payload) = decoded.iter().next().unwrap().unwrap();
		assert_eq!(payload, b"payload-bytes");
	}

	#[test]
	fn compressed_group_iterates_nodes_in_order() {
		use flate2::write::DeflateEncoder;
		use flate2::Compression;

		let mut plain = Vec::new();
		for node in [&b"aa"[..], &b""[..], &b"ccc"[..]] {
			plain
				.write_u16::<BigEndian>(node.len() as u16)
				.unwrap();
			plain.extend_from_slice(node);
		}

		let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
		enc.write_all(&plain).unwrap();
		let frame = enc.finish().unwrap();

		let ids = vec![
			BlockId::new(0, 1).node_reference(0),
			BlockId::new(0, 1).node_reference(1),
			BlockId::new(0, 1).node_reference(2),
		];
		let set = NodeSet::compressed_group(ids.clone(), Bytes::from(frame));

		let collected: Vec<_> = set
			.iter()
			.map(|r| r.unwrap())
			.map(|(id, bytes)| (id, bytes))
			.collect();

		assert_eq!(collected[0].0, ids[0]);
		assert_eq!(collected[0].1, b"aa");
		assert_eq!(collected[1].1, Vec::<u8>::new());
		assert_eq!(collected[2].1, b"ccc");
	}
}
