//! Contains types and functions related to the block server's configuration
//! file.
use std::io::Read;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

/// Configuration for a single block server process.
///
/// Path configuration, admin/CLI flags and TCP bind addresses are the
/// enclosing node-directory's concern (out of scope here); this struct only
/// carries the tunables the block-server core itself needs in order to be
/// configurable rather than hard-coded.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	/// Directory in which block files (`<id>`, `<id>.mcd`, staging files,
	/// and `block_server_guid`) are stored.
	pub node_directory: PathBuf,

	/// Maximum number of containers kept open in the LRU access list.
	#[serde(default = "default_access_list_size")]
	pub access_list_size: usize,

	/// Delay, in seconds, between a mutation and its scheduled fsync.
	#[serde(default = "default_fsync_delay_secs")]
	pub fsync_delay_secs: u64,

	/// Compression tunables for the background compressor.
	#[serde(default)]
	pub compression: CompressionConfig,

	/// Age, in seconds, a block's `last_write` must exceed before it is
	/// eligible to be considered known-static.
	#[serde(default = "default_static_age_secs")]
	pub static_age_secs: u64,

	/// Delay, in seconds, after a compression swap before the original
	/// mutable file is deleted.
	#[serde(default = "default_compress_gc_delay_secs")]
	pub compress_gc_delay_secs: u64,

	/// Minimum age, in seconds, of a compressed block before
	/// `preserveNodesInBlock` may run on it.
	#[serde(default = "default_preserve_min_age_secs")]
	pub preserve_min_age_secs: u64,

	/// Minimum number of disposed bytes required for a preserve-rewrite to
	/// actually install its staging store.
	#[serde(default = "default_preserve_disposal_threshold")]
	pub preserve_disposal_threshold: u64,

	/// Part size, in bytes, used when streaming a block to another server.
	#[serde(default = "default_stream_part_size")]
	pub stream_part_size: usize,
}

/// Tunables for the background compressor's greedy node grouping.
#[derive(Deserialize, Debug, Clone)]
pub struct CompressionConfig {
	#[serde(default = "default_group_max_nodes")]
	pub group_max_nodes: usize,
	#[serde(default = "default_group_max_bytes")]
	pub group_max_bytes: usize,
}

impl Default for CompressionConfig {
	fn default() -> Self {
		CompressionConfig {
			group_max_nodes: default_group_max_nodes(),
			group_max_bytes: default_group_max_bytes(),
		}
	}
}

fn default_access_list_size() -> usize {
	32
}
fn default_fsync_delay_secs() -> u64 {
	5
}
fn default_static_age_secs() -> u64 {
	3 * 60
}
fn default_compress_gc_delay_secs() -> u64 {
	5 * 60
}
fn default_preserve_min_age_secs() -> u64 {
	7 * 24 * 60 * 60
}
fn default_preserve_disposal_threshold() -> u64 {
	51_200
}
fn default_stream_part_size() -> usize {
	16 * 1024
}
fn default_group_max_nodes() -> usize {
	24
}
fn default_group_max_bytes() -> usize {
	4096
}

/// Read and parse the block server's configuration file.
pub fn read_config(config_file: PathBuf) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.open(config_file.as_path())?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	Ok(toml::from_str(&config)?)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let toml_src = r#"node_directory = "/tmp/blocks""#;
		let cfg: Config = toml::from_str(toml_src).unwrap();
		assert_eq!(cfg.access_list_size, 32);
		assert_eq!(cfg.fsync_delay_secs, 5);
		assert_eq!(cfg.compression.group_max_nodes, 24);
		assert_eq!(cfg.compression.group_max_bytes, 4096);
		assert_eq!(cfg.preserve_disposal_threshold, 51_200);
	}
}
