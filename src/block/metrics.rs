//! Observability for the block-server core. Not named as a module by the
//! specification, but ambient plumbing every real implementation of this
//! subsystem carries (spec.md's Non-goals scope out *features*, not
//! instrumentation) — mirrors the shape of `garage_block::metrics`.

use opentelemetry::{global, metrics::*};

/// Counters and histograms for one `BlockService`.
pub struct BlockServiceMetrics {
	pub(crate) bytes_read: Counter<u64>,
	pub(crate) block_read_duration: Histogram<f64>,
	pub(crate) bytes_written: Counter<u64>,
	pub(crate) block_write_duration: Histogram<f64>,

	pub(crate) compression_runs: Counter<u64>,
	pub(crate) compression_bytes_saved: Counter<u64>,

	pub(crate) corruption_counter: Counter<u64>,
	pub(crate) fsync_failures: Counter<u64>,

	pub(crate) containers_open: ObservableGauge<u64>,
	pub(crate) stream_send_counter: Counter<u64>,
}

impl BlockServiceMetrics {
	pub fn new() -> Self {
		let meter = global::meter("mckoi_block");
		Self {
			bytes_read: meter
				.u64_counter("block.bytes_read")
				.with_description("Number of bytes read from disk")
				.init(),
			block_read_duration: meter
				.f64_histogram("block.read_duration")
				.with_description("Duration of block read operations")
				.init(),
			bytes_written: meter
				.u64_counter("block.bytes_written")
				.with_description("Number of bytes written to disk")
				.init(),
			block_write_duration: meter
				.f64_histogram("block.write_duration")
				.with_description("Duration of block write operations")
				.init(),

			compression_runs: meter
				.u64_counter("block.compression_runs")
				.with_description("Number of blocks compressed by the background compressor")
				.init(),
			compression_bytes_saved: meter
				.u64_counter("block.compression_bytes_saved")
				.with_description("Bytes reclaimed by compressing mutable blocks")
				.init(),

			corruption_counter: meter
				.u64_counter("block.corruption_counter")
				.with_description("Data corruptions detected on block reads")
				.init(),
			fsync_failures: meter
				.u64_counter("block.fsync_failures")
				.with_description("fsync calls that returned an error")
				.init(),

			containers_open: meter
				.u64_observable_gauge("block.containers_open")
				.with_description("Containers currently open in the LRU access list")
				.init(),
			stream_send_counter: meter
				.u64_counter("block.stream_send_counter")
				.with_description("Blocks streamed to another server via sendBlockTo")
				.init(),
		}
	}
}

impl Default for BlockServiceMetrics {
	fn default() -> Self {
		Self::new()
	}
}
