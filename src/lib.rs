//! Multi-threaded, cache-tier-aware segmented wheel sieve for 64-bit prime
//! ranges.
//!
//! The engine computes primes in a half-open interval `[from, to)` and
//! supports four output modes: count only, emit every prime, locate the k-th
//! prime, or count analytically via Meissel–Lehmer.
//!
//! High-level flow (one run):
//! 1) A bootstrap sieve produces all sieving primes up to `sqrt(to)`.
//! 2) Sieving primes are classified small / medium / large against the
//!    segment geometry chosen from the cache topology.
//! 3) Worker threads pull segment IDs from a shared queue; each worker
//!    presieves by wheel residue, replays bucket-scheduled large-prime hits,
//!    and marks small/medium primes tile by tile.
//! 4) Zero bits are counted per segment (SIMD where available); when primes
//!    must be emitted, a delivery thread streams the segments in order to
//!    the writer, the caller's callback, and the collection store.
//!
//! The library surface is [`run_range`] plus the leaf components it is built
//! from, each usable on its own:
//!
//! - [`base_sieve::simple_sieve`] - bootstrap sieve.
//! - [`wheel::get_wheel`] - process-wide residue wheels.
//! - [`segment::choose_segment_config`] - cache-aware sizing.
//! - [`marker::PrimeMarker`] - per-thread segment sieving.
//! - [`popcount::count_zero_bits`] - SIMD zero-bit counting.
//! - [`writer::PrimeWriter`] - pipelined text/binary/delta output.
//! - [`meissel::meissel_count`] - analytic interval counting.
//! - [`miller_rabin::miller_rabin_is_prime`] - deterministic primality.

pub mod base_sieve;
pub mod bucket;
pub mod cli;
pub mod cpu;
pub mod marker;
pub mod meissel;
pub mod miller_rabin;
pub mod popcount;
mod runner;
pub mod segment;
pub mod wheel;
pub mod writer;

pub use base_sieve::simple_sieve;
pub use cpu::{detect_cpu_info, effective_thread_count, CpuInfo};
pub use meissel::meissel_count;
pub use miller_rabin::miller_rabin_is_prime;
pub use popcount::{count_zero_bits, popcount_u64};
pub use runner::run_range;
pub use segment::{choose_segment_config, SegmentConfig};
pub use wheel::{get_wheel, WheelKind};
pub use writer::OutputFormat;

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered chunk consumer. `Break` stops the run (reported as cancellation).
pub type PrimeCallback = Arc<dyn Fn(&[u64]) -> ControlFlow<()> + Send + Sync>;

/// Progress consumer, called serialized with values in `[0.0, 1.0]`.
/// `Break` stops the run (reported as cancellation).
pub type ProgressCallback = Arc<dyn Fn(f64) -> ControlFlow<()> + Send + Sync>;

/// Shared cancellation bit polled at the top of every worker loop.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; each worker observes it within one segment.
    pub fn request(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Everything a range run needs. Zero values mean "pick a default" for
/// `threads`, `segment_bytes` and `tile_bytes`; `nth_index` is 1-based and
/// zero means "no n-th search".
#[derive(Clone, Default)]
pub struct RangeOptions {
    pub from: u64,
    pub to: u64,
    pub threads: u32,
    pub wheel: WheelKind,
    pub segment_bytes: usize,
    pub tile_bytes: usize,
    pub nth_index: u64,
    /// Keep every delivered chunk in the report.
    pub collect_primes: bool,
    /// Count via Meissel–Lehmer instead of sieving. Incompatible with any
    /// prime-delivery option and with `nth_index`.
    pub use_meissel: bool,
    /// Open a [`writer::PrimeWriter`] on `output_path` (stdout when `None`).
    pub write_to_file: bool,
    pub output_format: OutputFormat,
    pub output_path: Option<PathBuf>,
    pub prime_callback: Option<PrimeCallback>,
    pub progress_callback: Option<ProgressCallback>,
    pub cancel: Option<Arc<CancelToken>>,
}

impl Default for WheelKind {
    fn default() -> Self {
        WheelKind::Mod30
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

/// Outcome classification of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    InvalidArgument,
    Cancelled,
    IoError,
    InternalError,
}

/// Echoed configuration plus run counters.
#[derive(Clone, Debug)]
pub struct RangeStats {
    pub from: u64,
    pub to: u64,
    pub threads: u32,
    pub cpu: CpuInfo,
    /// `None` on the Meissel path (no segment machinery ran).
    pub segment: Option<SegmentConfig>,
    pub wheel: WheelKind,
    pub output_format: OutputFormat,
    pub segments_total: usize,
    pub segments_processed: usize,
    pub prime_count: u64,
    pub elapsed_us: u64,
    pub nth_index: u64,
    pub nth_found: bool,
    pub use_meissel: bool,
    pub completed: bool,
    pub cancelled: bool,
}

/// Result of [`run_range`].
#[derive(Clone, Debug)]
pub struct RangeReport {
    pub status: RunStatus,
    pub stats: RangeStats,
    pub total_count: u64,
    pub nth_value: Option<u64>,
    /// Delivered chunks in emission order; populated only with
    /// `collect_primes`.
    pub prime_chunks: Vec<Vec<u64>>,
    pub error_message: Option<String>,
}

impl RangeReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Flattens the collected chunks into one ordered vector.
    pub fn collected_primes(&self) -> Vec<u64> {
        let total = self.prime_chunks.iter().map(Vec::len).sum();
        let mut primes = Vec::with_capacity(total);
        for chunk in &self.prime_chunks {
            primes.extend_from_slice(chunk);
        }
        primes
    }
}
