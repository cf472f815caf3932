//! Segment and tile sizing plus the shared segment work queue.
//!
//! # Sizing policy
//!
//! A segment is the unit a worker sieves in one pass; a tile is the slice of
//! a segment the small/medium marking loops walk so the bitset stays in L1d.
//! Sizes come from the cache topology and the range length:
//!
//! - Short ranges get small segments: large-prime hits are sparse near the
//!   start of a range, so a big bitset is mostly wasted zeroing.
//! - Very large ranges get L2-sized segments so each tile pass stays hot
//!   while bucket sieving amortizes across the whole segment.
//!
//! Both sizes are multiples of 128 bytes with an 8 KiB floor, and the tile
//! never exceeds the segment.
//!
//! # Work queue
//!
//! [`SegmentWorkQueue`] hands out `(segment_id, low, high)` triples through a
//! single relaxed `fetch_add`; segment IDs are mutually independent so no
//! stronger ordering is needed. The last segment may be short.

use crate::cpu::CpuInfo;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Odd-aligned half-open sieving range.
#[derive(Clone, Copy, Debug)]
pub struct SieveRange {
    pub begin: u64,
    pub end: u64,
}

/// Immutable per-run segment geometry.
///
/// `segment_span`/`tile_span` are widths in value space: one bit covers one
/// odd number, so a span is `bits * 2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentConfig {
    pub segment_bytes: usize,
    pub tile_bytes: usize,
    pub segment_bits: usize,
    pub tile_bits: usize,
    pub segment_span: u64,
    pub tile_span: u64,
}

const MIN_SEGMENT_BYTES: usize = 8 * 1024;
const ALIGNMENT: usize = 128;

fn align_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    let rem = value % alignment;
    if rem == 0 {
        return value;
    }
    let add = alignment - rem;
    if value > usize::MAX - add {
        return usize::MAX - (usize::MAX % alignment);
    }
    value + add
}

fn align_down(value: usize, alignment: usize) -> usize {
    if alignment == 0 || value == 0 {
        return value;
    }
    value - (value % alignment)
}

fn clamp_floor_to_usize(value: f64) -> usize {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    if value >= usize::MAX as f64 {
        return usize::MAX;
    }
    value.floor() as usize
}

/// Picks segment and tile sizes for a run.
///
/// Zero `requested_*` values select the defaults described in the module
/// docs; explicit requests are honored after 128-byte alignment and the
/// tile-fits-in-segment clamp.
pub fn choose_segment_config(
    info: &CpuInfo,
    threads: u32,
    requested_segment_bytes: usize,
    requested_tile_bytes: usize,
    range_length: u64,
) -> SegmentConfig {
    let l1 = if info.l1_data_bytes != 0 {
        info.l1_data_bytes
    } else {
        32 * 1024
    };
    let l2 = if info.l2_bytes != 0 { info.l2_bytes } else { 1024 * 1024 };
    let thread_count = if threads != 0 { threads as usize } else { 1 };

    let total_l2 = if info.l2_total_bytes != 0 {
        info.l2_total_bytes
    } else {
        let mut cores = if info.physical_cpus != 0 {
            info.physical_cpus as usize
        } else {
            info.logical_cpus as usize
        };
        if cores == 0 {
            cores = thread_count.max(1);
        }
        l2.saturating_mul(cores)
    };

    let mut cap_limit_bytes = 0usize;
    let mut segment_bytes = requested_segment_bytes;
    if segment_bytes == 0 {
        const K0: f64 = 1562.5;
        const BETA: f64 = 0.0625;
        const ALPHA_G: f64 = 0.833333;
        let min_segment = MIN_SEGMENT_BYTES as f64;

        let r = range_length as f64;
        let mut s_fixed = 0.0;
        if r > 0.0 {
            let scaled = r / 1.0e10;
            let mut k_r = K0;
            if scaled > 0.0 {
                k_r *= scaled.powf(BETA);
            }
            if k_r > 0.0 {
                s_fixed = r / (16.0 * k_r);
            }
        }

        let mut s_min = 0.0;
        if r > 0.0 {
            if r <= 1.0e9 {
                s_min = 8.0 * 1024.0 * (r / 1.0e8).powf(1.05);
            } else {
                s_min = 90.0 * 1024.0 * (r / 1.0e9).powf(-0.5);
            }
        }

        let mut base = min_segment.max(s_fixed).max(s_min);
        if total_l2 != 0 {
            let s_max = total_l2 as f64 * ALPHA_G;
            base = base.min(s_max);
            cap_limit_bytes = clamp_floor_to_usize(s_max);
        }
        if !base.is_finite() || base <= 0.0 {
            base = min_segment;
        }

        segment_bytes = if base >= usize::MAX as f64 {
            usize::MAX
        } else {
            let mut rounded = (base + 0.5).floor();
            if rounded <= 0.0 {
                rounded = min_segment;
            }
            if rounded >= usize::MAX as f64 {
                usize::MAX
            } else {
                align_up(rounded as usize, ALIGNMENT)
            }
        };
        if segment_bytes == 0 {
            segment_bytes = MIN_SEGMENT_BYTES;
        }
    } else {
        segment_bytes = align_up(requested_segment_bytes, ALIGNMENT);
    }

    segment_bytes = align_up(segment_bytes, ALIGNMENT);
    if cap_limit_bytes != 0 {
        let mut cap_aligned = align_down(cap_limit_bytes, ALIGNMENT);
        if cap_aligned == 0 {
            cap_aligned = cap_limit_bytes;
        }
        if cap_aligned != 0 && segment_bytes > cap_aligned {
            segment_bytes = cap_aligned;
        }
    }
    if segment_bytes < MIN_SEGMENT_BYTES {
        segment_bytes = MIN_SEGMENT_BYTES;
    }

    let mut tile_bytes = if requested_tile_bytes == 0 {
        align_up(l1.max(MIN_SEGMENT_BYTES), ALIGNMENT)
    } else {
        align_up(requested_tile_bytes, ALIGNMENT)
    };
    tile_bytes = tile_bytes.min(segment_bytes);

    let segment_bits = segment_bytes * 8;
    let tile_bits = tile_bytes * 8;
    SegmentConfig {
        segment_bytes,
        tile_bytes,
        segment_bits,
        tile_bits,
        segment_span: segment_bits as u64 * 2,
        tile_span: tile_bits as u64 * 2,
    }
}

/// One unit of work drawn from the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentJob {
    pub segment_id: u64,
    pub low: u64,
    pub high: u64,
}

/// Shared dispenser of segment jobs.
///
/// Workers race on a single atomic counter; each successful `next` claims
/// one segment. Exhaustion is permanent.
pub struct SegmentWorkQueue {
    range: SieveRange,
    span: u64,
    length: u64,
    next_segment: CachePadded<AtomicU64>,
}

impl SegmentWorkQueue {
    pub fn new(range: SieveRange, config: &SegmentConfig) -> Self {
        let length = range.end.saturating_sub(range.begin);
        Self {
            range,
            span: config.segment_span,
            length,
            next_segment: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Claims the next unprocessed segment, or `None` when the range is
    /// exhausted.
    pub fn next(&self) -> Option<SegmentJob> {
        let idx = self.next_segment.fetch_add(1, Ordering::Relaxed);
        let offset = idx.checked_mul(self.span)?;
        if offset >= self.length {
            return None;
        }
        let low = self.range.begin + offset;
        let span_length = self.span.min(self.length - offset);
        let high = low + span_length;
        if low < high {
            Some(SegmentJob {
                segment_id: idx,
                low,
                high,
            })
        } else {
            None
        }
    }
}
