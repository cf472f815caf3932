//! Segment-indexed ring of deferred large-prime hits.
//!
//! A large prime touches at most one position per segment, so instead of
//! walking every large prime for every segment, each pending hit is filed
//! under the segment that will contain it and replayed when a worker reaches
//! that segment.
//!
//! # Invariants
//! - Capacity is a power of two; an entry for segment `s` lives in slot
//!   `s & mask`.
//! - After `take(s)`, `base_segment > s` and no entry with
//!   `next_index <= s` remains anywhere in the ring.
//! - A slot may hold entries for segments `s`, `s + capacity`, ... at the
//!   same time; `take` filters by exact `next_index` and leaves the rest.
//! - Extraction order within a segment is arbitrary: marking bits is
//!   commutative.

/// One pending hit of a large sieving prime.
///
/// `owner` indexes the owning worker's `large_states` vector; the single
/// per-prime cursor lives there and is advanced through this index no matter
/// which entry carries the hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketEntry {
    pub prime: u32,
    /// Segment ID that contains `value`.
    pub next_index: u64,
    /// Bit offset of `value` within that segment.
    pub offset: u64,
    pub value: u64,
    pub owner: u32,
}

/// Ring buffer of per-segment hit lists with doubling growth.
#[derive(Debug, Default)]
pub struct BucketRing {
    base_segment: u64,
    mask: usize,
    buckets: Vec<Vec<BucketEntry>>,
}

const INITIAL_CAPACITY: usize = 1024;

impl BucketRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all entries and rebases the ring at `start_segment`. Capacity
    /// is released and re-grown lazily on the next push.
    pub fn reset(&mut self, start_segment: u64) {
        self.base_segment = start_segment;
        self.mask = 0;
        self.buckets.clear();
    }

    fn ensure_capacity(&mut self, segment: u64) {
        if segment < self.base_segment {
            return;
        }
        if self.buckets.is_empty() {
            self.buckets.resize_with(INITIAL_CAPACITY, Vec::new);
            self.mask = INITIAL_CAPACITY - 1;
            return;
        }
        while (segment - self.base_segment) as usize > self.mask {
            self.rehash(self.buckets.len() * 2);
        }
    }

    fn rehash(&mut self, new_size: usize) {
        debug_assert!(new_size.is_power_of_two());
        let new_mask = new_size - 1;
        let mut new_buckets: Vec<Vec<BucketEntry>> = Vec::new();
        new_buckets.resize_with(new_size, Vec::new);
        for bucket in self.buckets.drain(..) {
            for entry in bucket {
                new_buckets[entry.next_index as usize & new_mask].push(entry);
            }
        }
        self.buckets = new_buckets;
        self.mask = new_mask;
    }

    /// Files `entry` under `segment`, growing the ring until the segment is
    /// addressable.
    pub fn push(&mut self, segment: u64, entry: BucketEntry) {
        self.ensure_capacity(segment);
        if self.buckets.is_empty() {
            self.buckets.resize_with(INITIAL_CAPACITY, Vec::new);
            self.mask = INITIAL_CAPACITY - 1;
        }
        self.buckets[segment as usize & self.mask].push(entry);
    }

    /// Removes and returns every entry scheduled for exactly `segment`, then
    /// advances the base past it. Entries sharing the slot but scheduled for
    /// a later revisit stay behind.
    pub fn take(&mut self, segment: u64) -> Vec<BucketEntry> {
        self.ensure_capacity(segment);
        let mut hits = Vec::new();
        if !self.buckets.is_empty() {
            let bucket = &mut self.buckets[segment as usize & self.mask];
            let mut i = 0;
            while i < bucket.len() {
                if bucket[i].next_index == segment {
                    hits.push(bucket.swap_remove(i));
                } else {
                    i += 1;
                }
            }
        }
        if segment >= self.base_segment {
            self.base_segment = segment + 1;
        }
        hits
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.buckets.len()
    }
}
