//! Bootstrap sieve producing the sieving primes up to `sqrt(to)`.
//!
//! The segmented engine never sieves with primes above the square root of the
//! range end, so a classical odd-only sieve over a few megabytes at most is
//! enough to seed it. Output is `u32` because sieving primes for any 64-bit
//! range fit in 32 bits.

/// Returns all primes `<= limit` in increasing order, `2` included.
///
/// `limit < 2` yields an empty vector. Only odd candidates are stored while
/// sieving, one bit each; index `i` of the scratch bitmap stands for the
/// value `2*i + 1`.
pub fn simple_sieve(limit: u64) -> Vec<u32> {
    if limit < 2 {
        return Vec::new();
    }
    let root = limit.isqrt();
    let max = limit.max(root + 1);
    let size = ((max + 1) / 2) as usize;
    let mut composite = vec![0u64; size.div_ceil(64)];
    let is_composite =
        |bits: &[u64], i: usize| bits[i / 64] & (1u64 << (i % 64)) != 0;
    let bound = (((max.isqrt() + 1) / 2) as usize).min(size.saturating_sub(1));
    for i in 1..=bound {
        if is_composite(&composite, i) {
            continue;
        }
        let p = 2 * i + 1;
        let mut j = (p * p) / 2;
        while j < size {
            composite[j / 64] |= 1u64 << (j % 64);
            j += p;
        }
    }

    let mut primes = Vec::new();
    primes.push(2);
    for i in 1..size {
        let value = 2 * i as u64 + 1;
        if value > limit {
            break;
        }
        if !is_composite(&composite, i) {
            primes.push(value as u32);
        }
    }
    primes
}
