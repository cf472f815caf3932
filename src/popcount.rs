//! Zero-bit counting over composite bitmaps.
//!
//! The segment bitset stores composite = 1, so the prime count of a segment
//! is the number of zero bits within its first `bit_count` positions. The
//! scalar path is the reference; the AVX2 and AVX-512 paths must agree with
//! it bit-for-bit and are selected once per call via runtime feature
//! detection. Bits at or beyond `bit_count` never contribute: the final
//! partial word is masked before counting.

/// Population count of one word.
#[inline]
pub fn popcount_u64(x: u64) -> u64 {
    x.count_ones() as u64
}

#[inline]
fn count_zero_bits_scalar(bits: &[u64], full_words: usize) -> u64 {
    let mut total = 0u64;
    for &word in &bits[..full_words] {
        total += 64 - popcount_u64(word);
    }
    total
}

/// Counts zero bits among the first `bit_count` bits of `bits`.
///
/// # Panics
/// Panics if `bits` holds fewer than `bit_count.div_ceil(64)` words.
pub fn count_zero_bits(bits: &[u64], bit_count: usize) -> u64 {
    let full_words = bit_count / 64;
    let rem_bits = bit_count % 64;

    #[cfg(target_arch = "x86_64")]
    let mut total = {
        if std::is_x86_feature_detected!("avx512vpopcntdq")
            && std::is_x86_feature_detected!("avx512f")
        {
            // SAFETY: feature presence checked above.
            unsafe { count_zero_words_avx512(&bits[..full_words]) }
        } else if std::is_x86_feature_detected!("avx2") {
            // SAFETY: feature presence checked above.
            unsafe { count_zero_words_avx2(&bits[..full_words]) }
        } else {
            count_zero_bits_scalar(bits, full_words)
        }
    };
    #[cfg(not(target_arch = "x86_64"))]
    let mut total = count_zero_bits_scalar(bits, full_words);

    if rem_bits != 0 {
        let mask = (1u64 << rem_bits) - 1;
        total += rem_bits as u64 - popcount_u64(bits[full_words] & mask);
    }
    total
}

/// AVX2 path: 4 words per iteration via the classic nibble-LUT + `psadbw`
/// horizontal sum.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn count_zero_words_avx2(words: &[u64]) -> u64 {
    use std::arch::x86_64::*;

    const STRIDE: usize = 4;
    let low_mask = _mm256_set1_epi8(0x0F);
    #[rustfmt::skip]
    let nibble_popcnt = _mm256_setr_epi8(
        0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4,
        0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4,
    );
    let zero = _mm256_setzero_si256();

    let mut ones = 0u64;
    let chunks = words.len() / STRIDE;
    for c in 0..chunks {
        let ptr = words.as_ptr().add(c * STRIDE) as *const __m256i;
        let data = _mm256_loadu_si256(ptr);
        let lo = _mm256_and_si256(data, low_mask);
        let hi = _mm256_and_si256(_mm256_srli_epi16(data, 4), low_mask);
        let popcnt = _mm256_add_epi8(
            _mm256_shuffle_epi8(nibble_popcnt, lo),
            _mm256_shuffle_epi8(nibble_popcnt, hi),
        );
        let sad = _mm256_sad_epu8(popcnt, zero);
        let mut lanes = [0u64; STRIDE];
        _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, sad);
        ones += lanes[0] + lanes[1] + lanes[2] + lanes[3];
    }
    for &word in &words[chunks * STRIDE..] {
        ones += popcount_u64(word);
    }
    words.len() as u64 * 64 - ones
}

/// AVX-512 VPOPCNTDQ path: 8 words per iteration with a native per-lane
/// popcount.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f,avx512vpopcntdq")]
unsafe fn count_zero_words_avx512(words: &[u64]) -> u64 {
    use std::arch::x86_64::*;

    const STRIDE: usize = 8;
    let mut total = 0u64;
    let chunks = words.len() / STRIDE;
    for c in 0..chunks {
        let ptr = words.as_ptr().add(c * STRIDE);
        let data = _mm512_loadu_si512(ptr as *const _);
        let pop = _mm512_popcnt_epi64(data);
        total += 512 - _mm512_reduce_add_epi64(pop) as u64;
    }
    for &word in &words[chunks * STRIDE..] {
        total += 64 - popcount_u64(word);
    }
    total
}
