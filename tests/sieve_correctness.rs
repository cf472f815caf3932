//! End-to-end correctness of the segmented sieve against a reference
//! oracle: counts and enumerated primes over assorted ranges, invariance
//! under wheel choice, segment/tile geometry and thread count, and
//! monotonic emission.

use prime_sieve::{run_range, simple_sieve, RangeOptions, RunStatus, WheelKind};

/// Reference: primes in [from, to) from the bootstrap sieve (itself verified
/// against trial division in its unit tests).
fn reference_primes(from: u64, to: u64) -> Vec<u64> {
    simple_sieve(to.saturating_sub(1))
        .into_iter()
        .map(u64::from)
        .filter(|&p| p >= from && p < to)
        .collect()
}

fn collect_run(options: RangeOptions) -> (u64, Vec<u64>) {
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Success, "{:?}", report.error_message);
    (report.total_count, report.collected_primes())
}

fn count_and_primes(from: u64, to: u64, wheel: WheelKind, threads: u32) -> (u64, Vec<u64>) {
    collect_run(RangeOptions {
        from,
        to,
        threads,
        wheel,
        collect_primes: true,
        ..RangeOptions::default()
    })
}

#[test]
fn counts_and_sets_match_reference_on_small_ranges() {
    for (from, to) in [
        (0u64, 2u64),
        (0, 3),
        (0, 4),
        (2, 3),
        (2, 4),
        (3, 4),
        (4, 5),
        (10, 11),
        (0, 20),
        (0, 100),
        (89, 90),
        (100, 200),
        (7, 7919),
    ] {
        let expected = reference_primes(from, to);
        let (count, primes) = count_and_primes(from, to, WheelKind::Mod30, 1);
        assert_eq!(count, expected.len() as u64, "count for [{from}, {to})");
        assert_eq!(primes, expected, "primes for [{from}, {to})");
    }
}

#[test]
fn count_to_one_million() {
    let (count, primes) = count_and_primes(0, 1_000_000, WheelKind::Mod30, 0);
    assert_eq!(count, 78_498);
    assert_eq!(primes.len(), 78_498);
}

#[test]
fn narrow_window_around_a_large_prime() {
    let (count, primes) = count_and_primes(999_983, 1_000_000, WheelKind::Mod30, 1);
    assert_eq!(count, 1);
    assert_eq!(primes, vec![999_983]);
}

#[test]
fn mid_range_window_matches_reference() {
    let expected = reference_primes(1_000_000, 1_100_000);
    let (count, primes) = count_and_primes(1_000_000, 1_100_000, WheelKind::Mod30, 2);
    assert_eq!(count, expected.len() as u64);
    assert_eq!(primes, expected);
}

#[test]
fn wheel_choice_does_not_change_the_prime_set() {
    let reference = reference_primes(0, 200_000);
    for wheel in [WheelKind::Mod30, WheelKind::Mod210, WheelKind::Mod1155] {
        let (count, primes) = count_and_primes(0, 200_000, wheel, 2);
        assert_eq!(count, reference.len() as u64, "{wheel:?}");
        assert_eq!(primes, reference, "{wheel:?}");
    }
}

#[test]
fn segment_and_tile_geometry_does_not_change_results() {
    let expected = reference_primes(0, 500_000);
    for segment_bytes in [8 * 1024, 32 * 1024, 256 * 1024, 2 * 1024 * 1024] {
        for tile_bytes in [8 * 1024, 32 * 1024, 64 * 1024] {
            if tile_bytes > segment_bytes {
                continue;
            }
            let (count, primes) = collect_run(RangeOptions {
                from: 0,
                to: 500_000,
                threads: 2,
                segment_bytes,
                tile_bytes,
                collect_primes: true,
                ..RangeOptions::default()
            });
            assert_eq!(
                count,
                expected.len() as u64,
                "segment {segment_bytes} tile {tile_bytes}"
            );
            assert_eq!(primes, expected, "segment {segment_bytes} tile {tile_bytes}");
        }
    }
}

#[test]
fn thread_count_does_not_change_the_emitted_stream() {
    let (_, single) = count_and_primes(0, 2_000_000, WheelKind::Mod30, 1);
    for threads in [2, 4, 8] {
        let (count, primes) = count_and_primes(0, 2_000_000, WheelKind::Mod30, threads);
        assert_eq!(count, single.len() as u64, "threads {threads}");
        assert_eq!(primes, single, "threads {threads}");
    }
}

#[test]
fn emission_is_strictly_increasing() {
    let (_, primes) = count_and_primes(0, 300_000, WheelKind::Mod210, 4);
    assert!(primes.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn tiny_segments_over_a_distant_window() {
    // 8 KiB segments over a window far from zero: medium primes skip whole
    // segments between hits and the per-tile cursor advance must stay exact.
    let from = 10_000_000;
    let to = 10_200_000;
    let expected = reference_primes(from, to);
    let (count, primes) = collect_run(RangeOptions {
        from,
        to,
        threads: 3,
        segment_bytes: 8 * 1024,
        tile_bytes: 8 * 1024,
        collect_primes: true,
        ..RangeOptions::default()
    });
    assert_eq!(count, expected.len() as u64);
    assert_eq!(primes, expected);
}

#[test]
fn large_primes_cycle_through_the_bucket_ring() {
    // With 8 KiB segments (span 131072) and to beyond (span/2)^2, sieving
    // primes above 65536 take the bucket-scheduled path, each hitting at
    // most one segment and being rescheduled across many.
    let from = 5_000_000_000;
    let to = 5_002_000_000;
    let (count, primes) = collect_run(RangeOptions {
        from,
        to,
        threads: 1,
        segment_bytes: 8 * 1024,
        tile_bytes: 8 * 1024,
        collect_primes: true,
        ..RangeOptions::default()
    });
    let expected: Vec<u64> = (from..to)
        .filter(|&n| prime_sieve::miller_rabin_is_prime(n))
        .collect();
    assert_eq!(count, expected.len() as u64);
    assert_eq!(primes, expected);
}

#[test]
fn prefix_primes_are_emitted_before_segments() {
    for wheel in [WheelKind::Mod30, WheelKind::Mod210, WheelKind::Mod1155] {
        let (_, primes) = count_and_primes(0, 50, wheel, 1);
        assert_eq!(
            primes,
            vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47],
            "{wheel:?}"
        );
    }
}
