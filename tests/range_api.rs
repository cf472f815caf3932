//! Library-surface behavior of `run_range`: argument validation, n-th prime
//! location, Meissel counting, callbacks, cancellation and reported stats.

use prime_sieve::{
    run_range, CancelToken, RangeOptions, RunStatus, WheelKind,
};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn base_options(from: u64, to: u64) -> RangeOptions {
    RangeOptions {
        from,
        to,
        ..RangeOptions::default()
    }
}

#[test]
fn rejects_inverted_or_degenerate_ranges() {
    for (from, to) in [(10u64, 10u64), (10, 5), (0, 0), (0, 1), (5, 1)] {
        let report = run_range(&base_options(from, to));
        assert_eq!(report.status, RunStatus::InvalidArgument, "[{from}, {to})");
        assert_eq!(report.error_message.as_deref(), Some("invalid range"));
    }
}

#[test]
fn rejects_meissel_with_delivery_or_nth() {
    let mut options = base_options(0, 1000);
    options.use_meissel = true;
    options.collect_primes = true;
    assert_eq!(run_range(&options).status, RunStatus::InvalidArgument);

    let mut options = base_options(0, 1000);
    options.use_meissel = true;
    options.nth_index = 5;
    assert_eq!(run_range(&options).status, RunStatus::InvalidArgument);

    let mut options = base_options(0, 1000);
    options.use_meissel = true;
    options.write_to_file = true;
    assert_eq!(run_range(&options).status, RunStatus::InvalidArgument);
}

#[test]
fn meissel_count_matches_sieve() {
    let mut options = base_options(0, 10_000_000);
    options.use_meissel = true;
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.total_count, 664_579);
    assert!(report.stats.completed);
    assert_eq!(report.stats.segments_total, 0);
    assert!(report.stats.segment.is_none());

    let sieved = run_range(&base_options(0, 10_000_000));
    assert_eq!(sieved.total_count, report.total_count);
}

#[test]
fn nth_prime_in_interval() {
    let mut options = base_options(0, 1_000_000);
    options.nth_index = 1000;
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.nth_value, Some(7919));
    assert!(report.stats.nth_found);
    // n-th search forces a single worker.
    assert_eq!(report.stats.threads, 1);
}

#[test]
fn nth_prime_from_prefix() {
    let mut options = base_options(0, 100);
    options.nth_index = 1;
    let report = run_range(&options);
    assert_eq!(report.nth_value, Some(2));

    let mut options = base_options(0, 100);
    options.nth_index = 3;
    options.wheel = WheelKind::Mod1155;
    let report = run_range(&options);
    assert_eq!(report.nth_value, Some(5));
}

#[test]
fn nth_prime_relative_to_range_start() {
    // The 1st prime of [100, 200) is 101, the 21st is 199.
    let mut options = base_options(100, 200);
    options.nth_index = 1;
    assert_eq!(run_range(&options).nth_value, Some(101));
    options.nth_index = 21;
    assert_eq!(run_range(&options).nth_value, Some(199));
}

#[test]
fn nth_beyond_range_is_an_internal_error() {
    let mut options = base_options(0, 100);
    options.nth_index = 26; // pi(100) = 25
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::InternalError);
    assert_eq!(
        report.error_message.as_deref(),
        Some("nth prime not found within range")
    );
}

#[test]
fn prime_callback_sees_ordered_chunks() {
    let seen = Arc::new(Mutex::new(Vec::<u64>::new()));
    let seen_cb = Arc::clone(&seen);
    let mut options = base_options(0, 100_000);
    options.prime_callback = Some(Arc::new(move |chunk: &[u64]| {
        seen_cb.lock().unwrap().extend_from_slice(chunk);
        ControlFlow::Continue(())
    }));
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Success);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len() as u64, report.total_count);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn prime_callback_break_cancels_the_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = Arc::clone(&calls);
    let mut options = base_options(0, 50_000_000);
    options.threads = 2;
    options.segment_bytes = 8 * 1024;
    options.prime_callback = Some(Arc::new(move |_: &[u64]| {
        if calls_cb.fetch_add(1, Ordering::SeqCst) >= 2 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }));
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.stats.cancelled);
    assert!(!report.stats.completed);
    assert_eq!(
        report.error_message.as_deref(),
        Some("prime callback requested cancellation")
    );
}

#[test]
fn progress_reaches_one_on_clean_runs() {
    let last = Arc::new(Mutex::new(-1.0f64));
    let calls = Arc::new(AtomicUsize::new(0));
    let last_cb = Arc::clone(&last);
    let calls_cb = Arc::clone(&calls);
    let mut options = base_options(0, 200_000);
    options.progress_callback = Some(Arc::new(move |value: f64| {
        calls_cb.fetch_add(1, Ordering::SeqCst);
        let mut last = last_cb.lock().unwrap();
        assert!((0.0..=1.0).contains(&value));
        *last = value;
        ControlFlow::Continue(())
    }));
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Success);
    assert!(report.stats.completed);
    assert_eq!(*last.lock().unwrap(), 1.0);
    assert!(calls.load(Ordering::SeqCst) >= 2);
}

#[test]
fn progress_break_cancels_the_run() {
    let mut options = base_options(0, 50_000_000);
    options.threads = 2;
    options.segment_bytes = 8 * 1024;
    options.progress_callback =
        Some(Arc::new(|value: f64| {
            if value > 0.0 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }));
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(
        report.error_message.as_deref(),
        Some("progress callback requested cancellation")
    );
}

#[test]
fn external_cancellation_stops_promptly() {
    let token = Arc::new(CancelToken::new());
    token.request();
    let mut options = base_options(0, 1_000_000_000);
    options.threads = 4;
    options.cancel = Some(Arc::clone(&token));
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.error_message.as_deref(), Some("operation cancelled"));
    assert!(report.stats.cancelled);
    // Workers poll the token at the loop head: nothing was sieved.
    assert_eq!(report.stats.segments_processed, 0);
}

#[test]
fn cancellation_mid_run_is_bounded() {
    // Cancel from inside the progress callback: each worker may finish the
    // segment it is sieving, but no more than one further segment each.
    let token = Arc::new(CancelToken::new());
    let token_cb = Arc::clone(&token);
    let threads = 2;
    let mut options = base_options(0, 500_000_000);
    options.threads = threads;
    options.segment_bytes = 32 * 1024;
    options.progress_callback = Some(Arc::new(move |_value: f64| {
        token_cb.request();
        ControlFlow::Continue(())
    }));
    options.cancel = Some(Arc::clone(&token));
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.stats.segments_processed <= 2 * threads as usize + 1);
}

#[test]
fn panicking_prime_callback_is_an_internal_error() {
    let mut options = base_options(0, 100_000);
    options.prime_callback = Some(Arc::new(|_: &[u64]| panic!("consumer exploded")));
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::InternalError);
    assert_eq!(report.error_message.as_deref(), Some("consumer exploded"));
}

#[test]
fn panicking_progress_callback_is_an_internal_error() {
    let fired = Arc::new(AtomicU64::new(0));
    let fired_cb = Arc::clone(&fired);
    let mut options = base_options(0, 1_000_000);
    options.progress_callback = Some(Arc::new(move |value: f64| {
        if value > 0.0 {
            panic!("progress exploded");
        }
        fired_cb.fetch_add(1, Ordering::SeqCst);
        ControlFlow::Continue(())
    }));
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::InternalError);
    assert_eq!(report.error_message.as_deref(), Some("progress exploded"));
}

#[test]
fn stats_echo_configuration() {
    let mut options = base_options(1000, 2_000_000);
    options.threads = 3;
    options.wheel = WheelKind::Mod210;
    options.segment_bytes = 32 * 1024;
    options.tile_bytes = 8 * 1024;
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Success);
    let stats = &report.stats;
    assert_eq!(stats.from, 1000);
    assert_eq!(stats.to, 2_000_000);
    assert_eq!(stats.threads, 3);
    assert_eq!(stats.wheel, WheelKind::Mod210);
    let segment = stats.segment.expect("sieve path ran");
    assert_eq!(segment.segment_bytes, 32 * 1024);
    assert_eq!(segment.tile_bytes, 8 * 1024);
    assert!(stats.segments_total > 0);
    assert_eq!(stats.segments_processed, stats.segments_total);
    assert!(stats.completed);
    assert!(!stats.cancelled);
    assert_eq!(stats.prime_count, report.total_count);
}

#[test]
fn collected_chunks_preserve_delivery_order() {
    let mut options = base_options(0, 400_000);
    options.threads = 4;
    options.collect_primes = true;
    options.segment_bytes = 8 * 1024;
    let report = run_range(&options);
    assert_eq!(report.status, RunStatus::Success);
    assert!(report.prime_chunks.len() > 1);
    let flattened = report.collected_primes();
    assert!(flattened.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(flattened.len() as u64, report.total_count);
}
