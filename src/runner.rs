//! Range-run orchestration: workers, ordered delivery, cancellation,
//! failure latching and result assembly.
//!
//! # Thread layout
//!
//! Exactly `threads` sieving workers, at most one delivery thread, at most
//! one writer thread (owned by [`PrimeWriter`]). Workers race on the
//! segment queue and publish per-segment results into a dense slot array;
//! the delivery thread walks the slots in segment order so emission is
//! strictly increasing even though production is not.
//!
//! ```text
//!              +----------+   slot[i].ready    +-----------+   chunks   +--------+
//!  queue ----> | worker t | -----------------> | delivery  | ---------> | writer |
//!   (atomic)   +----------+   (CV wakeup)      | (ordered) |            +--------+
//!                   |                          +-----------+
//!                   +-- progress callback (serialized)  |
//!                                                       +-- prime callback
//!                                                       +-- collect store
//! ```
//!
//! # Failure and cancellation
//!
//! The first failure wins: a bounded(1) channel accepts exactly one
//! `Failure` record; everything later is discarded. Workers poll the stop
//! flag and the external cancel token at the top of each loop, so all
//! threads terminate within one segment of a stop. Callback `Break` returns
//! are cancellations, callback panics are internal errors, writer errors are
//! I/O errors; the three cancellation origins keep distinct messages.

use crate::cpu::{detect_cpu_info, effective_thread_count};
use crate::marker::PrimeMarker;
use crate::meissel::meissel_count;
use crate::popcount::count_zero_bits;
use crate::segment::{choose_segment_config, SegmentWorkQueue, SieveRange};
use crate::simple_sieve;
use crate::wheel::get_wheel;
use crate::writer::PrimeWriter;
use crate::{
    CancelToken, PrimeCallback, ProgressCallback, RangeOptions, RangeReport, RangeStats,
    RunStatus,
};
use crossbeam_channel::{bounded, Sender};
use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Instant;

#[derive(Clone, Copy, Debug)]
enum FailureKind {
    Writer,
    PrimeCallback,
    Progress,
    Worker,
}

struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn status(&self) -> RunStatus {
        match self.kind {
            FailureKind::Writer => RunStatus::IoError,
            FailureKind::PrimeCallback | FailureKind::Progress | FailureKind::Worker => {
                RunStatus::InternalError
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One segment's published result: single producer, single consumer.
#[derive(Default)]
struct SegmentSlot {
    count: AtomicU64,
    primes: Mutex<Vec<u64>>,
    ready: AtomicBool,
}

/// Flags and rendezvous points shared by every thread of one run.
struct Coordination {
    stop: AtomicBool,
    external_cancelled: AtomicBool,
    progress_cancelled: AtomicBool,
    callback_cancelled: AtomicBool,
    nth_found: AtomicBool,
    nth_value: AtomicU64,
    segments_processed: AtomicUsize,
    /// Guards the ready-flag handshake between workers and delivery.
    ready_mutex: Mutex<()>,
    ready_cv: Condvar,
    /// Serializes the progress callback.
    progress_lock: Mutex<()>,
    failures: Sender<Failure>,
}

impl Coordination {
    fn new(failures: Sender<Failure>) -> Self {
        Self {
            stop: AtomicBool::new(false),
            external_cancelled: AtomicBool::new(false),
            progress_cancelled: AtomicBool::new(false),
            callback_cancelled: AtomicBool::new(false),
            nth_found: AtomicBool::new(false),
            nth_value: AtomicU64::new(0),
            segments_processed: AtomicUsize::new(0),
            ready_mutex: Mutex::new(()),
            ready_cv: Condvar::new(),
            progress_lock: Mutex::new(()),
            failures,
        }
    }

    /// First caller wins; later failures are dropped.
    fn fail(&self, kind: FailureKind, message: String) {
        let _ = self.failures.try_send(Failure { kind, message });
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _guard = self.ready_mutex.lock().unwrap();
        drop(_guard);
        self.ready_cv.notify_all();
    }
}

/// Delivery-side state: the writer, the user callback, the collect store.
struct DeliveryCtx {
    writer: Option<PrimeWriter>,
    prime_callback: Option<PrimeCallback>,
    collect: bool,
    chunks: Vec<Vec<u64>>,
}

impl DeliveryCtx {
    /// Dispatches one ordered chunk; false means delivery must stop.
    fn deliver(&mut self, co: &Coordination, chunk: Vec<u64>) -> bool {
        if chunk.is_empty() {
            return true;
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.write_segment(&chunk) {
                co.fail(FailureKind::Writer, err.to_string());
                return false;
            }
        }
        if let Some(callback) = &self.prime_callback {
            match catch_unwind(AssertUnwindSafe(|| callback(&chunk))) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    co.callback_cancelled.store(true, Ordering::Release);
                    return false;
                }
                Err(payload) => {
                    co.fail(FailureKind::PrimeCallback, panic_message(payload));
                    return false;
                }
            }
        }
        if self.collect {
            self.chunks.push(chunk);
        }
        true
    }
}

fn report_progress(
    co: &Coordination,
    callback: &ProgressCallback,
    completed: usize,
    segments_total: usize,
) {
    if co.progress_cancelled.load(Ordering::Acquire) {
        return;
    }
    let _guard = co.progress_lock.lock().unwrap();
    if co.progress_cancelled.load(Ordering::Acquire) {
        return;
    }
    let value = if segments_total == 0 {
        1.0
    } else {
        (completed as f64 / segments_total as f64).min(1.0)
    };
    match catch_unwind(AssertUnwindSafe(|| callback(value))) {
        Ok(ControlFlow::Continue(())) => {}
        Ok(ControlFlow::Break(())) => {
            co.progress_cancelled.store(true, Ordering::Release);
            co.request_stop();
        }
        Err(payload) => {
            co.fail(FailureKind::Progress, panic_message(payload));
            co.progress_cancelled.store(true, Ordering::Release);
            co.request_stop();
        }
    }
}

/// Collects the zero bits of one segment bitmap as prime values.
fn extract_primes(bitset: &[u64], bit_count: usize, seg_low: u64, local_count: u64) -> Vec<u64> {
    let mut primes = Vec::with_capacity(local_count as usize);
    let mut value = seg_low;
    let mut produced = 0usize;
    for &word in bitset {
        if produced >= bit_count {
            break;
        }
        let mut bit = 0usize;
        while bit < 64 && produced < bit_count {
            if word & (1u64 << bit) == 0 {
                primes.push(value);
            }
            bit += 1;
            produced += 1;
            value += 2;
        }
    }
    primes
}

/// Runs one prime range to completion. See [`RangeOptions`] for the knobs
/// and [`RangeReport`] for everything that comes back.
pub fn run_range(options: &RangeOptions) -> RangeReport {
    let mut report = RangeReport {
        status: RunStatus::Success,
        stats: RangeStats {
            from: options.from,
            to: options.to,
            threads: 0,
            cpu: Default::default(),
            segment: None,
            wheel: options.wheel,
            output_format: options.output_format,
            segments_total: 0,
            segments_processed: 0,
            prime_count: 0,
            elapsed_us: 0,
            nth_index: options.nth_index,
            nth_found: false,
            use_meissel: options.use_meissel,
            completed: false,
            cancelled: false,
        },
        total_count: 0,
        nth_value: None,
        prime_chunks: Vec::new(),
        error_message: None,
    };

    if options.to <= options.from || options.to < 2 {
        report.status = RunStatus::InvalidArgument;
        report.error_message = Some("invalid range".to_string());
        return report;
    }

    let need_delivery = options.collect_primes
        || options.write_to_file
        || options.prime_callback.is_some();
    if options.use_meissel && (need_delivery || options.nth_index != 0) {
        report.status = RunStatus::InvalidArgument;
        report.error_message = Some("Meissel counting cannot emit primes".to_string());
        return report;
    }

    let cpu = detect_cpu_info();
    report.stats.cpu = cpu;

    let mut threads = if options.threads != 0 {
        options.threads
    } else {
        effective_thread_count(&cpu)
    };
    if options.nth_index != 0 {
        threads = 1;
    }
    if threads == 0 {
        threads = 1;
    }
    report.stats.threads = threads;

    let start_time = Instant::now();

    if options.use_meissel {
        run_meissel(options, threads, start_time, &mut report);
        return report;
    }

    run_sieve(options, threads, need_delivery, start_time, &mut report);
    report
}

fn run_meissel(options: &RangeOptions, threads: u32, start_time: Instant, report: &mut RangeReport) {
    let sqrt_limit = if options.to > 1 {
        options.to.isqrt() + 1
    } else {
        0
    };
    let primes = simple_sieve(sqrt_limit);
    let count = meissel_count(options.from, options.to, &primes, threads);
    report.total_count = count;
    report.stats.prime_count = count;
    report.stats.completed = true;
    report.stats.elapsed_us = start_time.elapsed().as_micros() as u64;

    if let Some(callback) = &options.progress_callback {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(1.0))) {
            report.status = RunStatus::InternalError;
            report.error_message = Some(panic_message(payload));
            report.stats.completed = false;
        }
    }
}

fn run_sieve(
    options: &RangeOptions,
    threads: u32,
    need_delivery: bool,
    start_time: Instant,
    report: &mut RangeReport,
) {
    let wheel = get_wheel(options.wheel);

    // Odd-aligned interior of [from, to): the first odd candidate at or
    // above max(from, 3) up to the first odd bound covering every odd value
    // below to. 2 and the wheel basis primes come from the prefix instead.
    // A range containing no odd value collapses to empty.
    let mut odd_begin = if options.from <= 3 { 3 } else { options.from };
    if odd_begin & 1 == 0 {
        odd_begin += 1;
    }
    let mut odd_end = options.to;
    if odd_end & 1 == 0 {
        odd_end += 1;
    }
    if odd_end <= odd_begin {
        odd_end = odd_begin;
    }

    let range = SieveRange {
        begin: odd_begin,
        end: odd_end,
    };
    let length = range.end.saturating_sub(range.begin);

    let config = choose_segment_config(
        &report.stats.cpu,
        threads,
        options.segment_bytes,
        options.tile_bytes,
        length,
    );
    report.stats.segment = Some(config);

    let num_segments = if length != 0 {
        length.div_ceil(config.segment_span) as usize
    } else {
        0
    };
    report.stats.segments_total = num_segments;

    let sqrt_limit = options.to.isqrt() + 1;
    let base_primes = simple_sieve(sqrt_limit);

    let marker = PrimeMarker::new(wheel, config, range.begin, range.end, &base_primes);
    let queue = SegmentWorkQueue::new(range, &config);

    let slots: Vec<SegmentSlot> = (0..num_segments).map(|_| SegmentSlot::default()).collect();
    let (failure_tx, failure_rx) = bounded::<Failure>(1);
    let co = Coordination::new(failure_tx);

    // Prefix: 2 plus the wheel basis primes inside [from, to).
    let mut prefix_primes: Vec<u64> = Vec::new();
    if options.from <= 2 && options.to > 2 {
        prefix_primes.push(2);
    }
    for &p in wheel.kind.basis_primes() {
        if p >= options.from && p < options.to {
            prefix_primes.push(p);
        }
    }
    let prefix_count = prefix_primes.len() as u64;

    let nth_target = options.nth_index;
    if nth_target != 0 && nth_target <= prefix_count {
        co.nth_value
            .store(prefix_primes[(nth_target - 1) as usize], Ordering::Release);
        co.nth_found.store(true, Ordering::Release);
        co.stop.store(true, Ordering::Release);
    }

    let writer = if options.write_to_file {
        match PrimeWriter::new(
            true,
            options.output_path.as_deref(),
            options.output_format,
        ) {
            Ok(writer) => Some(writer),
            Err(err) => {
                report.status = RunStatus::IoError;
                report.error_message = Some(err.to_string());
                return;
            }
        }
    } else {
        None
    };

    let mut ctx = DeliveryCtx {
        writer,
        prime_callback: options.prime_callback.clone(),
        collect: options.collect_primes,
        chunks: Vec::new(),
    };

    if !prefix_primes.is_empty() && !ctx.deliver(&co, prefix_primes) {
        co.stop.store(true, Ordering::Release);
    }

    if let Some(callback) = &options.progress_callback {
        // The opening 0.0 call only propagates panics; its return value is
        // not a cancellation channel.
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(0.0))) {
            co.fail(FailureKind::Progress, panic_message(payload));
            co.stop.store(true, Ordering::Release);
        }
    }

    let cancel = options.cancel.as_deref();
    let progress_cb = options.progress_callback.as_ref();
    let nth_single = nth_target != 0 && threads == 1;

    let mut ctx_slot = Some(ctx);
    let mut ctx = thread::scope(|scope| {
        let mut workers = Vec::with_capacity(threads as usize);
        for t in 0..threads as usize {
            let co = &co;
            let marker = &marker;
            let queue = &queue;
            let slots = &slots;
            let handle = thread::Builder::new()
                .name(format!("sieve-worker-{t}"))
                .spawn_scoped(scope, move || {
                    worker_loop(
                        co,
                        marker,
                        queue,
                        slots,
                        cancel,
                        progress_cb,
                        t,
                        threads as usize,
                        need_delivery,
                        nth_single,
                        nth_target,
                        prefix_count,
                        num_segments,
                    );
                })
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        let delivery = if need_delivery && num_segments > 0 {
            let co = &co;
            let slots = &slots;
            let mut ctx = ctx_slot.take().expect("delivery context already taken");
            Some(
                thread::Builder::new()
                    .name("sieve-delivery".into())
                    .spawn_scoped(scope, move || {
                        delivery_loop(co, slots, &mut ctx);
                        ctx
                    })
                    .expect("failed to spawn delivery thread"),
            )
        } else {
            None
        };

        for handle in workers {
            if let Err(payload) = handle.join() {
                co.fail(FailureKind::Worker, panic_message(payload));
                co.request_stop();
            }
        }
        // Wake a delivery thread parked on a slot no worker will fill: if
        // the run stopped early the stop flag satisfies its predicate, and
        // on a clean run every slot is already marked ready.
        {
            let _guard = co.ready_mutex.lock().unwrap();
        }
        co.ready_cv.notify_all();

        match delivery {
            Some(handle) => handle.join().unwrap_or_else(|payload| {
                co.fail(FailureKind::PrimeCallback, panic_message(payload));
                DeliveryCtx {
                    writer: None,
                    prime_callback: None,
                    collect: false,
                    chunks: Vec::new(),
                }
            }),
            None => ctx_slot.take().expect("delivery context already taken"),
        }
    });

    if let Some(writer) = ctx.writer.as_mut() {
        if let Err(err) = writer.finish() {
            co.fail(FailureKind::Writer, err.to_string());
        }
    }

    let processed = co.segments_processed.load(Ordering::Acquire);
    report.stats.segments_processed = processed;

    let mut total = prefix_count;
    for slot in &slots {
        total += slot.count.load(Ordering::Relaxed);
    }
    report.total_count = total;
    report.stats.prime_count = total;

    let nth_found = co.nth_found.load(Ordering::Acquire);
    if nth_found {
        report.stats.nth_found = true;
        report.nth_value = Some(co.nth_value.load(Ordering::Acquire));
    }

    let external_cancelled = co.external_cancelled.load(Ordering::Acquire);
    let progress_cancelled = co.progress_cancelled.load(Ordering::Acquire);
    let callback_cancelled = co.callback_cancelled.load(Ordering::Acquire);
    let cancelled = external_cancelled || progress_cancelled || callback_cancelled;
    report.stats.cancelled = cancelled;

    let failure = failure_rx.try_recv().ok();
    if let Some(failure) = &failure {
        report.status = failure.status();
        report.error_message = Some(failure.message.clone());
    } else if cancelled {
        report.status = RunStatus::Cancelled;
        report.error_message = Some(
            if callback_cancelled {
                "prime callback requested cancellation"
            } else if progress_cancelled {
                "progress callback requested cancellation"
            } else {
                "operation cancelled"
            }
            .to_string(),
        );
    } else {
        report.status = RunStatus::Success;
    }

    if nth_target != 0 && !nth_found && report.status == RunStatus::Success {
        report.status = RunStatus::InternalError;
        report.error_message = Some("nth prime not found within range".to_string());
    }

    if let Some(callback) = &options.progress_callback {
        if !progress_cancelled && failure.is_none() && !external_cancelled {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(1.0))) {
                if report.status == RunStatus::Success {
                    report.status = RunStatus::InternalError;
                    report.error_message = Some(panic_message(payload));
                }
            }
        }
    }

    report.stats.elapsed_us = start_time.elapsed().as_micros() as u64;

    report.prime_chunks = std::mem::take(&mut ctx.chunks);
    report.stats.completed = processed == num_segments
        && !cancelled
        && failure.is_none()
        && (!nth_found || num_segments == 0);
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    co: &Coordination,
    marker: &PrimeMarker,
    queue: &SegmentWorkQueue,
    slots: &[SegmentSlot],
    cancel: Option<&CancelToken>,
    progress_cb: Option<&ProgressCallback>,
    thread_index: usize,
    thread_count: usize,
    need_delivery: bool,
    nth_single: bool,
    nth_target: u64,
    prefix_count: u64,
    num_segments: usize,
) {
    let mut state = marker.make_thread_state(thread_index, thread_count);
    let mut bitset: Vec<u64> = Vec::new();
    let mut cumulative = prefix_count;

    while !co.stop.load(Ordering::Acquire) {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                co.external_cancelled.store(true, Ordering::Release);
                co.request_stop();
                break;
            }
        }
        let Some(job) = queue.next() else {
            break;
        };
        marker.sieve_segment(&mut state, job.segment_id, job.low, job.high, &mut bitset);
        let bit_count = ((job.high - job.low) >> 1) as usize;
        let local_count = count_zero_bits(&bitset, bit_count);
        let Some(slot) = slots.get(job.segment_id as usize) else {
            continue;
        };
        slot.count.store(local_count, Ordering::Relaxed);

        let need_primes = need_delivery || nth_single;
        let primes = if need_primes && local_count > 0 {
            extract_primes(&bitset, bit_count, job.low, local_count)
        } else {
            Vec::new()
        };

        if nth_single && !co.nth_found.load(Ordering::Acquire) {
            let base = cumulative;
            let new_total = base + local_count;
            if nth_target > base && nth_target <= new_total {
                let index = (nth_target - base - 1) as usize;
                if index < primes.len() {
                    co.nth_value.store(primes[index], Ordering::Release);
                    co.nth_found.store(true, Ordering::Release);
                    co.stop.store(true, Ordering::Release);
                }
            }
            cumulative = new_total;
        }

        if need_delivery {
            *slot.primes.lock().unwrap() = primes;
            {
                let _guard = co.ready_mutex.lock().unwrap();
                slot.ready.store(true, Ordering::Release);
            }
            co.ready_cv.notify_all();
        }

        let completed = co.segments_processed.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(callback) = progress_cb {
            report_progress(co, callback, completed, num_segments);
        }
    }
}

fn delivery_loop(co: &Coordination, slots: &[SegmentSlot], ctx: &mut DeliveryCtx) {
    for slot in slots {
        let primes = {
            let mut guard = co.ready_mutex.lock().unwrap();
            while !slot.ready.load(Ordering::Acquire) && !co.stop.load(Ordering::Acquire) {
                guard = co.ready_cv.wait(guard).unwrap();
            }
            if !slot.ready.load(Ordering::Acquire) {
                break;
            }
            slot.ready.store(false, Ordering::Release);
            std::mem::take(&mut *slot.primes.lock().unwrap())
        };
        if !ctx.deliver(co, primes) {
            co.request_stop();
            break;
        }
    }
    if let Some(writer) = ctx.writer.as_mut() {
        if let Err(err) = writer.flush() {
            co.fail(FailureKind::Writer, err.to_string());
            co.request_stop();
        }
    }
}
