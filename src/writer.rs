//! Pipelined prime output: producers encode, one thread writes.
//!
//! # Design
//!
//! Producers (the delivery thread, or the runner for the prefix chunk)
//! encode primes into byte chunks and push them onto a bounded queue; a
//! dedicated writer thread drains the queue into an 8 MiB staging buffer and
//! flushes that to the sink in large writes. This keeps sieving workers off
//! the I/O path entirely and gives explicit backpressure when the sink is
//! slower than production.
//!
//! # Error latching
//!
//! The writer thread cannot return errors to anyone directly, so the first
//! sink failure is latched (atomic flag + message). Producers observe it on
//! their next enqueue; [`PrimeWriter::finish`] surfaces it exactly once.
//!
//! # Lifecycle
//!
//! `Running -> StopRequested -> Joined`. `finish` is idempotent; dropping a
//! writer finishes it and swallows any error (callers who care call
//! `finish` themselves first).

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// On-the-wire encodings for prime output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Decimal ASCII, one prime per line.
    Text,
    /// Contiguous 8-byte little-endian values.
    Binary,
    /// Contiguous 8-byte little-endian gaps from the previous value
    /// (first gap is from zero). Requires non-decreasing input.
    Delta,
}

struct Chunk {
    data: Vec<u8>,
    flush: bool,
}

struct QueueState {
    chunks: VecDeque<Chunk>,
    stop_requested: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    io_error: AtomicBool,
    error_message: Mutex<String>,
}

impl Shared {
    fn set_error(&self, message: String) {
        if self
            .io_error
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.error_message.lock().unwrap() = message;
        }
    }

    fn check_error(&self) -> io::Result<()> {
        if !self.io_error.load(Ordering::Acquire) {
            return Ok(());
        }
        let message = self.error_message.lock().unwrap();
        let text = if message.is_empty() {
            "I/O error".to_string()
        } else {
            message.clone()
        };
        Err(io::Error::other(text))
    }
}

const DEFAULT_QUEUE_CAPACITY: usize = 8;
const DEFAULT_BUFFER_THRESHOLD: usize = 8 << 20;

enum Sink {
    Stdout(io::Stdout),
    File(File),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Stdout(out) => out.write(buf),
            Sink::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stdout(out) => out.flush(),
            Sink::File(file) => file.flush(),
        }
    }
}

fn writer_loop(shared: &Shared, mut sink: Sink, buffer_threshold: usize) {
    let mut buffer: Vec<u8> = Vec::with_capacity(buffer_threshold);

    let flush_buffer = |buffer: &mut Vec<u8>, sink: &mut Sink| {
        if buffer.is_empty() {
            return;
        }
        if let Err(err) = sink.write_all(buffer) {
            shared.set_error(err.to_string());
        }
        buffer.clear();
    };

    loop {
        let chunk = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(chunk) = queue.chunks.pop_front() {
                    shared.not_full.notify_one();
                    break Some(chunk);
                }
                if queue.stop_requested {
                    break None;
                }
                queue = shared.not_empty.wait(queue).unwrap();
            }
        };
        let Some(chunk) = chunk else {
            break;
        };

        if !chunk.data.is_empty() {
            buffer.extend_from_slice(&chunk.data);
            if buffer.len() >= buffer_threshold {
                flush_buffer(&mut buffer, &mut sink);
            }
        }
        if chunk.flush {
            flush_buffer(&mut buffer, &mut sink);
            if let Err(err) = sink.flush() {
                shared.set_error(err.to_string());
            }
        }
    }

    flush_buffer(&mut buffer, &mut sink);
    if let Err(err) = sink.flush() {
        shared.set_error(err.to_string());
    }
}

/// Asynchronous single-writer sink for prime streams.
pub struct PrimeWriter {
    enabled: bool,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    queue_capacity: usize,
    format: OutputFormat,
    previous_prime: u64,
    finished: bool,
}

impl PrimeWriter {
    /// Opens the sink and spawns the writer thread. A `None` path writes to
    /// stdout (with a stderr advisory); otherwise the file is created,
    /// truncating any existing content. A disabled writer accepts every call
    /// as a no-op.
    pub fn new(enabled: bool, path: Option<&Path>, format: OutputFormat) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                stop_requested: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            io_error: AtomicBool::new(false),
            error_message: Mutex::new(String::new()),
        });

        if !enabled {
            return Ok(Self {
                enabled,
                shared,
                handle: None,
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                format,
                previous_prime: 0,
                finished: true,
            });
        }

        let sink = match path {
            None => {
                eprintln!(
                    "[prime-sieve] warning: writing primes to stdout may stall large outputs. \
                     Consider using --out <path>."
                );
                Sink::Stdout(io::stdout())
            }
            Some(path) => Sink::File(File::create(path)?),
        };

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("prime-writer".into())
            .spawn(move || writer_loop(&thread_shared, sink, DEFAULT_BUFFER_THRESHOLD))
            .map_err(|err| io::Error::other(format!("failed to spawn writer thread: {err}")))?;

        Ok(Self {
            enabled,
            shared,
            handle: Some(handle),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            format,
            previous_prime: 0,
            finished: false,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Encodes and enqueues one ordered chunk of primes.
    ///
    /// Blocks while the queue is full. Fails if the writer thread has
    /// latched an I/O error, the writer was stopped, or delta encoding sees
    /// a decreasing value.
    pub fn write_segment(&mut self, primes: &[u64]) -> io::Result<()> {
        if !self.enabled || primes.is_empty() {
            return Ok(());
        }
        let data = match self.format {
            OutputFormat::Text => {
                let mut chunk = Vec::with_capacity(primes.len() * 21);
                for &value in primes {
                    let mut scratch = [0u8; 20];
                    chunk.extend_from_slice(format_decimal(value, &mut scratch));
                    chunk.push(b'\n');
                }
                chunk
            }
            OutputFormat::Binary => {
                let mut chunk = Vec::with_capacity(primes.len() * 8);
                for &value in primes {
                    chunk.extend_from_slice(&value.to_le_bytes());
                }
                chunk
            }
            OutputFormat::Delta => self.encode_deltas(primes)?,
        };
        self.enqueue(Chunk { data, flush: false })
    }

    /// Encodes and enqueues one value.
    pub fn write_value(&mut self, value: u64) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.write_segment(&[value])
    }

    /// Enqueues a flush marker: all data queued so far reaches the sink and
    /// the sink itself is flushed.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.enqueue(Chunk {
            data: Vec::new(),
            flush: true,
        })
    }

    /// Stops the writer thread, closes the sink, and reports the first I/O
    /// error seen anywhere in the pipeline. Safe to call twice; the second
    /// call is a no-op.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.enabled || self.finished {
            return Ok(());
        }
        self.finished = true;

        let flush_result = self.flush();
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stop_requested = true;
        }
        self.shared.not_empty.notify_one();
        self.shared.not_full.notify_all();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        flush_result?;
        self.shared.check_error()
    }

    fn enqueue(&mut self, chunk: Chunk) -> io::Result<()> {
        self.shared.check_error()?;

        let mut queue = self.shared.queue.lock().unwrap();
        while queue.chunks.len() >= self.queue_capacity && !queue.stop_requested {
            queue = self.shared.not_full.wait(queue).unwrap();
        }
        if queue.stop_requested {
            return Err(io::Error::other("writer has been stopped"));
        }
        queue.chunks.push_back(chunk);
        drop(queue);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    fn encode_deltas(&mut self, primes: &[u64]) -> io::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(primes.len() * 8);
        for &value in primes {
            if value < self.previous_prime {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "primes must be non-decreasing for delta encoding",
                ));
            }
            let delta = value - self.previous_prime;
            self.previous_prime = value;
            raw.extend_from_slice(&delta.to_le_bytes());
        }
        Ok(raw)
    }
}

impl Drop for PrimeWriter {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Formats `value` into `scratch`, returning the used suffix.
fn format_decimal(mut value: u64, scratch: &mut [u8; 20]) -> &[u8] {
    let mut pos = scratch.len();
    loop {
        pos -= 1;
        scratch[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &scratch[pos..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("prime-writer-{}-{}", std::process::id(), name));
        path
    }

    #[test]
    fn text_format_one_prime_per_line() {
        let path = temp_path("text");
        let mut writer = PrimeWriter::new(true, Some(path.as_path()), OutputFormat::Text).unwrap();
        writer.write_segment(&[2, 3, 5, 7, 11]).unwrap();
        writer.write_segment(&[13]).unwrap();
        writer.finish().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2\n3\n5\n7\n11\n13\n");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn binary_format_little_endian() {
        let path = temp_path("binary");
        let mut writer = PrimeWriter::new(true, Some(path.as_path()), OutputFormat::Binary).unwrap();
        writer.write_segment(&[2, 0x0102_0304_0506_0708]).unwrap();
        writer.finish().unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &2u64.to_le_bytes());
        assert_eq!(&bytes[8..], &0x0102_0304_0506_0708u64.to_le_bytes());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn delta_format_accumulates_across_chunks() {
        let path = temp_path("delta");
        let mut writer = PrimeWriter::new(true, Some(path.as_path()), OutputFormat::Delta).unwrap();
        writer.write_segment(&[2, 3, 5]).unwrap();
        writer.write_segment(&[11]).unwrap();
        writer.finish().unwrap();
        let bytes = fs::read(&path).unwrap();
        let deltas: Vec<u64> = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(deltas, vec![2, 1, 2, 6]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn delta_rejects_decreasing_values() {
        let path = temp_path("delta-bad");
        let mut writer = PrimeWriter::new(true, Some(path.as_path()), OutputFormat::Delta).unwrap();
        writer.write_segment(&[10]).unwrap();
        let err = writer.write_segment(&[5]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        writer.finish().unwrap();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn finish_is_idempotent() {
        let path = temp_path("finish-twice");
        let mut writer = PrimeWriter::new(true, Some(path.as_path()), OutputFormat::Text).unwrap();
        writer.write_segment(&[17]).unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "17\n");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn write_after_finish_errors() {
        let path = temp_path("after-finish");
        let mut writer = PrimeWriter::new(true, Some(path.as_path()), OutputFormat::Text).unwrap();
        writer.finish().unwrap();
        assert!(writer.write_segment(&[19]).is_err());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn disabled_writer_accepts_everything() {
        let mut writer = PrimeWriter::new(false, None, OutputFormat::Text).unwrap();
        writer.write_segment(&[1, 2, 3]).unwrap();
        writer.write_value(5).unwrap();
        writer.flush().unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn open_failure_is_reported() {
        let path = std::path::Path::new("/nonexistent-dir-zzz/out.txt");
        assert!(PrimeWriter::new(true, Some(path), OutputFormat::Text).is_err());
    }

    #[test]
    fn large_stream_round_trips() {
        let path = temp_path("large");
        let mut writer = PrimeWriter::new(true, Some(path.as_path()), OutputFormat::Binary).unwrap();
        let values: Vec<u64> = (0..100_000u64).map(|i| i * 3).collect();
        for chunk in values.chunks(1024) {
            writer.write_segment(chunk).unwrap();
        }
        writer.finish().unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), values.len() * 8);
        let decoded: Vec<u64> = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(decoded, values);
        fs::remove_file(&path).unwrap();
    }
}
