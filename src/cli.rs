//! Command-line surface for the sieve binary.
//!
//! Hand-rolled (no clap dependency) to keep binary size small and boot fast.
//!
//! # Grammar
//!
//! ```text
//! prime-sieve --from A --to B [--count | --print | --nth K] [options]
//! prime-sieve --test N
//! prime-sieve --help | -h
//! ```
//!
//! Numeric values accept decimal, `0x` hex, and integer mantissa-exponent
//! forms like `1e9`; byte sizes accept `k/K/m/M/g/G` suffixes. Exit code 0
//! on success, 1 on any error with `Error: <message>` on stderr.

use crate::writer::OutputFormat;
use crate::wheel::WheelKind;
use crate::{run_range, RangeOptions, RunStatus};
use std::fmt;
use std::path::PathBuf;

/// CLI parse or runtime error carrying the message printed to stderr.
#[derive(Debug)]
pub struct CliError(pub String);

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CliError {}

fn err(message: impl Into<String>) -> CliError {
    CliError(message.into())
}

/// Parsed command line.
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub from: u64,
    pub to: u64,
    pub has_to: bool,
    pub count_only: bool,
    pub print_primes: bool,
    pub nth: Option<u64>,
    pub threads: u32,
    pub wheel: WheelKind,
    pub segment_bytes: usize,
    pub tile_bytes: usize,
    pub output_path: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub show_time: bool,
    pub show_stats: bool,
    pub use_ml: bool,
    pub help: bool,
    pub test_value: Option<u64>,
}

/// Parses an unsigned integer: decimal, `0x` hex, or `MeE` with a
/// non-negative integer exponent, overflow-checked.
pub fn parse_u64(value: &str) -> Result<u64, CliError> {
    let invalid = || err(format!("invalid integer: {value}"));
    if value.is_empty() {
        return Err(invalid());
    }

    if let Some(exp_pos) = value.find(['e', 'E']) {
        let mantissa_str = &value[..exp_pos];
        let exponent_str = &value[exp_pos + 1..];
        if mantissa_str.is_empty() || exponent_str.is_empty() {
            return Err(invalid());
        }
        let mantissa = parse_plain_u64(mantissa_str).ok_or_else(invalid)?;
        let exponent: u32 = exponent_str.parse().map_err(|_| invalid())?;
        let mut result = mantissa;
        for _ in 0..exponent {
            result = result
                .checked_mul(10)
                .ok_or_else(|| err(format!("integer too large: {value}")))?;
        }
        return Ok(result);
    }

    parse_plain_u64(value).ok_or_else(invalid)
}

fn parse_plain_u64(value: &str) -> Option<u64> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// Parses a byte count with an optional `k`/`m`/`g` suffix.
pub fn parse_size(value: &str) -> Result<usize, CliError> {
    if value.is_empty() {
        return Err(err("invalid size"));
    }
    let (digits, suffix) = match value.find(|c: char| !c.is_ascii_digit() && c != 'x' && c != 'X')
    {
        Some(pos) if value[pos..].len() == 1 => value.split_at(pos),
        Some(_) | None => (value, ""),
    };
    let factor: u64 = match suffix {
        "" => 1,
        "k" | "K" => 1024,
        "m" | "M" => 1024 * 1024,
        "g" | "G" => 1024 * 1024 * 1024,
        _ => return Err(err(format!("invalid size suffix: {value}"))),
    };
    let base = parse_plain_u64(digits).ok_or_else(|| err(format!("invalid size: {value}")))?;
    let result = base
        .checked_mul(factor)
        .ok_or_else(|| err(format!("size too large: {value}")))?;
    usize::try_from(result).map_err(|_| err(format!("size too large: {value}")))
}

fn parse_output_format(text: &str) -> Result<OutputFormat, CliError> {
    match text {
        "text" => Ok(OutputFormat::Text),
        "binary" => Ok(OutputFormat::Binary),
        // Historical label: the wire format is raw 8-byte LE deltas.
        "zstd" | "zstd+delta" => Ok(OutputFormat::Delta),
        other => Err(err(format!("unsupported out-format: {other}"))),
    }
}

/// Parses argv (without the program name) into [`Options`].
pub fn parse_options<I, S>(args: I) -> Result<Options, CliError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut opts = Options {
        count_only: true,
        ..Options::default()
    };
    let mut iter = args.into_iter();

    let take_value = |iter: &mut I::IntoIter, flag: &str| -> Result<String, CliError> {
        iter.next()
            .map(|s| s.as_ref().to_string())
            .ok_or_else(|| err(format!("{flag} requires a value")))
    };

    while let Some(arg) = iter.next() {
        let arg = arg.as_ref();
        match arg {
            "--help" | "-h" => {
                opts.help = true;
                return Ok(opts);
            }
            "--from" => opts.from = parse_u64(&take_value(&mut iter, "--from")?)?,
            "--to" => {
                opts.to = parse_u64(&take_value(&mut iter, "--to")?)?;
                opts.has_to = true;
            }
            "--count" => opts.count_only = true,
            "--print" => {
                opts.print_primes = true;
                opts.count_only = false;
            }
            "--nth" => {
                opts.nth = Some(parse_u64(&take_value(&mut iter, "--nth")?)?);
                opts.count_only = false;
            }
            "--threads" => {
                opts.threads = parse_u64(&take_value(&mut iter, "--threads")?)? as u32;
            }
            "--wheel" => {
                opts.wheel = match take_value(&mut iter, "--wheel")?.as_str() {
                    "30" => WheelKind::Mod30,
                    "210" => WheelKind::Mod210,
                    "1155" => WheelKind::Mod1155,
                    other => return Err(err(format!("unsupported wheel: {other}"))),
                };
            }
            "--segment" => opts.segment_bytes = parse_size(&take_value(&mut iter, "--segment")?)?,
            "--tile" => opts.tile_bytes = parse_size(&take_value(&mut iter, "--tile")?)?,
            "--out" => {
                opts.output_path = Some(PathBuf::from(take_value(&mut iter, "--out")?));
            }
            "--out-format" => {
                opts.output_format = parse_output_format(&take_value(&mut iter, "--out-format")?)?;
            }
            "--time" => opts.show_time = true,
            "--stats" => opts.show_stats = true,
            "--ml" => opts.use_ml = true,
            "--test" => opts.test_value = Some(parse_u64(&take_value(&mut iter, "--test")?)?),
            _ => {
                if let Some(fmt) = arg.strip_prefix("--out-format=") {
                    opts.output_format = parse_output_format(fmt)?;
                } else {
                    return Err(err(format!("unknown option: {arg}")));
                }
            }
        }
    }
    Ok(opts)
}

fn print_usage() {
    println!(
        "prime-sieve --from A --to B [options]\n\
         \x20 --count             Count primes (default)\n\
         \x20 --print             Print primes in the interval\n\
         \x20 --nth K             Find the K-th prime in the interval\n\
         \x20 --threads N         Override thread count\n\
         \x20 --wheel 30|210|1155 Select wheel factorisation (default 30)\n\
         \x20 --segment BYTES     Override segment size\n\
         \x20 --tile BYTES        Override tile size\n\
         \x20 --out PATH          Write primes to file\n\
         \x20 --out-format FMT    Output format: text (default), binary, zstd\n\
         \x20 --time              Print elapsed time\n\
         \x20 --stats             Print configuration statistics\n\
         \x20 --ml                Use Meissel-Lehmer counting for --count\n\
         \x20 --test N           Run a Miller-Rabin primality check for N"
    );
}

fn run(opts: &Options) -> Result<i32, CliError> {
    if opts.help {
        print_usage();
        return Ok(0);
    }
    if let (Some(test_value), false) = (opts.test_value, opts.has_to) {
        let verdict = if crate::miller_rabin_is_prime(test_value) {
            "prime"
        } else {
            "composite"
        };
        println!("{verdict}");
        return Ok(0);
    }
    if !opts.has_to {
        print_usage();
        return Ok(1);
    }
    if let Some(test_value) = opts.test_value {
        let verdict = if crate::miller_rabin_is_prime(test_value) {
            "prime"
        } else {
            "composite"
        };
        println!("{verdict}");
    }
    if opts.to <= opts.from || opts.to < 2 {
        return Err(err("invalid range"));
    }

    let is_count_mode = opts.count_only || (!opts.print_primes && opts.nth.is_none());

    let range_options = RangeOptions {
        from: opts.from,
        to: opts.to,
        threads: opts.threads,
        wheel: opts.wheel,
        segment_bytes: opts.segment_bytes,
        tile_bytes: opts.tile_bytes,
        nth_index: opts.nth.unwrap_or(0),
        collect_primes: false,
        use_meissel: opts.use_ml && is_count_mode,
        write_to_file: opts.print_primes,
        output_format: opts.output_format,
        output_path: opts.output_path.clone(),
        prime_callback: None,
        progress_callback: None,
        cancel: None,
    };

    let report = run_range(&range_options);
    if report.status != RunStatus::Success {
        let message = report
            .error_message
            .unwrap_or_else(|| "internal error".to_string());
        return Err(err(message));
    }

    if is_count_mode {
        println!("{}", report.total_count);
    }
    if opts.nth.is_some() {
        match report.nth_value {
            Some(value) => println!("{value}"),
            None => return Err(err("nth prime not found within range")),
        }
    }

    if opts.show_stats {
        let stats = &report.stats;
        println!("Threads: {}", stats.threads);
        let (segment_bytes, tile_bytes) = match stats.segment {
            Some(segment) => (segment.segment_bytes, segment.tile_bytes),
            None => (0, 0),
        };
        println!("Segment bytes: {segment_bytes}");
        println!("Tile bytes: {tile_bytes}");
        println!("L1d: {}  L2: {}", stats.cpu.l1_data_bytes, stats.cpu.l2_bytes);
    }
    if opts.show_time {
        println!("Elapsed: {} us", report.stats.elapsed_us);
    }
    Ok(0)
}

/// Parses and runs one CLI invocation; returns the process exit code.
pub fn run_cli<I, S>(args: I) -> i32
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let opts = match parse_options(args) {
        Ok(opts) => opts,
        Err(error) => {
            eprintln!("Error: {error}");
            return 1;
        }
    };
    match run(&opts) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {error}");
            1
        }
    }
}
