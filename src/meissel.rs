//! Combinatorial prime counting (Meissel–Lehmer).
//!
//! Counts primes in `[from, to)` as `pi(to-1) - pi(from-1)` without sieving
//! the interval. `pi(n)` uses the classic identity
//!
//! ```text
//! pi(n) = phi(n, a) + (a + b - 2)(b - a + 1)/2
//!         - sum_{i=a+1..b} [ pi(n/p_i)
//!             + (i <= c) sum_{j=i..pi(sqrt(n/p_i))} (pi((n/p_i)/p_j) - (j-1)) ]
//! ```
//!
//! with `a = pi(n^(1/4))`, `b = pi(sqrt(n))`, `c = pi(n^(1/3))` and the
//! partial-sieve function `phi(x, s) = phi(x, s-1) - phi(x/p_s, s-1)`.
//!
//! Both recursions are memoized in shared [`AHashMap`] tables behind mutexes;
//! the outer subtraction sum is split into contiguous chunks across scoped
//! threads, each recursing single-threaded against the shared tables.

use ahash::AHashMap;
use std::sync::Mutex;
use std::thread;

const SMALL_PRIMES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

fn small_pi(n: u64) -> u64 {
    SMALL_PRIMES.iter().filter(|&&p| p as u64 <= n).count() as u64
}

fn integer_cuberoot(n: u64) -> u64 {
    let mut root = (n as f64).cbrt() as u64;
    let cube_le = |v: u64| -> bool {
        if v == 0 {
            return true;
        }
        match v.checked_mul(v).and_then(|sq| sq.checked_mul(v)) {
            Some(cube) => cube <= n,
            None => false,
        }
    };
    while cube_le(root + 1) {
        root += 1;
    }
    while !cube_le(root) {
        root -= 1;
    }
    root
}

fn integer_fourth_root(n: u64) -> u64 {
    n.isqrt().isqrt()
}

struct MeisselCalculator<'a> {
    primes: &'a [u32],
    max_prime: u64,
    phi_cache: Mutex<AHashMap<(u64, usize), u64>>,
    pi_cache: Mutex<AHashMap<u64, u64>>,
}

impl<'a> MeisselCalculator<'a> {
    fn new(primes: &'a [u32]) -> Self {
        Self {
            primes,
            max_prime: primes.last().copied().unwrap_or(0) as u64,
            phi_cache: Mutex::new(AHashMap::new()),
            pi_cache: Mutex::new(AHashMap::new()),
        }
    }

    /// Count of integers in `[1, x]` untouched by the first `s` primes.
    fn phi(&self, x: u64, s: usize) -> u64 {
        if s == 0 {
            return x;
        }
        if s == 1 {
            return (x + 1) >> 1;
        }
        if s > self.primes.len() {
            return self.phi(x, self.primes.len());
        }
        let key = (x, s);
        if let Some(&cached) = self.phi_cache.lock().unwrap().get(&key) {
            return cached;
        }
        let p = self.primes[s - 1] as u64;
        let result = self.phi(x, s - 1) - self.phi(x / p, s - 1);
        self.phi_cache.lock().unwrap().insert(key, result);
        result
    }

    fn pi(&self, n: u64, threads: u32) -> u64 {
        if n < 2 {
            return 0;
        }
        if self.primes.is_empty() {
            return small_pi(n);
        }
        if n <= self.max_prime {
            return self.primes.partition_point(|&p| p as u64 <= n) as u64;
        }
        if let Some(&cached) = self.pi_cache.lock().unwrap().get(&n) {
            return cached;
        }

        let a = self.pi(integer_fourth_root(n), 1);
        let b = self.pi(n.isqrt(), 1);
        let c = self.pi(integer_cuberoot(n), 1);

        let mut result = self.phi(n, a as usize);
        if b + a >= 2 {
            result += (b + a - 2) * (b - a + 1) / 2;
        }

        let effective_b = b.min(self.primes.len() as u64);
        let iteration_count = effective_b.saturating_sub(a);

        let compute_range = |start: u64, end: u64| -> u64 {
            let mut subtotal = 0u64;
            for i in start..end {
                let index = (i - 1) as usize;
                if index >= self.primes.len() {
                    break;
                }
                let p = self.primes[index] as u64;
                let w = n / p;
                subtotal += self.pi(w, 1);
                if i <= c {
                    let limit = self.pi(w.isqrt(), 1);
                    for j in i..=limit {
                        let j_index = (j - 1) as usize;
                        if j_index >= self.primes.len() {
                            break;
                        }
                        let pj = self.primes[j_index] as u64;
                        subtotal += self.pi(w / pj, 1) - (j - 1);
                    }
                }
            }
            subtotal
        };

        if iteration_count > 0 {
            if threads <= 1 || iteration_count == 1 {
                result -= compute_range(a + 1, effective_b + 1);
            } else {
                let worker_count = (threads as u64).min(iteration_count).max(1);
                let chunk = iteration_count / worker_count;
                let remainder = iteration_count % worker_count;
                let compute_range = &compute_range;
                let subtract_total = thread::scope(|scope| {
                    let mut handles = Vec::with_capacity(worker_count as usize);
                    let mut current = a + 1;
                    for w in 0..worker_count {
                        let size = chunk + u64::from(w < remainder);
                        if size == 0 {
                            continue;
                        }
                        let start = current;
                        let end = start + size;
                        current = end;
                        handles.push(scope.spawn(move || compute_range(start, end)));
                    }
                    handles
                        .into_iter()
                        .map(|h| h.join().expect("meissel chunk worker panicked"))
                        .sum::<u64>()
                });
                result -= subtract_total;
            }
        }

        // First insertion wins so concurrent computations of the same n
        // converge on a single stored value.
        let mut cache = self.pi_cache.lock().unwrap();
        *cache.entry(n).or_insert(result)
    }
}

fn count_small_range(from: u64, to: u64) -> u64 {
    let count_up_to = |bound: u64| -> u64 {
        if bound < 2 {
            0
        } else {
            small_pi(bound)
        }
    };
    let upper = if to == 0 { 0 } else { count_up_to(to - 1) };
    let lower = if from == 0 { 0 } else { count_up_to(from - 1) };
    upper.saturating_sub(lower)
}

/// Counts primes in `[from, to)` analytically.
///
/// `primes` must contain at least all primes up to `sqrt(to)` for an exact
/// answer (the same base set the sieve uses); an empty slice degrades to a
/// small-prime table good for `to <= 41`. `threads == 0` means use all
/// available parallelism.
pub fn meissel_count(from: u64, to: u64, primes: &[u32], threads: u32) -> u64 {
    if to <= from {
        return 0;
    }
    if primes.is_empty() {
        return count_small_range(from, to);
    }
    let mut effective_threads = threads;
    if effective_threads == 0 {
        effective_threads = thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
    }
    let calc = MeisselCalculator::new(primes);
    let upper = calc.pi(to - 1, effective_threads);
    let lower = if from == 0 {
        0
    } else {
        calc.pi(from - 1, effective_threads)
    };
    upper.saturating_sub(lower)
}
