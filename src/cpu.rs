//! CPU topology snapshot used for thread-count and cache-size decisions.
//!
//! The engine only consumes the abstract [`CpuInfo`] struct; detection is a
//! best-effort walk of Linux sysfs with conservative fallbacks everywhere
//! else. Detection runs once at run start and is never refreshed.

#[cfg(target_os = "linux")]
use std::collections::{HashMap, HashSet};
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;
use std::thread;

/// Topology facts the sizing heuristics need.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuInfo {
    pub logical_cpus: u32,
    pub physical_cpus: u32,
    /// Per-core L1 data cache.
    pub l1_data_bytes: usize,
    /// Per-core (or per-complex, divided) L2.
    pub l2_bytes: usize,
    /// Sum of all distinct L2 caches; 0 when unknown.
    pub l2_total_bytes: usize,
    pub has_smt: bool,
}

impl Default for CpuInfo {
    fn default() -> Self {
        Self {
            logical_cpus: 1,
            physical_cpus: 1,
            l1_data_bytes: 32 * 1024,
            l2_bytes: 1024 * 1024,
            l2_total_bytes: 0,
            has_smt: false,
        }
    }
}

/// Worker threads to use when the caller does not override: physical cores,
/// falling back to logical, never zero.
pub fn effective_thread_count(info: &CpuInfo) -> u32 {
    let mut threads = info.physical_cpus;
    if threads == 0 {
        threads = info.logical_cpus;
    }
    if threads == 0 {
        threads = 1;
    }
    threads
}

#[cfg(target_os = "linux")]
fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

/// Parses sysfs cache sizes of the form `32K` / `1024K` / `8M`.
fn parse_cache_size(text: &str) -> Option<usize> {
    if text.is_empty() {
        return None;
    }
    let (digits, suffix) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => text.split_at(pos),
        None => (text, ""),
    };
    let base: usize = digits.parse().ok()?;
    let factor = match suffix {
        "" => 1,
        "K" | "k" => 1024,
        "M" | "m" => 1024 * 1024,
        "G" | "g" => 1024 * 1024 * 1024,
        _ => return None,
    };
    base.checked_mul(factor)
}

#[cfg(target_os = "linux")]
fn detect_linux() -> CpuInfo {
    let mut info = CpuInfo::default();
    let base = Path::new("/sys/devices/system/cpu");

    let mut logical = 0u32;
    // (package, core) pairs identify physical cores.
    let mut cores: HashSet<(u32, u32)> = HashSet::new();
    let mut core_logical_counts: HashMap<(u32, u32), u32> = HashMap::new();
    let mut min_l1: Option<usize> = None;
    let mut min_l2: Option<usize> = None;
    let mut l2_total = 0usize;
    let mut seen_l2: HashSet<String> = HashSet::new();

    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(_) => return fallback_info(),
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(index) = name
            .strip_prefix("cpu")
            .and_then(|rest| rest.parse::<u32>().ok())
        else {
            continue;
        };
        let cpu_path = entry.path();
        if !cpu_path.join("topology").is_dir() {
            continue;
        }
        logical += 1;

        let package = read_trimmed(&cpu_path.join("topology/physical_package_id"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0u32);
        let core = read_trimmed(&cpu_path.join("topology/core_id"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(index);
        cores.insert((package, core));
        *core_logical_counts.entry((package, core)).or_insert(0) += 1;

        // Cache indices: level + type + size + shared set.
        let cache_dir = cpu_path.join("cache");
        let Ok(cache_entries) = fs::read_dir(&cache_dir) else {
            continue;
        };
        for cache in cache_entries.flatten() {
            let cache_path = cache.path();
            let Some(level) =
                read_trimmed(&cache_path.join("level")).and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            let Some(kind) = read_trimmed(&cache_path.join("type")) else {
                continue;
            };
            let Some(size) =
                read_trimmed(&cache_path.join("size")).and_then(|s| parse_cache_size(&s))
            else {
                continue;
            };
            if level == 1 && kind == "Data" {
                min_l1 = Some(min_l1.map_or(size, |v| v.min(size)));
            } else if level == 2 && (kind == "Unified" || kind == "Data") {
                // shared_cpu_map identifies the physical cache instance so a
                // cache shared by SMT siblings is summed once.
                let shared = read_trimmed(&cache_path.join("shared_cpu_map")).unwrap_or_default();
                let sharers = read_trimmed(&cache_path.join("shared_cpu_list"))
                    .map(|list| count_cpu_list(&list))
                    .unwrap_or(1)
                    .max(1);
                let per_core = (size / sharers).max(1);
                min_l2 = Some(min_l2.map_or(per_core, |v| v.min(per_core)));
                if seen_l2.insert(format!("{level}:{kind}:{shared}")) {
                    l2_total += size;
                }
            }
        }
    }

    if logical == 0 {
        return fallback_info();
    }
    info.logical_cpus = logical;
    info.physical_cpus = if cores.is_empty() {
        logical
    } else {
        cores.len() as u32
    };
    info.has_smt = core_logical_counts.values().any(|&n| n > 1);
    if let Some(l1) = min_l1 {
        info.l1_data_bytes = l1;
    }
    if let Some(l2) = min_l2 {
        info.l2_bytes = l2;
    }
    info.l2_total_bytes = l2_total;
    info
}

/// Counts CPUs in a sysfs list like `0-3,8,10-11`.
fn count_cpu_list(list: &str) -> usize {
    let mut total = 0usize;
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                total += hi.saturating_sub(lo) + 1;
            }
        } else if part.parse::<usize>().is_ok() {
            total += 1;
        }
    }
    total
}

fn fallback_info() -> CpuInfo {
    let mut info = CpuInfo::default();
    if let Ok(n) = thread::available_parallelism() {
        info.logical_cpus = n.get() as u32;
        info.physical_cpus = n.get() as u32;
    }
    info
}

/// Reads the host topology, falling back to conservative defaults when the
/// platform offers nothing better.
pub fn detect_cpu_info() -> CpuInfo {
    #[cfg(target_os = "linux")]
    {
        detect_linux()
    }
    #[cfg(not(target_os = "linux"))]
    {
        fallback_info()
    }
}
