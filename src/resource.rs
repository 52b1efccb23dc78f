//! System resource detection and worker-pool tuning.
//!
//! Detects available RAM and CPU cores, then picks how many worker threads
//! the local runner uses when the job config leaves `threads` unset.
//! Stateless: each call to `ResourceManager::auto_tune()` re-probes.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

// ── Constants ───────────────────────────────────────────────────────

const GB: u64 = 1024 * 1024 * 1024;

/// Upper bound on worker threads regardless of core count.
const MAX_WORKER_THREADS: usize = 64;

/// Above this pressure the pool is halved.
const HIGH_MEMORY_PRESSURE: f64 = 0.9;

// ── SystemResources ─────────────────────────────────────────────────

/// RAM and CPU figures of the host, probed once per job.
#[derive(Debug, Clone)]
pub struct SystemResources {
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    /// Logical CPUs visible to this process.
    pub cpu_count: usize,
}

impl SystemResources {
    pub fn detect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_count,
        }
    }

    /// Fraction of RAM in use, `0.0..=1.0`. Unknown totals count as full.
    pub fn memory_pressure(&self) -> f64 {
        match self.total_memory_bytes {
            0 => 1.0,
            total => {
                let used = total.saturating_sub(self.available_memory_bytes);
                (used as f64 / total as f64).clamp(0.0, 1.0)
            }
        }
    }
}

// ── TuningProfile ───────────────────────────────────────────────────

/// Worker-pool sizing derived from `SystemResources`.
#[derive(Debug, Clone)]
pub struct TuningProfile {
    /// Threads in the map/reduce worker pool.
    pub worker_threads: usize,
    pub memory_pressure: f64,
}

impl TuningProfile {
    /// Heuristics:
    /// - RAM < 4 GB -> `cpu / 2`, else `cpu`; clamped to `[1, 64]`.
    /// - memory pressure > 0.9 -> halve again (each reduce task holds one
    ///   record per source plus mapped source files).
    pub fn from_resources(res: &SystemResources) -> Self {
        let memory_pressure = res.memory_pressure();

        let mut threads = if res.total_memory_bytes < 4 * GB {
            res.cpu_count / 2
        } else {
            res.cpu_count
        };
        if memory_pressure > HIGH_MEMORY_PRESSURE {
            threads /= 2;
        }

        Self {
            worker_threads: threads.clamp(1, MAX_WORKER_THREADS),
            memory_pressure,
        }
    }
}

// ── ResourceManager ─────────────────────────────────────────────────

pub struct ResourceManager;

impl ResourceManager {
    pub fn auto_tune() -> TuningProfile {
        let res = SystemResources::detect();
        let profile = TuningProfile::from_resources(&res);
        tracing::debug!(
            cpus = res.cpu_count,
            total_gb = res.total_memory_bytes / GB,
            threads = profile.worker_threads,
            "auto-tuned worker pool"
        );
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(total_gb: u64, available_gb: u64, cpus: usize) -> SystemResources {
        SystemResources {
            total_memory_bytes: total_gb * GB,
            available_memory_bytes: available_gb * GB,
            cpu_count: cpus,
        }
    }

    #[test]
    fn test_detect_returns_sane_values() {
        let res = SystemResources::detect();
        assert!(res.cpu_count >= 1);
        let p = res.memory_pressure();
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_threads_follow_cpus_on_large_machine() {
        let profile = TuningProfile::from_resources(&resources(32, 24, 12));
        assert_eq!(profile.worker_threads, 12);
    }

    #[test]
    fn test_small_machine_halves_threads() {
        let profile = TuningProfile::from_resources(&resources(2, 1, 4));
        assert_eq!(profile.worker_threads, 2);
    }

    #[test]
    fn test_high_pressure_halves_threads() {
        let res = SystemResources {
            total_memory_bytes: 16 * GB,
            available_memory_bytes: GB / 2,
            cpu_count: 8,
        };
        assert_eq!(TuningProfile::from_resources(&res).worker_threads, 4);
    }

    #[test]
    fn test_threads_clamped() {
        assert_eq!(TuningProfile::from_resources(&resources(1, 1, 1)).worker_threads, 1);
        assert_eq!(TuningProfile::from_resources(&resources(512, 400, 256)).worker_threads, 64);
    }

    #[test]
    fn test_zero_total_memory_is_critical() {
        let res = resources(0, 0, 4);
        assert_eq!(res.memory_pressure(), 1.0);
    }
}
