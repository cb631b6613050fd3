//! System resource sampling

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::error::{Error, Result};

/// Point-in-time memory and CPU usage, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_percent: f32,
    pub cpu_percent: f32,
}

/// Source of resource samples
#[cfg_attr(test, mockall::automock)]
pub trait ResourceSampler: Send + Sync {
    /// Take a sample. `Ok(None)` means the sampler is busy and the caller
    /// should skip this round rather than wait.
    fn sample(&self) -> Result<Option<ResourceSample>>;
}

/// Host-wide usage via `sysinfo`
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> Result<Option<ResourceSample>> {
        let Some(mut system) = self.system.try_lock() else {
            return Ok(None);
        };

        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        if total == 0 {
            return Err(Error::internal("total memory reported as zero"));
        }

        Ok(Some(ResourceSample {
            memory_percent: (system.used_memory() as f64 / total as f64 * 100.0) as f32,
            cpu_percent: system.global_cpu_usage(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_sample_is_in_range() {
        let sampler = SysinfoSampler::new();
        if let Ok(Some(sample)) = sampler.sample() {
            assert!((0.0..=100.0).contains(&sample.memory_percent));
            assert!(sample.cpu_percent >= 0.0);
        }
    }

    #[test]
    fn test_busy_sampler_skips() {
        let sampler = SysinfoSampler::new();
        let _guard = sampler.system.lock();
        assert!(matches!(sampler.sample(), Ok(None)));
    }
}
