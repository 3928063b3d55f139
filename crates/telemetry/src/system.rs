//! Host CPU and memory gauges, read on demand at snapshot time.

use parking_lot::Mutex;
use sysinfo::System;

/// Instantaneous host usage, in whole percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemUsage {
    pub cpu_percent: u64,
    pub memory_percent: u64,
}

/// Keeps one `System` alive so successive CPU readings measure the interval
/// between export ticks.
pub struct SystemProbe {
    system: Mutex<System>,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    pub fn sample(&self) -> SystemUsage {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };

        SystemUsage {
            cpu_percent: whole_percent(f64::from(system.global_cpu_usage())),
            memory_percent: whole_percent(memory),
        }
    }
}

fn whole_percent(value: f64) -> u64 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_within_percent_range() {
        let probe = SystemProbe::new();
        let usage = probe.sample();
        assert!(usage.cpu_percent <= 100);
        assert!(usage.memory_percent <= 100);
    }

    #[test]
    fn whole_percent_clamps_and_rounds() {
        assert_eq!(whole_percent(-3.0), 0);
        assert_eq!(whole_percent(42.6), 43);
        assert_eq!(whole_percent(250.0), 100);
        assert_eq!(whole_percent(f64::NAN), 0);
    }
}
