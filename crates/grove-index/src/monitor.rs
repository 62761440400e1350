//! Process memory probing.
//!
//! The index only needs a coarse resident-set figure to decide when to
//! shed its cache. On Linux that comes from `/proc/self/statm`; elsewhere
//! the probe reports nothing and the memory check never fires.

use serde::{Deserialize, Serialize};
use std::fmt;

const PAGE_SIZE: u64 = 4096;

/// Memory figures for the current process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMemory {
    /// Resident set size.
    pub resident: u64,
    /// Total virtual size.
    pub virtual_size: u64,
}

/// Source of process memory figures.
pub trait MemoryProbe: Send + Sync + fmt::Debug {
    /// Returns None when the platform doesn't expose memory usage.
    fn sample(&self) -> Option<ProcessMemory>;
}

/// Reads `/proc/self/statm`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStatmProbe;

impl MemoryProbe for ProcStatmProbe {
    fn sample(&self) -> Option<ProcessMemory> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        parse_statm(&statm)
    }
}

fn parse_statm(statm: &str) -> Option<ProcessMemory> {
    let mut parts = statm.split_whitespace();
    let size: u64 = parts.next()?.parse().ok()?;
    let resident: u64 = parts.next()?.parse().ok()?;
    Some(ProcessMemory {
        resident: resident * PAGE_SIZE,
        virtual_size: size * PAGE_SIZE,
    })
}

/// A probe that always reports the same figures.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub Option<ProcessMemory>);

impl FixedProbe {
    pub fn resident(bytes: u64) -> Self {
        Self(Some(ProcessMemory {
            resident: bytes,
            virtual_size: bytes,
        }))
    }
}

impl MemoryProbe for FixedProbe {
    fn sample(&self) -> Option<ProcessMemory> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statm() {
        let memory = parse_statm("2000 500 100 10 0 300 0\n").unwrap();
        assert_eq!(memory.virtual_size, 2000 * 4096);
        assert_eq!(memory.resident, 500 * 4096);
        assert!(parse_statm("garbage").is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_probe_reads_self() {
        let memory = ProcStatmProbe.sample().unwrap();
        assert!(memory.resident > 0);
    }
}
