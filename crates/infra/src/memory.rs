//! Resident memory readings for the resource governor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

pub trait MemoryProbe: Send {
    /// Resident set size of this process in bytes, if it can be read.
    fn resident_bytes(&mut self) -> Option<u64>;
}

/// Reads this process's RSS through `sysinfo`.
pub struct SysinfoMemoryProbe {
    sys: System,
    pid: Option<Pid>,
}

impl SysinfoMemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                tracing::warn!(error = %err, "cannot resolve own pid; memory ceiling disabled");
                None
            }
        };
        Self {
            sys: System::new(),
            pid,
        }
    }
}

impl Default for SysinfoMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoMemoryProbe {
    fn resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.sys.process(pid).map(|p| p.memory())
    }
}

/// Probe returning a settable reading. Clones share the value.
#[derive(Debug, Clone, Default)]
pub struct FixedMemoryProbe {
    bytes: Arc<AtomicU64>,
}

impl FixedMemoryProbe {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(bytes)),
        }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn resident_bytes(&mut self) -> Option<u64> {
        Some(self.bytes.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_probe_reads_a_nonzero_rss() {
        let mut probe = SysinfoMemoryProbe::new();
        let bytes = probe.resident_bytes().unwrap_or(0);
        assert!(bytes > 0);
    }

    #[test]
    fn fixed_probe_shares_its_reading() {
        let probe = FixedMemoryProbe::new(10);
        let mut reader = probe.clone();
        probe.set(42);
        assert_eq!(reader.resident_bytes(), Some(42));
    }
}
