//! Self-imposed process lifetime limits.
//!
//! The worker does not try to guarantee zero memory growth. Instead it exits
//! after a bounded number of cycles or once its resident memory crosses a
//! ceiling, and relies on the supervisor to start a fresh process.

use core::fmt;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    MemoryCeiling { resident_bytes: u64, ceiling_bytes: u64 },
    CycleLimit { cycles: u64 },
    ShutdownRequested,
}

impl ExitReason {
    /// Process exit status. All planned exits are clean: the supervisor
    /// restarts on any status, and non-zero is reserved for startup failures
    /// and panics.
    pub fn exit_code(self) -> i32 {
        0
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::MemoryCeiling {
                resident_bytes,
                ceiling_bytes,
            } => write!(
                f,
                "resident memory {resident_bytes} bytes exceeds ceiling {ceiling_bytes} bytes"
            ),
            ExitReason::CycleLimit { cycles } => {
                write!(f, "cycle limit reached after {cycles} cycles")
            }
            ExitReason::ShutdownRequested => f.write_str("shutdown requested"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Governor {
    memory_ceiling_bytes: u64,
    max_cycles: u64,
}

impl Governor {
    pub fn new(memory_ceiling_bytes: u64, max_cycles: u64) -> Self {
        Self {
            memory_ceiling_bytes,
            max_cycles,
        }
    }

    /// Checked after every cycle, whether or not the cycle did any work.
    /// An unreadable memory reading only disables the memory check.
    pub fn evaluate(
        &self,
        cycles_completed: u64,
        resident_bytes: Option<u64>,
    ) -> Option<ExitReason> {
        if let Some(resident) = resident_bytes {
            if resident > self.memory_ceiling_bytes {
                return Some(ExitReason::MemoryCeiling {
                    resident_bytes: resident,
                    ceiling_bytes: self.memory_ceiling_bytes,
                });
            }
        }
        if cycles_completed >= self.max_cycles {
            return Some(ExitReason::CycleLimit {
                cycles: cycles_completed,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn below_limits_keeps_running() {
        let governor = Governor::new(128 * MB, 10);
        assert_eq!(governor.evaluate(9, Some(100 * MB)), None);
        assert_eq!(governor.evaluate(1, None), None);
    }

    #[test]
    fn memory_above_ceiling_exits() {
        let governor = Governor::new(128 * MB, 10);
        assert_eq!(
            governor.evaluate(1, Some(129 * MB)),
            Some(ExitReason::MemoryCeiling {
                resident_bytes: 129 * MB,
                ceiling_bytes: 128 * MB
            })
        );
        // Exactly at the ceiling is still fine.
        assert_eq!(governor.evaluate(1, Some(128 * MB)), None);
    }

    #[test]
    fn cycle_ceiling_exits() {
        let governor = Governor::new(128 * MB, 10);
        assert_eq!(
            governor.evaluate(10, None),
            Some(ExitReason::CycleLimit { cycles: 10 })
        );
    }

    #[test]
    fn planned_exits_are_clean() {
        assert_eq!(ExitReason::ShutdownRequested.exit_code(), 0);
        assert_eq!(ExitReason::CycleLimit { cycles: 3 }.exit_code(), 0);
    }
}
