//! Per-archive configuration.

use crate::error::CartonError;

/// Default nesting limit for blocks, arrays and elements combined.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Default number of errors kept in [`Results::errors`](crate::Results).
pub const DEFAULT_MAX_RECORDED_ERRORS: usize = 64;

/// Behavior switches for one archive instance.
///
/// Small and `Copy`; pass it by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Treat a short write as fatal. Off by default: overflow is counted only.
    pub escalate_overflow: bool,
    /// Treat a short read as fatal. Off by default: underrun is counted only.
    pub escalate_underrun: bool,
    /// Maximum nesting of blocks, arrays and elements.
    pub max_depth: usize,
    /// Maximum number of errors kept in `Results::errors`.
    pub max_recorded_errors: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            escalate_overflow: false,
            escalate_underrun: false,
            max_depth: DEFAULT_MAX_DEPTH,
            max_recorded_errors: DEFAULT_MAX_RECORDED_ERRORS,
        }
    }
}

impl ArchiveConfig {
    /// Makes buffer overflow fatal.
    pub fn with_escalate_overflow(mut self, on: bool) -> Self {
        self.escalate_overflow = on;
        self
    }

    /// Makes buffer underrun fatal.
    pub fn with_escalate_underrun(mut self, on: bool) -> Self {
        self.escalate_underrun = on;
        self
    }

    /// Sets the nesting limit. Values below 1 are raised to 1.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// Sets the error log cap.
    pub fn with_max_recorded_errors(mut self, cap: usize) -> Self {
        self.max_recorded_errors = cap;
        self
    }

    /// Returns `true` if this configuration turns `error` into a fatal condition.
    pub fn escalates(&self, error: &CartonError) -> bool {
        match error {
            CartonError::BufferOverflow { .. } => self.escalate_overflow,
            CartonError::BufferUnderrun { .. } => self.escalate_underrun,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_follows_the_switches() {
        let overflow = CartonError::BufferOverflow {
            requested: 4,
            written: 0,
        };
        let underrun = CartonError::BufferUnderrun {
            requested: 4,
            read: 0,
        };
        let config = ArchiveConfig::default();
        assert!(!config.escalates(&overflow));
        let config = config.with_escalate_overflow(true);
        assert!(config.escalates(&overflow));
        assert!(!config.escalates(&underrun));
        assert_eq!(ArchiveConfig::default().with_max_depth(0).max_depth, 1);
    }
}
