//! The outcome accumulator of one save or load call tree.

use crate::error::CartonError;

/// Counters and flags collected while saving or loading.
///
/// Every nesting level accumulates into its own `Results`, which is merged into the parent's
/// with [`Results::add`] when the level closes. The top-level call returns the merged value.
#[derive(Debug, Clone, Default)]
pub struct Results {
    /// Set once any fatal condition was recorded anywhere in the tree.
    pub has_fatal_error: bool,
    /// Items (fields and elements) written or read.
    pub items: u64,
    /// Object blocks written or read.
    pub blocks: u64,
    /// Arrays written or read.
    pub arrays: u64,
    /// Array elements written or read.
    pub elements: u64,
    /// Bytes transferred through the buffer, framing included.
    pub bytes: u64,
    /// Short writes.
    pub overflows: u64,
    /// Short reads.
    pub underruns: u64,
    /// Items found in the stream that no field claimed.
    pub unrecognized_items: u64,
    /// Fields that had no item in the stream.
    pub unloaded_items: u64,
    /// Items claimed through a delegate retry.
    pub delegated_items: u64,
    /// Blocks whose minor version differs from the current code.
    pub minor_version_mismatches: u64,
    /// Blocks whose major version differs from the current code.
    pub major_version_mismatches: u64,
    /// Scalars whose recorded width did not match.
    pub size_mismatches: u64,
    /// Errors recorded so far, capped by `ArchiveConfig::max_recorded_errors`.
    pub errors: Vec<CartonError>,
    /// Errors dropped because the cap was reached.
    pub dropped_errors: u64,
}

impl Results {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing went wrong at all, informational drift included.
    pub fn is_clean(&self) -> bool {
        !self.has_fatal_error
            && self.overflows == 0
            && self.underruns == 0
            && self.unrecognized_items == 0
            && self.unloaded_items == 0
            && self.size_mismatches == 0
            && self.errors.is_empty()
    }

    /// Returns `true` if no fatal condition was recorded.
    pub fn is_ok(&self) -> bool {
        !self.has_fatal_error
    }

    /// The first recorded fatal error, if any.
    pub fn first_fatal(&self) -> Option<&CartonError> {
        self.errors.iter().find(|e| e.is_fatal())
    }

    /// Returns `true` if an error matching `pred` was recorded.
    pub fn any_error(&self, pred: impl Fn(&CartonError) -> bool) -> bool {
        self.errors.iter().any(pred)
    }

    /// Merges `other` into `self`.
    pub fn add(&mut self, other: Results) {
        self.has_fatal_error |= other.has_fatal_error;
        self.items += other.items;
        self.blocks += other.blocks;
        self.arrays += other.arrays;
        self.elements += other.elements;
        self.bytes += other.bytes;
        self.overflows += other.overflows;
        self.underruns += other.underruns;
        self.unrecognized_items += other.unrecognized_items;
        self.unloaded_items += other.unloaded_items;
        self.delegated_items += other.delegated_items;
        self.minor_version_mismatches += other.minor_version_mismatches;
        self.major_version_mismatches += other.major_version_mismatches;
        self.size_mismatches += other.size_mismatches;
        self.errors.extend(other.errors);
        self.dropped_errors += other.dropped_errors;
    }

    /// Records an error, updating the matching counter and the fatal flag.
    ///
    /// `escalate` forces the fatal flag for conditions that are not fatal on their own.
    pub(crate) fn record(&mut self, error: CartonError, escalate: bool, cap: usize) {
        match &error {
            CartonError::BufferOverflow { .. } => self.overflows += 1,
            CartonError::BufferUnderrun { .. } => self.underruns += 1,
            CartonError::UnrecognizedItem { .. } => self.unrecognized_items += 1,
            CartonError::UnloadedItem { .. } => self.unloaded_items += 1,
            CartonError::ItemSizeMismatch { .. } => self.size_mismatches += 1,
            CartonError::VersionMismatchMinor { .. } => self.minor_version_mismatches += 1,
            CartonError::VersionMismatchMajor { .. } => self.major_version_mismatches += 1,
            _ => {}
        }
        if error.is_fatal() || escalate {
            self.has_fatal_error = true;
        }
        if self.errors.len() < cap {
            self.errors.push(error);
        } else {
            self.dropped_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[test]
    fn add_rolls_child_results_up() {
        let mut parent = Results::new();
        parent.items = 2;
        parent.bytes = 10;

        let mut child = Results::new();
        child.items = 3;
        child.bytes = 7;
        child.record(CartonError::UnloadedItem { name: "tag".into() }, false, 8);

        parent.add(child);
        assert_eq!(parent.items, 5);
        assert_eq!(parent.bytes, 17);
        assert_eq!(parent.unloaded_items, 1);
        assert!(parent.is_ok());
        assert!(!parent.is_clean());
    }

    #[test]
    fn fatal_flag_sticks_through_merges() {
        let mut child = Results::new();
        child.record(
            CartonError::VersionMismatchMajor {
                type_name: "T",
                saved: Version::new(2, 0),
                current: Version::new(1, 0),
            },
            false,
            8,
        );
        let mut parent = Results::new();
        parent.add(child);
        assert!(parent.has_fatal_error);
        assert_eq!(parent.major_version_mismatches, 1);
        assert!(matches!(
            parent.first_fatal(),
            Some(CartonError::VersionMismatchMajor { .. })
        ));
    }

    #[test]
    fn escalation_and_cap() {
        let mut results = Results::new();
        for _ in 0..3 {
            results.record(
                CartonError::BufferOverflow {
                    requested: 4,
                    written: 0,
                },
                true,
                2,
            );
        }
        assert!(results.has_fatal_error);
        assert_eq!(results.overflows, 3);
        assert_eq!(results.errors.len(), 2);
        assert_eq!(results.dropped_errors, 1);
    }
}
