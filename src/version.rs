//! Two-part block versions and the compatibility policy built on them.

use std::fmt;

/// Multiplier folding `major.minor` into a single ordered integer.
pub const FIGURE: u64 = 1_000_000;

/// A composite `major.minor` version attached to every saved block.
///
/// Ordering follows [`Version::value`], so `1.9 < 2.0 < 2.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Version {
    /// Incompatible layout generation.
    pub major: u16,
    /// Compatible revision within a major generation.
    pub minor: u16,
}

/// How one version relates to another.
///
/// `MinorLt` / `MinorGt` mean the major parts are equal and only the minor part differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionOrdering {
    /// Identical versions.
    Eq,
    /// Strictly older major version.
    Lt,
    /// Strictly newer major version.
    Gt,
    /// Same major, older minor.
    MinorLt,
    /// Same major, newer minor.
    MinorGt,
}

impl VersionOrdering {
    /// Returns `true` if data can be loaded without an explicit opt-in.
    pub fn is_compatible(self) -> bool {
        matches!(self, Self::Eq | Self::MinorLt | Self::MinorGt)
    }

    /// Returns `true` for the minor-only differences.
    pub fn is_minor(self) -> bool {
        matches!(self, Self::MinorLt | Self::MinorGt)
    }
}

impl Version {
    /// The version of types that carry no meaningful version (scalars, strings).
    pub const ZERO: Version = Version::new(0, 0);

    /// Creates a version.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Returns `major * FIGURE + minor`.
    pub const fn value(&self) -> u64 {
        self.major as u64 * FIGURE + self.minor as u64
    }

    /// Rebuilds a version from its folded value. Returns `None` if either part overflows.
    pub fn from_value(value: u64) -> Option<Self> {
        let major = u16::try_from(value / FIGURE).ok()?;
        let minor = u16::try_from(value % FIGURE).ok()?;
        Some(Self { major, minor })
    }

    /// Describes `self` relative to `other`.
    ///
    /// On load the engine evaluates `current.compare(saved)`: `MinorGt` means the running code
    /// is a newer revision of the same layout generation than the data.
    pub fn compare(&self, other: Version) -> VersionOrdering {
        use std::cmp::Ordering;

        match (self.major.cmp(&other.major), self.minor.cmp(&other.minor)) {
            (Ordering::Less, _) => VersionOrdering::Lt,
            (Ordering::Greater, _) => VersionOrdering::Gt,
            (Ordering::Equal, Ordering::Less) => VersionOrdering::MinorLt,
            (Ordering::Equal, Ordering::Greater) => VersionOrdering::MinorGt,
            (Ordering::Equal, Ordering::Equal) => VersionOrdering::Eq,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
