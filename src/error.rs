//! Centralized error handling for Carton.
//!
//! Carton distinguishes between two ways a failure surfaces:
//!
//! 1. **Returned errors.** Low-level primitives (the adapters in [`crate::io`], the framing
//!    codec in [`crate::format`], the registry) return [`Result`] so failures propagate with
//!    `?` through user field tables and hook implementations.
//!
//! 2. **Recorded outcomes.** The archive engines never abort a whole call tree on the first
//!    problem. Every error that reaches a block boundary is recorded into the
//!    [`Results`](crate::Results) accumulator, the block is closed (on save) or skipped using
//!    its recorded size (on load), and sibling blocks continue. The caller inspects the
//!    `Results` after the top-level call returns.
//!
//! ## Fatality
//!
//! Not every error is fatal to the archive. [`CartonError::is_fatal`] classifies each variant:
//!
//! - **Fatal:** malformed framing, major version mismatches, unexpected root types, phase
//!   violations, exceeded nesting depth, bincode failures, I/O and internal errors.
//! - **Escalatable:** buffer overflow and underrun are counted but not fatal unless the
//!   [`ArchiveConfig`](crate::ArchiveConfig) escalates them.
//! - **Informational:** minor version differences, unrecognized and unloaded items, and
//!   scalar width mismatches are schema drift, reported through hooks and counters.
//!
//! ## Example
//!
//! ```rust
//! use carton::CartonError;
//!
//! fn describe(err: &CartonError) -> &'static str {
//!     match err {
//!         CartonError::MalformedMarker { .. } => "stream is corrupt",
//!         CartonError::VersionMismatchMajor { .. } => "data written by an incompatible version",
//!         e if e.is_fatal() => "fatal",
//!         _ => "recoverable",
//!     }
//! }
//! # let _ = describe(&CartonError::Internal("x".into()));
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::version::Version;

/// A specialized `Result` type for Carton operations.
pub type Result<T> = std::result::Result<T, CartonError>;

/// The structural construct a framing marker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Construct {
    /// The 16-byte stream signature.
    Signature,
    /// The 16-byte stream terminator.
    Terminator,
    /// An object block.
    Block,
    /// An array.
    Array,
    /// One array element.
    Element,
    /// A scalar, variable-length or null item.
    Item,
    /// Any entry begin marker (item, block or array).
    Entry,
}

impl fmt::Display for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Signature => "signature",
            Self::Terminator => "terminator",
            Self::Block => "block",
            Self::Array => "array",
            Self::Element => "element",
            Self::Item => "item",
            Self::Entry => "entry",
        };
        f.write_str(name)
    }
}

/// The master error enum covering every failure domain in Carton.
///
/// The type is `Clone` so that errors can be stored in [`Results`](crate::Results) and handed
/// to hooks without giving up ownership. I/O errors are wrapped in an `Arc` for that reason.
#[derive(Debug, Clone)]
pub enum CartonError {
    /// A write would exceed the buffer capacity. Only `written` of `requested` bytes fit.
    BufferOverflow {
        /// Bytes the caller asked to write.
        requested: usize,
        /// Bytes actually written.
        written: usize,
    },

    /// A read asked for more bytes than remain in the buffer or the current block.
    BufferUnderrun {
        /// Bytes the caller asked to read.
        requested: usize,
        /// Bytes actually read.
        read: usize,
    },

    /// A begin/end marker, the signature or the terminator does not match.
    ///
    /// The stream position after this point is considered unreliable.
    MalformedMarker {
        /// What the engine expected at `offset`.
        expected: Construct,
        /// Offset of the offending bytes.
        offset: usize,
        /// A short description of the mismatch.
        detail: String,
    },

    /// The major version of a saved block differs from the current code.
    VersionMismatchMajor {
        /// Name of the type being loaded.
        type_name: &'static str,
        /// Version found in the stream.
        saved: Version,
        /// Version declared by the current code.
        current: Version,
    },

    /// The minor version of a saved block differs from the current code.
    VersionMismatchMinor {
        /// Name of the type being loaded.
        type_name: &'static str,
        /// Version found in the stream.
        saved: Version,
        /// Version declared by the current code.
        current: Version,
    },

    /// An item was present in the stream but no field claimed it.
    UnrecognizedItem {
        /// Hash of the item's name.
        name_hash: u32,
    },

    /// A registered field had no matching item in the stream.
    UnloadedItem {
        /// Name of the field.
        name: String,
    },

    /// A scalar's recorded width differs from the in-memory width.
    ItemSizeMismatch {
        /// Name of the field.
        name: String,
        /// Width the current code expects.
        expected: usize,
        /// Width found in the stream.
        found: usize,
    },

    /// The root block does not belong to the type being loaded.
    UnexpectedRoot {
        /// Hash of the expected root type name.
        expected: u32,
        /// Hash found in the stream.
        found: u32,
    },

    /// A field was registered outside the phases that allow it.
    InvalidPhase {
        /// The phase the context was in.
        phase: &'static str,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// Nesting went deeper than [`ArchiveConfig::max_depth`](crate::ArchiveConfig).
    DepthExceeded {
        /// The configured limit.
        limit: usize,
    },

    /// Two distinct names registered in the same scope hash to the same value.
    NameHashCollision {
        /// The shared hash.
        hash: u32,
        /// The name registered first.
        existing: &'static str,
        /// The name that collided with it.
        incoming: &'static str,
    },

    /// Encoding or decoding an opaque value with bincode failed.
    Serialization(String),

    /// Low-level I/O failure while reading or writing an archive file.
    Io(Arc<io::Error>),

    /// Logic error inside the engine. Should not occur; please report it.
    Internal(String),
}

impl CartonError {
    /// Returns `true` if this error, when recorded, sets the fatal flag.
    ///
    /// Overflow and underrun are reported as non-fatal here; escalation is a configuration
    /// decision made by the archive that records them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedMarker { .. }
                | Self::VersionMismatchMajor { .. }
                | Self::UnexpectedRoot { .. }
                | Self::InvalidPhase { .. }
                | Self::DepthExceeded { .. }
                | Self::NameHashCollision { .. }
                | Self::Serialization(_)
                | Self::Io(_)
                | Self::Internal(_)
        )
    }

    pub(crate) fn malformed(expected: Construct, offset: usize, detail: impl Into<String>) -> Self {
        Self::MalformedMarker {
            expected,
            offset,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CartonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferOverflow { requested, written } => {
                write!(f, "Buffer overflow: wrote {written} of {requested} bytes")
            }
            Self::BufferUnderrun { requested, read } => {
                write!(f, "Buffer underrun: read {read} of {requested} bytes")
            }
            Self::MalformedMarker {
                expected,
                offset,
                detail,
            } => write!(f, "Malformed {expected} at offset {offset}: {detail}"),
            Self::VersionMismatchMajor {
                type_name,
                saved,
                current,
            } => write!(
                f,
                "Major version mismatch for {type_name}: saved {saved}, current {current}"
            ),
            Self::VersionMismatchMinor {
                type_name,
                saved,
                current,
            } => write!(
                f,
                "Minor version mismatch for {type_name}: saved {saved}, current {current}"
            ),
            Self::UnrecognizedItem { name_hash } => {
                write!(f, "Unrecognized item {name_hash:#010x}")
            }
            Self::UnloadedItem { name } => write!(f, "Unloaded item '{name}'"),
            Self::ItemSizeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "Item '{name}' has width {found} in the stream, expected {expected}"
            ),
            Self::UnexpectedRoot { expected, found } => write!(
                f,
                "Unexpected root block {found:#010x}, expected {expected:#010x}"
            ),
            Self::InvalidPhase { phase, operation } => {
                write!(f, "Cannot {operation} during phase {phase}")
            }
            Self::DepthExceeded { limit } => write!(f, "Nesting depth exceeded limit of {limit}"),
            Self::NameHashCollision {
                hash,
                existing,
                incoming,
            } => write!(
                f,
                "Names '{existing}' and '{incoming}' collide on hash {hash:#010x}"
            ),
            Self::Serialization(s) => write!(f, "Serialization Error: {s}"),
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for CartonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CartonError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
