//! Per-field descriptors: attribute bits, name hashing and [`ItemInfo`].

use std::borrow::Cow;
use std::fmt;
use std::hash::Hasher;

use twox_hash::XxHash32;

use crate::version::Version;

/// Computes the 32-bit lookup key of a field or type name.
///
/// xxHash32 with seed 0 over the UTF-8 bytes. The empty name hashes to `0` so anonymous
/// entries (array elements) are easy to recognize in dumps.
pub fn name_hash(name: &str) -> u32 {
    if name.is_empty() {
        return 0;
    }
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(name.as_bytes());
    hasher.finish() as u32
}

/// Attribute bits stored in the single attribute byte of every frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ItemAttr(u8);

impl ItemAttr {
    /// No bits: a fixed-width scalar.
    pub const SCALAR: ItemAttr = ItemAttr(0);
    /// The item is a nested object (framed as a block).
    pub const OBJECT: ItemAttr = ItemAttr(0b0000_0001);
    /// The item is an array (framed as an array).
    pub const ARRAY: ItemAttr = ItemAttr(0b0000_0010);
    /// The item is optional.
    pub const POINTER: ItemAttr = ItemAttr(0b0000_0100);
    /// The optional item is absent. Only meaningful with [`ItemAttr::POINTER`].
    pub const NULL: ItemAttr = ItemAttr(0b0000_1000);
    /// The body is length-prefixed.
    pub const VARIABLE_LENGTH: ItemAttr = ItemAttr(0b0001_0000);
    /// The frame carries a meaningful version.
    pub const HAS_VERSION: ItemAttr = ItemAttr(0b0010_0000);

    const KIND_MASK: u8 = 0b0001_0011;
    const KNOWN_MASK: u8 = 0b0011_1111;

    /// Decodes an attribute byte.
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte.
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Bitwise union.
    pub const fn with(self, other: ItemAttr) -> Self {
        Self(self.0 | other.0)
    }

    /// Clears the bits of `other`.
    pub const fn without(self, other: ItemAttr) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns `true` if every bit of `other` is set.
    pub const fn contains(self, other: ItemAttr) -> bool {
        self.0 & other.0 == other.0
    }

    /// Only the bits that decide framing and body layout.
    pub const fn kind(self) -> ItemAttr {
        Self(self.0 & Self::KIND_MASK)
    }

    /// Returns `true` if the byte has bits this version does not know.
    pub const fn has_unknown_bits(self) -> bool {
        self.0 & !Self::KNOWN_MASK != 0
    }

    /// Object block.
    pub const fn is_object(self) -> bool {
        self.contains(Self::OBJECT)
    }

    /// Array.
    pub const fn is_array(self) -> bool {
        self.contains(Self::ARRAY)
    }

    /// Optional value.
    pub const fn is_pointer(self) -> bool {
        self.contains(Self::POINTER)
    }

    /// Absent optional value.
    pub const fn is_null(self) -> bool {
        self.contains(Self::POINTER) && self.contains(Self::NULL)
    }

    /// Length-prefixed body.
    pub const fn is_variable_length(self) -> bool {
        self.contains(Self::VARIABLE_LENGTH)
    }

    /// Version recorded in the frame is meaningful.
    pub const fn has_version(self) -> bool {
        self.contains(Self::HAS_VERSION)
    }

    /// Fixed-width scalar.
    pub const fn is_scalar(self) -> bool {
        self.kind().0 == 0
    }
}

impl fmt::Debug for ItemAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_object() {
            parts.push("OBJECT");
        }
        if self.is_array() {
            parts.push("ARRAY");
        }
        if self.is_variable_length() {
            parts.push("VARIABLE_LENGTH");
        }
        if self.is_scalar() {
            parts.push("SCALAR");
        }
        if self.is_pointer() {
            parts.push("POINTER");
        }
        if self.contains(Self::NULL) {
            parts.push("NULL");
        }
        if self.has_version() {
            parts.push("HAS_VERSION");
        }
        write!(f, "ItemAttr({})", parts.join("|"))
    }
}

/// Where an entry sits in the stream.
///
/// `start` is the first byte of the begin marker, `body` spans the payload between the header
/// and the end marker, and `end` is one past the end marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Offset of the begin marker.
    pub start: usize,
    /// First byte of the body.
    pub body_start: usize,
    /// Offset of the end marker.
    pub body_end: usize,
    /// One past the end marker.
    pub end: usize,
}

impl Span {
    /// Length of the body in bytes.
    pub fn body_len(&self) -> usize {
        self.body_end.saturating_sub(self.body_start)
    }
}

/// Descriptor of one named field, on either side of the stream.
///
/// On save it is built from the field name and the value's attributes. On load it is built
/// from an entry header and records where the entry lives in the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    name: Cow<'static, str>,
    name_hash: u32,
    /// Attribute bits.
    pub attr: ItemAttr,
    /// Version recorded for objects and arrays; [`Version::ZERO`] otherwise.
    pub version: Version,
    /// Number of elements (arrays), `1` for everything else.
    pub element_count: u32,
    /// Width of one element in bytes for scalars, body length otherwise.
    pub element_size: u32,
    /// Stream location. Zeroed on the save side until the header is written.
    pub span: Span,
}

impl ItemInfo {
    /// Creates a descriptor for a named field. The hash is computed here, once.
    pub fn new(name: impl Into<Cow<'static, str>>, attr: ItemAttr) -> Self {
        let name = name.into();
        let name_hash = name_hash(&name);
        Self {
            name,
            name_hash,
            attr,
            version: Version::ZERO,
            element_count: 1,
            element_size: 0,
            span: Span::default(),
        }
    }

    /// Creates a descriptor for an item only known by its hash (read side).
    pub fn from_hash(name_hash: u32, attr: ItemAttr) -> Self {
        Self {
            name: Cow::Borrowed(""),
            name_hash,
            attr,
            version: Version::ZERO,
            element_count: 1,
            element_size: 0,
            span: Span::default(),
        }
    }

    /// An anonymous descriptor, used for array elements.
    pub fn anonymous(attr: ItemAttr) -> Self {
        Self::from_hash(0, attr)
    }

    /// Sets the version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Sets the element count and size.
    pub fn with_elements(mut self, count: u32, size: u32) -> Self {
        self.element_count = count;
        self.element_size = size;
        self
    }

    /// The field name. Empty when only the hash is known.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The immutable lookup key.
    pub fn name_hash(&self) -> u32 {
        self.name_hash
    }

    /// Attaches a resolved name without touching the hash.
    pub(crate) fn set_resolved_name(&mut self, name: &'static str) {
        self.name = Cow::Borrowed(name);
    }

    /// The name if known, otherwise the hash in hex.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{:#010x}", self.name_hash)
        } else {
            self.name.to_string()
        }
    }
}
