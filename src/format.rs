//! Defines the physical binary layout of Carton archives.
//!
//! # Stream Layout
//! ```text
//! [SIGNATURE: 16]
//!   {B hash:u32 attr:u8 major:u16 minor:u16 size:u32   entries...   B}     root block
//! [TERMINATOR: 16]
//! ```
//!
//! ## Entries
//! Every named field is one entry. The begin marker selects the layout:
//! ```text
//! (I hash:u32 attr:u8 size:u32                         body         I)   scalar / bytes / null
//! {B hash:u32 attr:u8 major:u16 minor:u16 size:u32     entries...   B}   object
//! [A hash:u32 attr:u8 major:u16 minor:u16 size:u32 count:u32  <E..E>*  A]   array
//! <E attr:u8 size:u32 items:u32                        body         E>   array element
//! ```
//!
//! `size` is written as zero and backpatched once the frame is closed. It counts the bytes
//! from the first byte of the size field through the last byte of the end marker, so a reader
//! positioned right after the size field skips the whole entry with `seek(size - 4)`.
//!
//! All integers are little-endian regardless of host byte order.

use crate::error::{CartonError, Construct, Result};
use crate::io::{ReadAdapter, ReadBase, WriteAdapter, WriteBase};
use crate::item::{ItemAttr, ItemInfo, Span};
use crate::version::Version;

/// Magic bytes opening every stream.
pub const SIGNATURE: [u8; 16] = *b"\x89CARTON-BIN\r\n\x1a\n\0";

/// Magic bytes closing every stream.
pub const TERMINATOR: [u8; 16] = *b"\0\nCARTON-END\r\n\x1a\x89";

/// Length of every begin/end marker.
pub const MARKER_LEN: usize = 2;

/// Width of a backpatched size field.
pub const SIZE_LEN: usize = 4;

/// Object block begin marker.
pub const BLOCK_BEGIN: [u8; 2] = *b"{B";
/// Object block end marker.
pub const BLOCK_END: [u8; 2] = *b"B}";
/// Array begin marker.
pub const ARRAY_BEGIN: [u8; 2] = *b"[A";
/// Array end marker.
pub const ARRAY_END: [u8; 2] = *b"A]";
/// Array element begin marker.
pub const ELEM_BEGIN: [u8; 2] = *b"<E";
/// Array element end marker.
pub const ELEM_END: [u8; 2] = *b"E>";
/// Item begin marker.
pub const ITEM_BEGIN: [u8; 2] = *b"(I";
/// Item end marker.
pub const ITEM_END: [u8; 2] = *b"I)";

/// Item header: marker + hash + attr + size.
pub const ITEM_HEADER_LEN: usize = MARKER_LEN + 4 + 1 + SIZE_LEN;
/// Block header: marker + hash + attr + major + minor + size.
pub const BLOCK_HEADER_LEN: usize = MARKER_LEN + 4 + 1 + 2 + 2 + SIZE_LEN;
/// Array header: block header + count.
pub const ARRAY_HEADER_LEN: usize = BLOCK_HEADER_LEN + 4;
/// Element header: marker + attr + size + items.
pub const ELEM_HEADER_LEN: usize = MARKER_LEN + 1 + SIZE_LEN + 4;
/// Smallest possible element frame, used to bound element counts before allocating.
pub const MIN_ELEM_LEN: usize = ELEM_HEADER_LEN + MARKER_LEN;

/// The kinds of frame the format knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `{B .. B}`
    Block,
    /// `[A .. A]`
    Array,
    /// `<E .. E>`
    Element,
    /// `(I .. I)`
    Item,
}

impl FrameKind {
    /// Begin marker bytes.
    pub const fn begin(self) -> [u8; 2] {
        match self {
            Self::Block => BLOCK_BEGIN,
            Self::Array => ARRAY_BEGIN,
            Self::Element => ELEM_BEGIN,
            Self::Item => ITEM_BEGIN,
        }
    }

    /// End marker bytes.
    pub const fn end(self) -> [u8; 2] {
        match self {
            Self::Block => BLOCK_END,
            Self::Array => ARRAY_END,
            Self::Element => ELEM_END,
            Self::Item => ITEM_END,
        }
    }

    /// Offset of the size field from the begin marker.
    pub const fn size_offset(self) -> usize {
        match self {
            Self::Item => MARKER_LEN + 4 + 1,
            Self::Block | Self::Array => MARKER_LEN + 4 + 1 + 2 + 2,
            Self::Element => MARKER_LEN + 1,
        }
    }

    /// Smallest legal value of the size field.
    const fn min_size(self) -> usize {
        match self {
            Self::Item | Self::Block => SIZE_LEN + MARKER_LEN,
            Self::Array | Self::Element => SIZE_LEN + 4 + MARKER_LEN,
        }
    }

    /// Identifies an entry begin marker. Elements are not entries.
    pub fn from_entry_marker(marker: &[u8]) -> Option<Self> {
        match marker {
            m if m == ITEM_BEGIN => Some(Self::Item),
            m if m == BLOCK_BEGIN => Some(Self::Block),
            m if m == ARRAY_BEGIN => Some(Self::Array),
            _ => None,
        }
    }

    /// The construct reported in errors about this frame.
    pub const fn construct(self) -> Construct {
        match self {
            Self::Block => Construct::Block,
            Self::Array => Construct::Array,
            Self::Element => Construct::Element,
            Self::Item => Construct::Item,
        }
    }

    /// Which frame an item with `attr` is written as.
    pub const fn for_attr(attr: ItemAttr) -> Self {
        if attr.is_null() {
            Self::Item
        } else if attr.is_object() {
            Self::Block
        } else if attr.is_array() {
            Self::Array
        } else {
            Self::Item
        }
    }
}

/// Index of an open frame in the [`BinaryFormat`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

impl FrameId {
    /// Returns the raw index.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: FrameKind,
    parent: Option<FrameId>,
    start: usize,
    size_at: usize,
}

/// Write-side framing codec.
///
/// Open frames live in an arena indexed by [`FrameId`]; each records the offset of its own
/// size placeholder and the frame it is nested in. Frames close strictly innermost first.
#[derive(Debug, Default)]
pub struct BinaryFormat {
    frames: Vec<Frame>,
}

impl BinaryFormat {
    /// Creates a codec with no open frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The innermost open frame.
    pub fn current(&self) -> Option<FrameId> {
        self.frames.len().checked_sub(1).map(|i| FrameId(i as u32))
    }

    /// Parent of an open frame.
    pub fn parent(&self, id: FrameId) -> Option<FrameId> {
        self.frames.get(id.0 as usize).and_then(|f| f.parent)
    }

    /// Writes the stream signature.
    pub fn write_signature(&self, w: &mut WriteBase<'_>) -> usize {
        w.put_bytes(&SIGNATURE)
    }

    /// Writes the stream terminator.
    pub fn write_terminator(&self, w: &mut WriteBase<'_>) -> usize {
        w.put_bytes(&TERMINATOR)
    }

    fn open(&mut self, kind: FrameKind, start: usize) -> FrameId {
        let parent = self.current();
        self.frames.push(Frame {
            kind,
            parent,
            start,
            size_at: start + kind.size_offset(),
        });
        FrameId((self.frames.len() - 1) as u32)
    }

    /// Opens a scalar, variable-length or null item.
    pub fn write_item_header(&mut self, w: &mut WriteBase<'_>, item: &ItemInfo) -> FrameId {
        let id = self.open(FrameKind::Item, w.position());
        w.put_bytes(&ITEM_BEGIN);
        w.put_u32(item.name_hash());
        w.put_u8(item.attr.as_u8());
        w.put_u32(0);
        id
    }

    /// Opens an object block.
    pub fn write_block_header(
        &mut self,
        w: &mut WriteBase<'_>,
        item: &ItemInfo,
        version: Version,
    ) -> FrameId {
        let id = self.open(FrameKind::Block, w.position());
        w.put_bytes(&BLOCK_BEGIN);
        w.put_u32(item.name_hash());
        w.put_u8(item.attr.as_u8());
        w.put_u16(version.major);
        w.put_u16(version.minor);
        w.put_u32(0);
        id
    }

    /// Opens an array of `element_count` elements.
    pub fn write_array_header(
        &mut self,
        w: &mut WriteBase<'_>,
        item: &ItemInfo,
        version: Version,
        element_count: u32,
    ) -> FrameId {
        let id = self.open(FrameKind::Array, w.position());
        w.put_bytes(&ARRAY_BEGIN);
        w.put_u32(item.name_hash());
        w.put_u8(item.attr.as_u8());
        w.put_u16(version.major);
        w.put_u16(version.minor);
        w.put_u32(0);
        w.put_u32(element_count);
        id
    }

    /// Opens element `index` of the innermost array.
    pub fn write_elem_header(
        &mut self,
        w: &mut WriteBase<'_>,
        item: &ItemInfo,
        index: usize,
    ) -> Result<FrameId> {
        match self.current().map(|id| self.frames[id.0 as usize].kind) {
            Some(FrameKind::Array) => {}
            other => {
                return Err(CartonError::Internal(format!(
                    "element {index} opened inside {other:?}"
                )))
            }
        }
        let id = self.open(FrameKind::Element, w.position());
        w.put_bytes(&ELEM_BEGIN);
        w.put_u8(item.attr.as_u8());
        w.put_u32(0);
        w.put_u32(0);
        Ok(id)
    }

    /// Closes an element, backpatching its size and the number of items found inside it.
    pub fn write_elem_footer(
        &mut self,
        w: &mut WriteBase<'_>,
        id: FrameId,
        items: u32,
    ) -> Result<u32> {
        let frame = self.frames.get(id.0 as usize).copied();
        let size = self.write_footer(w, id)?;
        if let Some(frame) = frame {
            w.patch_u32(frame.size_at + SIZE_LEN, items)?;
        }
        Ok(size)
    }

    /// Closes the innermost frame: writes its end marker and backpatches its size.
    ///
    /// Returns the recorded size.
    pub fn write_footer(&mut self, w: &mut WriteBase<'_>, id: FrameId) -> Result<u32> {
        if self.current() != Some(id) {
            return Err(CartonError::Internal(format!(
                "frame {} closed out of order (innermost is {:?})",
                id.0,
                self.current()
            )));
        }
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| CartonError::Internal("no open frame".into()))?;
        w.put_bytes(&frame.kind.end());
        let size = w.position().saturating_sub(frame.size_at);
        let size = u32::try_from(size)
            .map_err(|_| CartonError::Internal(format!("frame at {} too large", frame.start)))?;
        w.patch_u32(frame.size_at, size)?;
        Ok(size)
    }
}

/// Validates the stream signature at the cursor.
pub fn read_signature(r: &mut ReadBase<'_>) -> Result<()> {
    read_magic(r, &SIGNATURE, Construct::Signature)
}

/// Validates the stream terminator at the cursor.
pub fn read_terminator(r: &mut ReadBase<'_>) -> Result<()> {
    read_magic(r, &TERMINATOR, Construct::Terminator)
}

fn read_magic(r: &mut ReadBase<'_>, magic: &[u8; 16], construct: Construct) -> Result<()> {
    let at = r.position();
    let bytes = r
        .get_bytes(magic.len())
        .map_err(|_| CartonError::malformed(construct, at, "stream truncated"))?;
    if bytes != magic {
        let bad = bytes
            .iter()
            .zip(magic.iter())
            .position(|(a, b)| a != b)
            .unwrap_or(0);
        return Err(CartonError::malformed(
            construct,
            at,
            format!("byte {bad} does not match"),
        ));
    }
    Ok(())
}

/// Returns the entry kind at the cursor without consuming anything, or `None` if the next
/// bytes are not an entry begin marker (typically the enclosing end marker).
pub fn peek_entry(r: &ReadBase<'_>) -> Option<FrameKind> {
    r.peek(MARKER_LEN).and_then(FrameKind::from_entry_marker)
}

fn read_size(r: &mut ReadBase<'_>, kind: FrameKind, start: usize) -> Result<(usize, usize)> {
    let size_at = r.position();
    let size = r.get_u32()? as usize;
    let end = size_at.checked_add(size).unwrap_or(usize::MAX);
    if size < kind.min_size() || end > r.limit() {
        return Err(CartonError::malformed(
            kind.construct(),
            start,
            format!("recorded size {size} does not fit its enclosing range"),
        ));
    }
    Ok((size_at, end))
}

fn truncated(kind: FrameKind, start: usize) -> impl FnOnce(CartonError) -> CartonError {
    move |e| match e {
        CartonError::BufferUnderrun { .. } => {
            CartonError::malformed(kind.construct(), start, "header truncated")
        }
        other => other,
    }
}

/// Reads an entry header at the cursor and leaves the cursor at the start of its body.
pub fn read_entry_header(r: &mut ReadBase<'_>) -> Result<ItemInfo> {
    let start = r.position();
    let kind = peek_entry(r).ok_or_else(|| {
        CartonError::malformed(Construct::Entry, start, "expected an entry begin marker")
    })?;
    read_header(r, kind, start).map_err(truncated(kind, start))
}

fn read_header(r: &mut ReadBase<'_>, kind: FrameKind, start: usize) -> Result<ItemInfo> {
    r.get_bytes(MARKER_LEN)?;
    let hash = r.get_u32()?;
    let attr = ItemAttr::from_byte(r.get_u8()?);
    let mut info = ItemInfo::from_hash(hash, attr);

    if matches!(kind, FrameKind::Block | FrameKind::Array) {
        let major = r.get_u16()?;
        let minor = r.get_u16()?;
        info.version = Version::new(major, minor);
    }
    let (_, end) = read_size(r, kind, start)?;
    if kind == FrameKind::Array {
        info.element_count = r.get_u32()?;
    }

    let expected_kind = FrameKind::for_attr(attr);
    if expected_kind != kind {
        return Err(CartonError::malformed(
            kind.construct(),
            start,
            format!("attributes {attr:?} do not match the frame"),
        ));
    }

    info.span = Span {
        start,
        body_start: r.position(),
        body_end: end - MARKER_LEN,
        end,
    };
    if info.span.body_start > info.span.body_end {
        return Err(CartonError::malformed(kind.construct(), start, "header overruns body"));
    }
    info.element_size = info.span.body_len() as u32;
    Ok(info)
}

/// Reads an element header at the cursor; the cursor is left at the start of its body.
///
/// `element_count` of the returned descriptor carries the number of items recorded inside.
pub fn read_elem_header(r: &mut ReadBase<'_>) -> Result<ItemInfo> {
    let start = r.position();
    let kind = FrameKind::Element;
    let inner = |r: &mut ReadBase<'_>| -> Result<ItemInfo> {
        let marker = r.get_bytes(MARKER_LEN)?;
        if marker != ELEM_BEGIN {
            return Err(CartonError::malformed(
                Construct::Element,
                start,
                "expected an element begin marker",
            ));
        }
        let attr = ItemAttr::from_byte(r.get_u8()?);
        let (_, end) = read_size(r, kind, start)?;
        let items = r.get_u32()?;
        let mut info = ItemInfo::anonymous(attr);
        info.element_count = items;
        info.span = Span {
            start,
            body_start: r.position(),
            body_end: end - MARKER_LEN,
            end,
        };
        info.element_size = info.span.body_len() as u32;
        Ok(info)
    };
    inner(r).map_err(truncated(kind, start))
}

/// Checks that the end marker of `kind` sits at `at` and leaves the cursor after it.
pub fn expect_end(r: &mut ReadBase<'_>, kind: FrameKind, at: usize) -> Result<()> {
    r.seek_to(at);
    let ok = r.get_bytes(MARKER_LEN).map(|m| m == kind.end()).unwrap_or(false);
    if !ok {
        return Err(CartonError::malformed(
            kind.construct(),
            at,
            "missing end marker",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(buf: &mut [u8]) -> usize {
        let mut w = WriteBase::new(buf);
        let mut f = BinaryFormat::new();
        f.write_signature(&mut w);
        let root = ItemInfo::new("Root", ItemAttr::OBJECT.with(ItemAttr::HAS_VERSION));
        let block = f.write_block_header(&mut w, &root, Version::new(1, 2));
        let id = ItemInfo::new("id", ItemAttr::SCALAR);
        let item = f.write_item_header(&mut w, &id);
        w.put_u32(42);
        f.write_footer(&mut w, item).unwrap();
        f.write_footer(&mut w, block).unwrap();
        f.write_terminator(&mut w);
        assert!(w.take_faults().is_empty());
        w.position()
    }

    #[test]
    fn header_lengths_match_the_layout() {
        assert_eq!(ITEM_HEADER_LEN, 11);
        assert_eq!(BLOCK_HEADER_LEN, 15);
        assert_eq!(ARRAY_HEADER_LEN, 19);
        assert_eq!(ELEM_HEADER_LEN, 11);
        assert_eq!(SIGNATURE.len(), 16);
        assert_eq!(TERMINATOR.len(), 16);
    }

    #[test]
    fn block_size_is_backpatched() {
        let mut buf = [0u8; 128];
        let len = write_sample(&mut buf);
        assert_eq!(len, 16 + BLOCK_HEADER_LEN + ITEM_HEADER_LEN + 4 + 2 + 2 + 16);

        let mut r = ReadBase::new(&buf[..len]);
        read_signature(&mut r).unwrap();
        let root = read_entry_header(&mut r).unwrap();
        assert_eq!(root.version, Version::new(1, 2));
        assert_eq!(root.name_hash(), crate::item::name_hash("Root"));
        assert_eq!(root.span.start, 16);
        assert_eq!(root.span.end, len - 16);

        let id = read_entry_header(&mut r).unwrap();
        assert_eq!(id.span.body_len(), 4);
        assert_eq!(r.get_u32().unwrap(), 42);
        expect_end(&mut r, FrameKind::Item, id.span.body_end).unwrap();
        assert_eq!(peek_entry(&r), None);
        expect_end(&mut r, FrameKind::Block, root.span.body_end).unwrap();
        read_terminator(&mut r).unwrap();
    }

    #[test]
    fn element_outside_array_is_rejected() {
        let mut buf = [0u8; 32];
        let mut w = WriteBase::new(&mut buf);
        let mut f = BinaryFormat::new();
        let info = ItemInfo::anonymous(ItemAttr::SCALAR);
        assert!(f.write_elem_header(&mut w, &info, 0).is_err());
    }

    #[test]
    fn footers_close_innermost_first() {
        let mut buf = [0u8; 64];
        let mut w = WriteBase::new(&mut buf);
        let mut f = BinaryFormat::new();
        let outer = f.write_block_header(&mut w, &ItemInfo::new("a", ItemAttr::OBJECT), Version::ZERO);
        let inner = f.write_item_header(&mut w, &ItemInfo::new("b", ItemAttr::SCALAR));
        assert_eq!(f.parent(inner), Some(outer));
        assert!(f.write_footer(&mut w, outer).is_err());
        f.write_footer(&mut w, inner).unwrap();
        f.write_footer(&mut w, outer).unwrap();
        assert_eq!(f.depth(), 0);
    }

    #[test]
    fn corrupt_terminator_is_malformed() {
        let mut buf = [0u8; 128];
        let len = write_sample(&mut buf);
        buf[len - 1] ^= 0xFF;
        let mut r = ReadBase::new(&buf[..len]);
        r.seek_to(len - 16);
        let err = read_terminator(&mut r).unwrap_err();
        assert!(matches!(
            err,
            CartonError::MalformedMarker {
                expected: Construct::Terminator,
                ..
            }
        ));
    }

    #[test]
    fn oversized_recorded_size_is_malformed() {
        let mut buf = [0u8; 128];
        let len = write_sample(&mut buf);
        // Size field of the root block.
        let size_at = 16 + BLOCK_HEADER_LEN - SIZE_LEN;
        buf[size_at..size_at + 4].copy_from_slice(&10_000u32.to_le_bytes());
        let mut r = ReadBase::new(&buf[..len]);
        read_signature(&mut r).unwrap();
        assert!(read_entry_header(&mut r).is_err());
    }
}
