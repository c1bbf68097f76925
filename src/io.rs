//! Bounded buffer cursors and the adapters layered on them.
//!
//! [`WriteBase`] and [`ReadBase`] own the caller's byte buffer and the cursor into it. They
//! never grow the buffer and never touch bytes outside it: a transfer that does not fully fit
//! moves only the bytes that do and reports the actual count.
//!
//! The [`WriteAdapter`] and [`ReadAdapter`] traits add fixed-width little-endian helpers on
//! top of the raw transfers.

use crate::error::{CartonError, Result};
use crate::item::ItemInfo;

/// Outcome of a cursor move.
///
/// `applied` differs from `requested` when the move was clamped to the buffer bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seek {
    /// Displacement the caller asked for.
    pub requested: isize,
    /// Displacement actually applied.
    pub applied: isize,
}

impl Seek {
    /// Returns `true` if the move was truncated.
    pub fn was_clamped(&self) -> bool {
        self.requested != self.applied
    }
}

fn clamp_seek(pos: usize, max: usize, delta: isize) -> (usize, Seek) {
    let target = if delta < 0 {
        pos.saturating_sub(delta.unsigned_abs())
    } else {
        pos.saturating_add(delta as usize).min(max)
    };
    let applied = target as isize - pos as isize;
    (
        target,
        Seek {
            requested: delta,
            applied,
        },
    )
}

/// The destination side of an archive: caller buffer plus write cursor.
#[derive(Debug)]
pub struct WriteBase<'a> {
    buf: &'a mut [u8],
    pos: usize,
    high_water: usize,
    faults: Vec<CartonError>,
}

impl<'a> WriteBase<'a> {
    /// Binds a cursor to the start of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            high_water: 0,
            faults: Vec::new(),
        }
    }

    /// Writes as much of `bytes` as fits and returns the count.
    ///
    /// A short write is also queued as a [`CartonError::BufferOverflow`] fault, which the
    /// archive drains into its results.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remain());
        self.buf[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
        self.pos += n;
        self.high_water = self.high_water.max(self.pos);
        if n < bytes.len() {
            self.faults.push(CartonError::BufferOverflow {
                requested: bytes.len(),
                written: n,
            });
        }
        n
    }

    /// Moves the cursor by `delta`, clamped to `[0, capacity]`.
    pub fn seek(&mut self, delta: isize) -> Seek {
        let (target, seek) = clamp_seek(self.pos, self.buf.len(), delta);
        self.pos = target;
        seek
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Buffer size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes left after the cursor.
    pub fn remain(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns `true` if the cursor sits at the end of the buffer.
    pub fn is_full(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// The bytes written so far, up to the furthest cursor position reached.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.high_water]
    }

    /// Furthest cursor position reached.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Takes the queued short-write faults.
    pub fn take_faults(&mut self) -> Vec<CartonError> {
        std::mem::take(&mut self.faults)
    }
}

/// The source side of an archive: caller buffer, read cursor and item directory.
///
/// Reads are bounded by a movable `limit` (the end of the block being parsed) in addition to
/// the buffer length, so a nested block can never read into its siblings.
#[derive(Debug)]
pub struct ReadBase<'a> {
    buf: &'a [u8],
    pos: usize,
    limit: usize,
    directory: Vec<ItemInfo>,
}

impl<'a> ReadBase<'a> {
    /// Binds a cursor to the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            limit: buf.len(),
            directory: Vec::new(),
        }
    }

    /// Reads up to `out.len()` bytes and returns the count.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.remain());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Borrows the next `len` bytes without moving the cursor.
    pub fn peek(&self, len: usize) -> Option<&'a [u8]> {
        let buf: &'a [u8] = self.buf;
        if len > self.remain() {
            return None;
        }
        buf.get(self.pos..self.pos + len)
    }

    /// Borrows and consumes the next `len` bytes, or fails without moving.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.peek(len).ok_or(CartonError::BufferUnderrun {
            requested: len,
            read: self.remain(),
        })?;
        self.pos += len;
        Ok(bytes)
    }

    /// Moves the cursor by `delta`, clamped to `[0, len]`.
    pub fn seek(&mut self, delta: isize) -> Seek {
        let (target, seek) = clamp_seek(self.pos, self.buf.len(), delta);
        self.pos = target;
        seek
    }

    /// Moves the cursor to an absolute offset, clamped to the buffer.
    pub fn seek_to(&mut self, offset: usize) -> Seek {
        let delta = offset as isize - self.pos as isize;
        self.seek(delta)
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Buffer size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes readable before the limit.
    pub fn remain(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    /// Returns `true` if the cursor sits at the end of the buffer.
    pub fn is_full(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Current read limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Replaces the read limit and returns the previous one. Clamped to the buffer length.
    pub fn set_limit(&mut self, limit: usize) -> usize {
        std::mem::replace(&mut self.limit, limit.min(self.buf.len()))
    }

    /// All item descriptors discovered so far, outermost block first.
    pub fn directory(&self) -> &[ItemInfo] {
        &self.directory
    }

    /// Appends a discovered item and returns its index.
    pub fn push_item(&mut self, info: ItemInfo) -> usize {
        self.directory.push(info);
        self.directory.len() - 1
    }

    /// Drops the entries of a finished block.
    pub fn truncate_directory(&mut self, len: usize) {
        self.directory.truncate(len);
    }

    /// Finds an item by name hash among the entries from `from` onwards.
    pub fn find_item(&self, from: usize, name_hash: u32) -> Option<usize> {
        self.directory
            .get(from..)?
            .iter()
            .position(|item| item.name_hash() == name_hash)
            .map(|i| i + from)
    }
}

/// Fixed-width little-endian writers. Every method returns the bytes actually written.
pub trait WriteAdapter {
    /// Raw transfer.
    fn put_bytes(&mut self, bytes: &[u8]) -> usize;

    /// Writes one byte.
    fn put_u8(&mut self, v: u8) -> usize {
        self.put_bytes(&[v])
    }

    /// Writes a little-endian `u16`.
    fn put_u16(&mut self, v: u16) -> usize {
        self.put_bytes(&v.to_le_bytes())
    }

    /// Writes a little-endian `u32`.
    fn put_u32(&mut self, v: u32) -> usize {
        self.put_bytes(&v.to_le_bytes())
    }

    /// Overwrites a previously written `u32` at `offset`, then returns to the current position.
    fn patch_u32(&mut self, offset: usize, v: u32) -> Result<()>;
}

impl WriteAdapter for WriteBase<'_> {
    fn put_bytes(&mut self, bytes: &[u8]) -> usize {
        self.write(bytes)
    }

    fn patch_u32(&mut self, offset: usize, v: u32) -> Result<()> {
        let resume = self.pos;
        if offset + 4 > resume {
            // The placeholder itself never made it into the buffer.
            return Err(CartonError::BufferOverflow {
                requested: 4,
                written: 0,
            });
        }
        let back = self.seek(offset as isize - resume as isize);
        if back.was_clamped() {
            return Err(CartonError::Internal(format!(
                "backpatch seek to {offset} clamped"
            )));
        }
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
        let forward = self.seek(resume as isize - self.pos as isize);
        if forward.was_clamped() {
            return Err(CartonError::Internal(format!(
                "resume seek to {resume} clamped"
            )));
        }
        Ok(())
    }
}

/// Fixed-width little-endian readers. Short reads fail with [`CartonError::BufferUnderrun`]
/// and leave the cursor where it was.
pub trait ReadAdapter {
    /// Borrows and consumes exactly `len` bytes.
    fn get_bytes(&mut self, len: usize) -> Result<&[u8]>;

    /// Reads one byte.
    fn get_u8(&mut self) -> Result<u8> {
        Ok(self.get_bytes(1)?[0])
    }

    /// Reads a little-endian `u16`.
    fn get_u16(&mut self) -> Result<u16> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.get_bytes(2)?);
        Ok(u16::from_le_bytes(raw))
    }

    /// Reads a little-endian `u32`.
    fn get_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.get_bytes(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    /// Reads exactly `N` bytes into an array.
    fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.get_bytes(N)?);
        Ok(raw)
    }
}

impl ReadAdapter for ReadBase<'_> {
    fn get_bytes(&mut self, len: usize) -> Result<&[u8]> {
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemAttr;

    #[test]
    fn short_write_stops_at_capacity() {
        let mut buf = [0u8; 6];
        let mut w = WriteBase::new(&mut buf);
        assert_eq!(w.put_u32(0xAABB_CCDD), 4);
        assert_eq!(w.put_u32(0x1122_3344), 2);
        assert!(w.is_full());
        assert_eq!(w.position(), 6);
        let faults = w.take_faults();
        assert!(matches!(
            faults.as_slice(),
            [CartonError::BufferOverflow {
                requested: 4,
                written: 2
            }]
        ));
        assert_eq!(buf, [0xDD, 0xCC, 0xBB, 0xAA, 0x44, 0x33]);
    }

    #[test]
    fn seek_reports_clamping() {
        let mut buf = [0u8; 8];
        let mut w = WriteBase::new(&mut buf);
        w.put_u16(7);
        let s = w.seek(-5);
        assert_eq!(s.applied, -2);
        assert!(s.was_clamped());
        let s = w.seek(100);
        assert_eq!(s.applied, 8);
        assert!(w.is_full());
        let s = w.seek(-3);
        assert!(!s.was_clamped());
        assert_eq!(w.position(), 5);
    }

    #[test]
    fn patch_rewrites_and_resumes() {
        let mut buf = [0u8; 12];
        let mut w = WriteBase::new(&mut buf);
        w.put_u16(1);
        let at = w.position();
        w.put_u32(0);
        w.put_u32(0xFFFF_FFFF);
        w.patch_u32(at, 99).unwrap();
        assert_eq!(w.position(), 10);
        assert_eq!(&w.written()[2..6], &99u32.to_le_bytes());
        assert!(w.patch_u32(9, 1).is_err(), "placeholder past the cursor");
    }

    #[test]
    fn reads_respect_the_limit() {
        let data = [1u8, 0, 2, 0, 0, 0, 9, 9];
        let mut r = ReadBase::new(&data);
        r.set_limit(6);
        assert_eq!(r.get_u16().unwrap(), 1);
        assert_eq!(r.get_u32().unwrap(), 2);
        let err = r.get_u8().unwrap_err();
        assert!(matches!(err, CartonError::BufferUnderrun { requested: 1, read: 0 }));
        assert_eq!(r.position(), 6);

        let prev = r.set_limit(8);
        assert_eq!(prev, 6);
        let mut out = [0u8; 4];
        assert_eq!(r.read(&mut out), 2);
        assert!(r.is_full());
    }

    #[test]
    fn directory_lookup_is_scoped() {
        let data: [u8; 0] = [];
        let mut r = ReadBase::new(&data);
        r.push_item(ItemInfo::new("a", ItemAttr::SCALAR));
        let mark = r.directory().len();
        r.push_item(ItemInfo::new("b", ItemAttr::SCALAR));
        r.push_item(ItemInfo::new("a", ItemAttr::SCALAR));
        assert_eq!(r.find_item(mark, crate::item::name_hash("a")), Some(2));
        assert_eq!(r.find_item(0, crate::item::name_hash("a")), Some(0));
        r.truncate_directory(mark);
        assert_eq!(r.find_item(mark, crate::item::name_hash("b")), None);
    }
}
