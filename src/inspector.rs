//! Tools for inspecting the physical structure of Carton streams.
//! Useful for debugging schema drift and verifying backpatched sizes.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::api;
use crate::config::DEFAULT_MAX_DEPTH;
use crate::error::{CartonError, Construct, Result};
use crate::format::{self, FrameKind};
use crate::io::{ReadAdapter, ReadBase};
use crate::item::ItemInfo;
use crate::registry::Registry;

/// A structural report of a Carton stream.
#[derive(Debug, Serialize)]
pub struct DebugReport {
    /// Total length of the inspected bytes.
    pub stream_len: u64,
    /// Offset one past the terminator.
    pub stream_end: u64,
    /// The root block and everything nested in it.
    pub root: EntryReport,
}

/// One frame of the stream.
#[derive(Debug, Serialize)]
pub struct EntryReport {
    /// `"block"`, `"array"`, `"element"` or `"item"`.
    pub kind: &'static str,
    /// Offset of the begin marker.
    pub offset: u64,
    /// Name hash (0 for elements and anonymous arrays).
    pub name_hash: u32,
    /// Name resolved through the registry.
    pub name: Option<&'static str>,
    /// Raw attribute byte.
    pub attr: u8,
    /// Attribute bits, human readable.
    pub flags: String,
    /// `major.minor` for blocks and arrays.
    pub version: Option<String>,
    /// Value of the size field, verified against the span of the frame.
    pub recorded_size: u32,
    /// Body length in bytes.
    pub body_len: u64,
    /// Element count (arrays) or recorded item count (elements).
    pub count: Option<u32>,
    /// Nested frames.
    pub children: Vec<EntryReport>,
}

/// The Carton inspector.
#[derive(Debug)]
pub struct Inspector;

impl Inspector {
    /// Walks `bytes` without a schema and returns its frame tree.
    ///
    /// Fails on the first structural inconsistency: bad signature or terminator, unknown
    /// markers, or a recorded size that does not land exactly on the matching end marker.
    pub fn inspect(bytes: &[u8], registry: &Registry) -> Result<DebugReport> {
        let mut r = ReadBase::new(bytes);
        format::read_signature(&mut r)?;
        let root_info = format::read_entry_header(&mut r)?;
        let root = Self::walk_entry(&mut r, registry, &root_info, 0)?;
        format::read_terminator(&mut r)?;
        Ok(DebugReport {
            stream_len: bytes.len() as u64,
            stream_end: r.position() as u64,
            root,
        })
    }

    /// Memory-maps a file and inspects its contents.
    pub fn inspect_file<P: AsRef<Path>>(path: P, registry: &Registry) -> Result<DebugReport> {
        api::with_mapped_file(path.as_ref(), |bytes| Self::inspect(bytes, registry))?
    }

    fn walk_entry(
        r: &mut ReadBase<'_>,
        registry: &Registry,
        info: &ItemInfo,
        depth: usize,
    ) -> Result<EntryReport> {
        if depth >= DEFAULT_MAX_DEPTH {
            return Err(CartonError::DepthExceeded {
                limit: DEFAULT_MAX_DEPTH,
            });
        }
        let kind = FrameKind::for_attr(info.attr);
        let prev = r.set_limit(info.span.body_end);
        let walked = match kind {
            FrameKind::Block => Self::walk_entries(r, registry, info, depth),
            FrameKind::Array => Self::walk_elements(r, registry, info, depth),
            _ => Self::check_item_body(r, info).map(|()| Vec::new()),
        };
        r.set_limit(prev);
        let children = walked?;
        format::expect_end(r, kind, info.span.body_end)?;

        let (kind_name, count) = match kind {
            FrameKind::Block => ("block", None),
            FrameKind::Array => ("array", Some(info.element_count)),
            _ => ("item", None),
        };
        let has_version = matches!(kind, FrameKind::Block | FrameKind::Array);
        Ok(EntryReport {
            kind: kind_name,
            offset: info.span.start as u64,
            name_hash: info.name_hash(),
            name: registry.resolve(info.name_hash()),
            attr: info.attr.as_u8(),
            flags: format!("{:?}", info.attr),
            version: has_version.then(|| info.version.to_string()),
            recorded_size: recorded_size(kind, info),
            body_len: info.span.body_len() as u64,
            count,
            children,
        })
    }

    fn walk_entries(
        r: &mut ReadBase<'_>,
        registry: &Registry,
        info: &ItemInfo,
        depth: usize,
    ) -> Result<Vec<EntryReport>> {
        r.seek_to(info.span.body_start);
        let mut children = Vec::new();
        while format::peek_entry(r).is_some() {
            let child = format::read_entry_header(r)?;
            children.push(Self::walk_entry(r, registry, &child, depth + 1)?);
        }
        if r.position() != info.span.body_end {
            return Err(CartonError::malformed(
                Construct::Entry,
                r.position(),
                "entries do not fill the recorded size",
            ));
        }
        Ok(children)
    }

    fn walk_elements(
        r: &mut ReadBase<'_>,
        registry: &Registry,
        info: &ItemInfo,
        depth: usize,
    ) -> Result<Vec<EntryReport>> {
        r.seek_to(info.span.body_start);
        let mut children = Vec::with_capacity(info.element_count.min(1024) as usize);
        for _ in 0..info.element_count {
            let elem = format::read_elem_header(r)?;
            let prev = r.set_limit(elem.span.body_end);
            let walked = if elem.attr.is_null() {
                Ok(Vec::new())
            } else {
                match FrameKind::for_attr(elem.attr) {
                    FrameKind::Block => Self::walk_entries(r, registry, &elem, depth + 1),
                    FrameKind::Array => format::read_entry_header(r)
                        .and_then(|inner| Self::walk_entry(r, registry, &inner, depth + 1))
                        .map(|inner| vec![inner]),
                    _ => Self::check_item_body(r, &elem).map(|()| Vec::new()),
                }
            };
            r.set_limit(prev);
            let nested = walked?;
            format::expect_end(r, FrameKind::Element, elem.span.body_end)?;
            children.push(EntryReport {
                kind: "element",
                offset: elem.span.start as u64,
                name_hash: 0,
                name: None,
                attr: elem.attr.as_u8(),
                flags: format!("{:?}", elem.attr),
                version: None,
                recorded_size: recorded_size(FrameKind::Element, &elem),
                body_len: elem.span.body_len() as u64,
                count: Some(elem.element_count),
                children: nested,
            });
        }
        if r.position() != info.span.body_end {
            return Err(CartonError::malformed(
                Construct::Array,
                r.position(),
                "elements do not fill the recorded size",
            ));
        }
        Ok(children)
    }

    fn check_item_body(r: &mut ReadBase<'_>, info: &ItemInfo) -> Result<()> {
        r.seek_to(info.span.body_start);
        if info.attr.is_variable_length() && !info.attr.is_null() {
            let len = r.get_u32()? as usize;
            if len + 4 != info.span.body_len() {
                return Err(CartonError::malformed(
                    Construct::Item,
                    info.span.start,
                    format!("length prefix {len} does not match body of {}", info.span.body_len()),
                ));
            }
        }
        r.seek_to(info.span.body_end);
        Ok(())
    }
}

fn recorded_size(kind: FrameKind, info: &ItemInfo) -> u32 {
    (info.span.end - (info.span.start + kind.size_offset())) as u32
}

impl fmt::Display for DebugReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== CARTON INSPECTOR REPORT ===")?;
        writeln!(f, "Stream Length:  {}", self.stream_len)?;
        writeln!(f, "Terminator End: {}", self.stream_end)?;
        writeln!(f, "\n[FRAME LAYOUT]")?;
        self.root.fmt_recursive(f, "", true)
    }
}

impl EntryReport {
    /// Visits this frame and every nested frame, depth first.
    pub fn walk<'r>(&'r self, visit: &mut dyn FnMut(&'r EntryReport)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    fn fmt_recursive(&self, f: &mut fmt::Formatter<'_>, prefix: &str, is_last: bool) -> fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        let label = match self.name {
            Some(name) => name.to_string(),
            None if self.name_hash == 0 => "-".to_string(),
            None => format!("{:#010x}", self.name_hash),
        };
        let version = self
            .version
            .as_deref()
            .map(|v| format!(" v{v}"))
            .unwrap_or_default();
        let count = self.count.map(|c| format!(" x{c}")).unwrap_or_default();

        writeln!(
            f,
            "{prefix}{connector}[{}] {label}{version}{count} | Size: {}b | {}",
            self.kind, self.recorded_size, self.flags
        )?;

        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i + 1 == self.children.len();
            child.fmt_recursive(f, &format!("{prefix}{child_prefix}"), is_last_child)?;
        }
        Ok(())
    }
}
