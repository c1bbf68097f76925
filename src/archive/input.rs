//! The load engine.
//!
//! [`InputArchive`] never trusts positional order. For every object block it first scans the
//! entries into the directory using their recorded sizes, then lets the type's field table
//! claim entries by name hash. Whatever is left on either side is reported instead of failing
//! the load.

use tracing::{debug, error, warn};

use crate::archive::LoadPhase;
use crate::config::ArchiveConfig;
use crate::error::{CartonError, Construct, Result};
use crate::format::{self, FrameKind, MIN_ELEM_LEN};
use crate::io::{ReadAdapter, ReadBase};
use crate::item::{name_hash, ItemInfo};
use crate::registry::Registry;
use crate::results::Results;
use crate::version::{Version, VersionOrdering};
use crate::visitor::{Archivable, Distribution, Field};

#[derive(Debug, Clone, Copy)]
struct Matched {
    index: usize,
    field: &'static str,
    current: Version,
    memory_len: u32,
}

#[derive(Debug)]
struct LoadContext {
    phase: LoadPhase,
    type_name: &'static str,
    dir_start: usize,
    dir_end: usize,
    claimed: Vec<bool>,
    unloaded: Vec<&'static str>,
    matched: Vec<Matched>,
    retry: Option<Vec<(&'static str, usize)>>,
    results: Results,
}

impl LoadContext {
    fn new(type_name: &'static str, dir_start: usize) -> Self {
        Self {
            phase: LoadPhase::Beginning,
            type_name,
            dir_start,
            dir_end: dir_start,
            claimed: Vec::new(),
            unloaded: Vec::new(),
            matched: Vec::new(),
            retry: None,
            results: Results::new(),
        }
    }
}

/// Reads one value tree from a byte slice.
///
/// An archive serves exactly one [`InputArchive::load`] call.
#[derive(Debug)]
pub struct InputArchive<'a> {
    base: ReadBase<'a>,
    registry: &'a Registry,
    config: ArchiveConfig,
    contexts: Vec<LoadContext>,
    results: Results,
    block_failed: bool,
    used: bool,
}

impl<'a> InputArchive<'a> {
    /// Binds an archive to `bytes`.
    pub fn new(bytes: &'a [u8], registry: &'a Registry, config: ArchiveConfig) -> Self {
        Self {
            base: ReadBase::new(bytes),
            registry,
            config,
            contexts: Vec::new(),
            results: Results::new(),
            block_failed: false,
            used: false,
        }
    }

    /// Validates the signature, loads the root block into `value` and validates the
    /// terminator.
    ///
    /// Fields with no item in the stream keep the value they had before the call. If a fatal
    /// error was recorded, `value`'s
    /// [`fatal_deserialize_error_occurred`](crate::ArchiveHooks::fatal_deserialize_error_occurred)
    /// hook runs once before returning.
    pub fn load<T: Archivable>(&mut self, value: &mut T) -> Results {
        if std::mem::replace(&mut self.used, true) {
            let mut results = Results::new();
            results.record(
                CartonError::Internal("input archive reused".into()),
                false,
                self.config.max_recorded_errors,
            );
            return results;
        }

        if let Err(e) = self.load_root(value) {
            self.record(e);
        }
        self.results.bytes = self.base.position() as u64;

        let results = std::mem::take(&mut self.results);
        if results.has_fatal_error {
            error!(
                type_name = T::NAME,
                errors = results.errors.len(),
                "load finished with a fatal error"
            );
            value.fatal_deserialize_error_occurred(&results);
        }
        results
    }

    fn load_root<T: Archivable>(&mut self, value: &mut T) -> Result<()> {
        format::read_signature(&mut self.base)?;
        let mut root = format::read_entry_header(&mut self.base)?;
        if FrameKind::for_attr(root.attr) != FrameKind::Block {
            return Err(CartonError::malformed(
                Construct::Block,
                root.span.start,
                "root entry is not an object block",
            ));
        }
        format::expect_end(&mut self.base, FrameKind::Block, root.span.body_end)?;

        let expected = name_hash(T::NAME);
        if root.name_hash() != expected {
            return Err(CartonError::UnexpectedRoot {
                expected,
                found: root.name_hash(),
            });
        }
        root.set_resolved_name(T::NAME);
        debug!(type_name = T::NAME, version = %root.version, "loading root block");
        self.results.blocks += 1;
        self.load_object(value, &root)?;

        self.base.seek_to(root.span.end);
        format::read_terminator(&mut self.base)
    }

    /// Loads `name` into `value` if the current block holds a matching item.
    ///
    /// A missing item, or one of a different kind, leaves `value` untouched and is reported
    /// after the field pass. An `Err` means the current block itself must stop.
    pub fn field<F: Field>(&mut self, name: &'static str, value: &mut F) -> Result<()> {
        let ctx = self.contexts.last().ok_or(CartonError::InvalidPhase {
            phase: "None",
            operation: "load field",
        })?;
        if ctx.phase != LoadPhase::LoadData {
            return Err(CartonError::InvalidPhase {
                phase: ctx.phase.as_str(),
                operation: "load field",
            });
        }

        if let Some(plan) = &ctx.retry {
            let Some(&(_, index)) = plan.iter().find(|(target, _)| *target == name) else {
                return Ok(());
            };
            if self.bind(name, index, value)? {
                debug!(field = name, "delegated item bound");
                let ctx = self.context_mut()?;
                ctx.unloaded.retain(|n| *n != name);
                ctx.results.delegated_items += 1;
            }
            return Ok(());
        }

        let found = self
            .base
            .find_item(ctx.dir_start, name_hash(name))
            .filter(|&i| i < ctx.dir_end && !ctx.claimed[i - ctx.dir_start]);
        let bound = match found {
            Some(index) => self.bind(name, index, value)?,
            None => false,
        };
        if !bound {
            self.context_mut()?.unloaded.push(name);
        }
        Ok(())
    }

    /// Validates the element count of `info` and moves to its first element.
    ///
    /// Called from [`Field::load_body`] of array types. Returns the count recorded in the stream.
    pub fn begin_elements(&mut self, info: &ItemInfo) -> Result<usize> {
        self.require_array_phase("load elements")?;
        let count = info.element_count as usize;
        let room = info.span.body_len();
        if count.saturating_mul(MIN_ELEM_LEN) > room {
            return Err(CartonError::malformed(
                Construct::Array,
                info.span.start,
                format!("{count} elements cannot fit in {room} bytes"),
            ));
        }
        self.base.seek_to(info.span.body_start);
        Ok(count)
    }

    /// Loads the element at the cursor into `value`.
    ///
    /// Elements must be read in order after [`InputArchive::begin_elements`]. A failure inside
    /// the element is recorded and the cursor moves on to the next element; only a damaged
    /// element frame returns `Err`.
    pub fn element<F: Field>(&mut self, array: &ItemInfo, index: usize, value: &mut F) -> Result<()> {
        self.require_array_phase("load element")?;
        self.advance(LoadPhase::Element)?;

        let elem = format::read_elem_header(&mut self.base)?;
        format::expect_end(&mut self.base, FrameKind::Element, elem.span.body_end)?;
        self.base.seek_to(elem.span.body_start);
        let prev = self.base.set_limit(elem.span.body_end);
        let end = elem.span.end;
        let r = self.load_element(array, elem, index, value);
        self.base.set_limit(prev);
        self.base.seek_to(end);

        self.results_mut().elements += 1;
        if let Err(e) = r {
            self.record(e);
        }
        Ok(())
    }

    fn load_element<F: Field>(
        &mut self,
        array: &ItemInfo,
        mut elem: ItemInfo,
        index: usize,
        value: &mut F,
    ) -> Result<()> {
        if elem.attr.is_null() || elem.attr.kind() != F::ATTR.kind() {
            if elem.attr.is_null() && F::ATTR.is_pointer() {
                value.load_null();
                return Ok(());
            }
            warn!(
                array = %array.display_name(),
                index,
                stream = ?elem.attr,
                memory = ?F::ATTR,
                "element kind differs from the array type"
            );
            return Err(CartonError::UnloadedItem {
                name: format!("{}[{index}]", array.display_name()),
            });
        }
        match FrameKind::for_attr(elem.attr) {
            FrameKind::Array => {
                let inner = format::read_entry_header(&mut self.base)?;
                format::expect_end(&mut self.base, FrameKind::Array, inner.span.body_end)?;
                self.load_entry(&inner, value)
            }
            FrameKind::Block => {
                elem.version = array.version;
                value.load_body(self, &elem)
            }
            _ => value.load_body(self, &elem),
        }
    }

    /// Runs the field table of an object against the entries of the block described by `info`.
    ///
    /// Called from [`Field::load_body`] of object types. Everything that goes wrong inside the
    /// block is recorded in a child context; the cursor always ends at the block end.
    pub fn load_object<T: Archivable>(&mut self, value: &mut T, info: &ItemInfo) -> Result<()> {
        let dir_start = self.base.directory().len();
        self.push(LoadContext::new(T::NAME, dir_start))?;
        let r = self.load_block(value, info);
        self.block_failed = r.is_err();
        if let Err(e) = r {
            self.record(e);
        }
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.phase = LoadPhase::Ended;
        }
        self.pop();
        self.base.seek_to(info.span.body_end);
        Ok(())
    }

    fn load_block<T: Archivable>(&mut self, value: &mut T, info: &ItemInfo) -> Result<()> {
        self.advance(LoadPhase::Block)?;
        self.check_version(value, info.version)?;

        let prev = self.base.set_limit(info.span.body_end);
        let scanned = self.scan_entries(info);
        self.base.set_limit(prev);
        scanned?;
        let dir_end = self.base.directory().len();
        let ctx = self.context_mut()?;
        ctx.dir_end = dir_end;
        ctx.claimed = vec![false; dir_end - ctx.dir_start];

        self.advance(LoadPhase::LoadData)?;
        value.load(self)?;
        self.retry_delegates(value)?;

        self.advance(LoadPhase::Distribute)?;
        self.distribute(value);

        self.advance(LoadPhase::DistributeEnd)?;
        self.notify(value);
        value.after_load()
    }

    fn check_version<T: Archivable>(&mut self, value: &T, saved: Version) -> Result<()> {
        let current = <T as Archivable>::VERSION;
        match current.compare(saved) {
            VersionOrdering::Eq => Ok(()),
            ordering if ordering.is_minor() => {
                self.record(CartonError::VersionMismatchMinor {
                    type_name: T::NAME,
                    saved,
                    current,
                });
                Ok(())
            }
            _ if value.accept_version(saved) => {
                warn!(type_name = T::NAME, %saved, %current, "major version accepted by hook");
                self.results_mut().major_version_mismatches += 1;
                Ok(())
            }
            _ => Err(CartonError::VersionMismatchMajor {
                type_name: T::NAME,
                saved,
                current,
            }),
        }
    }

    fn scan_entries(&mut self, info: &ItemInfo) -> Result<()> {
        self.base.seek_to(info.span.body_start);
        while format::peek_entry(&self.base).is_some() {
            let mut item = format::read_entry_header(&mut self.base)?;
            format::expect_end(&mut self.base, FrameKind::for_attr(item.attr), item.span.body_end)?;
            if let Some(name) = self.registry.resolve(item.name_hash()) {
                item.set_resolved_name(name);
            }
            if item.attr.has_unknown_bits() {
                warn!(item = %item.display_name(), attr = ?item.attr, "unknown attribute bits");
            }
            self.base.push_item(item);
        }
        if self.base.position() != info.span.body_end {
            return Err(CartonError::malformed(
                Construct::Entry,
                self.base.position(),
                format!("stray bytes before the end of {}", info.display_name()),
            ));
        }
        Ok(())
    }

    fn retry_delegates<T: Archivable>(&mut self, value: &mut T) -> Result<()> {
        let ctx = self.context()?;
        let mut plan: Vec<(&'static str, usize)> = Vec::new();
        for (offset, claimed) in ctx.claimed.iter().enumerate() {
            if *claimed {
                continue;
            }
            let index = ctx.dir_start + offset;
            let Some(item) = self.base.directory().get(index) else {
                continue;
            };
            let Some(target) = value.delegate_item(item) else {
                continue;
            };
            if ctx.unloaded.contains(&target) && !plan.iter().any(|(t, _)| *t == target) {
                plan.push((target, index));
            } else {
                debug!(item = %item.display_name(), target, "delegation ignored");
            }
        }
        if plan.is_empty() {
            return Ok(());
        }

        self.context_mut()?.retry = Some(plan);
        let r = value.load(self);
        self.context_mut()?.retry = None;
        r
    }

    fn distribute<T: Archivable>(&mut self, value: &mut T) {
        let matched = match self.context_mut() {
            Ok(ctx) => std::mem::take(&mut ctx.matched),
            Err(_) => return,
        };
        let registry = self.registry;
        for m in matched {
            let Some(item) = self.base.directory().get(m.index).cloned() else {
                continue;
            };
            let dist = Distribution {
                field: m.field,
                item: &item,
                saved: item.version,
                current: m.current,
                disk_len: item.element_count,
                memory_len: m.memory_len,
            };
            value.distribute(&dist);
            if let Err(e) = registry.distribute(value, &dist) {
                self.record(e);
            }
        }
    }

    fn notify<T: Archivable>(&mut self, value: &mut T) {
        let (dir_start, claimed, unloaded) = match self.context_mut() {
            Ok(ctx) => (
                ctx.dir_start,
                std::mem::take(&mut ctx.claimed),
                std::mem::take(&mut ctx.unloaded),
            ),
            Err(_) => return,
        };
        for (offset, _) in claimed.iter().enumerate().filter(|(_, c)| !**c) {
            let Some(item) = self.base.directory().get(dir_start + offset).cloned() else {
                continue;
            };
            self.record(CartonError::UnrecognizedItem {
                name_hash: item.name_hash(),
            });
            value.notice_unrecognized_item(&item);
        }
        for name in unloaded {
            self.record(CartonError::UnloadedItem {
                name: name.to_string(),
            });
            value.notice_unloaded_item(name);
        }
    }

    fn bind<F: Field>(&mut self, name: &'static str, index: usize, value: &mut F) -> Result<bool> {
        let item = self
            .base
            .directory()
            .get(index)
            .cloned()
            .ok_or_else(|| CartonError::Internal(format!("directory index {index} out of range")))?;

        if item.attr.is_null() {
            if !F::ATTR.is_pointer() {
                warn!(field = name, "null item for a field that cannot be null");
                return Ok(false);
            }
            let memory_len = value.element_count();
            value.load_null();
            self.claim(name, index, F::VERSION, memory_len)?;
            return Ok(true);
        }
        if item.attr.kind() != F::ATTR.kind() {
            warn!(field = name, stream = ?item.attr, memory = ?F::ATTR, "item kind differs from the field");
            return Ok(false);
        }

        let memory_len = value.element_count();
        self.claim(name, index, F::VERSION, memory_len)?;
        let r = self.load_entry(&item, value);
        self.absorb(r)?;
        Ok(true)
    }

    fn claim(&mut self, field: &'static str, index: usize, current: Version, memory_len: u32) -> Result<()> {
        let ctx = self.context_mut()?;
        if let Some(slot) = ctx.claimed.get_mut(index - ctx.dir_start) {
            *slot = true;
        }
        ctx.matched.push(Matched {
            index,
            field,
            current,
            memory_len,
        });
        ctx.results.items += 1;
        Ok(())
    }

    fn load_entry<F: Field>(&mut self, item: &ItemInfo, value: &mut F) -> Result<()> {
        let prev = self.base.set_limit(item.span.body_end);
        self.base.seek_to(item.span.body_start);
        let r = match FrameKind::for_attr(item.attr) {
            FrameKind::Array => self.load_array(item, value),
            FrameKind::Block => {
                self.results_mut().blocks += 1;
                debug!(name = %item.display_name(), version = %item.version, "block");
                value.load_body(self, item)
            }
            _ => value.load_body(self, item),
        };
        self.base.set_limit(prev);
        self.base.seek_to(item.span.end);
        r
    }

    fn load_array<F: Field>(&mut self, item: &ItemInfo, value: &mut F) -> Result<()> {
        let dir_start = self.base.directory().len();
        self.push(LoadContext::new("[]", dir_start))?;
        self.results_mut().arrays += 1;
        debug!(name = %item.display_name(), count = item.element_count, "array");
        let r = self.advance(LoadPhase::Array);
        let r = r.and_then(|()| value.load_body(self, item));
        self.block_failed = r.is_err();
        // The array span was verified during the scan; the enclosing block resumes at its end.
        if let Err(e) = r {
            self.record(e);
        }
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.phase = LoadPhase::Ended;
        }
        self.pop();
        Ok(())
    }

    /// Returns whether the most recently finished object block or array stopped early, and
    /// clears the flag.
    ///
    /// Object and array failures are recorded rather than returned, so wrappers that load into
    /// a temporary (such as `Option<T>`) use this to decide whether to keep the result.
    pub fn take_block_failure(&mut self) -> bool {
        std::mem::take(&mut self.block_failed)
    }

    /// Consumes exactly `len` body bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.base.take(len)
    }

    /// Reads a `len:u32` prefix and the bytes it announces.
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.base.get_u32()? as usize;
        self.base.take(len)
    }

    /// Bytes left before the end of the current body.
    pub fn remain(&self) -> usize {
        self.base.remain()
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.base.position()
    }

    /// Items discovered in the enclosing blocks, outermost first.
    pub fn directory(&self) -> &[ItemInfo] {
        self.base.directory()
    }

    /// The registry this archive resolves names and hooks from.
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Phase of the innermost context, `None` outside any object.
    pub fn phase(&self) -> Option<LoadPhase> {
        self.contexts.last().map(|c| c.phase)
    }

    /// Nesting depth of the current context.
    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    fn require_array_phase(&self, operation: &'static str) -> Result<()> {
        match self.phase() {
            Some(LoadPhase::Array | LoadPhase::Element) => Ok(()),
            other => Err(CartonError::InvalidPhase {
                phase: other.map_or("None", LoadPhase::as_str),
                operation,
            }),
        }
    }

    /// Absorbs leaf failures that do not stop the block.
    fn absorb(&mut self, r: Result<()>) -> Result<()> {
        match r {
            Err(e) if !e.is_fatal() && !self.config.escalates(&e) => {
                self.record(e);
                Ok(())
            }
            other => other,
        }
    }

    fn context(&self) -> Result<&LoadContext> {
        self.contexts
            .last()
            .ok_or_else(|| CartonError::Internal("no load context".into()))
    }

    fn context_mut(&mut self) -> Result<&mut LoadContext> {
        self.contexts
            .last_mut()
            .ok_or_else(|| CartonError::Internal("no load context".into()))
    }

    fn push(&mut self, ctx: LoadContext) -> Result<()> {
        if self.contexts.len() >= self.config.max_depth {
            return Err(CartonError::DepthExceeded {
                limit: self.config.max_depth,
            });
        }
        self.contexts.push(ctx);
        Ok(())
    }

    fn pop(&mut self) {
        if let Some(ctx) = self.contexts.pop() {
            self.base.truncate_directory(ctx.dir_start);
            self.results_mut().add(ctx.results);
        }
    }

    fn advance(&mut self, next: LoadPhase) -> Result<()> {
        let ctx = self.context_mut()?;
        if next < ctx.phase {
            return Err(CartonError::InvalidPhase {
                phase: ctx.phase.as_str(),
                operation: next.as_str(),
            });
        }
        ctx.phase = next;
        Ok(())
    }

    fn results_mut(&mut self) -> &mut Results {
        match self.contexts.last_mut() {
            Some(ctx) => &mut ctx.results,
            None => &mut self.results,
        }
    }

    fn record(&mut self, error: CartonError) {
        let escalate = self.config.escalates(&error);
        let type_name = self.contexts.last().map_or("", |c| c.type_name);
        if error.is_fatal() || escalate {
            error!(type_name, %error, "fatal load error");
        } else {
            warn!(type_name, %error, "load drift");
        }
        let cap = self.config.max_recorded_errors;
        self.results_mut().record(error, escalate, cap);
    }
}
