//! The save engine.
//!
//! [`OutputArchive`] writes a stream into a caller-owned buffer in one traversal. Block,
//! array and element sizes are reserved as zero placeholders and backpatched by the framing
//! codec when the frame closes, so no length precomputation pass is needed.

use tracing::{debug, error, warn};

use crate::archive::SavePhase;
use crate::config::ArchiveConfig;
use crate::error::{CartonError, Result};
use crate::format::{BinaryFormat, FrameId, FrameKind};
use crate::io::{WriteAdapter, WriteBase};
use crate::item::{ItemAttr, ItemInfo};
use crate::registry::Registry;
use crate::results::Results;
use crate::visitor::{Archivable, Field};

#[derive(Debug)]
struct SaveContext {
    phase: SavePhase,
    type_name: &'static str,
    fields: u32,
    results: Results,
}

impl SaveContext {
    fn new(type_name: &'static str) -> Self {
        Self {
            phase: SavePhase::Beginning,
            type_name,
            fields: 0,
            results: Results::new(),
        }
    }
}

/// Writes one value tree into a bounded buffer.
///
/// An archive serves exactly one [`OutputArchive::save`] call.
///
/// # Example
/// ```rust
/// use carton::{Archivable, ArchiveConfig, OutputArchive, Registry};
///
/// #[derive(Archivable, Default)]
/// #[carton(version = "1.0")]
/// struct Point {
///     x: i32,
///     y: i32,
/// }
///
/// let registry = Registry::new();
/// let mut buf = [0u8; 256];
/// let mut ar = OutputArchive::new(&mut buf, &registry, ArchiveConfig::default());
/// let results = ar.save(&Point { x: 1, y: 2 });
/// assert!(results.is_ok());
/// assert!(!ar.written().is_empty());
/// ```
#[derive(Debug)]
pub struct OutputArchive<'a> {
    base: WriteBase<'a>,
    format: BinaryFormat,
    registry: &'a Registry,
    config: ArchiveConfig,
    contexts: Vec<SaveContext>,
    results: Results,
    last_items: u32,
    used: bool,
}

impl<'a> OutputArchive<'a> {
    /// Binds an archive to `buf`.
    pub fn new(buf: &'a mut [u8], registry: &'a Registry, config: ArchiveConfig) -> Self {
        Self {
            base: WriteBase::new(buf),
            format: BinaryFormat::new(),
            registry,
            config,
            contexts: Vec::new(),
            results: Results::new(),
            last_items: 0,
            used: false,
        }
    }

    /// Writes the signature, the root block of `value` and the terminator.
    ///
    /// Never fails outright: every problem is recorded in the returned [`Results`]. If a fatal
    /// error was recorded, `value`'s
    /// [`fatal_serialize_error_occurred`](crate::ArchiveHooks::fatal_serialize_error_occurred)
    /// hook runs once before returning.
    pub fn save<T: Archivable>(&mut self, value: &T) -> Results {
        if std::mem::replace(&mut self.used, true) {
            let mut results = Results::new();
            results.record(
                CartonError::Internal("output archive reused".into()),
                false,
                self.config.max_recorded_errors,
            );
            return results;
        }

        self.format.write_signature(&mut self.base);
        let root = ItemInfo::new(T::NAME, ItemAttr::OBJECT.with(ItemAttr::HAS_VERSION))
            .with_version(T::VERSION);
        let id = self
            .format
            .write_block_header(&mut self.base, &root, T::VERSION);
        debug!(type_name = T::NAME, version = %T::VERSION, "saving root block");
        self.results.blocks += 1;
        if let Err(e) = self.save_object(value) {
            self.record(e);
        }
        self.close(id);
        self.format.write_terminator(&mut self.base);
        self.drain_faults();
        self.results.bytes = self.base.high_water() as u64;

        let results = std::mem::take(&mut self.results);
        if results.has_fatal_error {
            error!(
                type_name = T::NAME,
                errors = results.errors.len(),
                "save finished with a fatal error"
            );
            value.fatal_serialize_error_occurred(&results);
        }
        results
    }

    /// Saves `value` under `name`.
    ///
    /// Allowed while the current object is saving its declared fields and during its collect
    /// phase. Objects and arrays recurse into a child context whose failures are recorded
    /// there; an `Err` means the current block itself must stop.
    pub fn field<F: Field>(&mut self, name: &'static str, value: &F) -> Result<()> {
        let phase = self.phase();
        if !matches!(phase, Some(SavePhase::SaveData | SavePhase::Collect)) {
            return Err(CartonError::InvalidPhase {
                phase: phase.map_or("None", SavePhase::as_str),
                operation: "save field",
            });
        }
        let info = describe(ItemInfo::new(name, F::ATTR), value);
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.fields += 1;
            ctx.results.items += 1;
        }
        self.write_entry(&info, value)
    }

    /// Saves element `index` of the array currently being written.
    ///
    /// A failure inside the element is recorded and the element is closed, so the remaining
    /// elements still line up with the recorded count.
    pub fn element<F: Field>(&mut self, index: usize, value: &F) -> Result<()> {
        let phase = self.phase();
        if !matches!(phase, Some(SavePhase::Array | SavePhase::Element)) {
            return Err(CartonError::InvalidPhase {
                phase: phase.map_or("None", SavePhase::as_str),
                operation: "save element",
            });
        }
        self.advance(SavePhase::Element)?;

        let info = describe(ItemInfo::anonymous(F::ATTR), value);
        let id = self
            .format
            .write_elem_header(&mut self.base, &info, index)?;
        let kind = FrameKind::for_attr(info.attr);
        let r = if info.attr.is_null() {
            Ok(())
        } else if kind == FrameKind::Array {
            self.write_entry(&info, value)
        } else {
            value.save_body(self)
        };
        let items = match kind {
            _ if info.attr.is_null() => 0,
            FrameKind::Block => self.last_items,
            _ => 1,
        };
        if let Err(e) = r {
            self.record(e);
        }
        self.close_elem(id, items);
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.results.elements += 1;
        }
        Ok(())
    }

    /// Runs the field table and collect phase of an object in a child context.
    ///
    /// Called from [`Field::save_body`] of object types; the block framing is already open.
    /// Errors raised by the object's own fields are recorded in the child context.
    pub fn save_object<T: Archivable>(&mut self, value: &T) -> Result<()> {
        self.push(SaveContext::new(T::NAME))?;
        if let Err(e) = self.save_fields(value) {
            self.record(e);
        }
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.phase = SavePhase::Ended;
        }
        self.last_items = self.pop();
        Ok(())
    }

    fn save_fields<T: Archivable>(&mut self, value: &T) -> Result<()> {
        self.advance(SavePhase::Block)?;
        self.advance(SavePhase::SaveData)?;
        value.save(self)?;
        self.advance(SavePhase::Collect)?;
        value.collect(self)?;
        let registry = self.registry;
        registry.collect(value, self)?;
        self.advance(SavePhase::CollectEnd)
    }

    /// Writes raw body bytes and returns how many fit.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.base.put_bytes(bytes)
    }

    /// Writes a `len:u32` prefix followed by `bytes`.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            CartonError::Serialization(format!("{} bytes exceed a u32 length", bytes.len()))
        })?;
        self.base.put_u32(len);
        self.base.put_bytes(bytes);
        Ok(())
    }

    /// The bytes written so far.
    pub fn written(&self) -> &[u8] {
        self.base.written()
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.base.position()
    }

    /// The registry this archive resolves hooks from.
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// The configuration in effect.
    pub fn config(&self) -> ArchiveConfig {
        self.config
    }

    /// Phase of the innermost context, `None` outside any object.
    pub fn phase(&self) -> Option<SavePhase> {
        self.contexts.last().map(|c| c.phase)
    }

    /// Nesting depth of the current context.
    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    fn write_entry<F: Field>(&mut self, info: &ItemInfo, value: &F) -> Result<()> {
        if info.attr.is_null() {
            let id = self.format.write_item_header(&mut self.base, info);
            self.close(id);
            return Ok(());
        }
        match FrameKind::for_attr(info.attr) {
            FrameKind::Item => {
                let id = self.format.write_item_header(&mut self.base, info);
                let r = value.save_body(self);
                self.close(id);
                r
            }
            FrameKind::Block => {
                let id = self
                    .format
                    .write_block_header(&mut self.base, info, info.version);
                self.results_mut().blocks += 1;
                debug!(name = info.name(), version = %info.version, "block");
                let r = value.save_body(self);
                self.close(id);
                r
            }
            FrameKind::Array => {
                let id = self.format.write_array_header(
                    &mut self.base,
                    info,
                    info.version,
                    info.element_count,
                );
                debug!(name = info.name(), count = info.element_count, "array");
                let r = self.save_array(value);
                self.close(id);
                r
            }
            FrameKind::Element => Err(CartonError::Internal(
                "elements are not named entries".into(),
            )),
        }
    }

    fn save_array<F: Field>(&mut self, value: &F) -> Result<()> {
        self.push(SaveContext::new("[]"))?;
        self.results_mut().arrays += 1;
        let r = self.advance(SavePhase::Array);
        let r = r.and_then(|()| value.save_body(self));
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.phase = SavePhase::Ended;
        }
        self.pop();
        r
    }

    fn push(&mut self, ctx: SaveContext) -> Result<()> {
        if self.contexts.len() >= self.config.max_depth {
            return Err(CartonError::DepthExceeded {
                limit: self.config.max_depth,
            });
        }
        self.contexts.push(ctx);
        Ok(())
    }

    fn pop(&mut self) -> u32 {
        let Some(ctx) = self.contexts.pop() else {
            return 0;
        };
        let fields = ctx.fields;
        self.results_mut().add(ctx.results);
        fields
    }

    fn advance(&mut self, next: SavePhase) -> Result<()> {
        let ctx = self
            .contexts
            .last_mut()
            .ok_or_else(|| CartonError::Internal("no save context".into()))?;
        if next < ctx.phase {
            return Err(CartonError::InvalidPhase {
                phase: ctx.phase.as_str(),
                operation: next.as_str(),
            });
        }
        ctx.phase = next;
        Ok(())
    }

    fn close(&mut self, id: FrameId) -> u32 {
        let size = match self.format.write_footer(&mut self.base, id) {
            Ok(size) => size,
            Err(e) => {
                self.record(e);
                0
            }
        };
        self.drain_faults();
        size
    }

    fn close_elem(&mut self, id: FrameId, items: u32) {
        if let Err(e) = self.format.write_elem_footer(&mut self.base, id, items) {
            self.record(e);
        }
        self.drain_faults();
    }

    fn drain_faults(&mut self) {
        for fault in self.base.take_faults() {
            self.record(fault);
        }
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
            error!(type_name, %error, "fatal save error");
        } else {
            warn!(type_name, %error, "save error");
        }
        let cap = self.config.max_recorded_errors;
        self.results_mut().record(error, escalate, cap);
    }
}

fn describe<F: Field>(info: ItemInfo, value: &F) -> ItemInfo {
    let mut info = info
        .with_version(F::VERSION)
        .with_elements(value.element_count(), value.element_size());
    if value.is_null() {
        info.attr = info.attr.with(ItemAttr::NULL);
    }
    info
}
