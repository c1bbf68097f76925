//! Defines the capability traits user types implement to take part in an archive.
//!
//! * [`Archivable`] is implemented by object types: it names the type, declares its version
//!   and lists its fields by calling [`OutputArchive::field`] / [`InputArchive::field`].
//! * [`Field`] is implemented by everything that can appear as a field value: scalars,
//!   strings, collections, options and archivable objects. Its `ATTR` constant selects the
//!   framing.
//! * [`ArchiveHooks`] carries the per-type lifecycle hooks, all with no-op defaults.
//!
//! `#[derive(Archivable)]` generates all three for named-field structs.

use crate::archive::{InputArchive, OutputArchive};
use crate::error::Result;
use crate::item::{ItemAttr, ItemInfo};
use crate::results::Results;
use crate::version::Version;

/// Context handed to distributors for one matched item.
#[derive(Debug, Clone, Copy)]
pub struct Distribution<'d> {
    /// Name of the field the item was bound to.
    pub field: &'static str,
    /// The located stream item.
    pub item: &'d ItemInfo,
    /// Version recorded in the stream.
    pub saved: Version,
    /// Version the current code declares for the field.
    pub current: Version,
    /// Number of elements recorded in the stream.
    pub disk_len: u32,
    /// Number of elements the field held before it was loaded.
    pub memory_len: u32,
}

impl Distribution<'_> {
    /// Returns `true` if the stream held fewer elements than the field did.
    pub fn shrunk(&self) -> bool {
        self.disk_len < self.memory_len
    }

    /// Returns `true` if the stream held more elements than the field did.
    pub fn grew(&self) -> bool {
        self.disk_len > self.memory_len
    }
}

/// Lifecycle hooks of an archivable type.
///
/// Every method has a no-op default, so `impl ArchiveHooks for T {}` is a valid implementation.
#[allow(unused_variables)]
pub trait ArchiveHooks {
    /// Runs after the declared fields were saved. May only append items with
    /// [`OutputArchive::field`].
    fn collect(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs once per matched item after the field pass of a load (and the delegate retry).
    ///
    /// The field named by `dist.field` has already been loaded when this runs, so the hook
    /// sees the new value alongside both versions and both element counts.
    fn distribute(&mut self, dist: &Distribution<'_>) {}

    /// Called when the stream holds a different major version. Returning `true` loads it
    /// anyway.
    fn accept_version(&self, saved: Version) -> bool {
        false
    }

    /// Offered every stream item no field claimed. Returning the name of a field that stayed
    /// unloaded binds the item to that field in a single retry pass.
    fn delegate_item(&self, item: &ItemInfo) -> Option<&'static str> {
        None
    }

    /// An item in the stream was claimed by no field.
    fn notice_unrecognized_item(&mut self, item: &ItemInfo) {}

    /// A field found no item in the stream and kept its value.
    fn notice_unloaded_item(&mut self, name: &str) {}

    /// Runs last, after notifications.
    fn after_load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once on the root value when a save recorded a fatal error.
    fn fatal_serialize_error_occurred(&self, results: &Results) {}

    /// Called once on the root value when a load recorded a fatal error.
    fn fatal_deserialize_error_occurred(&mut self, results: &Results) {}
}

/// An object type with a named, versioned field table.
pub trait Archivable: ArchiveHooks + 'static {
    /// Type name. Its hash identifies the root block.
    const NAME: &'static str;
    /// Version embedded in every block of this type.
    const VERSION: Version;
    /// Names of the declared fields, in save order.
    const FIELDS: &'static [&'static str];

    /// Saves every field through [`OutputArchive::field`].
    fn save(&self, ar: &mut OutputArchive<'_>) -> Result<()>;

    /// Loads every field through [`InputArchive::field`].
    fn load(&mut self, ar: &mut InputArchive<'_>) -> Result<()>;
}

/// A value that can be stored under a field name or as an array element.
pub trait Field {
    /// Attribute bits selecting the framing.
    const ATTR: ItemAttr;
    /// Version written into block and array headers.
    const VERSION: Version = Version::ZERO;

    /// Returns `true` for an absent optional value.
    fn is_null(&self) -> bool {
        false
    }

    /// Number of elements (arrays) or `1`.
    fn element_count(&self) -> u32 {
        1
    }

    /// Width of one element in bytes, `0` when not fixed.
    fn element_size(&self) -> u32 {
        0
    }

    /// Writes the body of the value. Framing has already been written.
    fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()>;

    /// Reads the body described by `info`. The cursor sits at the body start.
    fn load_body(&mut self, ar: &mut InputArchive<'_>, info: &ItemInfo) -> Result<()>;

    /// Called instead of `load_body` when the stream holds a null pointer.
    fn load_null(&mut self) {}
}
