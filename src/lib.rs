//! # Carton
//!
//! A self-describing, versioned binary archive format for Rust that keeps loading when the
//! schema that wrote the data and the schema reading it have drifted apart.
//!
//! ## Overview
//!
//! Carton writes a value tree into a caller-owned byte buffer in a single pass. Every object
//! becomes a framed block carrying its type version, every field a framed item keyed by the
//! 32-bit hash of its name. On load, fields are matched by name hash rather than by position,
//! so added, removed and reordered fields are reported instead of corrupting the result.
//!
//! ### Key Features
//!
//! *   **Bounded Buffers:** The engine never grows or reallocates the buffer it is given.
//!     Running out of space is counted in [`Results`], never written past.
//! *   **Single-Pass Backpatching:** Block sizes are reserved as placeholders and patched when
//!     the block closes, so no size precomputation pass is needed.
//! *   **Schema Drift Tolerance:** Unknown items are skipped using their recorded size, missing
//!     fields keep their previous values, and both are reported through hooks.
//! *   **Versioned Blocks:** Each type declares a `major.minor` version. Minor differences load;
//!     major differences are fatal unless the type opts in.
//! *   **Hooks:** Collectors append trailing data after an object's fields on save; distributors
//!     see both versions and both element counts on load.
//!
//! ## Stream Layout
//!
//! ```text
//! [SIGNATURE: 16]
//!   {B hash attr major minor size   (I hash attr size body I)   [A ... A]   {B ... B}   B}
//! [TERMINATOR: 16]
//! ```
//!
//! See [`format`] for the exact layout of every frame.
//!
//! ## Core Concepts
//!
//! ### `Archivable` and `Field`
//!
//! [`Archivable`] types name themselves, declare a version and list their fields. [`Field`] is
//! implemented by every value that can sit in a field: numbers, `bool`, `String`, `Vec<T>`,
//! `[T; N]`, `Option<T>`, [`Serde<T>`] and every archivable type. `#[derive(Archivable)]`
//! writes both for named-field structs.
//!
//! ### Archives
//!
//! [`OutputArchive`] and [`InputArchive`] drive one save or load. Nested objects and arrays
//! run in child contexts with their own phase and results; a failure inside a child is recorded
//! and its siblings continue.
//!
//! ### Registry
//!
//! The [`Registry`] is created by the caller and borrowed by archives. It maps name hashes back
//! to names and holds the collector and distributor functors registered per type.
//!
//! ## Usage
//!
//! ```rust
//! use carton::Archivable;
//!
//! #[derive(Archivable, Debug, Default, PartialEq)]
//! #[carton(version = "1.0")]
//! struct Record {
//!     id: u32,
//!     name: String,
//! }
//!
//! let mut buf = [0u8; 256];
//! let saved = carton::save(&mut buf, &Record { id: 42, name: "x".into() });
//! assert!(saved.results.is_ok());
//!
//! let mut loaded = Record::default();
//! let results = carton::load(&buf[..saved.len], &mut loaded);
//! assert!(results.is_ok());
//! assert_eq!(loaded, Record { id: 42, name: "x".into() });
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** `unsafe` is used only to memory-map files in [`api`].
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Recorded Errors:** Every failure is a [`CartonError`]; archives record them in
//!   [`Results`] and classify them with [`CartonError::is_fatal`].

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

extern crate self as carton;

// --- PUBLIC API MODULES ---
pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod format;
pub mod inspector;
pub mod item;
pub mod registry;
pub mod results;
pub mod version;
pub mod visitor;

// --- INTERNAL IMPLEMENTATION MODULES ---
#[doc(hidden)]
pub mod io;

mod visitor_impls;

// --- RE-EXPORTS ---

pub use api::{load, load_from_file, load_with, save, save_to_file, save_with, Saved};
pub use archive::{InputArchive, LoadPhase, OutputArchive, SavePhase};
pub use config::ArchiveConfig;
pub use error::{CartonError, Construct, Result};
pub use inspector::{DebugReport, EntryReport, Inspector};
pub use item::{name_hash, ItemAttr, ItemInfo, Span};
pub use registry::Registry;
pub use results::Results;
pub use version::{Version, VersionOrdering};
pub use visitor::{Archivable, ArchiveHooks, Distribution, Field};
pub use visitor_impls::Serde;

// Re-export the derive macro so it is accessible as `carton::Archivable`.
pub use carton_derive::Archivable;
