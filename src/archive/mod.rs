//! The save and load engines.
//!
//! Both engines keep a stack of per-level contexts. Every nested object or array pushes a
//! context with its own phase and [`Results`](crate::Results); popping a context merges its
//! results into the parent's. Phases only move forward within one context.

mod input;
mod output;

pub use input::InputArchive;
pub use output::OutputArchive;

/// Phase of one save context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SavePhase {
    /// Context created, nothing written.
    Beginning,
    /// Object block header written.
    Block,
    /// Array header written.
    Array,
    /// Writing array elements.
    Element,
    /// Writing declared fields.
    SaveData,
    /// Collectors may append trailing items.
    Collect,
    /// No further items accepted.
    CollectEnd,
    /// Footer written.
    Ended,
}

impl SavePhase {
    /// Stable name used in errors and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beginning => "Beginning",
            Self::Block => "Block",
            Self::Array => "Array",
            Self::Element => "Element",
            Self::SaveData => "SaveData",
            Self::Collect => "Collect",
            Self::CollectEnd => "CollectEnd",
            Self::Ended => "Ended",
        }
    }
}

/// Phase of one load context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadPhase {
    /// Context created, nothing read.
    Beginning,
    /// Object block header read and its entries scanned.
    Block,
    /// Array header read.
    Array,
    /// Reading array elements.
    Element,
    /// Binding declared fields to stream items.
    LoadData,
    /// Distributors running for matched items.
    Distribute,
    /// Notifications and `after_load`.
    DistributeEnd,
    /// Context finished.
    Ended,
}

impl LoadPhase {
    /// Stable name used in errors and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beginning => "Beginning",
            Self::Block => "Block",
            Self::Array => "Array",
            Self::Element => "Element",
            Self::LoadData => "LoadData",
            Self::Distribute => "Distribute",
            Self::DistributeEnd => "DistributeEnd",
            Self::Ended => "Ended",
        }
    }
}
