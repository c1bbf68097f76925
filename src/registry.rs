//! The explicitly owned name table and hook table.
//!
//! A [`Registry`] is built by the caller before the first archive is created and borrowed by
//! every archive that uses it. It resolves name hashes back to names (for diagnostics and the
//! inspector) and holds the collector and distributor functors registered per data type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use crate::archive::OutputArchive;
use crate::error::{CartonError, Result};
use crate::item::name_hash;
use crate::visitor::{Archivable, Distribution};

type CollectorFn = Box<dyn Fn(&dyn Any, &mut OutputArchive<'_>) -> Result<()>>;
type DistributorFn = Box<dyn Fn(&mut dyn Any, &Distribution<'_>) -> Result<()>>;

/// Name table plus per-type collector and distributor functors.
#[derive(Default)]
pub struct Registry {
    names: HashMap<u32, &'static str>,
    collectors: HashMap<TypeId, Vec<CollectorFn>>,
    distributors: HashMap<TypeId, Vec<DistributorFn>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the type name and field names of `T`.
    ///
    /// Two field names of `T` sharing a hash would make its items indistinguishable, so that
    /// fails. A collision with a name registered by another type is only logged.
    pub fn register<T: Archivable>(&mut self) -> Result<&mut Self> {
        let mut local: HashMap<u32, &'static str> = HashMap::new();
        for &field in T::FIELDS {
            let hash = name_hash(field);
            if let Some(&existing) = local.get(&hash) {
                if existing != field {
                    return Err(CartonError::NameHashCollision {
                        hash,
                        existing,
                        incoming: field,
                    });
                }
            }
            local.insert(hash, field);
        }
        self.intern(T::NAME);
        for field in local.into_values() {
            self.intern(field);
        }
        Ok(self)
    }

    /// Adds a single name to the table and returns its hash.
    pub fn intern(&mut self, name: &'static str) -> u32 {
        let hash = name_hash(name);
        match self.names.get(&hash) {
            Some(&existing) if existing != name => {
                warn!(hash, existing, incoming = name, "name hash collision; keeping the first name");
            }
            Some(_) => {}
            None => {
                self.names.insert(hash, name);
            }
        }
        hash
    }

    /// Resolves a hash to a registered name.
    pub fn resolve(&self, hash: u32) -> Option<&'static str> {
        self.names.get(&hash).copied()
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if no name is registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Registers a collector for `T`. It runs in the collect phase of every block of `T`,
    /// after `T`'s own [`ArchiveHooks::collect`](crate::ArchiveHooks::collect).
    pub fn on_collect<T, F>(&mut self, f: F) -> &mut Self
    where
        T: Archivable,
        F: Fn(&T, &mut OutputArchive<'_>) -> Result<()> + 'static,
    {
        let erased: CollectorFn = Box::new(move |value, ar| {
            let value = value.downcast_ref::<T>().ok_or_else(|| {
                CartonError::Internal(format!("collector for {} got another type", T::NAME))
            })?;
            f(value, ar)
        });
        self.collectors
            .entry(TypeId::of::<T>())
            .or_default()
            .push(erased);
        self
    }

    /// Registers a distributor for `T`. It runs once per matched item of every block of `T`,
    /// after `T`'s own [`ArchiveHooks::distribute`](crate::ArchiveHooks::distribute).
    pub fn on_distribute<T, F>(&mut self, f: F) -> &mut Self
    where
        T: Archivable,
        F: Fn(&mut T, &Distribution<'_>) -> Result<()> + 'static,
    {
        let erased: DistributorFn = Box::new(move |value, dist| {
            let value = value.downcast_mut::<T>().ok_or_else(|| {
                CartonError::Internal(format!("distributor for {} got another type", T::NAME))
            })?;
            f(value, dist)
        });
        self.distributors
            .entry(TypeId::of::<T>())
            .or_default()
            .push(erased);
        self
    }

    pub(crate) fn collect<T: Archivable>(&self, value: &T, ar: &mut OutputArchive<'_>) -> Result<()> {
        if let Some(list) = self.collectors.get(&TypeId::of::<T>()) {
            for collector in list {
                collector(value, &mut *ar)?;
            }
        }
        Ok(())
    }

    pub(crate) fn distribute<T: Archivable>(
        &self,
        value: &mut T,
        dist: &Distribution<'_>,
    ) -> Result<()> {
        if let Some(list) = self.distributors.get(&TypeId::of::<T>()) {
            for distributor in list {
                distributor(&mut *value, dist)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names.len())
            .field("collectors", &self.collectors.values().map(Vec::len).sum::<usize>())
            .field(
                "distributors",
                &self.distributors.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}
