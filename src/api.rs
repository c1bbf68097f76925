//! Convenience entry points over slices and files.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use crate::archive::{InputArchive, OutputArchive};
use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::registry::Registry;
use crate::results::Results;
use crate::visitor::Archivable;

/// Outcome of a save into a caller buffer.
#[derive(Debug, Clone)]
pub struct Saved {
    /// Bytes written at the start of the buffer.
    pub len: usize,
    /// Everything recorded during the save.
    pub results: Results,
}

/// Saves `value` into `buf` with an empty registry and the default configuration.
pub fn save<T: Archivable>(buf: &mut [u8], value: &T) -> Saved {
    save_with(buf, value, &Registry::new(), ArchiveConfig::default())
}

/// Saves `value` into `buf` using `registry` for collectors.
pub fn save_with<T: Archivable>(
    buf: &mut [u8],
    value: &T,
    registry: &Registry,
    config: ArchiveConfig,
) -> Saved {
    let mut ar = OutputArchive::new(buf, registry, config);
    let results = ar.save(value);
    Saved {
        len: ar.written().len(),
        results,
    }
}

/// Loads `bytes` into `value` with an empty registry and the default configuration.
///
/// Fields missing from the stream keep the values `value` had before the call.
pub fn load<T: Archivable>(bytes: &[u8], value: &mut T) -> Results {
    load_with(bytes, value, &Registry::new(), ArchiveConfig::default())
}

/// Loads `bytes` into `value` using `registry` for name resolution and distributors.
pub fn load_with<T: Archivable>(
    bytes: &[u8],
    value: &mut T,
    registry: &Registry,
    config: ArchiveConfig,
) -> Results {
    InputArchive::new(bytes, registry, config).load(value)
}

/// Saves `value` into a buffer of `capacity` bytes and writes it to `path`.
///
/// The file is written only if no fatal error was recorded; the results are returned either
/// way.
pub fn save_to_file<T, P>(path: P, value: &T, capacity: usize) -> Result<Results>
where
    T: Archivable,
    P: AsRef<Path>,
{
    let mut buf = vec![0u8; capacity];
    let saved = save(&mut buf, value);
    if saved.results.is_ok() {
        let mut file = File::create(path)?;
        file.write_all(&buf[..saved.len])?;
        file.sync_all()?;
    }
    Ok(saved.results)
}

/// Memory-maps `path` and loads it into `value`.
pub fn load_from_file<T, P>(path: P, value: &mut T) -> Result<Results>
where
    T: Archivable,
    P: AsRef<Path>,
{
    with_mapped_file(path.as_ref(), |bytes| load(bytes, value))
}

/// Memory-maps `path` read-only and hands its bytes to `f`.
///
/// An empty file is passed as an empty slice; mapping zero bytes fails on some platforms.
pub(crate) fn with_mapped_file<R>(path: &Path, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(f(&[]));
    }
    // Safety: the mapping is read-only and dropped before returning. A concurrent writer
    // truncating the file is outside what this function guards against.
    #[allow(unsafe_code)]
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(f(&mmap))
}
