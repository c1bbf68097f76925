//! `Field` implementations for standard Rust types.
//!
//! * Fixed-width numbers and `bool` are scalars: their little-endian bytes are the body.
//! * `String` and [`Serde<T>`] are variable-length: a `len:u32` prefix, then UTF-8 or bincode.
//! * `Vec<T>` and `[T; N]` are arrays of elements.
//! * `Option<T>` is a pointer: `None` is written as a null item with an empty body.

use std::ops::{Deref, DerefMut};

use serde::{de::DeserializeOwned, Serialize};

use crate::archive::{InputArchive, OutputArchive};
use crate::error::{CartonError, Result};
use crate::item::{ItemAttr, ItemInfo};
use crate::version::Version;
use crate::visitor::Field;

fn check_width(info: &ItemInfo, expected: usize) -> Result<()> {
    let found = info.span.body_len();
    if found != expected {
        return Err(CartonError::ItemSizeMismatch {
            name: info.display_name(),
            expected,
            found,
        });
    }
    Ok(())
}

macro_rules! impl_scalar_field {
    ($($t:ty),*) => {
        $(
            impl Field for $t {
                const ATTR: ItemAttr = ItemAttr::SCALAR;

                fn element_size(&self) -> u32 {
                    std::mem::size_of::<$t>() as u32
                }

                fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
                    ar.write_bytes(&self.to_le_bytes());
                    Ok(())
                }

                fn load_body(&mut self, ar: &mut InputArchive<'_>, info: &ItemInfo) -> Result<()> {
                    const WIDTH: usize = std::mem::size_of::<$t>();
                    check_width(info, WIDTH)?;
                    let mut raw = [0u8; WIDTH];
                    raw.copy_from_slice(ar.read_bytes(WIDTH)?);
                    *self = <$t>::from_le_bytes(raw);
                    Ok(())
                }
            }
        )*
    }
}

impl_scalar_field!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Field for bool {
    const ATTR: ItemAttr = ItemAttr::SCALAR;

    fn element_size(&self) -> u32 {
        1
    }

    fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
        ar.write_bytes(&[u8::from(*self)]);
        Ok(())
    }

    fn load_body(&mut self, ar: &mut InputArchive<'_>, info: &ItemInfo) -> Result<()> {
        check_width(info, 1)?;
        *self = ar.read_bytes(1)?[0] != 0;
        Ok(())
    }
}

impl Field for String {
    const ATTR: ItemAttr = ItemAttr::VARIABLE_LENGTH;

    fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
        ar.write_var_bytes(self.as_bytes())
    }

    fn load_body(&mut self, ar: &mut InputArchive<'_>, _info: &ItemInfo) -> Result<()> {
        let raw = ar.read_var_bytes()?;
        let text = std::str::from_utf8(raw)
            .map_err(|e| CartonError::Serialization(format!("invalid UTF-8: {e}")))?;
        self.clear();
        self.push_str(text);
        Ok(())
    }
}

/// Stores any serde value as one opaque variable-length item, encoded with bincode.
///
/// Useful for types that have no field table of their own. The value is not schema tolerant:
/// it loads only if the bincode layout still matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Serde<T>(pub T);

impl<T> Deref for Serde<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Serde<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> Field for Serde<T>
where
    T: Serialize + DeserializeOwned,
{
    const ATTR: ItemAttr = ItemAttr::VARIABLE_LENGTH;

    fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(&self.0, bincode::config::standard())
            .map_err(|e| CartonError::Serialization(e.to_string()))?;
        ar.write_var_bytes(&bytes)
    }

    fn load_body(&mut self, ar: &mut InputArchive<'_>, _info: &ItemInfo) -> Result<()> {
        let raw = ar.read_var_bytes()?;
        let (value, _) = bincode::serde::decode_from_slice(raw, bincode::config::standard())
            .map_err(|e| CartonError::Serialization(e.to_string()))?;
        self.0 = value;
        Ok(())
    }
}

fn element_count_of(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| CartonError::Serialization(format!("{len} elements exceed a u32 count")))
}

impl<T> Field for Vec<T>
where
    T: Field + Default,
{
    const ATTR: ItemAttr = ItemAttr::ARRAY.with(ItemAttr::HAS_VERSION);
    const VERSION: Version = T::VERSION;

    fn element_count(&self) -> u32 {
        u32::try_from(self.len()).unwrap_or(u32::MAX)
    }

    fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
        element_count_of(self.len())?;
        for (index, item) in self.iter().enumerate() {
            ar.element(index, item)?;
        }
        Ok(())
    }

    fn load_body(&mut self, ar: &mut InputArchive<'_>, info: &ItemInfo) -> Result<()> {
        let count = ar.begin_elements(info)?;
        self.clear();
        self.resize_with(count, T::default);
        for (index, slot) in self.iter_mut().enumerate() {
            ar.element(info, index, slot)?;
        }
        Ok(())
    }
}

impl<T, const N: usize> Field for [T; N]
where
    T: Field,
{
    const ATTR: ItemAttr = ItemAttr::ARRAY.with(ItemAttr::HAS_VERSION);
    const VERSION: Version = T::VERSION;

    fn element_count(&self) -> u32 {
        u32::try_from(N).unwrap_or(u32::MAX)
    }

    fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
        element_count_of(N)?;
        for (index, item) in self.iter().enumerate() {
            ar.element(index, item)?;
        }
        Ok(())
    }

    /// Loads `min(N, count)` elements. Slots beyond the stream count keep their values and
    /// stream elements beyond `N` are skipped.
    fn load_body(&mut self, ar: &mut InputArchive<'_>, info: &ItemInfo) -> Result<()> {
        let count = ar.begin_elements(info)?;
        for (index, slot) in self.iter_mut().take(count).enumerate() {
            ar.element(info, index, slot)?;
        }
        Ok(())
    }
}

impl<T> Field for Option<T>
where
    T: Field + Default,
{
    const ATTR: ItemAttr = T::ATTR.with(ItemAttr::POINTER);
    const VERSION: Version = T::VERSION;

    fn is_null(&self) -> bool {
        self.is_none()
    }

    fn element_count(&self) -> u32 {
        self.as_ref().map_or(0, Field::element_count)
    }

    fn element_size(&self) -> u32 {
        self.as_ref().map_or(0, Field::element_size)
    }

    fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
        match self {
            Some(value) => value.save_body(ar),
            None => Ok(()),
        }
    }

    /// A `None` field becomes `Some` only if the nested value loaded completely.
    fn load_body(&mut self, ar: &mut InputArchive<'_>, info: &ItemInfo) -> Result<()> {
        if let Some(value) = self {
            return value.load_body(ar, info);
        }
        ar.take_block_failure();
        let mut value = T::default();
        value.load_body(ar, info)?;
        if !ar.take_block_failure() {
            *self = Some(value);
        }
        Ok(())
    }

    fn load_null(&mut self) {
        *self = None;
    }
}

impl<T> Field for Box<T>
where
    T: Field,
{
    const ATTR: ItemAttr = T::ATTR;
    const VERSION: Version = T::VERSION;

    fn is_null(&self) -> bool {
        (**self).is_null()
    }

    fn element_count(&self) -> u32 {
        (**self).element_count()
    }

    fn element_size(&self) -> u32 {
        (**self).element_size()
    }

    fn save_body(&self, ar: &mut OutputArchive<'_>) -> Result<()> {
        (**self).save_body(ar)
    }

    fn load_body(&mut self, ar: &mut InputArchive<'_>, info: &ItemInfo) -> Result<()> {
        (**self).load_body(ar, info)
    }

    fn load_null(&mut self) {
        (**self).load_null()
    }
}
