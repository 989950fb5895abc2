//! Typed element views over linear memory.
//!
//! A view is the pairing of a base address with a scalar shape. Element
//! accesses go through [`GuestInstance`] on every load and store: linear
//! memory may move whenever the guest runs, so nothing here holds onto it.

use crate::instance::GuestInstance;
use crate::{Error, Result};

/// Scalar shape of one array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

impl ScalarKind {
    /// Select the view shape for an element layout.
    ///
    /// `alignment` is the log2 of the element size in bytes. Float and
    /// 64-bit layouts have no view class and fail with a message naming
    /// the missing facet.
    pub(crate) fn select(is_float: bool, alignment: i32, is_signed: bool) -> Result<Self> {
        if is_float {
            return Err(Error::UnsupportedLayout("float"));
        }
        match (alignment, is_signed) {
            (0, true) => Ok(ScalarKind::I8),
            (0, false) => Ok(ScalarKind::U8),
            (1, true) => Ok(ScalarKind::I16),
            (1, false) => Ok(ScalarKind::U16),
            (2, true) => Ok(ScalarKind::I32),
            (2, false) => Ok(ScalarKind::U32),
            (3, _) => Err(Error::UnsupportedLayout("64-bit")),
            _ => Err(Error::UnsupportedLayout("unknown-alignment")),
        }
    }

    /// Element size in bytes.
    pub fn size(self) -> u32 {
        match self {
            ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 => 2,
            ScalarKind::I32 | ScalarKind::U32 => 4,
        }
    }
}

/// An element view anchored at a data-start address.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ElemView {
    pub(crate) kind: ScalarKind,
    /// Byte address of element 0 in linear memory.
    pub(crate) base: u32,
}

impl ElemView {
    /// Load element `index`, sign-corrected into the common scalar width.
    pub(crate) fn load(&self, instance: &dyn GuestInstance, index: u32) -> Result<i64> {
        let size = self.kind.size();
        let bytes = instance.read_memory(self.base + index * size, size)?;
        if bytes.len() < size as usize {
            return Err(Error::Instance(format!(
                "short element read at index {index}"
            )));
        }
        Ok(match self.kind {
            ScalarKind::I8 => bytes[0] as i8 as i64,
            ScalarKind::U8 => bytes[0] as i64,
            ScalarKind::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            ScalarKind::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            ScalarKind::I32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64
            }
            ScalarKind::U32 => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64
            }
        })
    }

    /// Store `value` into element `index`, truncating to the element width.
    pub(crate) fn store(
        &self,
        instance: &mut dyn GuestInstance,
        index: u32,
        value: i64,
    ) -> Result<()> {
        let size = self.kind.size();
        let bytes = value.to_le_bytes();
        instance.write_memory(self.base + index * size, &bytes[..size as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_selection() {
        assert_eq!(ScalarKind::select(false, 0, false).unwrap(), ScalarKind::U8);
        assert_eq!(ScalarKind::select(false, 1, true).unwrap(), ScalarKind::I16);
        assert_eq!(ScalarKind::select(false, 2, false).unwrap(), ScalarKind::U32);
    }

    #[test]
    fn unsupported_shapes_name_the_facet() {
        let err = ScalarKind::select(true, 2, false).unwrap_err();
        assert!(err.to_string().contains("float"));
        let err = ScalarKind::select(false, 3, true).unwrap_err();
        assert!(err.to_string().contains("64-bit"));
    }

    #[test]
    fn element_sizes() {
        assert_eq!(ScalarKind::I8.size(), 1);
        assert_eq!(ScalarKind::U16.size(), 2);
        assert_eq!(ScalarKind::I32.size(), 4);
    }
}
