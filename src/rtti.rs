//! The guest's runtime type information table: a contiguous region holding
//! `[count][flags, base_id]*`, addressed by the `__rtti_base` module global.

use crate::codec::read_u32;
use crate::instance::GuestInstance;
use crate::{Error, Result, ID_OFFSET, RTTI_BASE_GLOBAL};
use hashbrown::HashMap;

/// Which flag bit layout the guest toolchain emitted.
///
/// The layout shifted between toolchain generations and cannot be probed
/// from the table itself, so the embedder states it at module construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagSchema {
    /// The original layout: value alignment starts at bit 5, no
    /// static-array flag.
    V1,
    /// Current layout: a static-array flag at bit 2 shifts every
    /// following bit up by one (value alignment starts at bit 6).
    #[default]
    V2,
}

impl FlagSchema {
    fn bit(self, flag: TypeFlag) -> Option<u32> {
        match self {
            FlagSchema::V1 => match flag {
                TypeFlag::ArrayBufferView => Some(0),
                TypeFlag::Array => Some(1),
                TypeFlag::StaticArray => None,
                TypeFlag::Set => Some(2),
                TypeFlag::Map => Some(3),
                TypeFlag::ValSigned => Some(10),
                TypeFlag::ValFloat => Some(11),
                TypeFlag::ValNullable => Some(12),
                TypeFlag::ValManaged => Some(13),
                TypeFlag::KeySigned => Some(19),
                TypeFlag::KeyFloat => Some(20),
                TypeFlag::KeyNullable => Some(21),
                TypeFlag::KeyManaged => Some(22),
            },
            FlagSchema::V2 => match flag {
                TypeFlag::ArrayBufferView => Some(0),
                TypeFlag::Array => Some(1),
                TypeFlag::StaticArray => Some(2),
                TypeFlag::Set => Some(3),
                TypeFlag::Map => Some(4),
                TypeFlag::ValSigned => Some(11),
                TypeFlag::ValFloat => Some(12),
                TypeFlag::ValNullable => Some(13),
                TypeFlag::ValManaged => Some(14),
                TypeFlag::KeySigned => Some(20),
                TypeFlag::KeyFloat => Some(21),
                TypeFlag::KeyNullable => Some(22),
                TypeFlag::KeyManaged => Some(23),
            },
        }
    }

    pub(crate) fn val_align_offset(self) -> u32 {
        match self {
            FlagSchema::V1 => 5,
            FlagSchema::V2 => 6,
        }
    }

    pub(crate) fn key_align_offset(self) -> u32 {
        match self {
            FlagSchema::V1 => 14,
            FlagSchema::V2 => 15,
        }
    }
}

/// A predicate on a type's RTTI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFlag {
    ArrayBufferView,
    Array,
    StaticArray,
    Set,
    Map,
    ValSigned,
    ValFloat,
    ValNullable,
    ValManaged,
    KeySigned,
    KeyFloat,
    KeyNullable,
    KeyManaged,
}

/// One decoded entry of the RTTI table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttiType {
    pub id: u32,
    pub flags: u32,
    pub base_id: u32,
    schema: FlagSchema,
}

impl RttiType {
    pub fn has(&self, flag: TypeFlag) -> bool {
        match self.schema.bit(flag) {
            Some(bit) => self.flags & (1 << bit) != 0,
            // A flag the selected layout does not encode is never set.
            None => false,
        }
    }

    /// Whether a guest pointer of this type is an allocatable array shape.
    pub fn is_array_like(&self) -> bool {
        self.has(TypeFlag::ArrayBufferView) || self.has(TypeFlag::Array)
    }

    /// Log2 of the element scalar size in bytes, or −1 when the type
    /// carries no alignment bits.
    pub fn value_align(&self) -> i32 {
        align_from_bits(self.flags >> self.schema.val_align_offset())
    }

    /// Log2 of the key scalar size in bytes for map-like types, or −1.
    pub fn key_align(&self) -> i32 {
        align_from_bits(self.flags >> self.schema.key_align_offset())
    }
}

fn align_from_bits(bits: u32) -> i32 {
    31 - (bits & 31).leading_zeros() as i32
}

/// Lazy reader over the table. The table is read-only after instantiation,
/// so decoded entries are memoized forever.
pub(crate) struct RttiResolver {
    schema: FlagSchema,
    table: Option<(u32, u32)>,
    entries: HashMap<u32, RttiType>,
}

impl RttiResolver {
    pub(crate) fn new(schema: FlagSchema) -> Self {
        Self {
            schema,
            table: None,
            entries: HashMap::new(),
        }
    }

    /// Resolve the table base and entry count, reading the base global on
    /// first use.
    fn table(&mut self, instance: &dyn GuestInstance) -> Result<(u32, u32)> {
        if let Some(table) = self.table {
            return Ok(table);
        }
        let base = instance
            .global(RTTI_BASE_GLOBAL)
            .ok()
            .flatten()
            .and_then(|v| v.as_pointer())
            .ok_or(Error::RttiUnavailable)?;
        if base == 0 {
            return Err(Error::RttiUnavailable);
        }
        let count = read_u32(instance, base).map_err(|_| Error::RttiUnavailable)?;
        tracing::trace!(base, count, "located RTTI table");
        self.table = Some((base, count));
        Ok((base, count))
    }

    /// Bounds-checked lookup of the entry for `id`.
    pub(crate) fn load_type(&mut self, instance: &dyn GuestInstance, id: u32) -> Result<RttiType> {
        if let Some(ty) = self.entries.get(&id) {
            return Ok(*ty);
        }
        let (base, count) = self.table(instance)?;
        if id >= count {
            return Err(Error::UnknownTypeId(id));
        }
        let entry = base + 4 + id * 8;
        let flags = read_u32(instance, entry).map_err(|_| Error::RttiUnavailable)?;
        let base_id = read_u32(instance, entry + 4).map_err(|_| Error::RttiUnavailable)?;
        let ty = RttiType {
            id,
            flags,
            base_id,
            schema: self.schema,
        };
        self.entries.insert(id, ty);
        Ok(ty)
    }

    /// Classify the object at `ptr` with a single header read.
    pub(crate) fn type_of(&mut self, instance: &dyn GuestInstance, ptr: u32) -> Result<RttiType> {
        let id = read_u32(instance, ptr.wrapping_sub(ID_OFFSET))?;
        self.load_type(instance, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(flags: u32, schema: FlagSchema) -> RttiType {
        RttiType {
            id: 3,
            flags,
            base_id: 0,
            schema,
        }
    }

    #[test]
    fn v2_flag_positions() {
        // Array<u8>: view + array + 1-byte alignment.
        let t = ty(0b11 | 1 << 6, FlagSchema::V2);
        assert!(t.has(TypeFlag::ArrayBufferView));
        assert!(t.has(TypeFlag::Array));
        assert!(!t.has(TypeFlag::StaticArray));
        assert!(!t.has(TypeFlag::ValManaged));
        assert_eq!(t.value_align(), 0);

        let t = ty(1 << 2, FlagSchema::V2);
        assert!(t.has(TypeFlag::StaticArray));
    }

    #[test]
    fn v1_flag_positions() {
        // Array<i32>: view + array + 4-byte signed alignment.
        let t = ty(0b11 | 1 << 7 | 1 << 10, FlagSchema::V1);
        assert!(t.is_array_like());
        assert!(t.has(TypeFlag::ValSigned));
        assert_eq!(t.value_align(), 2);
        // The static-array flag does not exist in this layout.
        assert!(!t.has(TypeFlag::StaticArray));
        // Bit 2 is the set flag here instead.
        assert!(!t.has(TypeFlag::Set));
    }

    #[test]
    fn value_align_without_bits_is_negative() {
        let t = ty(0, FlagSchema::V2);
        assert_eq!(t.value_align(), -1);
        assert_eq!(t.key_align(), -1);
    }

    #[test]
    fn managed_pointer_elements() {
        // Array<Ref>: view + array + 4-byte alignment + managed values.
        let flags = 0b11 | 1 << 8 | 1 << 14;
        let t = ty(flags, FlagSchema::V2);
        assert!(t.has(TypeFlag::ValManaged));
        assert_eq!(t.value_align(), 2);
    }

    #[test]
    fn key_align_is_read_past_the_value_bits() {
        // Map<i32, _>: 4-byte keys in the current layout (offset 15).
        let t = ty(1 << 4 | 1 << 17, FlagSchema::V2);
        assert!(t.has(TypeFlag::Map));
        assert_eq!(t.key_align(), 2);
    }
}
