//! Reads and writes of guest heap objects: headers, strings, and raw
//! array-buffer payloads.

use crate::instance::GuestInstance;
use crate::values::Val;
use crate::{Error, Result, ARRAYBUFFER_ID, REFCOUNT_OFFSET, SIZE_OFFSET, STRING_ID};

/// The three header fields stored immediately before a payload pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub refcount: u32,
    pub type_id: u32,
    pub size: u32,
}

pub(crate) fn read_u32(instance: &dyn GuestInstance, ptr: u32) -> Result<u32> {
    let bytes = instance.read_memory(ptr, 4)?;
    let bytes: [u8; 4] = bytes[..]
        .try_into()
        .map_err(|_| Error::Instance(format!("short memory read at {ptr:#x}")))?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn write_u32(instance: &mut dyn GuestInstance, ptr: u32, value: u32) -> Result<()> {
    instance.write_memory(ptr, &value.to_le_bytes())
}

/// Raw three-field read of the header preceding `ptr`.
pub(crate) fn header(instance: &dyn GuestInstance, ptr: u32) -> Result<ObjectHeader> {
    let bytes = instance.read_memory(ptr.wrapping_sub(REFCOUNT_OFFSET), REFCOUNT_OFFSET)?;
    if bytes.len() < REFCOUNT_OFFSET as usize {
        return Err(Error::Instance(format!("short header read at {ptr:#x}")));
    }
    let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
    Ok(ObjectHeader {
        refcount: word(0),
        type_id: word(1),
        size: word(2),
    })
}

/// Decode the string object at `ptr`.
///
/// The payload is UTF-16LE without a BOM; the header size field is the byte
/// length. A zero-length payload decodes to the empty string.
pub(crate) fn load_string(instance: &dyn GuestInstance, ptr: u32) -> Result<String> {
    let bytes = load_typed_bytes(instance, ptr, STRING_ID)?;
    Ok(decode_utf16le(&bytes))
}

/// Copy the raw payload of the array buffer at `ptr`.
pub(crate) fn load_bytes(instance: &dyn GuestInstance, ptr: u32) -> Result<Vec<u8>> {
    load_typed_bytes(instance, ptr, ARRAYBUFFER_ID)
}

fn load_typed_bytes(instance: &dyn GuestInstance, ptr: u32, need_type: u32) -> Result<Vec<u8>> {
    let header = header(instance, ptr)?;
    if header.type_id != need_type {
        return Err(Error::TypeMismatch {
            expected: need_type,
            found: header.type_id,
        });
    }
    if header.size == 0 {
        return Ok(Vec::new());
    }
    Ok(instance.read_memory(ptr, header.size)?.into_owned())
}

/// Allocate a guest object of `type_id` holding `bytes`.
///
/// Calls the guest allocator, copies the payload in, and updates the size
/// field to match the bytes written. The returned pointer carries whatever
/// refcount the allocator established (one, by convention).
pub(crate) fn alloc_typed_bytes(
    instance: &mut dyn GuestInstance,
    allocator: &str,
    bytes: &[u8],
    type_id: u32,
) -> Result<u32> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Instance("payload exceeds 32-bit address space".to_string()))?;
    let result = instance.call(allocator, &[Val::from(len), Val::from(type_id)])?;
    let ptr = result
        .and_then(|v| v.as_pointer())
        .ok_or_else(|| Error::Instance(format!("{allocator} returned no pointer")))?;
    if !bytes.is_empty() {
        instance.write_memory(ptr, bytes)?;
    }
    write_u32(instance, ptr.wrapping_sub(SIZE_OFFSET), len)?;
    Ok(ptr)
}

/// Allocate a guest string with the UTF-16LE encoding of `text`.
pub(crate) fn alloc_string(
    instance: &mut dyn GuestInstance,
    allocator: &str,
    text: &str,
) -> Result<u32> {
    alloc_typed_bytes(instance, allocator, &encode_utf16le(text), STRING_ID)
}

fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    // Guest strings may legally contain unpaired surrogates.
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_round_trip() {
        for text in ["", "foo", "grüße", "数字", "a\u{1F600}b"] {
            assert_eq!(decode_utf16le(&encode_utf16le(text)), text);
        }
    }

    #[test]
    fn utf16_no_bom() {
        assert_eq!(encode_utf16le("A"), vec![0x41, 0x00]);
    }

    #[test]
    fn empty_payload_is_empty_string() {
        assert_eq!(decode_utf16le(&[]), "");
    }
}
