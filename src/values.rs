use crate::array::GuestArray;
use crate::enum_accessors;
use crate::handle::GuestHandle;
use crate::opaque::OpaqueToken;
use core::fmt;
use std::any::Any;
use std::rc::Rc;

/// A scalar value crossing the host/guest boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    /// A 32-bit integer. Guest pointers travel as this type.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float.
    ///
    /// Note that the raw bits of the float are stored here, and you can use
    /// `f32::from_bits` to create an `f32` value.
    F32(u32),
    /// A 64-bit float.
    ///
    /// Note that the raw bits of the float are stored here, and you can use
    /// `f64::from_bits` to create an `f64` value.
    F64(u64),
}

impl Val {
    /// Reinterpret this value as a guest heap pointer, if it has pointer
    /// shape.
    #[inline]
    pub fn as_pointer(&self) -> Option<u32> {
        match self {
            Val::I32(v) => Some(*v as u32),
            _ => None,
        }
    }

    enum_accessors! {
        e
        (I32(i32) i32 unwrap_i32 *e)
        (I64(i64) i64 unwrap_i64 *e)
        (F32(f32) f32 unwrap_f32 f32::from_bits(*e))
        (F64(f64) f64 unwrap_f64 f64::from_bits(*e))
    }
}

impl From<i32> for Val {
    #[inline]
    fn from(val: i32) -> Val {
        Val::I32(val)
    }
}

impl From<u32> for Val {
    #[inline]
    fn from(val: u32) -> Val {
        Val::I32(val as i32)
    }
}

impl From<i64> for Val {
    #[inline]
    fn from(val: i64) -> Val {
        Val::I64(val)
    }
}

impl From<f32> for Val {
    #[inline]
    fn from(val: f32) -> Val {
        Val::F32(val.to_bits())
    }
}

impl From<f64> for Val {
    #[inline]
    fn from(val: f64) -> Val {
        Val::F64(val.to_bits())
    }
}

/// A host argument before marshalling into the guest calling convention.
///
/// Marshalling maps each variant to one scalar: handles and arrays pass
/// their stored pointer, opaque tokens pass their integer, strings are
/// allocated as fresh guest strings whose reference the callee adopts, and
/// plain values pass through unchanged.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Val(Val),
    Str(&'a str),
    Handle(&'a GuestHandle),
    Array(&'a GuestArray),
    Opaque(OpaqueToken),
}

impl From<i32> for Arg<'_> {
    #[inline]
    fn from(val: i32) -> Self {
        Arg::Val(Val::I32(val))
    }
}

impl From<i64> for Arg<'_> {
    #[inline]
    fn from(val: i64) -> Self {
        Arg::Val(Val::I64(val))
    }
}

impl From<f32> for Arg<'_> {
    #[inline]
    fn from(val: f32) -> Self {
        Arg::Val(val.into())
    }
}

impl From<f64> for Arg<'_> {
    #[inline]
    fn from(val: f64) -> Self {
        Arg::Val(val.into())
    }
}

impl From<Val> for Arg<'_> {
    #[inline]
    fn from(val: Val) -> Self {
        Arg::Val(val)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    #[inline]
    fn from(val: &'a str) -> Self {
        Arg::Str(val)
    }
}

impl<'a> From<&'a GuestHandle> for Arg<'a> {
    #[inline]
    fn from(val: &'a GuestHandle) -> Self {
        Arg::Handle(val)
    }
}

impl<'a> From<&'a GuestArray> for Arg<'a> {
    #[inline]
    fn from(val: &'a GuestArray) -> Self {
        Arg::Array(val)
    }
}

impl From<OpaqueToken> for Arg<'_> {
    #[inline]
    fn from(val: OpaqueToken) -> Self {
        Arg::Opaque(val)
    }
}

/// A tagged hint selecting how a guest return value is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Decode as a guest string.
    String,
    /// Decode as a raw array buffer.
    Bytes,
    /// Wrap as an instance of the named exported class.
    Class(String),
    /// Decode as a guest array, optionally hinting the element target.
    List(Option<Box<Target>>),
    /// Look the scalar up in the module's opaque-value registry.
    Opaque,
}

impl Target {
    pub fn class(name: impl Into<String>) -> Self {
        Target::Class(name.into())
    }

    pub fn list() -> Self {
        Target::List(None)
    }

    pub fn list_of(element: Target) -> Self {
        Target::List(Some(Box::new(element)))
    }
}

/// A guest value after resolution against a [`Target`].
pub enum Resolved {
    Scalar(Val),
    Str(String),
    Bytes(Vec<u8>),
    Handle(GuestHandle),
    Array(GuestArray),
    Opaque(Rc<dyn Any>),
}

impl Resolved {
    enum_accessors! {
        e
        (Scalar(Val) scalar unwrap_scalar *e)
        (Str(&str) str unwrap_str e.as_str())
        (Bytes(&[u8]) bytes unwrap_bytes e.as_slice())
        (Handle(&GuestHandle) handle unwrap_handle e)
        (Array(&GuestArray) array unwrap_array e)
        (Opaque(&Rc<dyn Any>) opaque unwrap_opaque e)
    }

    /// Consume this value, returning the handle inside.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a handle.
    pub fn into_handle(self) -> GuestHandle {
        match self {
            Resolved::Handle(handle) => handle,
            _ => panic!("expected a guest handle"),
        }
    }

    /// Consume this value, returning the array inside.
    ///
    /// # Panics
    ///
    /// Panics if the value is not an array.
    pub fn into_array(self) -> GuestArray {
        match self {
            Resolved::Array(array) => array,
            _ => panic!("expected a guest array"),
        }
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Resolved::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Resolved::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Resolved::Handle(h) => f.debug_tuple("Handle").field(h).finish(),
            Resolved::Array(a) => f.debug_tuple("Array").field(a).finish(),
            Resolved::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn val_pointer_shape() {
        assert_eq!(Val::I32(-1).as_pointer(), Some(u32::MAX));
        assert_eq!(Val::from(0x1000_u32), Val::I32(0x1000));
        assert_eq!(Val::I64(3).as_pointer(), None);
    }

    #[test]
    fn val_accessors() {
        assert_eq!(Val::from(13_i32).i32(), Some(13));
        assert_eq!(Val::from(2.5_f64).unwrap_f64(), 2.5);
        assert_eq!(Val::from(2.5_f64).i32(), None);
    }

    #[test]
    fn target_constructors() {
        assert_eq!(Target::class("Foo"), Target::Class("Foo".to_string()));
        assert_eq!(
            Target::list_of(Target::String),
            Target::List(Some(Box::new(Target::String)))
        );
    }
}
