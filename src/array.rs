//! Guest arrays: typed views and general arrays, with scalar or managed
//! elements.

use crate::handle::{GuestHandle, HandleKind};
use crate::module::ModuleInner;
use crate::rtti::{RttiType, TypeFlag};
use crate::values::{Arg, Resolved, Target, Val};
use crate::view::{ElemView, ScalarKind};
use crate::{
    Error, Result, ARRAYBUFFER_ID, ARRAY_LENGTH_OFFSET, ARRAY_SIZE, SIZE_OFFSET,
    VIEW_DATALENGTH_OFFSET, VIEW_DATASTART_OFFSET, VIEW_SIZE,
};
use core::fmt;
use std::rc::Rc;

/// A host wrapper over one guest array object.
///
/// The wrapper owns a retain on the array object; element storage lives in
/// the backing buffer the array itself retains. Element accesses go through
/// the instance on every call, so they stay valid across guest calls that
/// grow memory.
pub struct GuestArray {
    handle: GuestHandle,
    length: u32,
    view: ElemView,
    managed: bool,
    elem_target: Option<Target>,
    ty: RttiType,
}

impl GuestArray {
    /// Wrap the existing array object at `ptr`, taking a retain.
    ///
    /// The logical length of a general array comes from its length field;
    /// for a bare typed view it derives from the backing buffer's byte size,
    /// shifted down by the element alignment.
    pub(crate) fn resolve(
        module: &Rc<ModuleInner>,
        ptr: u32,
        elem_target: Option<Target>,
    ) -> Result<Self> {
        let ty = module.type_of(ptr)?;
        Self::resolve_with(module, ptr, ty, elem_target, false)
    }

    pub(crate) fn resolve_with(
        module: &Rc<ModuleInner>,
        ptr: u32,
        ty: RttiType,
        elem_target: Option<Target>,
        adopt: bool,
    ) -> Result<Self> {
        if !ty.is_array_like() {
            return Err(Error::UnsupportedTarget);
        }
        let kind = ScalarKind::select(
            ty.has(TypeFlag::ValFloat),
            ty.value_align(),
            ty.has(TypeFlag::ValSigned),
        )?;
        let data_start = module.read_u32(ptr + VIEW_DATASTART_OFFSET)?;
        let length = if ty.has(TypeFlag::Array) {
            module.read_u32(ptr + ARRAY_LENGTH_OFFSET)?
        } else {
            let buffer_size = module.read_u32(data_start.wrapping_sub(SIZE_OFFSET))?;
            buffer_size >> ty.value_align() as u32
        };
        let handle = if adopt {
            GuestHandle::adopt(module.clone(), ptr, HandleKind::Array)
        } else {
            GuestHandle::create(module.clone(), ptr, HandleKind::Array)?
        };
        Ok(Self {
            handle,
            length,
            view: ElemView {
                kind,
                base: data_start,
            },
            managed: ty.has(TypeFlag::ValManaged),
            elem_target,
            ty,
        })
    }

    /// Allocate a fresh guest array of `type_id` holding `values`.
    ///
    /// The array object takes one retain on its buffer, and each managed
    /// slot takes one retain on its element. String elements are allocated
    /// as guest strings first; anything that is neither a string nor a
    /// handle cannot populate a managed array.
    pub(crate) fn allocate(
        module: &Rc<ModuleInner>,
        type_id: u32,
        values: &[Arg<'_>],
    ) -> Result<Self> {
        let ty = module.load_type(type_id)?;
        if !ty.is_array_like() {
            return Err(Error::InvalidArrayType(type_id));
        }
        let kind = ScalarKind::select(
            ty.has(TypeFlag::ValFloat),
            ty.value_align(),
            ty.has(TypeFlag::ValSigned),
        )?;
        let align = ty.value_align() as u32;
        let length = u32::try_from(values.len())
            .map_err(|_| Error::Instance("array length exceeds 32 bits".to_string()))?;
        let byte_length = length << align;

        let buf = module.alloc(byte_length, ARRAYBUFFER_ID)?;
        let is_array = ty.has(TypeFlag::Array);
        let arr = module.alloc(if is_array { ARRAY_SIZE } else { VIEW_SIZE }, type_id)?;

        // The array owns one retain on its buffer; data start aliases the
        // buffer for a fresh allocation.
        module.retain(buf)?;
        module.write_u32(arr, buf)?;
        module.write_u32(arr + VIEW_DATASTART_OFFSET, buf)?;
        module.write_u32(arr + VIEW_DATALENGTH_OFFSET, byte_length)?;
        if is_array {
            module.write_u32(arr + ARRAY_LENGTH_OFFSET, length)?;
        }

        let view = ElemView { kind, base: buf };
        if ty.has(TypeFlag::ValManaged) {
            for (i, value) in values.iter().enumerate() {
                let elem = match value {
                    Arg::Str(s) => module.alloc_string(s)?,
                    Arg::Handle(h) => h.pointer(),
                    Arg::Array(a) => a.pointer(),
                    _ => return Err(Error::WrongElementType),
                };
                // Each slot owns a retain on its element.
                module.retain(elem)?;
                module.write_u32(buf + i as u32 * 4, elem)?;
            }
        } else {
            for (i, value) in values.iter().enumerate() {
                let scalar = match value {
                    Arg::Val(Val::I32(v)) => *v as i64,
                    Arg::Val(Val::I64(v)) => *v,
                    _ => return Err(Error::WrongElementType),
                };
                module.store_elem(&view, i as u32, scalar)?;
            }
        }
        tracing::trace!(type_id, length, "allocated guest array");

        // The allocation already owns the object's initial reference.
        Self::resolve_with(module, arr, ty, None, true)
    }

    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The guest pointer of the array object itself.
    pub fn pointer(&self) -> u32 {
        self.handle.pointer()
    }

    pub fn handle(&self) -> &GuestHandle {
        &self.handle
    }

    pub fn type_id(&self) -> u32 {
        self.ty.id
    }

    /// Whether element slots hold managed references rather than scalars.
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn kind(&self) -> ScalarKind {
        self.view.kind
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index >= self.length {
            return Err(Error::OutOfBounds {
                index,
                length: self.length,
            });
        }
        Ok(())
    }

    /// Raw element read: the scalar value, or the pointer value of a
    /// managed slot.
    pub fn get(&self, index: u32) -> Result<i64> {
        self.check_index(index)?;
        self.handle.module().load_elem(&self.view, index)
    }

    /// Element read with managed slots resolved through the module.
    ///
    /// `target` overrides the element hint the array was resolved with.
    pub fn get_resolved(&self, index: u32, target: Option<&Target>) -> Result<Resolved> {
        let raw = self.get(index)?;
        if self.managed {
            let hint = target.or(self.elem_target.as_ref());
            self.handle
                .module()
                .resolve(Val::I32(raw as i32), hint)
        } else {
            Ok(Resolved::Scalar(match self.view.kind {
                ScalarKind::U32 => Val::I64(raw),
                _ => Val::I32(raw as i32),
            }))
        }
    }

    /// Scalar element write.
    ///
    /// Managed slots cannot be written through this path; use
    /// [`GuestArray::set_handle`], which keeps the slot's retain straight.
    pub fn set(&self, index: u32, value: i64) -> Result<()> {
        self.check_index(index)?;
        if self.managed {
            return Err(Error::WrongElementType);
        }
        self.handle.module().store_elem(&self.view, index, value)
    }

    /// Managed element write: retains the new element, then releases the
    /// previous occupant. The ordering keeps writing an element back into
    /// its own slot refcount-neutral.
    pub fn set_handle(&self, index: u32, element: &GuestHandle) -> Result<()> {
        self.check_index(index)?;
        if !self.managed {
            return Err(Error::WrongElementType);
        }
        let module = self.handle.module();
        let old = self.get(index)? as u32;
        let new = element.pointer();
        module.retain(new)?;
        module.write_u32(self.view.base + index * 4, new)?;
        if old != 0 {
            module.release(old)?;
        }
        Ok(())
    }

    /// Copy out `[start, end)`, with `end` clamped to the length.
    pub fn slice(&self, start: u32, end: u32) -> Result<Vec<i64>> {
        let end = end.min(self.length);
        if start > end {
            return Ok(Vec::new());
        }
        (start..end).map(|i| self.get(i)).collect()
    }

    /// Overwrite a run of scalar elements starting at `start`.
    pub fn write_slice(&self, start: u32, values: &[i64]) -> Result<()> {
        for (i, value) in values.iter().enumerate() {
            self.set(start + i as u32, *value)?;
        }
        Ok(())
    }

    /// Copy the whole array out as raw element values.
    pub fn to_vec(&self) -> Result<Vec<i64>> {
        self.slice(0, self.length)
    }
}

impl fmt::Debug for GuestArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestArray")
            .field("ptr", &self.pointer())
            .field("length", &self.length)
            .field("kind", &self.view.kind)
            .field("managed", &self.managed)
            .finish()
    }
}
