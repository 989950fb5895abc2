//! Host-side owning references into the guest heap.

use crate::module::ModuleInner;
use crate::values::{Arg, Resolved, Target, Val};
use crate::wrapper::GuestClass;
use crate::{Error, Result};
use core::fmt;
use std::rc::Rc;

/// What a handle's pointer refers to.
#[derive(Debug, Clone)]
pub(crate) enum HandleKind {
    /// A managed object with no known class.
    Object,
    /// An instance of a named exported class.
    Instance(String),
    /// An array object; usually wrapped further by `GuestArray`.
    Array,
}

/// An owning host reference to one guest heap object.
///
/// A handle holds exactly one retain on its pointer for its whole lifetime:
/// creation retains, destruction releases, and [`GuestHandle::try_clone`]
/// takes a retain of its own. Handles are only produced through module
/// factory paths (construction, resolution, array access); there is no way
/// to fabricate one from a bare integer.
pub struct GuestHandle {
    ptr: u32,
    kind: HandleKind,
    module: Rc<ModuleInner>,
}

impl GuestHandle {
    /// Wrap `ptr`, taking a retain for this handle.
    pub(crate) fn create(module: Rc<ModuleInner>, ptr: u32, kind: HandleKind) -> Result<Self> {
        module.retain(ptr)?;
        Ok(Self { ptr, kind, module })
    }

    /// Wrap `ptr` without retaining: the caller already owns one reference
    /// (constructor results arrive pre-retained).
    pub(crate) fn adopt(module: Rc<ModuleInner>, ptr: u32, kind: HandleKind) -> Self {
        Self { ptr, kind, module }
    }

    pub(crate) fn module(&self) -> &Rc<ModuleInner> {
        &self.module
    }

    /// The guest heap pointer. Stable for the handle's whole lifetime.
    pub fn pointer(&self) -> u32 {
        self.ptr
    }

    /// The exported class this handle was resolved as, if any.
    pub fn class_name(&self) -> Option<&str> {
        match &self.kind {
            HandleKind::Instance(name) => Some(name),
            _ => None,
        }
    }

    /// A second owning handle over the same object, with its own retain.
    pub fn try_clone(&self) -> Result<Self> {
        Self::create(self.module.clone(), self.ptr, self.kind.clone())
    }

    /// Current refcount from the object header.
    pub fn refcount(&self) -> Result<u32> {
        Ok(self.module.header(self.ptr)?.refcount)
    }

    /// Re-resolve this handle's pointer against another target.
    pub fn as_target(&self, target: &Target) -> Result<Resolved> {
        self.module.resolve(Val::from(self.ptr), Some(target))
    }

    fn class(&self) -> Result<&GuestClass> {
        match &self.kind {
            HandleKind::Instance(name) => self.module.class(name),
            _ => Err(Error::UnsupportedTarget),
        }
    }

    /// Call an exported method with this object as the receiver.
    pub fn call(&self, method: &str, args: &[Arg<'_>]) -> Result<Option<Val>> {
        let export = self.class()?.method_export(method)?;
        let vals = self.module.marshal_args(Some(self.ptr), args)?;
        self.module.call_export(export, &vals)
    }

    /// Call a method and resolve its result against `target`.
    pub fn call_as(&self, method: &str, args: &[Arg<'_>], target: &Target) -> Result<Resolved> {
        let result = self.call(method, args)?.ok_or_else(|| {
            Error::Instance(format!("{method} returned no value"))
        })?;
        self.module.resolve(result, Some(target))
    }

    /// Read an accessor property.
    pub fn get(&self, prop: &str) -> Result<Val> {
        let export = self.class()?.getter_export(prop)?;
        let vals = self.module.marshal_args(Some(self.ptr), &[])?;
        self.module
            .call_export(export, &vals)?
            .ok_or_else(|| Error::Instance(format!("get:{prop} returned no value")))
    }

    /// Read an accessor property and resolve the result against `target`.
    pub fn get_as(&self, prop: &str, target: &Target) -> Result<Resolved> {
        let raw = self.get(prop)?;
        self.module.resolve(raw, Some(target))
    }

    /// Write an accessor property.
    pub fn set(&self, prop: &str, value: Arg<'_>) -> Result<()> {
        let export = self.class()?.setter_export(prop)?;
        let vals = self.module.marshal_args(Some(self.ptr), &[value])?;
        self.module.call_export(export, &vals)?;
        Ok(())
    }
}

impl Drop for GuestHandle {
    fn drop(&mut self) {
        // Drop has no error channel; a failed release is diagnostics only.
        if let Err(err) = self.module.release(self.ptr) {
            tracing::debug!(ptr = self.ptr, error = %err, "failed to release guest pointer");
        }
    }
}

impl PartialEq for GuestHandle {
    /// Two handles are equal iff they refer to the same pointer of the
    /// same module.
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && Rc::ptr_eq(&self.module, &other.module)
    }
}

impl Eq for GuestHandle {}

impl fmt::Debug for GuestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestHandle")
            .field("ptr", &self.ptr)
            .field("kind", &self.kind)
            .finish()
    }
}
