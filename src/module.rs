//! The module façade: the single entry point binding one instantiated guest
//! module.

use crate::array::GuestArray;
use crate::codec::{self, ObjectHeader};
use crate::handle::{GuestHandle, HandleKind};
use crate::instance::GuestInstance;
use crate::opaque::{OpaqueRegistry, OpaqueToken};
use crate::rtti::{FlagSchema, RttiResolver, RttiType};
use crate::values::{Arg, Resolved, Target, Val};
use crate::view::ElemView;
use crate::wrapper::{partition_exports, ExportMap, GuestClass};
use crate::{Error, Result, GUEST_RELEASE, GUEST_RETAIN, STRING_ID};
use smallvec::SmallVec;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Per-module knobs fixed at instantiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleOptions {
    /// Which RTTI flag bit layout the guest toolchain emitted. This cannot
    /// be probed from the module; state it explicitly when binding modules
    /// built by older toolchains.
    pub flag_schema: FlagSchema,
}

/// A bound guest module.
///
/// Cheap to clone; all clones share the same instance, type cache, and
/// opaque-value registry. The module (and everything derived from it) is
/// single-threaded: calls into the guest are blocking, and nothing here
/// synchronizes.
#[derive(Clone)]
pub struct Module(Rc<ModuleInner>);

pub(crate) struct ModuleInner {
    instance: RefCell<Box<dyn GuestInstance>>,
    rtti: RefCell<RttiResolver>,
    opaque: RefCell<OpaqueRegistry>,
    exports: ExportMap,
}

impl Module {
    /// Bind an instantiated module, walking its exports once to synthesize
    /// classes and top-level functions.
    pub fn new(instance: Box<dyn GuestInstance>, options: ModuleOptions) -> Self {
        let exports = partition_exports(&instance.exports());
        tracing::debug!(
            classes = exports.classes.len(),
            functions = exports.functions.len(),
            ?options,
            "bound module exports"
        );
        Self(Rc::new(ModuleInner {
            instance: RefCell::new(instance),
            rtti: RefCell::new(RttiResolver::new(options.flag_schema)),
            opaque: RefCell::new(OpaqueRegistry::new()),
            exports,
        }))
    }

    /// Borrow the underlying engine instance.
    pub fn instance(&self) -> Ref<'_, Box<dyn GuestInstance>> {
        self.0.instance.borrow()
    }

    /// Mutably borrow the underlying engine instance.
    pub fn instance_mut(&self) -> RefMut<'_, Box<dyn GuestInstance>> {
        self.0.instance.borrow_mut()
    }

    // ------------------------------------------------------------------
    // Guest runtime shortcuts.

    /// Allocate a raw guest object of `size` payload bytes.
    pub fn alloc(&self, size: u32, type_id: u32) -> Result<u32> {
        self.0.alloc(size, type_id)
    }

    /// Increment the refcount of `ptr`. Returns the same pointer.
    pub fn retain(&self, ptr: u32) -> Result<u32> {
        self.0.retain(ptr)
    }

    /// Decrement the refcount of `ptr`. Never call this on a pointer whose
    /// handle has already been dropped; the handle released it.
    pub fn release(&self, ptr: u32) -> Result<()> {
        self.0.release(ptr)
    }

    // ------------------------------------------------------------------
    // Low-level helpers.

    /// The stored pointer of a handle.
    pub fn get_pointer(&self, handle: &GuestHandle) -> u32 {
        handle.pointer()
    }

    /// Wrap a raw guest pointer in an owning handle with no class attached.
    ///
    /// Takes a retain; the object stays alive at least as long as the
    /// handle.
    pub fn wrap_pointer(&self, ptr: u32) -> Result<GuestHandle> {
        GuestHandle::create(self.0.clone(), ptr, HandleKind::Object)
    }

    /// Classify the object at `ptr` through the RTTI table.
    pub fn get_type_of(&self, ptr: u32) -> Result<RttiType> {
        self.0.type_of(ptr)
    }

    /// Current refcount from the header of `ptr`.
    pub fn get_refcount_of(&self, ptr: u32) -> Result<u32> {
        Ok(self.0.header(ptr)?.refcount)
    }

    /// Bounds-checked RTTI entry lookup.
    pub fn load_type(&self, type_id: u32) -> Result<RttiType> {
        self.0.load_type(type_id)
    }

    /// Raw header read of the object at `ptr`.
    pub fn header(&self, ptr: u32) -> Result<ObjectHeader> {
        self.0.header(ptr)
    }

    /// Decode the guest string at `ptr`.
    pub fn load_string(&self, ptr: u32) -> Result<String> {
        self.0.load_string(ptr)
    }

    /// Copy out the raw payload of the array buffer at `ptr`.
    pub fn load_bytes(&self, ptr: u32) -> Result<Vec<u8>> {
        self.0.load_bytes(ptr)
    }

    /// Allocate a guest string. The fresh reference is unowned; pass it on
    /// or release it.
    pub fn alloc_string(&self, text: &str) -> Result<u32> {
        self.0.alloc_string(text)
    }

    /// Allocate a guest array buffer holding `bytes`.
    pub fn alloc_arraybuffer(&self, bytes: &[u8]) -> Result<u32> {
        self.0.alloc_arraybuffer(bytes)
    }

    // ------------------------------------------------------------------
    // Resolution.

    /// Decode a guest scalar against a target hint.
    ///
    /// With no hint the target is auto-detected from the object's type:
    /// array types resolve as arrays and strings as strings; any other
    /// type needs an explicit hint.
    pub fn resolve(&self, value: Val, target: Option<&Target>) -> Result<Resolved> {
        self.0.resolve(value, target)
    }

    /// Wrap the existing guest array at `ptr`.
    pub fn resolve_array(&self, ptr: u32) -> Result<GuestArray> {
        GuestArray::resolve(&self.0, ptr, None)
    }

    /// Allocate a guest array of `type_id` from host values.
    pub fn alloc_array(&self, type_id: u32, values: &[Arg<'_>]) -> Result<GuestArray> {
        GuestArray::allocate(&self.0, type_id, values)
    }

    // ------------------------------------------------------------------
    // Opaque values.

    /// Register a host value for round-tripping through the guest as an
    /// integer token. The registry holds the value weakly: once the host
    /// drops its last strong reference, lookups fail as expired.
    pub fn register_opaque_value(&self, value: &Rc<dyn std::any::Any>) -> OpaqueToken {
        self.0.opaque.borrow_mut().register_weak(value)
    }

    /// Register a host value the registry itself keeps alive. The strong
    /// fallback for values without an outside owner.
    pub fn register_opaque_owned(&self, value: Rc<dyn std::any::Any>) -> OpaqueToken {
        self.0.opaque.borrow_mut().register_strong(value)
    }

    // ------------------------------------------------------------------
    // Synthesized surface.

    /// Call a top-level exported function, returning the raw scalar.
    pub fn invoke(&self, name: &str, args: &[Arg<'_>]) -> Result<Option<Val>> {
        let export = self.0.function_export(name)?;
        let vals = self.0.marshal_args(None, args)?;
        self.0.call_export(export, &vals)
    }

    /// Call a top-level exported function and resolve its result.
    pub fn invoke_as(&self, name: &str, args: &[Arg<'_>], target: &Target) -> Result<Resolved> {
        let result = self
            .invoke(name, args)?
            .ok_or_else(|| Error::Instance(format!("{name} returned no value")))?;
        self.0.resolve(result, Some(target))
    }

    /// Construct an instance of an exported class.
    ///
    /// The constructor is called with `0` for the receiver ("no preallocated
    /// this") and hands back an already-retained reference, which the new
    /// handle adopts.
    pub fn construct(&self, class: &str, args: &[Arg<'_>]) -> Result<GuestHandle> {
        let ctor = self.0.class(class)?.constructor_export()?;
        let mut vals = self.0.marshal_args(None, args)?;
        vals.insert(0, Val::I32(0));
        let result = self.0.call_export(ctor, &vals)?;
        let ptr = result
            .and_then(|v| v.as_pointer())
            .ok_or_else(|| Error::Instance(format!("{class} constructor returned no pointer")))?;
        Ok(GuestHandle::adopt(
            self.0.clone(),
            ptr,
            HandleKind::Instance(class.to_string()),
        ))
    }

    /// Descriptor of an exported class.
    pub fn class(&self, name: &str) -> Result<&GuestClass> {
        self.0.class(name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.0.exports.classes.keys().map(String::as_str)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.0.exports.functions.keys().map(String::as_str)
    }

    /// Fallback lookup: the current value of a module global.
    pub fn global(&self, name: &str) -> Result<Val> {
        self.0
            .instance
            .borrow()
            .global(name)?
            .ok_or_else(|| Error::MissingExport(name.to_string()))
    }
}

impl ModuleInner {
    // ------------------------------------------------------------------
    // Memory plumbing. Each operation borrows the instance for exactly its
    // own duration; nothing holds a borrow across a guest call.

    pub(crate) fn read_u32(&self, ptr: u32) -> Result<u32> {
        let instance = self.instance.borrow();
        codec::read_u32(&**instance, ptr)
    }

    pub(crate) fn write_u32(&self, ptr: u32, value: u32) -> Result<()> {
        let mut instance = self.instance.borrow_mut();
        codec::write_u32(&mut **instance, ptr, value)
    }

    pub(crate) fn header(&self, ptr: u32) -> Result<ObjectHeader> {
        let instance = self.instance.borrow();
        codec::header(&**instance, ptr)
    }

    pub(crate) fn load_string(&self, ptr: u32) -> Result<String> {
        let instance = self.instance.borrow();
        codec::load_string(&**instance, ptr)
    }

    pub(crate) fn load_bytes(&self, ptr: u32) -> Result<Vec<u8>> {
        let instance = self.instance.borrow();
        codec::load_bytes(&**instance, ptr)
    }

    pub(crate) fn load_elem(&self, view: &ElemView, index: u32) -> Result<i64> {
        let instance = self.instance.borrow();
        view.load(&**instance, index)
    }

    pub(crate) fn store_elem(&self, view: &ElemView, index: u32, value: i64) -> Result<()> {
        let mut instance = self.instance.borrow_mut();
        view.store(&mut **instance, index, value)
    }

    // ------------------------------------------------------------------
    // Guest runtime helpers.

    fn allocator(&self) -> Result<&'static str> {
        self.exports
            .allocator
            .ok_or_else(|| Error::MissingExport(crate::GUEST_NEW.to_string()))
    }

    pub(crate) fn alloc(&self, size: u32, type_id: u32) -> Result<u32> {
        let allocator = self.allocator()?;
        let result = self.call_export(allocator, &[Val::from(size), Val::from(type_id)])?;
        result
            .and_then(|v| v.as_pointer())
            .ok_or_else(|| Error::Instance(format!("{allocator} returned no pointer")))
    }

    pub(crate) fn retain(&self, ptr: u32) -> Result<u32> {
        let result = self.call_export(GUEST_RETAIN, &[Val::from(ptr)])?;
        Ok(result.and_then(|v| v.as_pointer()).unwrap_or(ptr))
    }

    pub(crate) fn release(&self, ptr: u32) -> Result<()> {
        self.call_export(GUEST_RELEASE, &[Val::from(ptr)])?;
        Ok(())
    }

    pub(crate) fn call_export(&self, name: &str, args: &[Val]) -> Result<Option<Val>> {
        let mut instance = self.instance.borrow_mut();
        instance.call(name, args)
    }

    pub(crate) fn alloc_string(&self, text: &str) -> Result<u32> {
        let allocator = self.allocator()?;
        let mut instance = self.instance.borrow_mut();
        codec::alloc_string(&mut **instance, allocator, text)
    }

    pub(crate) fn alloc_arraybuffer(&self, bytes: &[u8]) -> Result<u32> {
        let allocator = self.allocator()?;
        let mut instance = self.instance.borrow_mut();
        codec::alloc_typed_bytes(&mut **instance, allocator, bytes, crate::ARRAYBUFFER_ID)
    }

    // ------------------------------------------------------------------
    // RTTI.

    pub(crate) fn type_of(&self, ptr: u32) -> Result<RttiType> {
        let instance = self.instance.borrow();
        self.rtti.borrow_mut().type_of(&**instance, ptr)
    }

    pub(crate) fn load_type(&self, type_id: u32) -> Result<RttiType> {
        let instance = self.instance.borrow();
        self.rtti.borrow_mut().load_type(&**instance, type_id)
    }

    // ------------------------------------------------------------------
    // Marshalling and resolution.

    /// Map host arguments into the guest calling convention.
    ///
    /// Strings become fresh guest strings whose reference the callee
    /// adopts; the host does not release them after the call.
    pub(crate) fn marshal_args(
        &self,
        receiver: Option<u32>,
        args: &[Arg<'_>],
    ) -> Result<SmallVec<[Val; 8]>> {
        let mut vals = SmallVec::new();
        if let Some(ptr) = receiver {
            vals.push(Val::from(ptr));
        }
        for arg in args {
            vals.push(match arg {
                Arg::Val(v) => *v,
                Arg::Str(s) => Val::from(self.alloc_string(s)?),
                Arg::Handle(h) => Val::from(h.pointer()),
                Arg::Array(a) => Val::from(a.pointer()),
                Arg::Opaque(t) => Val::from(t.as_u32()),
            });
        }
        Ok(vals)
    }

    pub(crate) fn resolve(
        self: &Rc<Self>,
        value: Val,
        target: Option<&Target>,
    ) -> Result<Resolved> {
        let raw = value.as_pointer().ok_or(Error::UnsupportedTarget)?;
        match target {
            Some(target) => self.resolve_with(raw, target),
            None => {
                let ty = self.type_of(raw)?;
                if ty.is_array_like() {
                    self.resolve_with(raw, &Target::List(None))
                } else if ty.id == STRING_ID {
                    self.resolve_with(raw, &Target::String)
                } else {
                    Err(Error::UnsupportedTarget)
                }
            }
        }
    }

    fn resolve_with(self: &Rc<Self>, raw: u32, target: &Target) -> Result<Resolved> {
        match target {
            Target::Opaque => Ok(Resolved::Opaque(self.opaque.borrow().lookup(raw)?)),
            Target::String => Ok(Resolved::Str(self.load_string(raw)?)),
            Target::Bytes => Ok(Resolved::Bytes(self.load_bytes(raw)?)),
            Target::List(elem) => Ok(Resolved::Array(GuestArray::resolve(
                self,
                raw,
                elem.as_deref().cloned(),
            )?)),
            Target::Class(name) => Ok(Resolved::Handle(GuestHandle::create(
                self.clone(),
                raw,
                HandleKind::Instance(name.clone()),
            )?)),
        }
    }

    pub(crate) fn class(&self, name: &str) -> Result<&GuestClass> {
        self.exports
            .classes
            .get(name)
            .ok_or_else(|| Error::MissingExport(name.to_string()))
    }

    fn function_export(&self, name: &str) -> Result<&str> {
        self.exports
            .functions
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingExport(name.to_string()))
    }
}
