//! Host-side bindings for WASM modules produced from a managed,
//! reference-counted guest language.
//!
//! The guest runtime owns a structured heap: every managed value is addressed
//! by a pointer to its payload, with a 12-byte header (refcount, type id,
//! payload size) sitting immediately before it. This crate decodes that
//! layout, walks the guest's runtime type information table, and synthesizes
//! host-side wrappers for the classes, strings, and arrays a module exports.
//!
//! The WASM engine itself is deliberately out of scope: it is consumed
//! exclusively through the [`GuestInstance`] capability trait (typed reads
//! and writes of linear memory, calling exports by name, enumerating exports,
//! reading module globals). Any engine that can provide those capabilities
//! can sit underneath a [`Module`].

mod array;
mod codec;
mod errors;
mod handle;
mod instance;
mod module;
mod opaque;
mod rtti;
mod utils;
mod values;
mod view;
mod wrapper;

pub use array::GuestArray;
pub use codec::ObjectHeader;
pub use errors::Error;
pub use handle::GuestHandle;
pub use instance::{ExportKind, GuestInstance};
pub use module::{Module, ModuleOptions};
pub use opaque::OpaqueToken;
pub use rtti::{FlagSchema, RttiType, TypeFlag};
pub use values::{Arg, Resolved, Target, Val};
pub use view::ScalarKind;
pub use wrapper::GuestClass;

pub type Result<T> = core::result::Result<T, Error>;

/// Type id of the raw byte buffer backing strings and arrays.
pub const ARRAYBUFFER_ID: u32 = 0;
/// Type id of guest strings (UTF-16LE payload).
pub const STRING_ID: u32 = 1;
/// Base type id shared by all typed-array views.
pub const ARRAYBUFFERVIEW_ID: u32 = 2;

/// Byte distances from a payload pointer back into its object header.
pub(crate) const REFCOUNT_OFFSET: u32 = 12;
pub(crate) const ID_OFFSET: u32 = 8;
pub(crate) const SIZE_OFFSET: u32 = 4;

/// Typed-array view layout relative to the object pointer.
pub(crate) const VIEW_DATASTART_OFFSET: u32 = 4;
pub(crate) const VIEW_DATALENGTH_OFFSET: u32 = 8;
pub(crate) const VIEW_SIZE: u32 = 12;
/// General arrays extend the view with a logical length word.
pub(crate) const ARRAY_LENGTH_OFFSET: u32 = 12;
pub(crate) const ARRAY_SIZE: u32 = 16;

/// Runtime helper exports of the guest allocator.
pub(crate) const GUEST_NEW: &str = "__new";
pub(crate) const GUEST_ALLOC: &str = "__alloc";
pub(crate) const GUEST_RETAIN: &str = "__retain";
pub(crate) const GUEST_RELEASE: &str = "__release";
/// Module global holding the address of the RTTI table.
pub(crate) const RTTI_BASE_GLOBAL: &str = "__rtti_base";
