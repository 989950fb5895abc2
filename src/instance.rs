use crate::values::Val;
use crate::Result;
use std::borrow::Cow;

/// Classification of a module export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportKind {
    Function,
    Global,
    Memory,
    Table,
}

/// Host-side capabilities over one instantiated guest module.
///
/// This is the only seam between the binding layer and the WASM engine.
/// Everything the bindings do reduces to the operations below: reading and
/// writing linear memory, calling exports by name, enumerating exports, and
/// reading module globals. Implement it once per engine.
///
/// Implementations must hand out the *current* memory on every call; the
/// binding layer never caches a view across guest calls, since any call may
/// grow (and therefore move) linear memory.
pub trait GuestInstance {
    /// Read `len` bytes of linear memory starting at `ptr`.
    ///
    /// The engine may return a borrowed slice or an owned buffer.
    fn read_memory(&self, ptr: u32, len: u32) -> Result<Cow<'_, [u8]>>;

    /// Write `bytes` into linear memory starting at `ptr`.
    fn write_memory(&mut self, ptr: u32, bytes: &[u8]) -> Result<()>;

    /// Call the export named `name`. The guest ABI used by this crate never
    /// returns more than one value.
    fn call(&mut self, name: &str, args: &[Val]) -> Result<Option<Val>>;

    /// Every export of the module, by name and kind.
    fn exports(&self) -> Vec<(String, ExportKind)>;

    /// Read the current value of the module global named `name`, or `None`
    /// if the module has no such global.
    fn global(&self, name: &str) -> Result<Option<Val>>;
}
