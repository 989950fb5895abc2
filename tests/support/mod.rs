//! An in-process stand-in for a compiled guest module: linear memory, a
//! reference-counting bump allocator with lazy block reuse, an RTTI table,
//! and per-test exports registered as closures.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use hostbind::{Error, ExportKind, GuestInstance, Module, ModuleOptions, Val};
use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;

pub const HEADER_SIZE: u32 = 12;

// Flag bit layout emitted by current guest toolchains.
pub const ARRAYBUFFERVIEW: u32 = 1 << 0;
pub const ARRAY: u32 = 1 << 1;
pub const VAL_ALIGN_OFFSET: u32 = 6;
pub const VAL_SIGNED: u32 = 1 << 11;
pub const VAL_FLOAT: u32 = 1 << 12;
pub const VAL_MANAGED: u32 = 1 << 14;

/// Flags of a general array type with the given element alignment.
pub fn array_flags(align: u32, signed: bool, managed: bool) -> u32 {
    let mut flags = ARRAYBUFFERVIEW | ARRAY | (1 << (VAL_ALIGN_OFFSET + align));
    if signed {
        flags |= VAL_SIGNED;
    }
    if managed {
        flags |= VAL_MANAGED;
    }
    flags
}

/// Flags of a bare typed-array view (no logical length field).
pub fn view_flags(align: u32, signed: bool) -> u32 {
    array_flags(align, signed, false) & !ARRAY
}

/// RTTI entries for the three well-known ids.
pub fn base_rtti() -> Vec<(u32, u32)> {
    vec![(0, 0), (0, 0), (0, 0)]
}

/// The fake module's heap: a flat memory image plus allocator state.
pub struct Heap {
    pub mem: Vec<u8>,
    next: u32,
    free: Vec<(u32, u32)>,
}

impl Heap {
    fn new() -> Self {
        Self {
            mem: vec![0; 1 << 20],
            // Keep the null page clear so pointer 0 stays meaningless.
            next: 64,
            free: Vec::new(),
        }
    }

    pub fn read_u32(&self, ptr: u32) -> u32 {
        let at = ptr as usize;
        u32::from_le_bytes(self.mem[at..at + 4].try_into().unwrap())
    }

    pub fn write_u32(&mut self, ptr: u32, value: u32) {
        let at = ptr as usize;
        self.mem[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn write_header(&mut self, ptr: u32, refcount: u32, type_id: u32, size: u32) {
        self.write_u32(ptr - 12, refcount);
        self.write_u32(ptr - 8, type_id);
        self.write_u32(ptr - 4, size);
    }

    /// Allocate an object of `size` payload bytes with refcount 1,
    /// preferring a previously released block of the same size.
    pub fn alloc(&mut self, size: u32, type_id: u32) -> u32 {
        if let Some(at) = self.free.iter().position(|(s, _)| *s == size) {
            let (_, ptr) = self.free.remove(at);
            self.write_header(ptr, 1, type_id, size);
            return ptr;
        }
        let base = (self.next + 15) & !15;
        let ptr = base + HEADER_SIZE;
        self.next = ptr + size;
        assert!((self.next as usize) <= self.mem.len(), "fake heap exhausted");
        self.write_header(ptr, 1, type_id, size);
        ptr
    }

    pub fn retain(&mut self, ptr: u32) {
        let rc = self.read_u32(ptr - 12);
        self.write_u32(ptr - 12, rc + 1);
    }

    /// Drop one reference. At zero the block is reclaimed for reuse; the
    /// header keeps its last refcount value rather than being zeroed.
    pub fn release(&mut self, ptr: u32) {
        let rc = self.read_u32(ptr - 12);
        if rc <= 1 {
            let size = self.read_u32(ptr - 4);
            self.free.push((size, ptr));
        } else {
            self.write_u32(ptr - 12, rc - 1);
        }
    }

    pub fn alloc_string(&mut self, text: &str) -> u32 {
        let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let ptr = self.alloc(bytes.len() as u32, 1);
        self.mem[ptr as usize..ptr as usize + bytes.len()].copy_from_slice(&bytes);
        ptr
    }

    pub fn read_string(&self, ptr: u32) -> String {
        let size = self.read_u32(ptr - 4) as usize;
        let units: Vec<u16> = self.mem[ptr as usize..ptr as usize + size]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }

    /// Build a guest-side `Array<u8>`-shaped object, the way compiled guest
    /// code would return one.
    pub fn alloc_u8_array(&mut self, type_id: u32, values: &[u8]) -> u32 {
        let buf = self.alloc(values.len() as u32, 0);
        self.mem[buf as usize..buf as usize + values.len()].copy_from_slice(values);
        let arr = self.alloc(16, type_id);
        self.retain(buf);
        self.write_u32(arr, buf);
        self.write_u32(arr + 4, buf);
        self.write_u32(arr + 8, values.len() as u32);
        self.write_u32(arr + 12, values.len() as u32);
        arr
    }

    fn place_rtti(&mut self, entries: &[(u32, u32)]) -> u32 {
        let base = (self.next + 15) & !15;
        self.next = base + 4 + entries.len() as u32 * 8;
        assert!((self.next as usize) <= self.mem.len(), "fake heap exhausted");
        self.write_u32(base, entries.len() as u32);
        for (i, (flags, base_id)) in entries.iter().enumerate() {
            self.write_u32(base + 4 + i as u32 * 8, *flags);
            self.write_u32(base + 8 + i as u32 * 8, *base_id);
        }
        base
    }
}

type GuestFn = Rc<dyn Fn(&mut Heap, &[Val]) -> Option<Val>>;

pub struct FakeGuest {
    pub heap: Heap,
    funcs: HashMap<String, GuestFn>,
    globals: HashMap<String, Val>,
}

impl FakeGuest {
    pub fn new() -> Self {
        Self {
            heap: Heap::new(),
            funcs: HashMap::new(),
            globals: HashMap::new(),
        }
    }

    /// A fake guest whose RTTI table holds `entries`, exposed through the
    /// `__rtti_base` global.
    pub fn with_rtti(entries: &[(u32, u32)]) -> Self {
        let mut fake = Self::new();
        let base = fake.heap.place_rtti(entries);
        fake.globals.insert("__rtti_base".to_string(), Val::from(base));
        fake
    }

    pub fn export_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut Heap, &[Val]) -> Option<Val> + 'static,
    {
        self.funcs.insert(name.to_string(), Rc::new(f));
    }

    pub fn export_global(&mut self, name: &str, value: Val) {
        self.globals.insert(name.to_string(), value);
    }
}

impl GuestInstance for FakeGuest {
    fn read_memory(&self, ptr: u32, len: u32) -> hostbind::Result<Cow<'_, [u8]>> {
        self.heap
            .mem
            .get(ptr as usize..(ptr + len) as usize)
            .map(Cow::Borrowed)
            .ok_or_else(|| Error::Instance(format!("out-of-bounds read at {ptr:#x}+{len}")))
    }

    fn write_memory(&mut self, ptr: u32, bytes: &[u8]) -> hostbind::Result<()> {
        let at = ptr as usize;
        match self.heap.mem.get_mut(at..at + bytes.len()) {
            Some(slot) => {
                slot.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(Error::Instance(format!("out-of-bounds write at {ptr:#x}"))),
        }
    }

    fn call(&mut self, name: &str, args: &[Val]) -> hostbind::Result<Option<Val>> {
        let u32_arg = |i: usize| {
            args.get(i)
                .and_then(Val::as_pointer)
                .ok_or_else(|| Error::Instance(format!("{name}: bad argument {i}")))
        };
        match name {
            "__new" => {
                let ptr = self.heap.alloc(u32_arg(0)?, u32_arg(1)?);
                Ok(Some(Val::from(ptr)))
            }
            "__retain" => {
                self.heap.retain(u32_arg(0)?);
                Ok(Some(args[0]))
            }
            "__release" => {
                self.heap.release(u32_arg(0)?);
                Ok(None)
            }
            _ => {
                let func = self
                    .funcs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::Instance(format!("no export named {name}")))?;
                Ok(func(&mut self.heap, args))
            }
        }
    }

    fn exports(&self) -> Vec<(String, ExportKind)> {
        let mut exports = vec![
            ("memory".to_string(), ExportKind::Memory),
            ("__new".to_string(), ExportKind::Function),
            ("__retain".to_string(), ExportKind::Function),
            ("__release".to_string(), ExportKind::Function),
        ];
        exports.extend(
            self.funcs
                .keys()
                .map(|name| (name.clone(), ExportKind::Function)),
        );
        exports.extend(
            self.globals
                .keys()
                .map(|name| (name.clone(), ExportKind::Global)),
        );
        exports
    }

    fn global(&self, name: &str) -> hostbind::Result<Option<Val>> {
        Ok(self.globals.get(name).copied())
    }
}

/// Bind a fake guest with the default options.
pub fn bind(fake: FakeGuest) -> Module {
    Module::new(Box::new(fake), ModuleOptions::default())
}
