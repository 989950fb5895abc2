//! Round-tripping host values through the guest as integer tokens.

use crate::{Error, Result};
use hashbrown::HashMap;
use std::any::Any;
use std::rc::{Rc, Weak};

/// An integer standing in for a host value inside the guest.
///
/// Tokens are unique within one module instance; reuse across modules is
/// undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaqueToken(u32);

impl OpaqueToken {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

enum Slot {
    /// The registry does not keep the value alive; lookups fail once the
    /// host drops its last strong reference.
    Weak(Weak<dyn Any>),
    Strong(Rc<dyn Any>),
}

/// Per-module token table. Tokens increase monotonically from 1.
pub(crate) struct OpaqueRegistry {
    next: u32,
    slots: HashMap<u32, Slot>,
}

impl OpaqueRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next: 1,
            slots: HashMap::new(),
        }
    }

    fn insert(&mut self, slot: Slot) -> OpaqueToken {
        let token = self.next;
        self.next += 1;
        self.slots.insert(token, slot);
        OpaqueToken(token)
    }

    pub(crate) fn register_weak(&mut self, value: &Rc<dyn Any>) -> OpaqueToken {
        self.insert(Slot::Weak(Rc::downgrade(value)))
    }

    pub(crate) fn register_strong(&mut self, value: Rc<dyn Any>) -> OpaqueToken {
        self.insert(Slot::Strong(value))
    }

    pub(crate) fn lookup(&self, token: u32) -> Result<Rc<dyn Any>> {
        match self.slots.get(&token) {
            Some(Slot::Weak(weak)) => weak.upgrade().ok_or(Error::OpaqueExpired(token)),
            Some(Slot::Strong(value)) => Ok(value.clone()),
            None => Err(Error::OpaqueExpired(token)),
        }
    }
}
