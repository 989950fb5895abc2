//! Synthesis of host-side class descriptors from a module's export names.
//!
//! The guest toolchain flattens classes into exports named
//! `Class#member`, with `get:prop`/`set:prop` accessor pairs and
//! `constructor` for the constructor. `__`-prefixed exports are runtime
//! helpers and are never surfaced.

use crate::instance::ExportKind;
use crate::{Error, Result, GUEST_ALLOC, GUEST_NEW};
use hashbrown::HashMap;

#[derive(Debug, Default)]
pub(crate) struct Accessor {
    pub(crate) get: Option<String>,
    pub(crate) set: Option<String>,
}

/// Host descriptor for one exported guest class.
///
/// A class with no exported constructor stays visible on the module; only
/// constructing it fails.
#[derive(Debug)]
pub struct GuestClass {
    name: String,
    constructor: Option<String>,
    methods: HashMap<String, String>,
    properties: HashMap<String, Accessor>,
}

impl GuestClass {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            constructor: None,
            methods: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_constructable(&self) -> bool {
        self.constructor.is_some()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub(crate) fn constructor_export(&self) -> Result<&str> {
        self.constructor
            .as_deref()
            .ok_or_else(|| Error::MissingConstructor(self.name.clone()))
    }

    pub(crate) fn method_export(&self, method: &str) -> Result<&str> {
        self.methods
            .get(method)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingExport(format!("{}#{method}", self.name)))
    }

    pub(crate) fn getter_export(&self, prop: &str) -> Result<&str> {
        self.properties
            .get(prop)
            .and_then(|a| a.get.as_deref())
            .ok_or_else(|| Error::MissingExport(format!("{}#get:{prop}", self.name)))
    }

    pub(crate) fn setter_export(&self, prop: &str) -> Result<&str> {
        self.properties
            .get(prop)
            .and_then(|a| a.set.as_deref())
            .ok_or_else(|| Error::MissingExport(format!("{}#set:{prop}", self.name)))
    }
}

/// The module's exports partitioned into classes, top-level functions, and
/// the allocator helper.
pub(crate) struct ExportMap {
    pub(crate) classes: HashMap<String, GuestClass>,
    pub(crate) functions: HashMap<String, String>,
    /// `__new`, or `__alloc` on older runtimes. `None` when the module
    /// exports neither; allocation then fails at first use.
    pub(crate) allocator: Option<&'static str>,
}

pub(crate) fn partition_exports(exports: &[(String, ExportKind)]) -> ExportMap {
    let mut classes: HashMap<String, GuestClass> = HashMap::new();
    let mut functions = HashMap::new();
    let mut has_new = false;
    let mut has_alloc = false;

    for (name, kind) in exports {
        if *kind != ExportKind::Function {
            continue;
        }
        if let Some((class_name, member)) = name.split_once('#') {
            let class = classes
                .entry(class_name.to_string())
                .or_insert_with(|| GuestClass::new(class_name));
            if member == "constructor" {
                class.constructor = Some(name.clone());
            } else if let Some(prop) = member.strip_prefix("get:") {
                class.properties.entry(prop.to_string()).or_default().get = Some(name.clone());
            } else if let Some(prop) = member.strip_prefix("set:") {
                class.properties.entry(prop.to_string()).or_default().set = Some(name.clone());
            } else {
                class.methods.insert(member.to_string(), name.clone());
            }
        } else if name.starts_with("__") {
            has_new |= name == GUEST_NEW;
            has_alloc |= name == GUEST_ALLOC;
        } else {
            functions.insert(name.clone(), name.clone());
        }
    }

    for class in classes.values() {
        tracing::trace!(
            class = %class.name,
            constructable = class.is_constructable(),
            "synthesized class"
        );
    }

    let allocator = if has_new {
        Some(GUEST_NEW)
    } else if has_alloc {
        Some(GUEST_ALLOC)
    } else {
        None
    };

    ExportMap {
        classes,
        functions,
        allocator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exports(names: &[&str]) -> Vec<(String, ExportKind)> {
        names
            .iter()
            .map(|n| (n.to_string(), ExportKind::Function))
            .collect()
    }

    #[test]
    fn partitions_classes_functions_and_helpers() {
        let map = partition_exports(&exports(&[
            "sum",
            "__new",
            "__retain",
            "__release",
            "Foo#constructor",
            "Foo#get:bar",
            "Foo#set:bar",
            "Foo#frob",
            "Line#get:s",
        ]));

        assert_eq!(map.allocator, Some("__new"));
        assert!(map.functions.contains_key("sum"));
        assert!(!map.functions.contains_key("__retain"));

        let foo = &map.classes["Foo"];
        assert!(foo.is_constructable());
        assert_eq!(foo.method_export("frob").unwrap(), "Foo#frob");
        assert_eq!(foo.getter_export("bar").unwrap(), "Foo#get:bar");
        assert_eq!(foo.setter_export("bar").unwrap(), "Foo#set:bar");

        // A class can surface without a constructor.
        let line = &map.classes["Line"];
        assert!(!line.is_constructable());
        assert!(matches!(
            line.constructor_export(),
            Err(Error::MissingConstructor(_))
        ));
        assert!(matches!(
            line.setter_export("s"),
            Err(Error::MissingExport(_))
        ));
    }

    #[test]
    fn alloc_fallback_for_older_runtimes() {
        let map = partition_exports(&exports(&["__alloc", "__retain"]));
        assert_eq!(map.allocator, Some("__alloc"));

        let map = partition_exports(&exports(&["sum"]));
        assert_eq!(map.allocator, None);
    }

    #[test]
    fn non_function_exports_are_ignored() {
        let list = vec![
            ("memory".to_string(), ExportKind::Memory),
            ("Int8ArrayId".to_string(), ExportKind::Global),
        ];
        let map = partition_exports(&list);
        assert!(map.classes.is_empty());
        assert!(map.functions.is_empty());
    }
}
