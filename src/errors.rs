/// Errors produced by the binding layer.
///
/// Every failure surfaces to the caller; nothing is retried or swallowed.
#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// The `__rtti_base` global is absent or the table behind it is
    /// malformed. Every operation that needs type information fails with
    /// this kind, never a generic error.
    #[error("RTTI unavailable: the __rtti_base global is missing or the table is malformed")]
    RttiUnavailable,
    /// A typed view was requested over an element shape no view class
    /// exists for. The message names the missing facet.
    #[error("unsupported element layout: {0} views are not available")]
    UnsupportedLayout(&'static str),
    /// `alloc_array` was called with a type id that is neither a
    /// typed-array view nor a general array.
    #[error("type {0} is not an allocatable array type")]
    InvalidArrayType(u32),
    /// An element supplied to a managed-element array was neither a string
    /// nor a guest handle.
    #[error("managed array elements must be strings or guest handles")]
    WrongElementType,
    #[error("index {index} is out of bounds for array of length {length}")]
    OutOfBounds { index: u32, length: u32 },
    /// The token refers to a weakly held host value that has since been
    /// collected.
    #[error("opaque value {0} has expired")]
    OpaqueExpired(u32),
    /// The resolution target is not recognized for the given pointer.
    #[error("cannot resolve value to the requested target")]
    UnsupportedTarget,
    /// The class is visible on the module but exported no constructor.
    #[error("class {0} has no exported constructor")]
    MissingConstructor(String),
    /// A type id past the end of the RTTI table.
    #[error("type id {0} is not described by the RTTI table")]
    UnknownTypeId(u32),
    /// An object header carried a different type id than the operation
    /// requires.
    #[error("expected an object with type id {expected}, found {found}")]
    TypeMismatch { expected: u32, found: u32 },
    #[error("module has no export named {0}")]
    MissingExport(String),
    /// Failure reported by the underlying engine.
    #[error("guest instance error: {0}")]
    Instance(String),
}
