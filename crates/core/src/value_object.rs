//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; two
/// with the same values are the same thing. `Currency` is the canonical
/// example in this codebase (see `money`), as is a generated
/// `ObligationSpec` before it is persisted against an enrollment.
///
/// To "modify" a value object, construct a new one. The trait bounds keep
/// them cheap to copy, comparable, and debuggable.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
