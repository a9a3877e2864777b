//! Location keys: the vocabulary for naming where an annotation lives.
//!
//! Extended annotations target sub-parts of declarations: a generic type
//! argument, a wildcard bound, a supertype clause, a local variable's live
//! range, or a bytecode instruction site. Each kind of target gets its own
//! key type so the Scene's maps cannot confuse them:
//! - [`TypePath`]: a path descending into a generic/array type
//! - [`BoundLocation`]: a type parameter or one of its bounds
//! - [`TypeIndexLocation`]: the superclass or an implemented interface
//! - [`RelativeLocation`]: a bytecode offset (or source index) in a body
//! - [`LocalLocation`]: a local variable's live range
//! - [`MethodKey`]: a method named structurally by (name, descriptor)

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Type Paths
// ============================================================================

/// One step while descending into a generic or array type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypePathStep {
    /// Step into the element type of an array.
    Array,
    /// Step into a nested (inner) type.
    Inner,
    /// Step into the bound of a wildcard type argument.
    Wildcard,
    /// Step into the type argument with the given index.
    TypeArgument(u8),
}

/// An ordered path of steps from a top-level type to the exact sub-type an
/// extended annotation targets. The empty path names the type as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypePath(pub Vec<TypePathStep>);

impl TypePath {
    /// The empty path, naming the whole type.
    pub fn root() -> Self {
        TypePath(Vec::new())
    }

    /// Build a path from its steps.
    pub fn of(steps: impl IntoIterator<Item = TypePathStep>) -> Self {
        TypePath(steps.into_iter().collect())
    }

    /// Whether this path names the whole type.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The steps of the path, outermost first.
    pub fn steps(&self) -> &[TypePathStep] {
        &self.0
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match step {
                TypePathStep::Array => write!(f, "[")?,
                TypePathStep::Inner => write!(f, ".")?,
                TypePathStep::Wildcard => write!(f, "*")?,
                TypePathStep::TypeArgument(n) => write!(f, "{n}")?,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Bound and Supertype Locations
// ============================================================================

/// A type parameter, or one of its bounds when `bound_index` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoundLocation {
    /// Index of the type parameter on the declaring class or method.
    pub param_index: u32,
    /// Index of the bound within the parameter; `None` names the parameter
    /// itself.
    pub bound_index: Option<u32>,
}

impl BoundLocation {
    /// Location of the type parameter itself.
    pub fn parameter(param_index: u32) -> Self {
        BoundLocation {
            param_index,
            bound_index: None,
        }
    }

    /// Location of one bound of a type parameter.
    pub fn bound(param_index: u32, bound_index: u32) -> Self {
        BoundLocation {
            param_index,
            bound_index: Some(bound_index),
        }
    }
}

impl fmt::Display for BoundLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bound_index {
            Some(b) => write!(f, "param {} bound {}", self.param_index, b),
            None => write!(f, "param {}", self.param_index),
        }
    }
}

/// Position in an "extends/implements" clause: `-1` is the superclass,
/// `0` and up index the implemented interfaces. Also used for a method's
/// throws clause, where it indexes the declared exceptions from `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeIndexLocation(pub i32);

impl TypeIndexLocation {
    /// The superclass position.
    pub fn superclass() -> Self {
        TypeIndexLocation(-1)
    }

    /// The interface (or thrown exception) at `index`.
    pub fn interface(index: u32) -> Self {
        TypeIndexLocation(index as i32)
    }

    /// Whether this names the superclass.
    pub fn is_superclass(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for TypeIndexLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_superclass() {
            write!(f, "superclass")
        } else {
            write!(f, "type index {}", self.0)
        }
    }
}

// ============================================================================
// Body Locations
// ============================================================================

/// A position inside a method body.
///
/// `Offset` locations name a bytecode instruction by its offset in the
/// method's instruction stream and are the only insertable form. `Source`
/// locations count occurrences in source order; they arise when a Scene is
/// built from source and cannot be placed into a compiled module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelativeLocation {
    /// A bytecode offset, with the type-argument index for the target kinds
    /// that carry one.
    Offset {
        offset: u32,
        type_index: Option<u32>,
    },
    /// An index in source order; never produced from bytecode.
    Source {
        index: u32,
        type_index: Option<u32>,
    },
}

impl RelativeLocation {
    /// A bytecode-offset location.
    pub fn offset(offset: u32, type_index: Option<u32>) -> Self {
        RelativeLocation::Offset { offset, type_index }
    }

    /// A source-order location.
    pub fn source(index: u32, type_index: Option<u32>) -> Self {
        RelativeLocation::Source { index, type_index }
    }

    /// Whether this is an insertable bytecode offset.
    pub fn is_bytecode_offset(&self) -> bool {
        matches!(self, RelativeLocation::Offset { .. })
    }

    /// The bytecode offset, if this is an offset location.
    pub fn bytecode_offset(&self) -> Option<u32> {
        match self {
            RelativeLocation::Offset { offset, .. } => Some(*offset),
            RelativeLocation::Source { .. } => None,
        }
    }

    /// The type-argument index, for either form.
    pub fn type_index(&self) -> Option<u32> {
        match self {
            RelativeLocation::Offset { type_index, .. }
            | RelativeLocation::Source { type_index, .. } => *type_index,
        }
    }
}

impl fmt::Display for RelativeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelativeLocation::Offset { offset, type_index } => match type_index {
                Some(t) => write!(f, "offset {offset} type arg {t}"),
                None => write!(f, "offset {offset}"),
            },
            RelativeLocation::Source { index, .. } => write!(f, "source index {index}"),
        }
    }
}

/// The span of a local variable: start and end offsets in the instruction
/// stream plus the variable slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LiveRange {
    /// First covered offset.
    pub start: u32,
    /// Offset just past the range.
    pub end: u32,
    /// Local variable slot.
    pub slot: u16,
}

impl LiveRange {
    /// Build a live range.
    pub fn new(start: u32, end: u32, slot: u16) -> Self {
        LiveRange { start, end, slot }
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) slot {}", self.start, self.end, self.slot)
    }
}

/// A local variable named by its live range.
///
/// Equality, ordering and hashing are structural over the
/// `(start, end, slot)` tuple only. The variable name is carried when known
/// (it is recovered from the local-variable table during extraction) but is
/// never part of the key, so scenes built with and without debug names agree
/// on identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLocation {
    /// Live range of the variable.
    pub range: LiveRange,
    /// Variable name, when the module carried one.
    pub name: Option<String>,
}

impl LocalLocation {
    /// A local location without a name.
    pub fn new(range: LiveRange) -> Self {
        LocalLocation { range, name: None }
    }

    /// A local location with a known variable name.
    pub fn named(range: LiveRange, name: impl Into<String>) -> Self {
        LocalLocation {
            range,
            name: Some(name.into()),
        }
    }
}

impl PartialEq for LocalLocation {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range
    }
}

impl Eq for LocalLocation {}

impl PartialOrd for LocalLocation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocalLocation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.range.cmp(&other.range)
    }
}

impl std::hash::Hash for LocalLocation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.range.hash(state);
    }
}

impl fmt::Display for LocalLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {}", name, self.range),
            None => write!(f, "{}", self.range),
        }
    }
}

// ============================================================================
// Method Keys
// ============================================================================

/// Structural method identity: name plus descriptor.
///
/// Used both as the Scene's method map key and by the insertion pre-pass,
/// instead of a spliced `name + descriptor` string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodKey {
    /// Method name, as in `toString`.
    pub name: String,
    /// Method descriptor, as in `()Ljava/lang/String;`.
    pub descriptor: String,
}

impl MethodKey {
    /// Build a method key.
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        MethodKey {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod local_location {
        use super::*;

        #[test]
        fn equality_ignores_name() {
            let anon = LocalLocation::new(LiveRange::new(10, 40, 3));
            let named = LocalLocation::named(LiveRange::new(10, 40, 3), "count");
            assert_eq!(anon, named);
        }

        #[test]
        fn equality_is_structural_over_the_range() {
            let a = LocalLocation::new(LiveRange::new(10, 40, 3));
            let b = LocalLocation::new(LiveRange::new(10, 40, 4));
            let c = LocalLocation::new(LiveRange::new(10, 41, 3));
            assert_ne!(a, b);
            assert_ne!(a, c);
        }
    }

    mod relative_location {
        use super::*;

        #[test]
        fn only_offsets_are_bytecode_offsets() {
            assert!(RelativeLocation::offset(7, None).is_bytecode_offset());
            assert!(!RelativeLocation::source(2, None).is_bytecode_offset());
        }

        #[test]
        fn bytecode_offset_accessor() {
            assert_eq!(RelativeLocation::offset(7, Some(1)).bytecode_offset(), Some(7));
            assert_eq!(RelativeLocation::source(7, None).bytecode_offset(), None);
        }
    }

    mod display {
        use super::*;

        #[test]
        fn method_key_displays_as_signature() {
            let key = MethodKey::new("get", "(I)Ljava/lang/Object;");
            assert_eq!(key.to_string(), "get(I)Ljava/lang/Object;");
        }

        #[test]
        fn type_index_location_displays_superclass() {
            assert_eq!(TypeIndexLocation::superclass().to_string(), "superclass");
            assert_eq!(TypeIndexLocation::interface(1).to_string(), "type index 1");
        }

        #[test]
        fn type_path_displays_steps() {
            let path = TypePath::of([
                TypePathStep::Array,
                TypePathStep::TypeArgument(1),
                TypePathStep::Wildcard,
            ]);
            assert_eq!(path.to_string(), "[,1,*");
        }
    }
}
