//! Annotation values, definitions, and the validating builders.
//!
//! An [`Annotation`] is an immutable value: a reference to its
//! [`AnnotationDef`] (the schema: type name, retention, declared fields)
//! plus a field-name→value map. Values missing from the map take the
//! annotation type's defaults. The only way to construct an `Annotation` is
//! through [`AnnotationBuilder`], which checks each supplied value against
//! the declared field type, and nothing more: semantic well-formedness
//! beyond the shape check is out of scope here.
//!
//! Floating-point field values compare bitwise, so annotations are `Eq` and
//! can be coalesced in sets.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Retention and Field Types
// ============================================================================

/// How long the annotation is kept by the toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetentionPolicy {
    /// Discarded after compilation.
    Source,
    /// Kept in the class file, invisible at run time.
    Class,
    /// Kept in the class file and visible at run time.
    Runtime,
    /// Not known; only synthesized definitions carry this.
    Unknown,
}

/// Declared type of one annotation field.
///
/// Type names (for enums and nested annotations) use dotted binary form,
/// as in `java.lang.annotation.ElementType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Str,
    /// A class literal.
    ClassToken,
    /// An enum constant of the named enum type.
    Enum { type_name: String },
    /// A nested annotation of the named annotation type.
    Annotation { type_name: String },
    /// A one-dimensional array of the given element type.
    Array { element: Box<FieldType> },
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => write!(f, "boolean"),
            FieldType::Byte => write!(f, "byte"),
            FieldType::Char => write!(f, "char"),
            FieldType::Short => write!(f, "short"),
            FieldType::Int => write!(f, "int"),
            FieldType::Long => write!(f, "long"),
            FieldType::Float => write!(f, "float"),
            FieldType::Double => write!(f, "double"),
            FieldType::Str => write!(f, "String"),
            FieldType::ClassToken => write!(f, "Class"),
            FieldType::Enum { type_name } => write!(f, "enum {type_name}"),
            FieldType::Annotation { type_name } => write!(f, "@{type_name}"),
            FieldType::Array { element } => write!(f, "{element}[]"),
        }
    }
}

// ============================================================================
// Definitions
// ============================================================================

/// Schema of an annotation type: name, retention, and declared fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationDef {
    /// Annotation type name in dotted binary form, as in `a.b.NonNull`.
    pub name: String,
    /// Retention policy of the annotation type.
    pub retention: RetentionPolicy,
    /// Whether the annotation may target type uses.
    pub type_annotation: bool,
    /// Declared fields, name → type.
    pub fields: BTreeMap<String, FieldType>,
}

impl AnnotationDef {
    /// A definition with no fields.
    pub fn new(name: impl Into<String>, retention: RetentionPolicy) -> Self {
        AnnotationDef {
            name: name.into(),
            retention,
            type_annotation: false,
            fields: BTreeMap::new(),
        }
    }

    /// Declare one field.
    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    /// Mark the definition as targeting type uses.
    pub fn for_type_use(mut self) -> Self {
        self.type_annotation = true;
        self
    }

    /// A minimal stand-in for a module-internal synthetic annotation type
    /// that cannot be resolved: no fields, unknown retention.
    pub fn synthetic(name: impl Into<String>) -> Self {
        AnnotationDef::new(name, RetentionPolicy::Unknown)
    }

    /// Whether values of this type are visible at run time.
    pub fn is_runtime(&self) -> bool {
        self.retention == RetentionPolicy::Runtime
    }
}

// ============================================================================
// Values
// ============================================================================

/// One annotation field value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnnotationValue {
    Bool(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// An enum constant: enum type name (dotted) plus constant name.
    EnumConst { type_name: String, constant: String },
    /// A class literal, carried as a type descriptor.
    ClassToken(String),
    /// A nested annotation.
    Nested(Annotation),
    /// A homogeneous array.
    Array(Vec<AnnotationValue>),
}

impl AnnotationValue {
    /// Short name of the value's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            AnnotationValue::Bool(_) => "boolean",
            AnnotationValue::Byte(_) => "byte",
            AnnotationValue::Char(_) => "char",
            AnnotationValue::Short(_) => "short",
            AnnotationValue::Int(_) => "int",
            AnnotationValue::Long(_) => "long",
            AnnotationValue::Float(_) => "float",
            AnnotationValue::Double(_) => "double",
            AnnotationValue::Str(_) => "String",
            AnnotationValue::EnumConst { .. } => "enum constant",
            AnnotationValue::ClassToken(_) => "Class",
            AnnotationValue::Nested(_) => "annotation",
            AnnotationValue::Array(_) => "array",
        }
    }
}

impl PartialEq for AnnotationValue {
    fn eq(&self, other: &Self) -> bool {
        use AnnotationValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (
                EnumConst {
                    type_name: ta,
                    constant: ca,
                },
                EnumConst {
                    type_name: tb,
                    constant: cb,
                },
            ) => ta == tb && ca == cb,
            (ClassToken(a), ClassToken(b)) => a == b,
            (Nested(a), Nested(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AnnotationValue {}

/// A fully materialized annotation: definition plus field values.
///
/// Fields absent from `values` take the annotation type's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// The annotation's schema.
    pub def: Arc<AnnotationDef>,
    /// Supplied field values; always a subset of the declared fields.
    values: BTreeMap<String, AnnotationValue>,
}

impl Annotation {
    /// The annotation type name in dotted binary form.
    pub fn type_name(&self) -> &str {
        &self.def.name
    }

    /// The value supplied for `field`, if any.
    pub fn value(&self, field: &str) -> Option<&AnnotationValue> {
        self.values.get(field)
    }

    /// Iterate supplied values in field-name order.
    pub fn values(&self) -> impl Iterator<Item = (&String, &AnnotationValue)> {
        self.values.iter()
    }

    /// Whether this annotation is visible at run time.
    pub fn is_runtime(&self) -> bool {
        self.def.is_runtime()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A value stream that does not fit the annotation's declared schema.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// A value was supplied for a field the definition does not declare.
    #[error("annotation {annotation} declares no field named '{field}'")]
    UnknownField { annotation: String, field: String },

    /// A supplied value does not match the declared field type.
    #[error("field '{field}' of {annotation} expects {expected}, got {actual}")]
    FieldTypeMismatch {
        annotation: String,
        field: String,
        expected: String,
        actual: String,
    },
}

// ============================================================================
// Builders
// ============================================================================

/// Incremental, validating construction of one [`Annotation`].
#[derive(Debug)]
pub struct AnnotationBuilder {
    def: Arc<AnnotationDef>,
    values: BTreeMap<String, AnnotationValue>,
}

impl AnnotationBuilder {
    /// Start building an annotation of the given definition.
    pub fn new(def: Arc<AnnotationDef>) -> Self {
        AnnotationBuilder {
            def,
            values: BTreeMap::new(),
        }
    }

    /// The definition being built against.
    pub fn def(&self) -> &Arc<AnnotationDef> {
        &self.def
    }

    /// Supply one field value, checking it against the declared type.
    pub fn field(&mut self, name: &str, value: AnnotationValue) -> Result<(), AnnotationError> {
        let ty = self
            .def
            .fields
            .get(name)
            .ok_or_else(|| AnnotationError::UnknownField {
                annotation: self.def.name.clone(),
                field: name.to_string(),
            })?;
        check_value(&self.def.name, name, ty, &value)?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Finish the annotation.
    pub fn finish(self) -> Annotation {
        Annotation {
            def: self.def,
            values: self.values,
        }
    }
}

/// Accumulates the elements of one array field.
#[derive(Debug, Default)]
pub struct ArrayBuilder {
    elements: Vec<AnnotationValue>,
}

impl ArrayBuilder {
    /// Start an empty array.
    pub fn new() -> Self {
        ArrayBuilder::default()
    }

    /// Append one element.
    pub fn push(&mut self, value: AnnotationValue) {
        self.elements.push(value);
    }

    /// Finish into an array value. Element types are checked when the array
    /// is supplied to [`AnnotationBuilder::field`].
    pub fn finish(self) -> AnnotationValue {
        AnnotationValue::Array(self.elements)
    }
}

fn check_value(
    annotation: &str,
    field: &str,
    ty: &FieldType,
    value: &AnnotationValue,
) -> Result<(), AnnotationError> {
    let ok = match (ty, value) {
        (FieldType::Bool, AnnotationValue::Bool(_)) => true,
        (FieldType::Byte, AnnotationValue::Byte(_)) => true,
        (FieldType::Char, AnnotationValue::Char(_)) => true,
        (FieldType::Short, AnnotationValue::Short(_)) => true,
        (FieldType::Int, AnnotationValue::Int(_)) => true,
        (FieldType::Long, AnnotationValue::Long(_)) => true,
        (FieldType::Float, AnnotationValue::Float(_)) => true,
        (FieldType::Double, AnnotationValue::Double(_)) => true,
        (FieldType::Str, AnnotationValue::Str(_)) => true,
        (FieldType::ClassToken, AnnotationValue::ClassToken(_)) => true,
        (FieldType::Enum { type_name }, AnnotationValue::EnumConst { type_name: actual, .. }) => {
            type_name == actual
        }
        (FieldType::Annotation { type_name }, AnnotationValue::Nested(nested)) => {
            nested.type_name() == type_name
        }
        (FieldType::Array { element }, AnnotationValue::Array(items)) => {
            for item in items {
                check_value(annotation, field, element, item)?;
            }
            true
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(AnnotationError::FieldTypeMismatch {
            annotation: annotation.to_string(),
            field: field.to_string(),
            expected: ty.to_string(),
            actual: value.kind().to_string(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn nullable_def() -> Arc<AnnotationDef> {
        Arc::new(
            AnnotationDef::new("a.b.Nullable", RetentionPolicy::Runtime)
                .for_type_use()
                .with_field("reason", FieldType::Str),
        )
    }

    mod builder {
        use super::*;

        #[test]
        fn accepts_matching_field() {
            let mut b = AnnotationBuilder::new(nullable_def());
            b.field("reason", AnnotationValue::Str("legacy".into())).unwrap();
            let a = b.finish();
            assert_eq!(a.type_name(), "a.b.Nullable");
            assert_eq!(
                a.value("reason"),
                Some(&AnnotationValue::Str("legacy".into()))
            );
        }

        #[test]
        fn rejects_unknown_field() {
            let mut b = AnnotationBuilder::new(nullable_def());
            let err = b.field("missing", AnnotationValue::Int(1)).unwrap_err();
            assert!(matches!(err, AnnotationError::UnknownField { .. }));
        }

        #[test]
        fn rejects_mismatched_type() {
            let mut b = AnnotationBuilder::new(nullable_def());
            let err = b.field("reason", AnnotationValue::Int(1)).unwrap_err();
            assert!(matches!(err, AnnotationError::FieldTypeMismatch { .. }));
        }

        #[test]
        fn missing_fields_mean_defaults() {
            let a = AnnotationBuilder::new(nullable_def()).finish();
            assert_eq!(a.value("reason"), None);
        }

        #[test]
        fn checks_array_elements() {
            let def = Arc::new(AnnotationDef::new("a.b.Tags", RetentionPolicy::Class).with_field(
                "names",
                FieldType::Array {
                    element: Box::new(FieldType::Str),
                },
            ));
            let mut b = AnnotationBuilder::new(def.clone());
            let mut arr = ArrayBuilder::new();
            arr.push(AnnotationValue::Str("x".into()));
            arr.push(AnnotationValue::Int(3));
            let err = b.field("names", arr.finish()).unwrap_err();
            assert!(matches!(err, AnnotationError::FieldTypeMismatch { .. }));

            let mut b = AnnotationBuilder::new(def);
            b.field("names", AnnotationValue::Array(Vec::new())).unwrap();
        }
    }

    mod equality {
        use super::*;

        #[test]
        fn float_values_compare_bitwise() {
            assert_eq!(AnnotationValue::Double(1.5), AnnotationValue::Double(1.5));
            assert_ne!(AnnotationValue::Double(1.5), AnnotationValue::Double(2.5));
            assert_eq!(
                AnnotationValue::Double(f64::NAN),
                AnnotationValue::Double(f64::NAN)
            );
        }

        #[test]
        fn annotations_with_equal_values_are_equal() {
            let mut b1 = AnnotationBuilder::new(nullable_def());
            b1.field("reason", AnnotationValue::Str("x".into())).unwrap();
            let mut b2 = AnnotationBuilder::new(nullable_def());
            b2.field("reason", AnnotationValue::Str("x".into())).unwrap();
            assert_eq!(b1.finish(), b2.finish());
        }
    }

    mod defs {
        use super::*;

        #[test]
        fn synthetic_defs_have_no_fields_and_unknown_retention() {
            let def = AnnotationDef::synthetic("jdk.Profile+Annotation");
            assert!(def.fields.is_empty());
            assert_eq!(def.retention, RetentionPolicy::Unknown);
            assert!(!def.is_runtime());
        }
    }
}
