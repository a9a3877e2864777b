//! The Scene: an annotation database keyed by class name.
//!
//! A [`Scene`] maps fully-qualified class names to [`ClassInfo`] records;
//! each record holds the annotations of the class, its fields and methods,
//! down to sub-type positions and method-body instruction sites. All
//! location-keyed storage is vivifying (see [`crate::vivify`]) and iterates
//! deterministically.
//!
//! A Scene is built monotonically, by one extraction pass or by merging a
//! persisted form, and is then consumed read-only by insertion. Nothing is
//! ever deleted piecemeal; a Scene is only replaced wholesale.

use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;
use crate::location::{
    BoundLocation, LocalLocation, MethodKey, RelativeLocation, TypeIndexLocation, TypePath,
};
use crate::vivify::VivifyMap;

// ============================================================================
// Annotation Sets
// ============================================================================

/// The annotations directly on one element.
///
/// Insertion-ordered; inserting an annotation equal to one already present
/// coalesces, so re-extracting the same module is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSet {
    entries: Vec<Annotation>,
}

impl AnnotationSet {
    /// Add an annotation; returns `false` when an equal one was already
    /// present.
    pub fn insert(&mut self, annotation: Annotation) -> bool {
        if self.entries.contains(&annotation) {
            return false;
        }
        self.entries.push(annotation);
        true
    }

    /// Find an annotation by its type name.
    pub fn get(&self, type_name: &str) -> Option<&Annotation> {
        self.entries.iter().find(|a| a.type_name() == type_name)
    }

    /// Whether an annotation of the given type is present.
    pub fn contains_type(&self, type_name: &str) -> bool {
        self.get(type_name).is_some()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Annotation> {
        self.entries.iter()
    }

    /// Number of annotations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a AnnotationSet {
    type Item = &'a Annotation;
    type IntoIter = std::slice::Iter<'a, Annotation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// Elements
// ============================================================================

/// An annotatable type position: annotations on the position itself plus
/// nested positions reached by a [`TypePath`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeElement {
    /// Annotations on this position.
    pub annotations: AnnotationSet,
    /// Annotations on sub-parts of the type, by path.
    pub inner_types: VivifyMap<TypePath, TypeElement>,
}

impl TypeElement {
    /// The element at `path`, vivifying it; the empty path is this element.
    pub fn at_path(&mut self, path: &TypePath) -> &mut TypeElement {
        if path.is_empty() {
            self
        } else {
            self.inner_types.vivify(path.clone())
        }
    }

    /// Whether neither this position nor any nested one carries annotations.
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty() && self.inner_types.iter().all(|(_, e)| e.is_empty())
    }
}

/// A field, or anything field-shaped (a parameter, a receiver, a local
/// variable): declaration annotations plus the annotated declared type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Declaration annotations.
    pub annotations: AnnotationSet,
    /// Annotations on the declared type.
    pub ty: TypeElement,
}

impl FieldInfo {
    /// Whether an annotation of the given type sits on the declaration or
    /// directly on the declared type.
    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotations.contains_type(type_name) || self.ty.annotations.contains_type(type_name)
    }
}

/// Instruction-site and local-variable annotations of one method body.
///
/// One map per instruction category. Keys are [`RelativeLocation`]s; only
/// bytecode-offset keys can be placed back into a compiled module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Object-creation sites.
    pub news: VivifyMap<RelativeLocation, TypeElement>,
    /// Type-test sites.
    pub instanceofs: VivifyMap<RelativeLocation, TypeElement>,
    /// Cast sites.
    pub typecasts: VivifyMap<RelativeLocation, TypeElement>,
    /// Member-reference sites and their type arguments.
    pub refs: VivifyMap<RelativeLocation, TypeElement>,
    /// Invocation type arguments.
    pub calls: VivifyMap<RelativeLocation, TypeElement>,
    /// Functional-literal sites; each is a method in its own right.
    pub funs: VivifyMap<RelativeLocation, MethodInfo>,
    /// Local variables by live range.
    pub locals: VivifyMap<LocalLocation, FieldInfo>,
}

/// A method: declaration annotations, the annotated pieces of its
/// signature, and its body's instruction-site annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Declaration annotations.
    pub annotations: AnnotationSet,
    /// Annotations on the return type.
    pub return_type: TypeElement,
    /// The implicit receiver parameter.
    pub receiver: FieldInfo,
    /// Parameters by index.
    pub parameters: VivifyMap<u32, FieldInfo>,
    /// The method's own type parameters and their bounds.
    pub bounds: VivifyMap<BoundLocation, TypeElement>,
    /// Throws clauses by exception index.
    pub throws: VivifyMap<TypeIndexLocation, TypeElement>,
    /// Instruction-site and local-variable annotations.
    pub body: Body,
}

impl MethodInfo {
    /// Whether an annotation of the given type sits on the declaration or
    /// directly on the return type.
    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotations.contains_type(type_name)
            || self.return_type.annotations.contains_type(type_name)
    }
}

/// A class: its annotations, type parameters, supertype clauses, fields
/// and methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    /// Declaration annotations.
    pub annotations: AnnotationSet,
    /// The class's type parameters and their bounds.
    pub bounds: VivifyMap<BoundLocation, TypeElement>,
    /// Extends/implements clauses by supertype index.
    pub extends_implements: VivifyMap<TypeIndexLocation, TypeElement>,
    /// Fields by name.
    pub fields: VivifyMap<String, FieldInfo>,
    /// Methods by structural key.
    pub methods: VivifyMap<MethodKey, MethodInfo>,
}

impl ClassInfo {
    /// Whether a declaration annotation of the given type is present.
    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotations.contains_type(type_name)
    }
}

/// The annotation database: class name (dotted binary form) → class record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// All classes in the scene.
    pub classes: VivifyMap<String, ClassInfo>,
}

impl Scene {
    /// An empty scene.
    pub fn new() -> Self {
        Scene::default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationBuilder, AnnotationDef, RetentionPolicy};
    use crate::location::{LiveRange, TypePathStep};
    use std::sync::Arc;

    fn marker(name: &str) -> Annotation {
        AnnotationBuilder::new(Arc::new(AnnotationDef::new(name, RetentionPolicy::Runtime)))
            .finish()
    }

    mod annotation_sets {
        use super::*;

        #[test]
        fn insert_coalesces_duplicates() {
            let mut set = AnnotationSet::default();
            assert!(set.insert(marker("a.A")));
            assert!(!set.insert(marker("a.A")));
            assert!(set.insert(marker("a.B")));
            assert_eq!(set.len(), 2);
        }

        #[test]
        fn lookup_by_type_name() {
            let mut set = AnnotationSet::default();
            set.insert(marker("a.A"));
            assert!(set.contains_type("a.A"));
            assert!(!set.contains_type("a.B"));
        }
    }

    mod vivification {
        use super::*;

        #[test]
        fn same_location_key_yields_same_element() {
            let mut scene = Scene::new();
            let class = scene.classes.vivify("a.C".to_string());
            let loc = BoundLocation::bound(0, 1);
            class.bounds.vivify(loc).annotations.insert(marker("a.A"));
            class.bounds.vivify(loc).annotations.insert(marker("a.B"));
            assert_eq!(class.bounds.len(), 1);
            assert_eq!(class.bounds.get(&loc).unwrap().annotations.len(), 2);
        }

        #[test]
        fn local_location_vivifies_by_range_not_name() {
            let mut body = Body::default();
            let anon = LocalLocation::new(LiveRange::new(10, 40, 3));
            let named = LocalLocation::named(LiveRange::new(10, 40, 3), "count");
            body.locals.vivify(anon).annotations.insert(marker("a.A"));
            body.locals.vivify(named).ty.annotations.insert(marker("a.B"));
            assert_eq!(body.locals.len(), 1);
        }

        #[test]
        fn at_path_with_empty_path_is_the_element_itself() {
            let mut elem = TypeElement::default();
            elem.at_path(&TypePath::root()).annotations.insert(marker("a.A"));
            assert!(elem.annotations.contains_type("a.A"));
            assert!(elem.inner_types.is_empty());
        }

        #[test]
        fn at_path_descends_into_inner_types() {
            let mut elem = TypeElement::default();
            let path = TypePath::of([TypePathStep::TypeArgument(0)]);
            elem.at_path(&path).annotations.insert(marker("a.A"));
            assert!(elem.annotations.is_empty());
            assert!(elem.inner_types.get(&path).unwrap().annotations.contains_type("a.A"));
        }
    }

    mod lookups {
        use super::*;

        #[test]
        fn field_lookup_covers_declaration_and_type() {
            let mut field = FieldInfo::default();
            field.annotations.insert(marker("a.Decl"));
            field.ty.annotations.insert(marker("a.Type"));
            assert!(field.has_annotation("a.Decl"));
            assert!(field.has_annotation("a.Type"));
            assert!(!field.has_annotation("a.Other"));
        }

        #[test]
        fn method_lookup_covers_declaration_and_return_type() {
            let mut method = MethodInfo::default();
            method.annotations.insert(marker("a.Decl"));
            method.return_type.annotations.insert(marker("a.Ret"));
            assert!(method.has_annotation("a.Decl"));
            assert!(method.has_annotation("a.Ret"));
        }
    }
}
