//! Extraction: populate a Scene from one compiled module.
//!
//! [`SceneExtractor`] is a stateful responder to the visitor event stream.
//! Annotation value sub-streams are decoded with an explicit stack of
//! builder frames, each frame an open annotation or array; closing a frame
//! hands the finished value to its parent, and closing the outermost frame
//! routes the finished annotation to its Scene location by an exhaustive
//! match over the target kind.
//!
//! Failure handling splits two ways: an unresolvable annotation
//! schema or an unsupported target kind aborts the module; an annotation
//! whose target does not fit the element it resolved to (as happens for
//! annotations attached to expressions in field initializers) is dropped
//! with a diagnostic and extraction continues.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use sceneweld_core::annotation::{
    Annotation, AnnotationBuilder, AnnotationDef, AnnotationError, AnnotationValue, ArrayBuilder,
    RetentionPolicy,
};
use sceneweld_core::defs::DefCatalog;
use sceneweld_core::location::{
    BoundLocation, LiveRange, LocalLocation, MethodKey, RelativeLocation, TypeIndexLocation,
    TypePath,
};
use sceneweld_core::scene::{Body, ClassInfo, FieldInfo, MethodInfo, Scene, TypeElement};
use sceneweld_core::vivify::VivifyMap;

use crate::error::{MergeError, MergeResult};
use crate::offset::CodeOffsets;
use crate::visit::{
    descriptor_to_binary_name, AnnotationSite, ClassEvent, ClassEventSink, ClassSource, TargetKind,
};

/// Populate `scene` with every annotation present in the module `source`.
///
/// With `ignore_bridge_methods` set, compiler-generated bridge methods and
/// everything in them are skipped.
pub fn extract_scene(
    scene: &mut Scene,
    source: &dyn ClassSource,
    catalog: &DefCatalog,
    ignore_bridge_methods: bool,
) -> MergeResult<()> {
    let mut extractor = SceneExtractor::new(scene, source.bytes(), catalog, ignore_bridge_methods);
    source.accept(&mut extractor)
}

/// One instruction-category map of a method body.
type BodyMap = VivifyMap<RelativeLocation, TypeElement>;

// ============================================================================
// Builder Frames
// ============================================================================

/// Where a finished annotation goes when its frame closes.
#[derive(Debug)]
enum Slot {
    /// The outermost annotation of a sub-stream: route into the Scene.
    Root { site: AnnotationSite },
    /// A nested annotation: supply to the parent frame under `name`
    /// (`None` inside arrays).
    Nested { name: Option<String> },
}

/// One open annotation or array in the value stream.
#[derive(Debug)]
enum Frame {
    Annotation {
        builder: AnnotationBuilder,
        slot: Slot,
        /// Synthesized definitions carry no fields; values for them are
        /// dropped instead of rejected.
        synthetic: bool,
    },
    Array {
        name: String,
        builder: ArrayBuilder,
    },
}

// ============================================================================
// The Extractor
// ============================================================================

/// A [`ClassEventSink`] that inserts every annotation it sees into a Scene.
pub struct SceneExtractor<'a> {
    scene: &'a mut Scene,
    catalog: &'a DefCatalog,
    offsets: CodeOffsets<'a>,
    ignore_bridge_methods: bool,
    class_name: Option<String>,
    field_name: Option<String>,
    method_key: Option<MethodKey>,
    skipping_method: bool,
    local_names: BTreeMap<LiveRange, String>,
    frames: Vec<Frame>,
}

impl<'a> SceneExtractor<'a> {
    /// An extractor over one module's bytes, writing into `scene`.
    pub fn new(
        scene: &'a mut Scene,
        bytes: &'a [u8],
        catalog: &'a DefCatalog,
        ignore_bridge_methods: bool,
    ) -> Self {
        SceneExtractor {
            scene,
            catalog,
            offsets: CodeOffsets::new(bytes),
            ignore_bridge_methods,
            class_name: None,
            field_name: None,
            method_key: None,
            skipping_method: false,
            local_names: BTreeMap::new(),
            frames: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Element state
    // ------------------------------------------------------------------

    fn current_class_mut(&mut self) -> Option<&mut ClassInfo> {
        let class = self.class_name.clone()?;
        Some(self.scene.classes.vivify(class))
    }

    fn current_field_mut(&mut self) -> Option<&mut FieldInfo> {
        let class = self.class_name.clone()?;
        let field = self.field_name.clone()?;
        Some(self.scene.classes.vivify(class).fields.vivify(field))
    }

    fn current_method_mut(&mut self) -> Option<&mut MethodInfo> {
        let class = self.class_name.clone()?;
        let key = self.method_key.clone()?;
        Some(self.scene.classes.vivify(class).methods.vivify(key))
    }

    fn context_name(&self) -> String {
        let class = self.class_name.as_deref().unwrap_or("<no class>");
        if let Some(field) = &self.field_name {
            format!("{class}.{field}")
        } else if let Some(method) = &self.method_key {
            format!("{class}.{method}")
        } else {
            class.to_string()
        }
    }

    // ------------------------------------------------------------------
    // Annotation value stream
    // ------------------------------------------------------------------

    fn resolve(&self, type_name: &str) -> MergeResult<Arc<AnnotationDef>> {
        if let Some(def) = self.catalog.lookup(type_name) {
            return Ok(def);
        }
        // Module-internal synthetic types are marked by a '+' in the name
        // and get a minimal stand-in definition.
        if type_name.contains('+') {
            warn!(
                annotation = type_name,
                "synthesizing a definition for an unresolvable synthetic annotation type"
            );
            return Ok(self
                .catalog
                .remember(Arc::new(AnnotationDef::synthetic(type_name))));
        }
        Err(MergeError::UnresolvableAnnotation {
            type_name: type_name.to_string(),
        })
    }

    fn begin_annotation(&mut self, site: AnnotationSite, descriptor: &str) -> MergeResult<()> {
        let type_name = descriptor_to_binary_name(descriptor).ok_or_else(|| {
            MergeError::UnresolvableAnnotation {
                type_name: descriptor.to_string(),
            }
        })?;
        let def = self.resolve(&type_name)?;
        let synthetic = def.retention == RetentionPolicy::Unknown;
        self.frames.push(Frame::Annotation {
            builder: AnnotationBuilder::new(def),
            slot: Slot::Root { site },
            synthetic,
        });
        Ok(())
    }

    fn begin_nested(&mut self, name: Option<String>, descriptor: &str) -> MergeResult<()> {
        if self.frames.is_empty() {
            return Err(MergeError::order("nested annotation outside an annotation"));
        }
        let type_name = descriptor_to_binary_name(descriptor).ok_or_else(|| {
            MergeError::UnresolvableAnnotation {
                type_name: descriptor.to_string(),
            }
        })?;
        let def = self.resolve(&type_name)?;
        let synthetic = def.retention == RetentionPolicy::Unknown;
        self.frames.push(Frame::Annotation {
            builder: AnnotationBuilder::new(def),
            slot: Slot::Nested { name },
            synthetic,
        });
        Ok(())
    }

    fn begin_array(&mut self, name: &str) -> MergeResult<()> {
        match self.frames.last() {
            Some(Frame::Annotation { .. }) => {
                self.frames.push(Frame::Array {
                    name: name.to_string(),
                    builder: ArrayBuilder::new(),
                });
                Ok(())
            }
            Some(Frame::Array { .. }) => {
                Err(MergeError::order("array nested directly inside an array"))
            }
            None => Err(MergeError::order("array field outside an annotation")),
        }
    }

    fn end_array(&mut self) -> MergeResult<()> {
        match self.frames.pop() {
            Some(Frame::Array { name, builder }) => self.add_value(Some(name), builder.finish()),
            _ => Err(MergeError::order("end of array without an open array")),
        }
    }

    fn end_annotation(&mut self) -> MergeResult<()> {
        match self.frames.pop() {
            Some(Frame::Annotation { builder, slot, .. }) => {
                let annotation = builder.finish();
                match slot {
                    Slot::Nested { name } => {
                        self.add_value(name, AnnotationValue::Nested(annotation))
                    }
                    Slot::Root { site } => self.place(site, annotation),
                }
            }
            _ => Err(MergeError::order("end of annotation without an open annotation")),
        }
    }

    fn add_value(&mut self, name: Option<String>, value: AnnotationValue) -> MergeResult<()> {
        match self.frames.last_mut() {
            Some(Frame::Array { builder, .. }) => {
                builder.push(value);
                Ok(())
            }
            Some(Frame::Annotation {
                builder, synthetic, ..
            }) => {
                let Some(name) = name else {
                    return Err(MergeError::order("annotation field value without a name"));
                };
                match builder.field(&name, value) {
                    Err(AnnotationError::UnknownField { annotation, .. }) if *synthetic => {
                        warn!(
                            annotation = %annotation,
                            field = %name,
                            "dropping value supplied for a synthesized definition"
                        );
                        Ok(())
                    }
                    other => other.map_err(MergeError::from),
                }
            }
            None => Err(MergeError::order("annotation value outside an annotation")),
        }
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    fn place(&mut self, site: AnnotationSite, annotation: Annotation) -> MergeResult<()> {
        match site {
            AnnotationSite::Declaration => self.place_declaration(annotation),
            AnnotationSite::Parameter { index } => {
                if self.method_key.is_none() {
                    drop_mismatch("parameter declaration", &annotation);
                    return Ok(());
                }
                if let Some(method) = self.current_method_mut() {
                    method.parameters.vivify(index).annotations.insert(annotation);
                }
                Ok(())
            }
            AnnotationSite::Type { target, path } | AnnotationSite::Insn { target, path } => {
                self.place_extended(target, &path, annotation)
            }
        }
    }

    fn place_declaration(&mut self, annotation: Annotation) -> MergeResult<()> {
        if self.field_name.is_some() {
            if let Some(field) = self.current_field_mut() {
                field.annotations.insert(annotation);
            }
            return Ok(());
        }
        if self.method_key.is_some() {
            // Type annotations visited through the plain declaration
            // channel belong on the return type.
            let on_return = annotation.def.type_annotation;
            if let Some(method) = self.current_method_mut() {
                if on_return {
                    method.return_type.annotations.insert(annotation);
                } else {
                    method.annotations.insert(annotation);
                }
            }
            return Ok(());
        }
        if self.class_name.is_some() {
            if let Some(class) = self.current_class_mut() {
                class.annotations.insert(annotation);
            }
            return Ok(());
        }
        Err(MergeError::order("annotation before the class header"))
    }

    fn place_extended(
        &mut self,
        target: TargetKind,
        path: &TypePath,
        annotation: Annotation,
    ) -> MergeResult<()> {
        match target {
            TargetKind::ExceptionParameter { .. } => Err(MergeError::UnsupportedTarget {
                sort: target.sort(),
                context: self.context_name(),
            }),

            TargetKind::ClassTypeParameter { param_index } => {
                self.class_bound(BoundLocation::parameter(param_index.into()), path, annotation)
            }
            TargetKind::ClassTypeParameterBound {
                param_index,
                bound_index,
            } => self.class_bound(
                BoundLocation::bound(param_index.into(), bound_index.into()),
                path,
                annotation,
            ),
            TargetKind::ClassExtends { supertype_index } => {
                if self.field_name.is_some() || self.method_key.is_some() {
                    drop_mismatch("supertype", &annotation);
                    return Ok(());
                }
                let loc = TypeIndexLocation(supertype_index.into());
                if let Some(class) = self.current_class_mut() {
                    class
                        .extends_implements
                        .vivify(loc)
                        .at_path(path)
                        .annotations
                        .insert(annotation);
                }
                Ok(())
            }

            TargetKind::Field => {
                if self.field_name.is_none() {
                    drop_mismatch("field type", &annotation);
                    return Ok(());
                }
                if let Some(field) = self.current_field_mut() {
                    field.ty.at_path(path).annotations.insert(annotation);
                }
                Ok(())
            }

            TargetKind::MethodTypeParameter { param_index } => self.method_target(
                annotation,
                "method type parameter",
                |method, path, a| {
                    method
                        .bounds
                        .vivify(BoundLocation::parameter(param_index.into()))
                        .at_path(path)
                        .annotations
                        .insert(a);
                },
                path,
            ),
            TargetKind::MethodTypeParameterBound {
                param_index,
                bound_index,
            } => self.method_target(
                annotation,
                "method type parameter bound",
                |method, path, a| {
                    method
                        .bounds
                        .vivify(BoundLocation::bound(param_index.into(), bound_index.into()))
                        .at_path(path)
                        .annotations
                        .insert(a);
                },
                path,
            ),
            TargetKind::MethodReturn => {
                self.method_target(annotation, "return type", |method, path, a| {
                    method.return_type.at_path(path).annotations.insert(a);
                }, path)
            }
            TargetKind::MethodReceiver => {
                self.method_target(annotation, "receiver", |method, path, a| {
                    method.receiver.ty.at_path(path).annotations.insert(a);
                }, path)
            }
            TargetKind::MethodFormalParameter { index } => {
                self.method_target(annotation, "formal parameter", |method, path, a| {
                    method
                        .parameters
                        .vivify(index.into())
                        .ty
                        .at_path(path)
                        .annotations
                        .insert(a);
                }, path)
            }
            TargetKind::Throws { exception_index } => {
                self.method_target(annotation, "throws clause", |method, path, a| {
                    method
                        .throws
                        .vivify(TypeIndexLocation::interface(exception_index.into()))
                        .at_path(path)
                        .annotations
                        .insert(a);
                }, path)
            }

            TargetKind::LocalVariable { range } | TargetKind::ResourceVariable { range } => {
                let loc = match self.local_names.get(&range) {
                    Some(name) => LocalLocation::named(range, name.clone()),
                    None => LocalLocation::new(range),
                };
                self.method_target(annotation, "local variable", |method, path, a| {
                    method
                        .body
                        .locals
                        .vivify(loc)
                        .ty
                        .at_path(path)
                        .annotations
                        .insert(a);
                }, path)
            }

            TargetKind::New => self.body_site(annotation, path, None, "object creation", |body| {
                &mut body.news
            }),
            TargetKind::InstanceOf => {
                self.body_site(annotation, path, None, "type test", |body| &mut body.instanceofs)
            }
            TargetKind::Cast {
                type_argument_index,
            } => self.body_site(
                annotation,
                path,
                Some(type_argument_index.into()),
                "cast",
                |body| &mut body.typecasts,
            ),
            TargetKind::ConstructorReference | TargetKind::MethodReference => {
                self.body_site(annotation, path, None, "member reference", |body| {
                    &mut body.refs
                })
            }
            TargetKind::ConstructorReferenceTypeArgument {
                type_argument_index,
            }
            | TargetKind::MethodReferenceTypeArgument {
                type_argument_index,
            } => self.body_site(
                annotation,
                path,
                Some(type_argument_index.into()),
                "member reference type argument",
                |body| &mut body.refs,
            ),
            TargetKind::ConstructorInvocationTypeArgument {
                type_argument_index,
            }
            | TargetKind::MethodInvocationTypeArgument {
                type_argument_index,
            } => self.body_site(
                annotation,
                path,
                Some(type_argument_index.into()),
                "invocation type argument",
                |body| &mut body.calls,
            ),
        }
    }

    fn class_bound(
        &mut self,
        loc: BoundLocation,
        path: &TypePath,
        annotation: Annotation,
    ) -> MergeResult<()> {
        if self.field_name.is_some() || self.method_key.is_some() {
            drop_mismatch("class type parameter", &annotation);
            return Ok(());
        }
        if let Some(class) = self.current_class_mut() {
            class.bounds.vivify(loc).at_path(path).annotations.insert(annotation);
        }
        Ok(())
    }

    fn method_target(
        &mut self,
        annotation: Annotation,
        what: &'static str,
        route: impl FnOnce(&mut MethodInfo, &TypePath, Annotation),
        path: &TypePath,
    ) -> MergeResult<()> {
        if self.method_key.is_none() {
            drop_mismatch(what, &annotation);
            return Ok(());
        }
        if let Some(method) = self.current_method_mut() {
            route(method, path, annotation);
        }
        Ok(())
    }

    fn body_site(
        &mut self,
        annotation: Annotation,
        path: &TypePath,
        type_index: Option<u32>,
        what: &'static str,
        map: impl FnOnce(&mut Body) -> &mut BodyMap,
    ) -> MergeResult<()> {
        if self.method_key.is_none() || !self.offsets.is_active() {
            drop_mismatch(what, &annotation);
            return Ok(());
        }
        let loc = RelativeLocation::offset(self.offsets.previous_offset(), type_index);
        if let Some(method) = self.current_method_mut() {
            map(&mut method.body)
                .vivify(loc)
                .at_path(path)
                .annotations
                .insert(annotation);
        }
        Ok(())
    }
}

/// Diagnostic for a decoded annotation whose target kind does not match the
/// element it resolved to; the single annotation is dropped and extraction
/// continues.
fn drop_mismatch(what: &str, annotation: &Annotation) {
    warn!(
        annotation = %annotation.type_name(),
        target = what,
        "dropping annotation whose target does not fit the current element"
    );
}

impl ClassEventSink for SceneExtractor<'_> {
    fn event(&mut self, event: &ClassEvent) -> MergeResult<()> {
        if self.skipping_method {
            if matches!(event, ClassEvent::EndMethod) {
                self.skipping_method = false;
            }
            return Ok(());
        }
        match event {
            ClassEvent::BeginClass(decl) => {
                let name = decl.name.replace('/', ".");
                self.scene.classes.vivify(name.clone());
                self.class_name = Some(name);
                Ok(())
            }
            ClassEvent::BeginAnnotation {
                site, descriptor, ..
            } => self.begin_annotation(site.clone(), descriptor),
            ClassEvent::Scalar { name, value } => self.add_value(name.clone(), value.to_value()),
            ClassEvent::EnumConst {
                name,
                type_descriptor,
                constant,
            } => {
                let type_name = descriptor_to_binary_name(type_descriptor).ok_or_else(|| {
                    MergeError::UnresolvableAnnotation {
                        type_name: type_descriptor.clone(),
                    }
                })?;
                self.add_value(
                    name.clone(),
                    AnnotationValue::EnumConst {
                        type_name,
                        constant: constant.clone(),
                    },
                )
            }
            ClassEvent::BeginNested { name, descriptor } => {
                self.begin_nested(name.clone(), descriptor)
            }
            ClassEvent::BeginArray { name } => self.begin_array(name),
            ClassEvent::EndArray => self.end_array(),
            ClassEvent::EndAnnotation => self.end_annotation(),
            ClassEvent::BeginField(decl) => {
                if let Some(class) = self.current_class_mut() {
                    class.fields.vivify(decl.name.clone());
                }
                self.field_name = Some(decl.name.clone());
                Ok(())
            }
            ClassEvent::EndField => {
                self.field_name = None;
                Ok(())
            }
            ClassEvent::BeginMethod(decl) => {
                if self.ignore_bridge_methods && decl.is_bridge() {
                    self.skipping_method = true;
                    return Ok(());
                }
                self.method_key = Some(MethodKey::new(decl.name.clone(), decl.descriptor.clone()));
                self.local_names.clear();
                // vivified so annotation-free methods still appear
                let _ = self.current_method_mut();
                Ok(())
            }
            ClassEvent::CodeStart { attribute_offset } => match self.method_key.clone() {
                Some(key) => self.offsets.reset(&key, *attribute_offset),
                None => Err(MergeError::order("code attribute outside a method")),
            },
            ClassEvent::Instruction(insn) => self.offsets.advance(insn),
            ClassEvent::LocalVariable { name, range, .. } => {
                self.local_names.insert(*range, name.clone());
                Ok(())
            }
            ClassEvent::EndMethod => {
                self.offsets.finish_method();
                self.method_key = None;
                self.local_names.clear();
                Ok(())
            }
            ClassEvent::EndClass => {
                self.class_name = None;
                Ok(())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
