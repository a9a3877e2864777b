//! Insertion: merge a Scene's annotations into a compiled module.
//!
//! [`SceneInserter`] sits between the module reader and the downstream
//! writer. Every event is forwarded unchanged except where the merge policy
//! says otherwise:
//! - each structural element (class, field, method) is *flushed* exactly
//!   once, immediately before its next sibling or its end event, by
//!   emitting every Scene annotation attached to it and its nested type
//!   locations;
//! - bytecode-offset-keyed annotations flush opportunistically right after
//!   the offset tracker reports the owning instruction's offset;
//! - under `overwrite`, the pass-through of a module annotation whose type
//!   the Scene also carries on the same element is suppressed, so the
//!   output holds exactly one instance; without `overwrite`, the Scene
//!   annotation is skipped instead.
//!
//! One dynamic-call-site instruction kind serves both constructor and
//! lambda/member-reference call sites, distinguishable only through the
//! bootstrap metadata. A read-only pre-pass ([`CallSiteIndex::build`])
//! classifies every such offset per method before the rewriting pass runs,
//! and the main pass consults the finished index: two complete traversals,
//! no interleaved lookahead.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use sceneweld_core::annotation::{Annotation, AnnotationValue};
use sceneweld_core::location::{MethodKey, RelativeLocation, TypePath};
use sceneweld_core::scene::{ClassInfo, FieldInfo, MethodInfo, Scene, TypeElement};

use crate::error::{MergeError, MergeResult};
use crate::offset::CodeOffsets;
use crate::visit::{
    binary_name_to_descriptor, descriptor_to_binary_name, AnnotationSite, ClassEvent,
    ClassEventSink, ClassSource, ConstValue, Insn, TargetKind,
};

/// Rewrite the module `source` into `downstream`, merging in every
/// annotation from `scene` under the given `overwrite` policy.
///
/// Runs the call-site pre-pass and the rewriting pass as two complete
/// traversals of `source`.
pub fn insert_class(
    scene: &Scene,
    source: &dyn ClassSource,
    overwrite: bool,
    downstream: &mut dyn ClassEventSink,
) -> MergeResult<()> {
    let call_sites = CallSiteIndex::build(source)?;
    let mut inserter = SceneInserter {
        scene,
        overwrite,
        call_sites,
        offsets: CodeOffsets::new(source.bytes()),
        down: downstream,
        class_name: None,
        class_flushed: false,
        existing_class: Vec::new(),
        field_name: None,
        existing_field: Vec::new(),
        method_key: None,
        method_flushed: false,
        existing_method: Vec::new(),
        suppressing: false,
        open_values: 0,
    };
    source.accept(&mut inserter)
}

// ============================================================================
// Call-Site Pre-Pass
// ============================================================================

/// How a dynamic call site resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSiteKind {
    /// The bootstrap implementation is a constructor.
    Constructor,
    /// The bootstrap implementation is a compiler-synthesized lambda body.
    Lambda,
    /// Any other call site (plain method references included).
    Other,
}

#[derive(Debug, Clone, Default)]
struct MethodCallSites {
    constructors: BTreeSet<u32>,
    lambdas: BTreeSet<u32>,
}

/// Per-method classification of dynamic-call-site offsets, built by one
/// read-only traversal and handed as a value to the rewriting pass.
#[derive(Debug, Clone, Default)]
pub struct CallSiteIndex {
    sites: BTreeMap<MethodKey, MethodCallSites>,
}

impl CallSiteIndex {
    /// Classify every dynamic call site in the module.
    pub fn build(source: &dyn ClassSource) -> MergeResult<Self> {
        let mut indexer = CallSiteIndexer {
            offsets: CodeOffsets::new(source.bytes()),
            index: CallSiteIndex::default(),
            method: None,
        };
        source.accept(&mut indexer)?;
        let index = indexer.index;
        for (method, sites) in &index.sites {
            if let Some(offset) = sites.constructors.intersection(&sites.lambdas).next() {
                return Err(MergeError::CallSiteConflict {
                    method: method.clone(),
                    offset: *offset,
                });
            }
        }
        Ok(index)
    }

    /// The classification of the call site at `offset` in `method`.
    pub fn classify(&self, method: &MethodKey, offset: u32) -> CallSiteKind {
        match self.sites.get(method) {
            Some(sites) if sites.constructors.contains(&offset) => CallSiteKind::Constructor,
            Some(sites) if sites.lambdas.contains(&offset) => CallSiteKind::Lambda,
            _ => CallSiteKind::Other,
        }
    }
}

struct CallSiteIndexer<'a> {
    offsets: CodeOffsets<'a>,
    index: CallSiteIndex,
    method: Option<MethodKey>,
}

impl ClassEventSink for CallSiteIndexer<'_> {
    fn event(&mut self, event: &ClassEvent) -> MergeResult<()> {
        match event {
            ClassEvent::BeginMethod(decl) => {
                self.method = Some(MethodKey::new(decl.name.clone(), decl.descriptor.clone()));
                Ok(())
            }
            ClassEvent::CodeStart { attribute_offset } => match self.method.clone() {
                Some(key) => self.offsets.reset(&key, *attribute_offset),
                None => Err(MergeError::order("code attribute outside a method")),
            },
            ClassEvent::Instruction(insn) => {
                if let (Some(key), Insn::InvokeDynamic { handle, .. }) = (&self.method, insn) {
                    let at = self.offsets.current_offset();
                    let sites = self.index.sites.entry(key.clone()).or_default();
                    let simple = handle.name.rsplit('.').next().unwrap_or("");
                    if handle.name == "<init>" {
                        sites.constructors.insert(at);
                    } else if simple.starts_with("lambda$") {
                        sites.lambdas.insert(at);
                    }
                }
                self.offsets.advance(insn)
            }
            ClassEvent::EndMethod => {
                self.offsets.finish_method();
                self.method = None;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// The Inserter
// ============================================================================

/// Which element's observed-annotation list applies.
#[derive(Debug, Clone, Copy)]
enum Scope {
    Class,
    Field,
    Method,
}

/// A [`ClassEventSink`] that forwards a module to `down` while merging in
/// Scene annotations.
struct SceneInserter<'a> {
    scene: &'a Scene,
    overwrite: bool,
    call_sites: CallSiteIndex,
    offsets: CodeOffsets<'a>,
    down: &'a mut dyn ClassEventSink,

    class_name: Option<String>,
    class_flushed: bool,
    /// Annotation type names observed on the class during pass-through.
    existing_class: Vec<String>,

    field_name: Option<String>,
    existing_field: Vec<String>,

    method_key: Option<MethodKey>,
    method_flushed: bool,
    existing_method: Vec<String>,

    /// Swallowing a suppressed pass-through annotation sub-stream.
    suppressing: bool,
    /// Open annotation/array frames of the swallowed sub-stream.
    open_values: usize,
}

impl<'a> SceneInserter<'a> {
    // ------------------------------------------------------------------
    // Scene lookups (read-only; lifetimes tied to the Scene, not to self)
    // ------------------------------------------------------------------

    fn scene_class(&self) -> Option<&'a ClassInfo> {
        let name = self.class_name.as_ref()?;
        self.scene.classes.get(name)
    }

    fn scene_field(&self) -> Option<&'a FieldInfo> {
        let name = self.field_name.as_ref()?;
        self.scene_class()?.fields.get(name)
    }

    fn scene_method(&self) -> Option<&'a MethodInfo> {
        let key = self.method_key.as_ref()?;
        self.scene_class()?.methods.get(key)
    }

    // ------------------------------------------------------------------
    // Conflict policy
    // ------------------------------------------------------------------

    fn skip_existing(&self, scope: Scope, type_name: &str) -> bool {
        if self.overwrite {
            return false;
        }
        let observed = match scope {
            Scope::Class => &self.existing_class,
            Scope::Field => &self.existing_field,
            Scope::Method => &self.existing_method,
        };
        observed.iter().any(|n| n == type_name)
    }

    /// Whether the Scene carries a same-named annotation on the element a
    /// pass-through annotation at `site` belongs to.
    fn scene_mentions(&self, site: &AnnotationSite, type_name: &str) -> bool {
        if self.field_name.is_some() {
            return self
                .scene_field()
                .is_some_and(|field| field.has_annotation(type_name));
        }
        if self.method_key.is_some() {
            let Some(method) = self.scene_method() else {
                return false;
            };
            return match site {
                AnnotationSite::Parameter { index } => method
                    .parameters
                    .get(index)
                    .is_some_and(|p| p.has_annotation(type_name)),
                AnnotationSite::Type {
                    target: TargetKind::MethodFormalParameter { index },
                    ..
                } => method
                    .parameters
                    .get(&u32::from(*index))
                    .is_some_and(|p| p.has_annotation(type_name)),
                AnnotationSite::Type {
                    target: TargetKind::MethodReceiver,
                    ..
                } => method.receiver.has_annotation(type_name),
                AnnotationSite::Insn { target, .. } => {
                    self.insn_element_mentions(method, target, type_name)
                }
                _ => method.has_annotation(type_name),
            };
        }
        self.scene_class()
            .is_some_and(|class| class.has_annotation(type_name))
    }

    fn insn_element_mentions(
        &self,
        method: &MethodInfo,
        target: &TargetKind,
        type_name: &str,
    ) -> bool {
        if !self.offsets.is_active() {
            return false;
        }
        let offset = self.offsets.previous_offset();
        match target {
            TargetKind::New => method
                .body
                .news
                .get(&RelativeLocation::offset(offset, None))
                .is_some_and(|e| element_mentions(e, type_name)),
            TargetKind::InstanceOf => method
                .body
                .instanceofs
                .get(&RelativeLocation::offset(offset, None))
                .is_some_and(|e| element_mentions(e, type_name)),
            TargetKind::Cast { .. } => method
                .body
                .typecasts
                .iter()
                .filter(|(loc, _)| loc.bytecode_offset() == Some(offset))
                .any(|(_, e)| element_mentions(e, type_name)),
            TargetKind::ConstructorReference
            | TargetKind::MethodReference
            | TargetKind::ConstructorReferenceTypeArgument { .. }
            | TargetKind::MethodReferenceTypeArgument { .. } => method
                .body
                .refs
                .iter()
                .filter(|(loc, _)| loc.bytecode_offset() == Some(offset))
                .any(|(_, e)| element_mentions(e, type_name)),
            TargetKind::ConstructorInvocationTypeArgument { .. }
            | TargetKind::MethodInvocationTypeArgument { .. } => method
                .body
                .calls
                .iter()
                .filter(|(loc, _)| loc.bytecode_offset() == Some(offset))
                .any(|(_, e)| element_mentions(e, type_name)),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Pass-through annotations
    // ------------------------------------------------------------------

    fn passthrough_annotation(
        &mut self,
        event: &ClassEvent,
        site: &AnnotationSite,
        descriptor: &str,
    ) -> MergeResult<()> {
        let type_name =
            descriptor_to_binary_name(descriptor).unwrap_or_else(|| descriptor.to_string());
        let scope = if self.field_name.is_some() {
            Scope::Field
        } else if self.method_key.is_some() {
            Scope::Method
        } else {
            Scope::Class
        };
        match scope {
            Scope::Class => self.existing_class.push(type_name.clone()),
            Scope::Field => self.existing_field.push(type_name.clone()),
            Scope::Method => self.existing_method.push(type_name.clone()),
        }
        if self.overwrite && self.scene_mentions(site, &type_name) {
            // the Scene's version will be emitted at flush time
            self.suppressing = true;
            self.open_values = 1;
            return Ok(());
        }
        self.down.event(event)
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn emit_annotation(&mut self, site: AnnotationSite, annotation: &Annotation) -> MergeResult<()> {
        self.down.event(&ClassEvent::BeginAnnotation {
            site,
            descriptor: binary_name_to_descriptor(annotation.type_name()),
            visible: annotation.is_runtime(),
        })?;
        for (name, value) in annotation.values() {
            self.emit_value(Some(name.clone()), value)?;
        }
        self.down.event(&ClassEvent::EndAnnotation)
    }

    fn emit_scalar(&mut self, name: Option<String>, value: ConstValue) -> MergeResult<()> {
        self.down.event(&ClassEvent::Scalar { name, value })
    }

    fn emit_value(&mut self, name: Option<String>, value: &AnnotationValue) -> MergeResult<()> {
        match value {
            AnnotationValue::Bool(v) => self.emit_scalar(name, ConstValue::Bool(*v)),
            AnnotationValue::Byte(v) => self.emit_scalar(name, ConstValue::Byte(*v)),
            AnnotationValue::Char(v) => self.emit_scalar(name, ConstValue::Char(*v)),
            AnnotationValue::Short(v) => self.emit_scalar(name, ConstValue::Short(*v)),
            AnnotationValue::Int(v) => self.emit_scalar(name, ConstValue::Int(*v)),
            AnnotationValue::Long(v) => self.emit_scalar(name, ConstValue::Long(*v)),
            AnnotationValue::Float(v) => self.emit_scalar(name, ConstValue::Float(*v)),
            AnnotationValue::Double(v) => self.emit_scalar(name, ConstValue::Double(*v)),
            AnnotationValue::Str(v) => self.emit_scalar(name, ConstValue::Str(v.clone())),
            AnnotationValue::ClassToken(v) => {
                self.emit_scalar(name, ConstValue::ClassToken(v.clone()))
            }
            AnnotationValue::EnumConst {
                type_name,
                constant,
            } => self.down.event(&ClassEvent::EnumConst {
                name,
                type_descriptor: binary_name_to_descriptor(type_name),
                constant: constant.clone(),
            }),
            AnnotationValue::Nested(nested) => {
                self.down.event(&ClassEvent::BeginNested {
                    name,
                    descriptor: binary_name_to_descriptor(nested.type_name()),
                })?;
                for (field, value) in nested.values() {
                    self.emit_value(Some(field.clone()), value)?;
                }
                self.down.event(&ClassEvent::EndAnnotation)
            }
            AnnotationValue::Array(items) => {
                let Some(name) = name else {
                    return Err(MergeError::order("array value without a field name"));
                };
                self.down.event(&ClassEvent::BeginArray { name })?;
                for item in items {
                    self.emit_value(None, item)?;
                }
                self.down.event(&ClassEvent::EndArray)
            }
        }
    }

    /// Emit the annotations on a type element and on its nested positions.
    fn emit_type_element(
        &mut self,
        scope: Scope,
        target: TargetKind,
        elem: &TypeElement,
    ) -> MergeResult<()> {
        for annotation in &elem.annotations {
            if self.skip_existing(scope, annotation.type_name()) {
                continue;
            }
            self.emit_annotation(
                AnnotationSite::Type {
                    target,
                    path: TypePath::root(),
                },
                annotation,
            )?;
        }
        for (path, inner) in &elem.inner_types {
            for annotation in &inner.annotations {
                if self.skip_existing(scope, annotation.type_name()) {
                    continue;
                }
                self.emit_annotation(
                    AnnotationSite::Type {
                        target,
                        path: path.clone(),
                    },
                    annotation,
                )?;
            }
        }
        Ok(())
    }

    /// Like [`Self::emit_type_element`], but at an instruction site.
    fn emit_insn_element(&mut self, target: TargetKind, elem: &TypeElement) -> MergeResult<()> {
        for annotation in &elem.annotations {
            if self.skip_existing(Scope::Method, annotation.type_name()) {
                continue;
            }
            self.emit_annotation(
                AnnotationSite::Insn {
                    target,
                    path: TypePath::root(),
                },
                annotation,
            )?;
        }
        for (path, inner) in &elem.inner_types {
            for annotation in &inner.annotations {
                if self.skip_existing(Scope::Method, annotation.type_name()) {
                    continue;
                }
                self.emit_annotation(
                    AnnotationSite::Insn {
                        target,
                        path: path.clone(),
                    },
                    annotation,
                )?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flushes
    // ------------------------------------------------------------------

    fn flush_class(&mut self) -> MergeResult<()> {
        if self.class_flushed {
            return Ok(());
        }
        self.class_flushed = true;
        let Some(class) = self.scene_class() else {
            return Ok(());
        };
        for annotation in &class.annotations {
            if self.skip_existing(Scope::Class, annotation.type_name()) {
                continue;
            }
            self.emit_annotation(AnnotationSite::Declaration, annotation)?;
        }
        for (loc, bound) in &class.bounds {
            let target = match loc.bound_index {
                None => TargetKind::ClassTypeParameter {
                    param_index: loc.param_index as u8,
                },
                Some(bound_index) => TargetKind::ClassTypeParameterBound {
                    param_index: loc.param_index as u8,
                    bound_index: bound_index as u8,
                },
            };
            self.emit_type_element(Scope::Class, target, bound)?;
        }
        for (loc, elem) in &class.extends_implements {
            let target = TargetKind::ClassExtends {
                supertype_index: loc.0 as i16,
            };
            self.emit_type_element(Scope::Class, target, elem)?;
        }
        Ok(())
    }

    fn flush_field(&mut self) -> MergeResult<()> {
        let Some(field) = self.scene_field() else {
            return Ok(());
        };
        for annotation in &field.annotations {
            if self.skip_existing(Scope::Field, annotation.type_name()) {
                continue;
            }
            self.emit_annotation(AnnotationSite::Declaration, annotation)?;
        }
        self.emit_type_element(Scope::Field, TargetKind::Field, &field.ty)
    }

    fn flush_method(&mut self) -> MergeResult<()> {
        if self.method_flushed {
            return Ok(());
        }
        self.method_flushed = true;
        let Some(method) = self.scene_method() else {
            return Ok(());
        };

        for annotation in &method.annotations {
            if self.skip_existing(Scope::Method, annotation.type_name()) {
                continue;
            }
            self.emit_annotation(AnnotationSite::Declaration, annotation)?;
        }
        self.emit_type_element(Scope::Method, TargetKind::MethodReturn, &method.return_type)?;
        for (loc, bound) in &method.bounds {
            let target = match loc.bound_index {
                None => TargetKind::MethodTypeParameter {
                    param_index: loc.param_index as u8,
                },
                Some(bound_index) => TargetKind::MethodTypeParameterBound {
                    param_index: loc.param_index as u8,
                    bound_index: bound_index as u8,
                },
            };
            self.emit_type_element(Scope::Method, target, bound)?;
        }
        for (loc, local) in &method.body.locals {
            let target = TargetKind::LocalVariable { range: loc.range };
            for annotation in &local.annotations {
                if self.skip_existing(Scope::Method, annotation.type_name()) {
                    continue;
                }
                self.emit_annotation(
                    AnnotationSite::Type {
                        target,
                        path: TypePath::root(),
                    },
                    annotation,
                )?;
            }
            self.emit_type_element(Scope::Method, target, &local.ty)?;
        }
        for (index, parameter) in &method.parameters {
            for annotation in &parameter.annotations {
                if self.skip_existing(Scope::Method, annotation.type_name()) {
                    continue;
                }
                self.emit_annotation(AnnotationSite::Parameter { index: *index }, annotation)?;
            }
            let target = TargetKind::MethodFormalParameter {
                index: *index as u8,
            };
            self.emit_type_element(Scope::Method, target, &parameter.ty)?;
        }
        self.emit_type_element(Scope::Method, TargetKind::MethodReceiver, &method.receiver.ty)?;
        for (loc, elem) in &method.throws {
            let target = TargetKind::Throws {
                exception_index: loc.0 as u16,
            };
            self.emit_type_element(Scope::Method, target, elem)?;
        }
        for (loc, lambda) in &method.body.funs {
            if !loc.is_bytecode_offset() {
                warn!(location = %loc, "skipping functional-literal annotations without a bytecode offset");
                continue;
            }
            for (index, parameter) in &lambda.parameters {
                for annotation in &parameter.annotations {
                    if self.skip_existing(Scope::Method, annotation.type_name()) {
                        continue;
                    }
                    self.emit_annotation(AnnotationSite::Parameter { index: *index }, annotation)?;
                }
                let target = TargetKind::MethodFormalParameter {
                    index: *index as u8,
                };
                self.emit_type_element(Scope::Method, target, &parameter.ty)?;
            }
        }
        warn_source_keys(method);
        Ok(())
    }

    /// Emit the Scene annotations keyed on the offset of the instruction
    /// just completed.
    fn flush_instruction_sites(&mut self) -> MergeResult<()> {
        if !self.offsets.is_active() {
            return Ok(());
        }
        let Some(key) = self.method_key.clone() else {
            return Ok(());
        };
        let Some(method) = self.scene_method() else {
            return Ok(());
        };
        let offset = self.offsets.previous_offset();

        if let Some(elem) = method.body.news.get(&RelativeLocation::offset(offset, None)) {
            self.emit_insn_element(TargetKind::New, elem)?;
        }
        if let Some(elem) = method
            .body
            .instanceofs
            .get(&RelativeLocation::offset(offset, None))
        {
            self.emit_insn_element(TargetKind::InstanceOf, elem)?;
        }
        for (loc, elem) in &method.body.typecasts {
            if loc.bytecode_offset() != Some(offset) {
                continue;
            }
            let target = TargetKind::Cast {
                type_argument_index: loc.type_index().unwrap_or(0) as u8,
            };
            self.emit_insn_element(target, elem)?;
        }
        for (loc, elem) in &method.body.refs {
            if loc.bytecode_offset() != Some(offset) {
                continue;
            }
            let target = match self.call_sites.classify(&key, offset) {
                CallSiteKind::Lambda => {
                    warn!(
                        method = %key,
                        offset,
                        "dropping member-reference annotation at a lambda call site"
                    );
                    continue;
                }
                CallSiteKind::Constructor => match loc.type_index() {
                    Some(index) => TargetKind::ConstructorReferenceTypeArgument {
                        type_argument_index: index as u8,
                    },
                    None => TargetKind::ConstructorReference,
                },
                CallSiteKind::Other => match loc.type_index() {
                    Some(index) => TargetKind::MethodReferenceTypeArgument {
                        type_argument_index: index as u8,
                    },
                    None => TargetKind::MethodReference,
                },
            };
            self.emit_insn_element(target, elem)?;
        }
        for (loc, elem) in &method.body.calls {
            if loc.bytecode_offset() != Some(offset) {
                continue;
            }
            let index = loc.type_index().unwrap_or(0) as u8;
            let target = match self.call_sites.classify(&key, offset) {
                CallSiteKind::Constructor => TargetKind::ConstructorInvocationTypeArgument {
                    type_argument_index: index,
                },
                _ => TargetKind::MethodInvocationTypeArgument {
                    type_argument_index: index,
                },
            };
            self.emit_insn_element(target, elem)?;
        }
        Ok(())
    }
}

/// Diagnose Scene body entries that can never be placed because they are
/// keyed by a source index instead of a bytecode offset.
fn warn_source_keys(method: &MethodInfo) {
    let maps = [
        ("object creation", &method.body.news),
        ("type test", &method.body.instanceofs),
        ("cast", &method.body.typecasts),
        ("member reference", &method.body.refs),
        ("invocation type argument", &method.body.calls),
    ];
    for (what, map) in maps {
        for (loc, _) in map {
            if !loc.is_bytecode_offset() {
                warn!(location = %loc, site = what, "skipping annotation without a bytecode offset");
            }
        }
    }
}

fn element_mentions(elem: &TypeElement, type_name: &str) -> bool {
    elem.annotations.contains_type(type_name)
        || elem
            .inner_types
            .iter()
            .any(|(_, inner)| inner.annotations.contains_type(type_name))
}

impl ClassEventSink for SceneInserter<'_> {
    fn event(&mut self, event: &ClassEvent) -> MergeResult<()> {
        if self.suppressing {
            match event {
                ClassEvent::BeginNested { .. } | ClassEvent::BeginArray { .. } => {
                    self.open_values += 1;
                }
                ClassEvent::EndArray | ClassEvent::EndAnnotation => {
                    self.open_values -= 1;
                    if self.open_values == 0 {
                        self.suppressing = false;
                    }
                }
                ClassEvent::Scalar { .. } | ClassEvent::EnumConst { .. } => {}
                _ => {
                    return Err(MergeError::order(
                        "element event inside an annotation sub-stream",
                    ));
                }
            }
            return Ok(());
        }

        match event {
            ClassEvent::BeginClass(decl) => {
                self.class_name = Some(decl.name.replace('/', "."));
                self.down.event(event)
            }
            ClassEvent::BeginAnnotation {
                site, descriptor, ..
            } => self.passthrough_annotation(event, site, descriptor),
            ClassEvent::Scalar { .. }
            | ClassEvent::EnumConst { .. }
            | ClassEvent::BeginNested { .. }
            | ClassEvent::BeginArray { .. }
            | ClassEvent::EndArray
            | ClassEvent::EndAnnotation => self.down.event(event),
            ClassEvent::BeginField(decl) => {
                self.flush_class()?;
                self.field_name = Some(decl.name.clone());
                self.existing_field.clear();
                self.down.event(event)
            }
            ClassEvent::EndField => {
                self.flush_field()?;
                self.field_name = None;
                self.down.event(event)
            }
            ClassEvent::BeginMethod(decl) => {
                self.flush_class()?;
                self.method_key = Some(MethodKey::new(decl.name.clone(), decl.descriptor.clone()));
                self.method_flushed = false;
                self.existing_method.clear();
                self.down.event(event)
            }
            ClassEvent::CodeStart { attribute_offset } => {
                match self.method_key.clone() {
                    Some(key) => self.offsets.reset(&key, *attribute_offset)?,
                    None => return Err(MergeError::order("code attribute outside a method")),
                }
                self.down.event(event)
            }
            ClassEvent::Instruction(insn) => {
                self.down.event(event)?;
                self.offsets.advance(insn)?;
                self.flush_instruction_sites()
            }
            ClassEvent::LocalVariable { .. } => self.down.event(event),
            ClassEvent::EndMethod => {
                self.flush_method()?;
                self.offsets.finish_method();
                self.method_key = None;
                self.down.event(event)
            }
            ClassEvent::EndClass => {
                self.flush_class()?;
                self.down.event(event)
            }
        }
    }
}
