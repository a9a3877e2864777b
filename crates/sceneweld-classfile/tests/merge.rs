//! End-to-end merge behavior over in-memory modules: extraction/insertion
//! round trips, deterministic output, and the overwrite policy.

use sceneweld_classfile::visit::{
    AnnotationSite, ClassDecl, ClassEvent, ConstValue, EventLog, FieldDecl, Insn, MethodDecl,
    MethodHandle, TargetKind,
};
use sceneweld_classfile::{extract_scene, insert_class, MergeError};
use sceneweld_core::annotation::{
    AnnotationBuilder, AnnotationDef, AnnotationValue, FieldType, RetentionPolicy,
};
use sceneweld_core::defs::DefCatalog;
use sceneweld_core::location::{
    LiveRange, LocalLocation, MethodKey, RelativeLocation, TypePath,
};
use sceneweld_core::scene::Scene;
use std::sync::Arc;

// ----------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------

fn catalog() -> DefCatalog {
    DefCatalog::fixed([
        AnnotationDef::new("a.Marker", RetentionPolicy::Runtime).for_type_use(),
        AnnotationDef::new("a.Named", RetentionPolicy::Runtime)
            .with_field("value", FieldType::Str),
    ])
}

fn marker() -> sceneweld_core::annotation::Annotation {
    AnnotationBuilder::new(Arc::new(
        AnnotationDef::new("a.Marker", RetentionPolicy::Runtime).for_type_use(),
    ))
    .finish()
}

fn named(value: &str) -> sceneweld_core::annotation::Annotation {
    let mut builder = AnnotationBuilder::new(Arc::new(
        AnnotationDef::new("a.Named", RetentionPolicy::Runtime).with_field("value", FieldType::Str),
    ));
    builder
        .field("value", AnnotationValue::Str(value.to_string()))
        .unwrap();
    builder.finish()
}

fn class_header(name: &str) -> ClassEvent {
    ClassEvent::BeginClass(ClassDecl {
        version: 61,
        access: 0x21,
        name: name.to_string(),
        signature: None,
        super_name: Some("java/lang/Object".to_string()),
        interfaces: Vec::new(),
    })
}

fn field_decl(name: &str, descriptor: &str) -> ClassEvent {
    ClassEvent::BeginField(FieldDecl {
        access: 0x02,
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        signature: None,
    })
}

fn method_decl(name: &str, descriptor: &str) -> ClassEvent {
    ClassEvent::BeginMethod(MethodDecl {
        access: 0x01,
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        signature: None,
        exceptions: Vec::new(),
    })
}

/// Append a minimal Code attribute holding `code` and return its offset.
fn code_attribute(bytes: &mut Vec<u8>, code: &[u8]) -> usize {
    let at = bytes.len();
    bytes.extend_from_slice(&[0x00, 0x09]); // attribute name index
    bytes.extend_from_slice(&(code.len() as u32 + 12).to_be_bytes());
    bytes.extend_from_slice(&[0x00, 0x04]); // max stack
    bytes.extend_from_slice(&[0x00, 0x04]); // max locals
    bytes.extend_from_slice(&(code.len() as u32).to_be_bytes());
    bytes.extend_from_slice(code);
    at
}

/// A class `a.C` with field `int x` and method `run()V` whose code is
/// seven nops, a checkcast at offset 7 and a return at offset 10.
fn cast_module() -> EventLog {
    let code: Vec<u8> = vec![0, 0, 0, 0, 0, 0, 0, 0xc0, 0x00, 0x02, 0xb1];
    let mut bytes = Vec::new();
    let attribute_offset = code_attribute(&mut bytes, &code);

    let mut log = EventLog::new(bytes);
    log.push(class_header("a/C"));
    log.push(field_decl("x", "I"));
    log.push(ClassEvent::EndField);
    log.push(method_decl("run", "()V"));
    log.push(ClassEvent::CodeStart { attribute_offset });
    for _ in 0..7 {
        log.push(ClassEvent::Instruction(Insn::Simple { opcode: 0x00 }));
    }
    log.push(ClassEvent::Instruction(Insn::Type {
        opcode: 0xc0,
        descriptor: "La/D;".to_string(),
    }));
    log.push(ClassEvent::Instruction(Insn::Simple { opcode: 0xb1 }));
    log.push(ClassEvent::LocalVariable {
        name: "count".to_string(),
        descriptor: "I".to_string(),
        range: LiveRange::new(2, 9, 1),
    });
    log.push(ClassEvent::EndMethod);
    log.push(ClassEvent::EndClass);
    log
}

fn insert(scene: &Scene, source: &EventLog, overwrite: bool) -> EventLog {
    let mut out = EventLog::new(source.bytes.clone());
    insert_class(scene, source, overwrite, &mut out).unwrap();
    out
}

fn annotations_with(out: &EventLog, descriptor: &str) -> Vec<ClassEvent> {
    out.events
        .iter()
        .filter(|e| matches!(e, ClassEvent::BeginAnnotation { descriptor: d, .. } if d == descriptor))
        .cloned()
        .collect()
}

// ----------------------------------------------------------------------
// Round trip and determinism
// ----------------------------------------------------------------------

#[test]
fn extraction_round_trips_an_inserted_scene() {
    let module = cast_module();
    let key = MethodKey::new("run", "()V");
    let cast_loc = RelativeLocation::offset(7, Some(0));
    let local_loc = LocalLocation::named(LiveRange::new(2, 9, 1), "count");

    let mut scene = Scene::new();
    {
        let class = scene.classes.vivify("a.C".to_string());
        class.annotations.insert(named("class"));
        class
            .fields
            .vivify("x".to_string())
            .ty
            .annotations
            .insert(marker());
        let method = class.methods.vivify(key.clone());
        method.return_type.annotations.insert(marker());
        method
            .body
            .typecasts
            .vivify(cast_loc)
            .annotations
            .insert(marker());
        method
            .body
            .locals
            .vivify(local_loc.clone())
            .ty
            .annotations
            .insert(marker());
    }

    let out = insert(&scene, &module, true);

    let mut extracted = Scene::new();
    let catalog = catalog();
    extract_scene(&mut extracted, &out, &catalog, false).unwrap();

    let class = extracted.classes.get(&"a.C".to_string()).unwrap();
    assert!(class.annotations.contains_type("a.Named"));
    assert!(class
        .fields
        .get(&"x".to_string())
        .unwrap()
        .ty
        .annotations
        .contains_type("a.Marker"));
    let method = class.methods.get(&key).unwrap();
    assert!(method.return_type.annotations.contains_type("a.Marker"));
    assert!(method
        .body
        .typecasts
        .get(&cast_loc)
        .unwrap()
        .annotations
        .contains_type("a.Marker"));
    let local = method.body.locals.get(&local_loc).unwrap();
    assert!(local.ty.annotations.contains_type("a.Marker"));
}

#[test]
fn insertion_is_deterministic() {
    let module = cast_module();
    let mut scene = Scene::new();
    {
        let class = scene.classes.vivify("a.C".to_string());
        class.annotations.insert(named("one"));
        class.annotations.insert(marker());
        class
            .fields
            .vivify("x".to_string())
            .ty
            .annotations
            .insert(marker());
        class
            .methods
            .vivify(MethodKey::new("run", "()V"))
            .body
            .typecasts
            .vivify(RelativeLocation::offset(7, Some(0)))
            .annotations
            .insert(marker());
    }

    let first = insert(&scene, &module, true);
    let second = insert(&scene, &module, true);
    let a = serde_json::to_string(&first).unwrap();
    let b = serde_json::to_string(&second).unwrap();
    assert_eq!(a, b);
}

// ----------------------------------------------------------------------
// Overwrite policy
// ----------------------------------------------------------------------

fn module_with_existing_field_annotation() -> EventLog {
    let mut log = EventLog::new(Vec::new());
    log.push(class_header("a/C"));
    log.push(field_decl("x", "I"));
    log.push(ClassEvent::BeginAnnotation {
        site: AnnotationSite::Declaration,
        descriptor: "La/Named;".to_string(),
        visible: true,
    });
    log.push(ClassEvent::Scalar {
        name: Some("value".to_string()),
        value: ConstValue::Str("old".to_string()),
    });
    log.push(ClassEvent::EndAnnotation);
    log.push(ClassEvent::EndField);
    log.push(ClassEvent::EndClass);
    log
}

#[test]
fn without_overwrite_the_module_annotation_wins() {
    let module = module_with_existing_field_annotation();
    let mut scene = Scene::new();
    scene
        .classes
        .vivify("a.C".to_string())
        .fields
        .vivify("x".to_string())
        .annotations
        .insert(named("new"));

    let out = insert(&scene, &module, false);
    let found = annotations_with(&out, "La/Named;");
    assert_eq!(found.len(), 1);
    assert!(out.events.contains(&ClassEvent::Scalar {
        name: Some("value".to_string()),
        value: ConstValue::Str("old".to_string()),
    }));
    assert!(!out.events.contains(&ClassEvent::Scalar {
        name: Some("value".to_string()),
        value: ConstValue::Str("new".to_string()),
    }));
}

#[test]
fn with_overwrite_the_scene_annotation_wins() {
    let module = module_with_existing_field_annotation();
    let mut scene = Scene::new();
    scene
        .classes
        .vivify("a.C".to_string())
        .fields
        .vivify("x".to_string())
        .annotations
        .insert(named("new"));

    let out = insert(&scene, &module, true);
    let found = annotations_with(&out, "La/Named;");
    assert_eq!(found.len(), 1);
    assert!(out.events.contains(&ClassEvent::Scalar {
        name: Some("value".to_string()),
        value: ConstValue::Str("new".to_string()),
    }));
    assert!(!out.events.contains(&ClassEvent::Scalar {
        name: Some("value".to_string()),
        value: ConstValue::Str("old".to_string()),
    }));
}

#[test]
fn field_type_annotation_is_emitted_exactly_once() {
    // one-field class, scene annotation on the field's type
    let mut log = EventLog::new(Vec::new());
    log.push(class_header("a/C"));
    log.push(field_decl("x", "I"));
    log.push(ClassEvent::EndField);
    log.push(ClassEvent::EndClass);

    let mut scene = Scene::new();
    scene
        .classes
        .vivify("a.C".to_string())
        .fields
        .vivify("x".to_string())
        .ty
        .annotations
        .insert(marker());

    let out = insert(&scene, &log, true);
    let found = annotations_with(&out, "La/Marker;");
    assert_eq!(found.len(), 1);
    match &found[0] {
        ClassEvent::BeginAnnotation {
            site: AnnotationSite::Type { target, path },
            ..
        } => {
            assert_eq!(*target, TargetKind::Field);
            assert_eq!(*path, TypePath::root());
        }
        other => panic!("expected a field type annotation, got {other:?}"),
    }
}

// ----------------------------------------------------------------------
// Instruction sites
// ----------------------------------------------------------------------

#[test]
fn cast_annotations_key_on_matching_offsets_only() {
    let module = cast_module();
    let mut scene = Scene::new();
    {
        let method = scene
            .classes
            .vivify("a.C".to_string())
            .methods
            .vivify(MethodKey::new("run", "()V"));
        method
            .body
            .typecasts
            .vivify(RelativeLocation::offset(7, Some(0)))
            .annotations
            .insert(marker());
        // no instruction starts at offset 8; this entry must vanish
        method
            .body
            .typecasts
            .vivify(RelativeLocation::offset(8, Some(0)))
            .annotations
            .insert(named("stray"));
        // source-index entries cannot be placed at all
        method
            .body
            .typecasts
            .vivify(RelativeLocation::source(3, None))
            .annotations
            .insert(named("source-only"));
    }

    let out = insert(&scene, &module, true);
    let casts = annotations_with(&out, "La/Marker;");
    assert_eq!(casts.len(), 1);
    assert!(annotations_with(&out, "La/Named;").is_empty());

    // the one cast annotation follows the checkcast instruction
    let insn_at = out
        .events
        .iter()
        .position(|e| matches!(e, ClassEvent::Instruction(Insn::Type { opcode: 0xc0, .. })))
        .unwrap();
    let annotation_at = out
        .events
        .iter()
        .position(|e| matches!(e, ClassEvent::BeginAnnotation { descriptor, .. } if descriptor == "La/Marker;"))
        .unwrap();
    assert_eq!(annotation_at, insn_at + 1);
}

#[test]
fn local_variable_ranges_are_reproduced_exactly() {
    let code: Vec<u8> = {
        let mut c = vec![0u8; 41];
        c.push(0xb1);
        c
    };
    let mut bytes = Vec::new();
    let attribute_offset = code_attribute(&mut bytes, &code);
    let mut log = EventLog::new(bytes);
    log.push(class_header("a/C"));
    log.push(method_decl("run", "()V"));
    log.push(ClassEvent::CodeStart { attribute_offset });
    for _ in 0..41 {
        log.push(ClassEvent::Instruction(Insn::Simple { opcode: 0x00 }));
    }
    log.push(ClassEvent::Instruction(Insn::Simple { opcode: 0xb1 }));
    log.push(ClassEvent::EndMethod);
    log.push(ClassEvent::EndClass);

    let range = LiveRange::new(10, 40, 3);
    let mut scene = Scene::new();
    scene
        .classes
        .vivify("a.C".to_string())
        .methods
        .vivify(MethodKey::new("run", "()V"))
        .body
        .locals
        .vivify(LocalLocation::new(range))
        .ty
        .annotations
        .insert(marker());

    let out = insert(&scene, &log, true);
    let found = annotations_with(&out, "La/Marker;");
    assert_eq!(found.len(), 1);
    match &found[0] {
        ClassEvent::BeginAnnotation {
            site:
                AnnotationSite::Type {
                    target: TargetKind::LocalVariable { range: emitted },
                    ..
                },
            ..
        } => assert_eq!(*emitted, range),
        other => panic!("expected a local-variable annotation, got {other:?}"),
    }
}

// ----------------------------------------------------------------------
// Dynamic call sites
// ----------------------------------------------------------------------

fn dynamic_module(handle_name: &str) -> EventLog {
    // invokedynamic at offset 0, return at offset 5
    let code: Vec<u8> = vec![0xba, 0x00, 0x05, 0x00, 0x00, 0xb1];
    let mut bytes = Vec::new();
    let attribute_offset = code_attribute(&mut bytes, &code);
    let mut log = EventLog::new(bytes);
    log.push(class_header("a/C"));
    log.push(method_decl("run", "()V"));
    log.push(ClassEvent::CodeStart { attribute_offset });
    log.push(ClassEvent::Instruction(Insn::InvokeDynamic {
        name: "apply".to_string(),
        descriptor: "()Ljava/util/function/Supplier;".to_string(),
        handle: MethodHandle {
            tag: 6,
            owner: "a/D".to_string(),
            name: handle_name.to_string(),
            descriptor: "()V".to_string(),
        },
    }));
    log.push(ClassEvent::Instruction(Insn::Simple { opcode: 0xb1 }));
    log.push(ClassEvent::EndMethod);
    log.push(ClassEvent::EndClass);
    log
}

fn scene_with_ref_type_argument() -> Scene {
    let mut scene = Scene::new();
    scene
        .classes
        .vivify("a.C".to_string())
        .methods
        .vivify(MethodKey::new("run", "()V"))
        .body
        .refs
        .vivify(RelativeLocation::offset(0, Some(0)))
        .annotations
        .insert(marker());
    scene
}

#[test]
fn constructor_call_sites_select_the_constructor_target_kind() {
    let out = insert(&scene_with_ref_type_argument(), &dynamic_module("<init>"), true);
    let found = annotations_with(&out, "La/Marker;");
    assert_eq!(found.len(), 1);
    match &found[0] {
        ClassEvent::BeginAnnotation {
            site: AnnotationSite::Insn { target, .. },
            ..
        } => assert_eq!(
            *target,
            TargetKind::ConstructorReferenceTypeArgument {
                type_argument_index: 0
            }
        ),
        other => panic!("unexpected annotation event {other:?}"),
    }
}

#[test]
fn plain_call_sites_select_the_method_target_kind() {
    let out = insert(&scene_with_ref_type_argument(), &dynamic_module("length"), true);
    let found = annotations_with(&out, "La/Marker;");
    assert_eq!(found.len(), 1);
    match &found[0] {
        ClassEvent::BeginAnnotation {
            site: AnnotationSite::Insn { target, .. },
            ..
        } => assert_eq!(
            *target,
            TargetKind::MethodReferenceTypeArgument {
                type_argument_index: 0
            }
        ),
        other => panic!("unexpected annotation event {other:?}"),
    }
}

#[test]
fn lambda_call_sites_drop_member_reference_annotations() {
    let out = insert(
        &scene_with_ref_type_argument(),
        &dynamic_module("lambda$main$0"),
        true,
    );
    assert!(annotations_with(&out, "La/Marker;").is_empty());
}

#[test]
fn conflicting_call_site_classification_is_fatal() {
    // the same method key visited twice, classifying offset 0 both ways
    let first = dynamic_module("<init>");
    let second = dynamic_module("lambda$main$0");
    let mut log = EventLog::new(first.bytes.clone());
    log.events = first.events.clone();
    log.events.pop(); // drop EndClass
    log.events.extend(second.events[1..].iter().cloned()); // skip BeginClass
    let scene = Scene::new();
    let mut out = EventLog::new(log.bytes.clone());
    let err = insert_class(&scene, &log, true, &mut out).unwrap_err();
    assert!(matches!(err, MergeError::CallSiteConflict { .. }));
}
