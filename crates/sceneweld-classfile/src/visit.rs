//! The module-visitor contract: one ordered event stream per class file.
//!
//! The low-level reader that turns class-file bytes into structure (and the
//! writer that turns structure back into bytes) live outside this crate.
//! What crosses the boundary is a flat stream of [`ClassEvent`]s in a fixed
//! order:
//!
//! ```text
//! BeginClass
//!   class annotation sub-streams
//!   (BeginField  field annotation sub-streams            EndField)*
//!   (BeginMethod method annotation sub-streams
//!               CodeStart? (Instruction insn-annotation sub-streams?)*
//!               LocalVariable*  local/method sub-streams  EndMethod)*
//! EndClass
//! ```
//!
//! Each annotation sub-stream is itself recursive: `BeginAnnotation`
//! followed by scalar/enum values, nested annotations (`BeginNested` …
//! `EndAnnotation`) and arrays (`BeginArray` … `EndArray`), closed by
//! `EndAnnotation`. Violating the order leaves the engines in an
//! unspecified internal state; the cheap violations are detected and
//! reported as [`MergeError::CallbackOrder`].
//!
//! Events are consumed through [`ClassEventSink`]; anything that can replay
//! a module (reader, recording) implements [`ClassSource`]. [`EventLog`] is
//! the in-memory form used by drivers and tests.

use serde::{Deserialize, Serialize};

use sceneweld_core::location::{LiveRange, TypePath};

use crate::error::MergeResult;

// ============================================================================
// Declarations
// ============================================================================

/// The class header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    /// Class-file version.
    pub version: u32,
    /// Access flags.
    pub access: u32,
    /// Internal (slashed) class name, as in `a/b/Outer$Inner`.
    pub name: String,
    /// Generic signature, when present.
    pub signature: Option<String>,
    /// Internal name of the superclass; `None` only for the root class.
    pub super_name: Option<String>,
    /// Internal names of the implemented interfaces.
    pub interfaces: Vec<String>,
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Access flags.
    pub access: u32,
    /// Field name.
    pub name: String,
    /// Field descriptor.
    pub descriptor: String,
    /// Generic signature, when present.
    pub signature: Option<String>,
}

/// A method declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDecl {
    /// Access flags.
    pub access: u32,
    /// Method name.
    pub name: String,
    /// Method descriptor.
    pub descriptor: String,
    /// Generic signature, when present.
    pub signature: Option<String>,
    /// Internal names of the declared exceptions.
    pub exceptions: Vec<String>,
}

impl MethodDecl {
    /// Whether the compiler generated this method as a bridge.
    pub fn is_bridge(&self) -> bool {
        self.access & crate::opcode::ACC_BRIDGE != 0
    }
}

// ============================================================================
// Constants and Handles
// ============================================================================

/// A constant value as it appears on the wire: annotation scalars, `ldc`
/// operands, field initializers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    Bool(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// A class literal, carried as a type descriptor.
    ClassToken(String),
}

impl ConstValue {
    /// The corresponding annotation field value.
    pub fn to_value(&self) -> sceneweld_core::annotation::AnnotationValue {
        use sceneweld_core::annotation::AnnotationValue;
        match self {
            ConstValue::Bool(v) => AnnotationValue::Bool(*v),
            ConstValue::Byte(v) => AnnotationValue::Byte(*v),
            ConstValue::Char(v) => AnnotationValue::Char(*v),
            ConstValue::Short(v) => AnnotationValue::Short(*v),
            ConstValue::Int(v) => AnnotationValue::Int(*v),
            ConstValue::Long(v) => AnnotationValue::Long(*v),
            ConstValue::Float(v) => AnnotationValue::Float(*v),
            ConstValue::Double(v) => AnnotationValue::Double(*v),
            ConstValue::Str(v) => AnnotationValue::Str(v.clone()),
            ConstValue::ClassToken(v) => AnnotationValue::ClassToken(v.clone()),
        }
    }
}

/// A method handle, as carried by dynamic call sites. The handle of
/// interest here is the resolved implementation method of the call site's
/// bootstrap metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHandle {
    /// Handle kind tag.
    pub tag: u8,
    /// Internal name of the owning class.
    pub owner: String,
    /// Referenced member name.
    pub name: String,
    /// Referenced member descriptor.
    pub descriptor: String,
}

// ============================================================================
// Target Kinds
// ============================================================================

/// What program construct an extended annotation attaches to.
///
/// One variant per wire tag, each carrying exactly the fields that kind
/// needs; [`TargetKind::sort`] recovers the tag. Dispatch over target kinds
/// is always an exhaustive match; there is no default case to hide an
/// unhandled tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// A type parameter of a class.
    ClassTypeParameter { param_index: u8 },
    /// A type parameter of a method.
    MethodTypeParameter { param_index: u8 },
    /// A supertype in the extends/implements clause; `-1` is the
    /// superclass.
    ClassExtends { supertype_index: i16 },
    /// A bound of a class type parameter.
    ClassTypeParameterBound { param_index: u8, bound_index: u8 },
    /// A bound of a method type parameter.
    MethodTypeParameterBound { param_index: u8, bound_index: u8 },
    /// The declared type of a field.
    Field,
    /// The return type of a method.
    MethodReturn,
    /// The receiver type of a method.
    MethodReceiver,
    /// The declared type of a formal parameter.
    MethodFormalParameter { index: u8 },
    /// A type in the throws clause.
    Throws { exception_index: u16 },
    /// A local variable over its live range.
    LocalVariable { range: LiveRange },
    /// A resource variable over its live range.
    ResourceVariable { range: LiveRange },
    /// An exception parameter of a catch clause.
    ExceptionParameter { index: u16 },
    /// A type-test site.
    InstanceOf,
    /// An object-creation site.
    New,
    /// A constructor reference.
    ConstructorReference,
    /// A method reference.
    MethodReference,
    /// A cast site.
    Cast { type_argument_index: u8 },
    /// A type argument of a constructor invocation.
    ConstructorInvocationTypeArgument { type_argument_index: u8 },
    /// A type argument of a method invocation.
    MethodInvocationTypeArgument { type_argument_index: u8 },
    /// A type argument of a constructor reference.
    ConstructorReferenceTypeArgument { type_argument_index: u8 },
    /// A type argument of a method reference.
    MethodReferenceTypeArgument { type_argument_index: u8 },
}

impl TargetKind {
    /// The wire tag of this target kind.
    pub fn sort(&self) -> u8 {
        match self {
            TargetKind::ClassTypeParameter { .. } => 0x00,
            TargetKind::MethodTypeParameter { .. } => 0x01,
            TargetKind::ClassExtends { .. } => 0x10,
            TargetKind::ClassTypeParameterBound { .. } => 0x11,
            TargetKind::MethodTypeParameterBound { .. } => 0x12,
            TargetKind::Field => 0x13,
            TargetKind::MethodReturn => 0x14,
            TargetKind::MethodReceiver => 0x15,
            TargetKind::MethodFormalParameter { .. } => 0x16,
            TargetKind::Throws { .. } => 0x17,
            TargetKind::LocalVariable { .. } => 0x40,
            TargetKind::ResourceVariable { .. } => 0x41,
            TargetKind::ExceptionParameter { .. } => 0x42,
            TargetKind::InstanceOf => 0x43,
            TargetKind::New => 0x44,
            TargetKind::ConstructorReference => 0x45,
            TargetKind::MethodReference => 0x46,
            TargetKind::Cast { .. } => 0x47,
            TargetKind::ConstructorInvocationTypeArgument { .. } => 0x48,
            TargetKind::MethodInvocationTypeArgument { .. } => 0x49,
            TargetKind::ConstructorReferenceTypeArgument { .. } => 0x4a,
            TargetKind::MethodReferenceTypeArgument { .. } => 0x4b,
        }
    }

    /// The type-argument index, for the kinds that carry one.
    pub fn type_argument_index(&self) -> Option<u8> {
        match self {
            TargetKind::Cast {
                type_argument_index,
            }
            | TargetKind::ConstructorInvocationTypeArgument {
                type_argument_index,
            }
            | TargetKind::MethodInvocationTypeArgument {
                type_argument_index,
            }
            | TargetKind::ConstructorReferenceTypeArgument {
                type_argument_index,
            }
            | TargetKind::MethodReferenceTypeArgument {
                type_argument_index,
            } => Some(*type_argument_index),
            _ => None,
        }
    }
}

/// Where an annotation sub-stream sits relative to the current element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationSite {
    /// On the declaration of the current class, field or method.
    Declaration,
    /// On the declaration of a formal parameter of the current method.
    Parameter { index: u32 },
    /// An extended annotation on the current element; the empty path names
    /// the targeted type as a whole.
    Type { target: TargetKind, path: TypePath },
    /// An extended annotation on the most recently visited instruction.
    Insn { target: TargetKind, path: TypePath },
}

// ============================================================================
// Instructions
// ============================================================================

/// One per-instruction callback, carrying opcode and operands by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Insn {
    /// An operand-less instruction.
    Simple { opcode: u8 },
    /// `bipush`, `sipush`, `newarray`.
    IntOperand { opcode: u8, operand: i32 },
    /// A local-variable load, store or `ret`.
    Var { opcode: u8, slot: u16 },
    /// `new`, `anewarray`, `checkcast`, `instanceof`.
    Type { opcode: u8, descriptor: String },
    /// A field access.
    FieldAccess {
        opcode: u8,
        owner: String,
        name: String,
        descriptor: String,
    },
    /// A plain method invocation.
    Invoke {
        opcode: u8,
        owner: String,
        name: String,
        descriptor: String,
        interface: bool,
    },
    /// A dynamic call site; `handle` is the resolved implementation method
    /// from the bootstrap metadata.
    InvokeDynamic {
        name: String,
        descriptor: String,
        handle: MethodHandle,
    },
    /// A branch.
    Jump { opcode: u8, target: u32 },
    /// A constant-pool load.
    Ldc { value: ConstValue },
    /// Increment a local variable.
    Iinc { slot: u16, delta: i16 },
    /// Bounded-range case dispatch.
    TableSwitch {
        low: i32,
        high: i32,
        default_target: u32,
        targets: Vec<u32>,
    },
    /// Linear case-list dispatch.
    LookupSwitch {
        keys: Vec<i32>,
        default_target: u32,
        targets: Vec<u32>,
    },
    /// Allocate a multi-dimensional array.
    MultiANewArray { descriptor: String, dims: u8 },
}

// ============================================================================
// Events
// ============================================================================

/// One callback from the module reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassEvent {
    /// Start of the class.
    BeginClass(ClassDecl),
    /// Start of one annotation sub-stream on the current element.
    BeginAnnotation {
        site: AnnotationSite,
        /// Annotation type descriptor, as in `La/b/NonNull;`.
        descriptor: String,
        /// Whether the annotation is visible at run time.
        visible: bool,
    },
    /// A scalar or class-token field value (`name` is `None` inside
    /// arrays).
    Scalar {
        name: Option<String>,
        value: ConstValue,
    },
    /// An enum-constant field value.
    EnumConst {
        name: Option<String>,
        /// Enum type descriptor, as in `La/b/Color;`.
        type_descriptor: String,
        constant: String,
    },
    /// Start of a nested annotation value.
    BeginNested {
        name: Option<String>,
        descriptor: String,
    },
    /// Start of an array field value.
    BeginArray { name: String },
    /// End of the innermost open array.
    EndArray,
    /// End of the innermost open annotation (nested or top-level).
    EndAnnotation,
    /// Start of a field.
    BeginField(FieldDecl),
    /// End of the current field.
    EndField,
    /// Start of a method.
    BeginMethod(MethodDecl),
    /// Position of the method's Code attribute within the module bytes;
    /// absent for abstract and native methods.
    CodeStart { attribute_offset: usize },
    /// One instruction, in stream order.
    Instruction(Insn),
    /// One local-variable table entry.
    LocalVariable {
        name: String,
        descriptor: String,
        range: LiveRange,
    },
    /// End of the current method.
    EndMethod,
    /// End of the class.
    EndClass,
}

// ============================================================================
// Sinks and Sources
// ============================================================================

/// Consumes a module's event stream in order.
pub trait ClassEventSink {
    /// Handle one event.
    fn event(&mut self, event: &ClassEvent) -> MergeResult<()>;
}

/// Anything that can replay one module: the raw bytes plus the ordered
/// event stream over them. The insertion engine uses this to run its
/// read-only pre-pass and its rewriting pass as two complete traversals.
pub trait ClassSource {
    /// The module's raw bytes.
    fn bytes(&self) -> &[u8];

    /// Replay the module's events into `sink`.
    fn accept(&self, sink: &mut dyn ClassEventSink) -> MergeResult<()>;
}

/// An in-memory module: bytes plus recorded events. Implements both sides
/// of the contract, so it serves as the downstream of insertion and as the
/// source of a subsequent extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    /// The module's raw bytes.
    pub bytes: Vec<u8>,
    /// The recorded events.
    pub events: Vec<ClassEvent>,
}

impl EventLog {
    /// An empty log over the given bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        EventLog {
            bytes,
            events: Vec::new(),
        }
    }

    /// Append one event.
    pub fn push(&mut self, event: ClassEvent) {
        self.events.push(event);
    }
}

impl ClassEventSink for EventLog {
    fn event(&mut self, event: &ClassEvent) -> MergeResult<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

impl ClassSource for EventLog {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn accept(&self, sink: &mut dyn ClassEventSink) -> MergeResult<()> {
        for event in &self.events {
            sink.event(event)?;
        }
        Ok(())
    }
}

// ============================================================================
// Name Conversions
// ============================================================================

/// Unwrap a class descriptor (`La/b/C;`) to a dotted binary name
/// (`a.b.C`).
pub fn descriptor_to_binary_name(descriptor: &str) -> Option<String> {
    let inner = descriptor.strip_prefix('L')?.strip_suffix(';')?;
    Some(inner.replace('/', "."))
}

/// Wrap a dotted binary name (`a.b.C`) in a class descriptor (`La/b/C;`).
pub fn binary_name_to_descriptor(name: &str) -> String {
    format!("L{};", name.replace('.', "/"))
}

// ============================================================================
// Tests
// ============================================================================
