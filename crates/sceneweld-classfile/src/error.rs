//! Error types for the class-file engines.
//!
//! Only unrecoverable conditions surface as [`MergeError`]; they abort the
//! current module and make no promise about partial output. Recoverable
//! conditions (an annotation whose target does not fit the element it
//! resolved to, a Scene entry keyed by a source index during insertion)
//! are dropped one at a time with a `tracing` diagnostic and never become
//! errors.

use thiserror::Error;

use sceneweld_core::annotation::AnnotationError;
use sceneweld_core::location::MethodKey;

/// Result alias for the class-file engines.
pub type MergeResult<T> = Result<T, MergeError>;

/// Unrecoverable failures while extracting from or inserting into a module.
#[derive(Debug, Error)]
pub enum MergeError {
    /// An extended-annotation target kind this library does not place.
    #[error("unsupported annotation target (tag {sort:#04x}) on {context}")]
    UnsupportedTarget { sort: u8, context: String },

    /// An annotation type with no resolvable definition that is not a
    /// recognizable module-internal synthetic type.
    #[error("cannot resolve annotation type {type_name} to a definition")]
    UnresolvableAnnotation { type_name: String },

    /// The offset tracker's size arithmetic disagrees with the byte stream.
    #[error("instruction offsets desynchronized in {method} at offset {offset}: {detail}")]
    OffsetDesync {
        method: String,
        offset: u32,
        detail: String,
    },

    /// The call-site pre-pass classified one offset as both a constructor
    /// and a lambda site.
    #[error("call site at offset {offset} in {method} classified as both constructor and lambda")]
    CallSiteConflict { method: MethodKey, offset: u32 },

    /// The event stream violated the visitor ordering contract.
    #[error("callback out of order: {detail}")]
    CallbackOrder { detail: String },

    /// An annotation value stream that does not fit its declared schema.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

impl MergeError {
    /// Shorthand for an ordering-contract violation.
    pub fn order(detail: impl Into<String>) -> Self {
        MergeError::CallbackOrder {
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = MergeError::OffsetDesync {
            method: "get()I".to_string(),
            offset: 12,
            detail: "opcode mismatch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "instruction offsets desynchronized in get()I at offset 12: opcode mismatch"
        );
    }

    #[test]
    fn annotation_errors_bridge_transparently() {
        let inner = AnnotationError::UnknownField {
            annotation: "a.A".to_string(),
            field: "x".to_string(),
        };
        let err = MergeError::from(inner);
        assert_eq!(err.to_string(), "annotation a.A declares no field named 'x'");
    }
}
