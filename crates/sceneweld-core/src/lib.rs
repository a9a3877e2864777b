//! Scene data model for sceneweld.
//!
//! This crate provides the in-memory annotation database (the *Scene*)
//! that the class-file engines read and write:
//! - Annotation values, definitions and the validating builders
//! - Location key types (type paths, bounds, supertype indices,
//!   bytecode-relative and local-variable locations)
//! - Vivifying maps with deterministic iteration order
//! - The class/field/method element tree
//! - The annotation-definition resolver seam and its process-wide cache

pub mod annotation;
pub mod defs;
pub mod location;
pub mod scene;
pub mod vivify;
