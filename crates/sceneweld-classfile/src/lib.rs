//! Class-file annotation extraction and insertion.
//!
//! This crate hosts the engines that move annotations between a compiled
//! module and a [`sceneweld_core::scene::Scene`]:
//! - The module-visitor event contract the external reader/writer speaks
//! - The bytecode offset tracker that replays instruction-size arithmetic
//! - The extraction engine (module → Scene)
//! - The insertion engine (Scene → module), with its call-site pre-pass
//!
//! Both engines are purely callback-driven responders to one ordered event
//! stream; see [`visit`] for the contract.

pub mod error;
pub mod extract;
pub mod insert;
pub mod offset;
pub mod opcode;
pub mod visit;

pub use error::{MergeError, MergeResult};
pub use extract::extract_scene;
pub use insert::{insert_class, CallSiteIndex};
