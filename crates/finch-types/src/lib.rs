//! Shared Finch types: stage definitions, the transformation contract, and the
//! parent/worker wire protocol.
//!
//! This crate is dependency-light so both the engine and transformation
//! plugins can build against it.

pub mod error;
pub mod protocol;
pub mod stage;
pub mod transform;

pub use error::TransformError;
pub use protocol::{Message, Setup};
pub use stage::{StageDefinition, StageKind};
pub use transform::{
    Emission, EmissionStream, Invocation, Transform, TransformInput, EMPTY,
};
