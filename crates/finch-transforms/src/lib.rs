//! Built-in transformations available to `use` stages by name.

#![warn(clippy::pedantic)]

mod json;
mod log;
pub mod pattern;
mod regexp;
mod values;

use finch_engine::TransformRegistry;

pub use json::JsonStringify;
pub use log::Log;
pub use pattern::{Pattern, PatternError};
pub use regexp::{Filter, FilterMode, RegexpReplace, RegexpSplit};
pub use values::Values;

/// Register every built-in transformation into `registry`.
pub fn register_builtins(registry: &mut TransformRegistry) -> &mut TransformRegistry {
    registry
        .register("values", Values)
        .register("json-stringify", JsonStringify)
        .register("regexp-replace", RegexpReplace)
        .register("regexp-split", RegexpSplit)
        .register("regexp-accept", Filter::new(FilterMode::Accept))
        .register("regexp-ignore", Filter::new(FilterMode::Ignore))
        .register("log", Log)
}

/// A registry holding only the built-in transformations.
pub fn builtins() -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    register_builtins(&mut registry);
    registry
}
