//! Configuration for the runner and its HTTP front end
//!
//! Settings come from an optional YAML file, then `QUIRK_*` environment
//! variables, and are validated before anything is built from them.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;
