//! Data module: atlas, section, and the tag store built on them.

pub mod atlas;
pub mod field_store;
pub mod generators;
pub mod section;

pub use field_store::{FieldStore, TagId};
pub use generators::{FieldGenerator, ScalarWave, SphericalPosition, VectorHarmonic};
pub use section::Section;
