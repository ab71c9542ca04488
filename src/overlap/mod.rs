//! Overlap module: which ranks hold copies of which local entities.

pub mod overlap;
