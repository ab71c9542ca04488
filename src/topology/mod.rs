//! Mesh entities, the rank-local arena, and ownership metadata.

pub mod entity;
pub mod mesh;
pub mod ownership;
pub mod point;
