#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-halo
//!
//! mesh-halo resolves ownership of a distributed unstructured mesh, grows
//! ghost (halo) layers of arbitrary depth across rank boundaries, and keeps
//! per-entity tag data on those ghosts in sync with their owners.
//!
//! ## Features
//! - Rank-local mesh arena addressed by global ids ([`topology::mesh::LocalMesh`])
//! - Rendezvous ownership resolution and symmetric sharing sets
//!   ([`topology::ownership::PartitionRegistry`])
//! - Iterative or bulk ghost growth with thin-layer correction
//!   ([`algs::ghost_layers::GhostLayerBuilder`])
//! - Fixed-width per-entity tags and owner-to-ghost exchange with cached plans
//!   ([`data::field_store::FieldStore`], [`algs::tag_exchange::TagExchangeEngine`])
//! - Collective phase timing ([`timing::PhaseTimer`])
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-halo = "0.1"
//! # features = ["mpi-support"]
//! ```
//!
//! A complete run (load, grow ghosts, create and exchange tags) is driven by
//! [`context::HaloContext`]; the `exchange-halos` binary wraps it.
//!
//! ## Determinism
//!
//! Every protocol round iterates ranks and global ids in ascending order, so
//! local handles and sharing sets do not depend on message arrival order.

pub mod algs;
pub mod config;
pub mod context;
pub mod data;
pub mod debug_invariants;
pub mod io;
pub mod mesh_error;
pub mod mesh_generation;
pub mod overlap;
pub mod timing;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// The most-used types and traits.
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::completion::WaitPolicy;
    pub use crate::algs::ghost_layers::{GhostLayerBuilder, GhostOpts};
    pub use crate::algs::tag_exchange::TagExchangeEngine;
    pub use crate::algs::thin_layer::ThinLayerCorrector;
    pub use crate::config::RuntimeConfig;
    pub use crate::context::{HaloContext, HaloReport};
    pub use crate::data::field_store::{FieldStore, TagId};
    pub use crate::data::generators::FieldGenerator;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::mesh_error::{ErrorCategory, MeshHaloError};
    pub use crate::overlap::overlap::Overlap;
    pub use crate::timing::PhaseTimer;
    pub use crate::topology::entity::{EntityDef, EntityKind};
    pub use crate::topology::mesh::LocalMesh;
    pub use crate::topology::ownership::{PartitionRegistry, Status};
    pub use crate::topology::point::{GlobalId, PointId};
}
