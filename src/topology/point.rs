//! `PointId` and `GlobalId`: strong, zero-cost handles for mesh entities.
//!
//! A `PointId` is a rank-local handle into a [`LocalMesh`](crate::topology::mesh::LocalMesh).
//! It wraps a `NonZeroU64` so 0 stays reserved as an invalid or sentinel value.
//! A `GlobalId` is the stable identifier an entity carries across every rank;
//! ownership resolution and tag exchange match copies by it.

use crate::mesh_error::MeshHaloError;
use std::{fmt, num::NonZeroU64};

/// Rank-local entity handle.
///
/// # Memory layout
/// `repr(transparent)`: same ABI and alignment as `u64`.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PointId(NonZeroU64);

impl PointId {
    /// Creates a new `PointId` from a raw `u64` value.
    ///
    /// # Errors
    /// Returns [`MeshHaloError::InvalidPointId`] if `raw == 0`.
    ///
    /// ```rust
    /// # use mesh_halo::topology::point::PointId;
    /// let p = PointId::new(1).unwrap();
    /// assert_eq!(p.get(), 1);
    /// assert!(PointId::new(0).is_err());
    /// ```
    #[inline]
    pub fn new(raw: u64) -> Result<Self, MeshHaloError> {
        NonZeroU64::new(raw)
            .map(PointId)
            .ok_or(MeshHaloError::InvalidPointId)
    }

    /// Returns the inner `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Zero-based arena index of this handle.
    #[inline]
    pub(crate) fn index(self) -> usize {
        (self.get() - 1) as usize
    }

    /// Handle for the zero-based arena index `idx`.
    #[inline]
    pub(crate) fn from_index(idx: usize) -> Self {
        // idx + 1 is never zero
        PointId(NonZeroU64::MIN.saturating_add(idx as u64))
    }
}

impl fmt::Debug for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PointId").field(&self.get()).finish()
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Globally stable entity identifier, identical on every rank holding a copy.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct GlobalId(pub u64);

impl GlobalId {
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Rendezvous rank for directory-style lookups of this id.
    #[inline]
    pub fn directory_rank(self, size: usize) -> usize {
        (self.0 % size.max(1) as u64) as usize
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `PointId` travels over MPI as a `u64`.
#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for PointId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;

    fn equivalent_datatype() -> Self::Out {
        u64::equivalent_datatype()
    }
}
