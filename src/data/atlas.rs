//! Atlas: mapping entities to contiguous slices in a flat value array.
//!
//! The `Atlas` struct provides a bijective mapping between local entity
//! handles (`PointId`) and sub-slices of a flat data buffer, so that
//! fixed-width per-entity values can be stored densely in one `Vec`.

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshHaloError;
use crate::topology::point::PointId;
use hashbrown::HashMap;

/// `Atlas` maintains:
/// - a lookup `map` from each `PointId` to its `(offset, len)` in the
///   data buffer,
/// - an `order` vector to preserve insertion order for deterministic I/O,
/// - and `total_len` to track the next free offset.
///
/// # Invariants
///
/// - Each point appears exactly once in `order`.
/// - `map` contains precisely the keys listed in `order`.
/// - Every slice has `len > 0`.
/// - Offsets are contiguous in insertion order and `total_len` equals the sum
///   of all lengths.
#[derive(Clone, Debug, Default)]
pub struct Atlas {
    map: HashMap<PointId, (usize, usize)>,
    order: Vec<PointId>,
    total_len: usize,
}

impl Atlas {
    /// Insert a brand-new point `p` with a slice of length `len`.
    ///
    /// Returns the starting offset of the slice.
    ///
    /// # Errors
    /// `Invariant` if `len == 0` or `p` was already present.
    pub fn try_insert(&mut self, p: PointId, len: usize) -> Result<usize, MeshHaloError> {
        if len == 0 {
            return Err(MeshHaloError::Invariant(format!(
                "atlas slice for {p} has zero length"
            )));
        }
        if self.map.contains_key(&p) {
            return Err(MeshHaloError::Invariant(format!(
                "atlas already holds {p}"
            )));
        }
        let offset = self.total_len;
        self.map.insert(p, (offset, len));
        self.order.push(p);
        self.total_len += len;
        #[cfg(feature = "check-invariants")]
        self.debug_assert_invariants();
        Ok(offset)
    }

    /// `(offset, len)` of `p`, if registered.
    #[inline]
    pub fn get(&self, p: PointId) -> Option<(usize, usize)> {
        self.map.get(&p).copied()
    }

    #[inline]
    pub fn contains(&self, p: PointId) -> bool {
        self.map.contains_key(&p)
    }

    /// Number of registered points (not values; see [`total_len`](Self::total_len)).
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Size of the value buffer this atlas describes.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Registered points in insertion order.
    pub fn points(&self) -> impl Iterator<Item = PointId> + '_ {
        self.order.iter().copied()
    }
}

impl DebugInvariants for Atlas {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Atlas");
    }

    fn validate_invariants(&self) -> Result<(), MeshHaloError> {
        if self.order.len() != self.map.len() {
            return Err(MeshHaloError::Invariant(format!(
                "atlas order has {} points, map has {}",
                self.order.len(),
                self.map.len()
            )));
        }
        let mut expected_off = 0usize;
        for &p in &self.order {
            let (off, len) = self
                .map
                .get(&p)
                .copied()
                .ok_or_else(|| MeshHaloError::Invariant(format!("atlas order lists unknown {p}")))?;
            if len == 0 || off != expected_off {
                return Err(MeshHaloError::Invariant(format!(
                    "atlas slice ({off}, {len}) of {p} breaks contiguity at {expected_off}"
                )));
            }
            expected_off += len;
        }
        if expected_off != self.total_len {
            return Err(MeshHaloError::Invariant(format!(
                "atlas total {} but slices sum to {expected_off}",
                self.total_len
            )));
        }
        Ok(())
    }
}
