//! Section: field data storage over an atlas.
//!
//! The `Section<V>` type couples an [`Atlas`] (mapping points to slices in a
//! contiguous array) with a `Vec<V>` holding the values.

use crate::data::atlas::Atlas;
use crate::topology::point::PointId;

/// Storage for per-point values, backed by an `Atlas`.
#[derive(Clone, Debug)]
pub struct Section<V> {
    atlas: Atlas,
    data: Vec<V>,
}

impl<V: Clone> Section<V> {
    /// Build a section over `atlas` with every slice set to `fill`.
    ///
    /// `fill` is repeated cyclically, so a slice of the same width as every
    /// atlas entry starts as a copy of it.
    pub fn filled(atlas: Atlas, fill: &[V]) -> Self {
        let data = fill.iter().cloned().cycle().take(atlas.total_len()).collect();
        Section { atlas, data }
    }

    pub fn atlas(&self) -> &Atlas {
        &self.atlas
    }

    /// Values of `p`, or `None` outside the atlas.
    #[inline]
    pub fn try_restrict(&self, p: PointId) -> Option<&[V]> {
        let (offset, len) = self.atlas.get(p)?;
        Some(&self.data[offset..offset + len])
    }

    #[inline]
    pub fn try_restrict_mut(&mut self, p: PointId) -> Option<&mut [V]> {
        let (offset, len) = self.atlas.get(p)?;
        Some(&mut self.data[offset..offset + len])
    }

    /// Overwrite the slice of `p`. Returns false if `p` is unknown or the
    /// lengths differ.
    pub fn try_set(&mut self, p: PointId, val: &[V]) -> bool {
        match self.try_restrict_mut(p) {
            Some(target) if target.len() == val.len() => {
                target.clone_from_slice(val);
                true
            }
            _ => false,
        }
    }

    /// `(PointId, &[V])` for every point in atlas order.
    pub fn iter(&self) -> impl Iterator<Item = (PointId, &[V])> {
        self.atlas.points().filter_map(move |p| {
            let (offset, len) = self.atlas.get(p)?;
            Some((p, &self.data[offset..offset + len]))
        })
    }

    /// The flat value buffer.
    pub fn as_flat_slice(&self) -> &[V] {
        &self.data
    }
}
