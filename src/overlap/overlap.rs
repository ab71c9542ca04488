//! Sharing relationships between partitions.
//!
//! For every local entity that has copies elsewhere, the overlap records which
//! ranks hold a copy and, once known, the handle of that copy on the remote
//! rank (the remote↔local handle correspondence).

use crate::topology::point::PointId;
use std::collections::{BTreeMap, BTreeSet};

/// Identifies a remote copy of a local point.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Remote {
    pub rank: usize,
    pub remote_point: Option<PointId>,
}

/// local point → (rank → remote handle).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overlap {
    links: BTreeMap<PointId, BTreeMap<usize, Option<PointId>>>,
}

impl Overlap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `remote_rank` holds a copy of `local`.
    ///
    /// A known remote handle is never replaced by an unknown one.
    /// Returns true if anything changed.
    pub fn add_link(&mut self, local: PointId, remote_rank: usize, remote: Option<PointId>) -> bool {
        let slot = self.links.entry(local).or_default();
        match slot.get(&remote_rank) {
            Some(Some(_)) if remote.is_none() => false,
            Some(existing) if *existing == remote => false,
            _ => {
                slot.insert(remote_rank, remote);
                true
            }
        }
    }

    /// Ranks sharing `local`, ascending.
    pub fn sharers(&self, local: PointId) -> impl Iterator<Item = usize> + '_ {
        self.links
            .get(&local)
            .into_iter()
            .flat_map(|m| m.keys().copied())
    }

    pub fn sharer_set(&self, local: PointId) -> BTreeSet<usize> {
        self.sharers(local).collect()
    }

    /// Remote copies of `local`, ascending by rank.
    pub fn remotes(&self, local: PointId) -> impl Iterator<Item = Remote> + '_ {
        self.links.get(&local).into_iter().flat_map(|m| {
            m.iter().map(|(&rank, &remote_point)| Remote { rank, remote_point })
        })
    }

    pub fn is_shared(&self, local: PointId) -> bool {
        self.links.get(&local).is_some_and(|m| !m.is_empty())
    }

    /// Handle of `local`'s copy on `rank`, if known.
    pub fn remote_point(&self, local: PointId, rank: usize) -> Option<PointId> {
        self.links.get(&local).and_then(|m| m.get(&rank).copied().flatten())
    }

    /// Every rank this overlap links to.
    pub fn neighbor_ranks(&self) -> BTreeSet<usize> {
        self.links.values().flat_map(|m| m.keys().copied()).collect()
    }

    /// `(local, remote)` pairs shared with `rank`, sorted by local handle.
    pub fn links_to(&self, rank: usize) -> Vec<(PointId, Option<PointId>)> {
        self.links
            .iter()
            .filter_map(|(&p, m)| m.get(&rank).map(|&r| (p, r)))
            .collect()
    }

    /// Shared local points, ascending.
    pub fn shared_points(&self) -> impl Iterator<Item = PointId> + '_ {
        self.links
            .iter()
            .filter(|(_, m)| !m.is_empty())
            .map(|(&p, _)| p)
    }

    /// Number of (point, rank) links.
    pub fn num_links(&self) -> usize {
        self.links.values().map(|m| m.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: u64) -> PointId {
        PointId::new(x).unwrap()
    }

    #[test]
    fn known_handle_is_kept() {
        let mut ovlp = Overlap::new();
        assert!(ovlp.add_link(p(1), 2, Some(p(101))));
        assert!(!ovlp.add_link(p(1), 2, None));
        assert!(!ovlp.add_link(p(1), 2, Some(p(101))));
        assert_eq!(ovlp.remote_point(p(1), 2), Some(p(101)));
        assert!(ovlp.add_link(p(1), 2, Some(p(102))));
        assert_eq!(ovlp.remote_point(p(1), 2), Some(p(102)));
    }

    #[test]
    fn neighbours_and_links() {
        let mut ovlp = Overlap::new();
        ovlp.add_link(p(3), 1, None);
        ovlp.add_link(p(1), 1, Some(p(7)));
        ovlp.add_link(p(1), 2, Some(p(9)));
        assert_eq!(ovlp.neighbor_ranks(), BTreeSet::from([1, 2]));
        assert_eq!(ovlp.links_to(1), vec![(p(1), Some(p(7))), (p(3), None)]);
        assert_eq!(ovlp.sharer_set(p(1)), BTreeSet::from([1, 2]));
        assert_eq!(ovlp.num_links(), 3);
        assert!(!ovlp.is_shared(p(2)));
        assert_eq!(ovlp.shared_points().collect::<Vec<_>>(), vec![p(1), p(3)]);
    }
}
