//! `LocalMesh`: the rank-local entity arena.
//!
//! Entities are stored densely and addressed by [`PointId`] handles handed out
//! in insertion order. Each entity keeps its downward adjacency (cone); the
//! upward adjacency (support) is maintained alongside so bridge-adjacency
//! queries (cell → edge → cell) stay cheap.
//!
//! Determinism: every query returning several handles returns them sorted.

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshHaloError;
use crate::topology::entity::{EntityDef, EntityKind};
use crate::topology::point::{GlobalId, PointId};
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

/// One stored entity.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    pub gid: GlobalId,
    pub kind: EntityKind,
    pub coords: [f64; 3],
    cone: Vec<PointId>,
}

impl EntityRecord {
    /// Downward adjacency in local handles.
    pub fn cone(&self) -> &[PointId] {
        &self.cone
    }
}

/// Rank-local mesh: entity arena plus global-id index.
#[derive(Clone, Debug, Default)]
pub struct LocalMesh {
    rank: usize,
    records: Vec<EntityRecord>,
    support: Vec<Vec<PointId>>,
    by_gid: HashMap<GlobalId, PointId>,
}

impl LocalMesh {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            ..Self::default()
        }
    }

    /// Build a mesh from entity definitions, inserting lower dimensions first.
    ///
    /// # Errors
    /// `DuplicateGlobalId` if a gid repeats, `UnknownGlobalId` if a cone
    /// references an entity that is not part of the input.
    pub fn from_defs<I>(rank: usize, defs: I) -> Result<Self, MeshHaloError>
    where
        I: IntoIterator<Item = EntityDef>,
    {
        let mut mesh = Self::new(rank);
        let defs: Vec<EntityDef> = defs.into_iter().sorted_by_key(|d| d.kind).collect();
        for def in &defs {
            mesh.insert(def)?;
        }
        Ok(mesh)
    }

    /// Insert one entity; its cone must already be present.
    pub fn insert(&mut self, def: &EntityDef) -> Result<PointId, MeshHaloError> {
        if self.by_gid.contains_key(&def.gid) {
            return Err(MeshHaloError::DuplicateGlobalId {
                gid: def.gid,
                rank: self.rank,
            });
        }
        let cone = def
            .cone
            .iter()
            .map(|&g| self.handle_or_err(g))
            .collect::<Result<Vec<_>, _>>()?;
        for &c in &cone {
            if self.records[c.index()].kind >= def.kind {
                return Err(MeshHaloError::MeshIo(format!(
                    "entity {} ({:?}) has cone entry {} of kind {:?}",
                    def.gid,
                    def.kind,
                    self.records[c.index()].gid,
                    self.records[c.index()].kind
                )));
            }
        }
        let p = PointId::from_index(self.records.len());
        for &c in &cone {
            self.support[c.index()].push(p);
        }
        self.records.push(EntityRecord {
            gid: def.gid,
            kind: def.kind,
            coords: def.coords,
            cone,
        });
        self.support.push(Vec::new());
        self.by_gid.insert(def.gid, p);
        #[cfg(feature = "check-invariants")]
        self.debug_assert_invariants();
        Ok(p)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn handle(&self, gid: GlobalId) -> Option<PointId> {
        self.by_gid.get(&gid).copied()
    }

    pub fn handle_or_err(&self, gid: GlobalId) -> Result<PointId, MeshHaloError> {
        self.handle(gid).ok_or(MeshHaloError::UnknownGlobalId {
            gid,
            rank: self.rank,
        })
    }

    #[inline]
    pub fn contains_gid(&self, gid: GlobalId) -> bool {
        self.by_gid.contains_key(&gid)
    }

    #[inline]
    pub fn entity(&self, p: PointId) -> Option<&EntityRecord> {
        self.records.get(p.index())
    }

    pub fn entity_or_err(&self, p: PointId) -> Result<&EntityRecord, MeshHaloError> {
        self.entity(p).ok_or(MeshHaloError::UnknownEntity {
            point: p,
            rank: self.rank,
        })
    }

    pub fn gid(&self, p: PointId) -> Result<GlobalId, MeshHaloError> {
        self.entity_or_err(p).map(|e| e.gid)
    }

    /// All handles in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = PointId> + '_ {
        (0..self.records.len()).map(PointId::from_index)
    }

    /// Handles of one kind, ascending.
    pub fn entities_of(&self, kind: EntityKind) -> Vec<PointId> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.kind == kind)
            .map(|(i, _)| PointId::from_index(i))
            .collect()
    }

    pub fn cone(&self, p: PointId) -> &[PointId] {
        self.records.get(p.index()).map_or(&[], |r| r.cone.as_slice())
    }

    pub fn support(&self, p: PointId) -> &[PointId] {
        self.support.get(p.index()).map_or(&[], |s| s.as_slice())
    }

    /// `p` and everything below it, sorted.
    pub fn closure(&self, p: PointId) -> Vec<PointId> {
        let mut seen = HashSet::new();
        let mut stack = vec![p];
        while let Some(q) = stack.pop() {
            if seen.insert(q) {
                stack.extend_from_slice(self.cone(q));
            }
        }
        seen.into_iter().sorted().collect()
    }

    /// Entities of `kind` in the closure of `p`.
    pub fn closure_of_kind(&self, p: PointId, kind: EntityKind) -> Vec<PointId> {
        self.closure(p)
            .into_iter()
            .filter(|&q| self.records[q.index()].kind == kind)
            .collect()
    }

    /// Entities of `kind` in the upward star of `p`.
    pub fn star_of_kind(&self, p: PointId, kind: EntityKind) -> Vec<PointId> {
        let mut seen = HashSet::new();
        let mut stack = vec![p];
        let mut out = Vec::new();
        while let Some(q) = stack.pop() {
            if !seen.insert(q) {
                continue;
            }
            if self.records[q.index()].kind == kind {
                out.push(q);
            }
            stack.extend_from_slice(self.support(q));
        }
        out.sort_unstable();
        out
    }

    /// Cells sharing at least one `bridge` entity with `cell`.
    pub fn bridge_neighbors(&self, cell: PointId, bridge: EntityKind) -> Vec<PointId> {
        let kind = match self.entity(cell) {
            Some(r) => r.kind,
            None => return Vec::new(),
        };
        self.closure_of_kind(cell, bridge)
            .into_iter()
            .flat_map(|b| self.star_of_kind(b, kind))
            .filter(|&q| q != cell)
            .sorted()
            .dedup()
            .collect()
    }

    /// Centroid: average of the vertex closure, or the entity's own coordinates
    /// when it has no vertices below it.
    ///
    /// Vertices are summed in global-id order, so every rank holding a copy
    /// gets bit-identical coordinates.
    pub fn centroid(&self, p: PointId) -> Result<[f64; 3], MeshHaloError> {
        let record = self.entity_or_err(p)?;
        if record.kind == EntityKind::Vertex {
            return Ok(record.coords);
        }
        let mut verts = self.closure_of_kind(p, EntityKind::Vertex);
        verts.sort_by_key(|v| self.records[v.index()].gid);
        if verts.is_empty() {
            return Ok(record.coords);
        }
        let mut c = [0.0; 3];
        for v in &verts {
            let x = self.records[v.index()].coords;
            c[0] += x[0];
            c[1] += x[1];
            c[2] += x[2];
        }
        let n = verts.len() as f64;
        Ok([c[0] / n, c[1] / n, c[2] / n])
    }

    /// Serialisable definition of `p` (cone in global ids).
    pub fn to_def(&self, p: PointId, owner: Option<usize>) -> Result<EntityDef, MeshHaloError> {
        let record = self.entity_or_err(p)?;
        Ok(EntityDef {
            gid: record.gid,
            kind: record.kind,
            coords: record.coords,
            cone: record
                .cone
                .iter()
                .map(|c| self.records[c.index()].gid)
                .collect(),
            owner,
        })
    }
}

impl DebugInvariants for LocalMesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "LocalMesh");
    }

    fn validate_invariants(&self) -> Result<(), MeshHaloError> {
        if self.records.len() != self.support.len() || self.records.len() != self.by_gid.len() {
            return Err(MeshHaloError::Invariant(format!(
                "rank {}: arena sizes disagree ({} records, {} supports, {} gids)",
                self.rank,
                self.records.len(),
                self.support.len(),
                self.by_gid.len()
            )));
        }
        for (i, r) in self.records.iter().enumerate() {
            let p = PointId::from_index(i);
            if self.by_gid.get(&r.gid) != Some(&p) {
                return Err(MeshHaloError::Invariant(format!(
                    "rank {}: gid index stale for {}",
                    self.rank, r.gid
                )));
            }
            for &c in &r.cone {
                if !self.support(c).contains(&p) {
                    return Err(MeshHaloError::Invariant(format!(
                        "rank {}: support of {} misses {}",
                        self.rank, self.records[c.index()].gid, r.gid
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two unit squares sharing edge 12 (vertices 2, 5).
    //   4 --- 5 --- 6
    //   |  c1 |  c2 |
    //   1 --- 2 --- 3
    fn two_quads() -> Vec<EntityDef> {
        let mut defs = vec![
            EntityDef::vertex(1, [0.0, 0.0, 0.0]),
            EntityDef::vertex(2, [1.0, 0.0, 0.0]),
            EntityDef::vertex(3, [2.0, 0.0, 0.0]),
            EntityDef::vertex(4, [0.0, 1.0, 0.0]),
            EntityDef::vertex(5, [1.0, 1.0, 0.0]),
            EntityDef::vertex(6, [2.0, 1.0, 0.0]),
        ];
        for (gid, a, b) in [(10, 1, 2), (11, 4, 5), (12, 2, 5), (13, 1, 4), (14, 2, 3), (15, 5, 6), (16, 3, 6)] {
            defs.push(EntityDef::with_cone(gid, EntityKind::Edge, &[a, b]));
        }
        defs.push(EntityDef::with_cone(20, EntityKind::Cell, &[10, 11, 12, 13]));
        defs.push(EntityDef::with_cone(21, EntityKind::Cell, &[14, 15, 16, 12]));
        // shuffled input order must not matter
        defs.reverse();
        defs
    }

    #[test]
    fn builds_and_indexes() {
        let mesh = LocalMesh::from_defs(0, two_quads()).unwrap();
        assert_eq!(mesh.len(), 15);
        assert_eq!(mesh.entities_of(EntityKind::Cell).len(), 2);
        mesh.validate_invariants().unwrap();
    }

    #[test]
    fn duplicate_gid_is_rejected() {
        let mut defs = two_quads();
        defs.push(EntityDef::vertex(3, [9.0, 9.0, 9.0]));
        let err = LocalMesh::from_defs(0, defs).unwrap_err();
        assert_eq!(
            err,
            MeshHaloError::DuplicateGlobalId {
                gid: GlobalId(3),
                rank: 0
            }
        );
    }

    #[test]
    fn dangling_cone_is_rejected() {
        let defs = vec![EntityDef::with_cone(10, EntityKind::Edge, &[1, 2])];
        assert!(matches!(
            LocalMesh::from_defs(0, defs),
            Err(MeshHaloError::UnknownGlobalId { .. })
        ));
    }

    #[test]
    fn bridge_adjacency_edges_vs_vertices() {
        let mesh = LocalMesh::from_defs(0, two_quads()).unwrap();
        let c1 = mesh.handle(GlobalId(20)).unwrap();
        let c2 = mesh.handle(GlobalId(21)).unwrap();
        assert_eq!(mesh.bridge_neighbors(c1, EntityKind::Edge), vec![c2]);
        assert_eq!(mesh.bridge_neighbors(c1, EntityKind::Vertex), vec![c2]);
        assert_eq!(mesh.closure_of_kind(c1, EntityKind::Vertex).len(), 4);
    }

    #[test]
    fn centroid_averages_vertices() {
        let mesh = LocalMesh::from_defs(0, two_quads()).unwrap();
        let c2 = mesh.handle(GlobalId(21)).unwrap();
        assert_eq!(mesh.centroid(c2).unwrap(), [1.5, 0.5, 0.0]);
        let v1 = mesh.handle(GlobalId(1)).unwrap();
        assert_eq!(mesh.centroid(v1).unwrap(), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn to_def_uses_global_ids() {
        let mesh = LocalMesh::from_defs(0, two_quads()).unwrap();
        let e = mesh.handle(GlobalId(12)).unwrap();
        let def = mesh.to_def(e, Some(1)).unwrap();
        assert_eq!(def.cone, vec![GlobalId(2), GlobalId(5)]);
        assert_eq!(def.owner, Some(1));
    }
}
