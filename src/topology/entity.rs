//! Entity kinds and the serialisable entity definition used by mesh sources.

use crate::mesh_error::MeshHaloError;
use crate::topology::point::GlobalId;
use serde::{Deserialize, Serialize};

/// Topological kind of a mesh entity.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Vertex,
    Edge,
    Cell,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Vertex, EntityKind::Edge, EntityKind::Cell];

    /// Topological dimension (0, 1, 2).
    #[inline]
    pub fn dim(self) -> u8 {
        match self {
            EntityKind::Vertex => 0,
            EntityKind::Edge => 1,
            EntityKind::Cell => 2,
        }
    }

    /// Kind for a topological dimension.
    pub fn from_dim(dim: u8) -> Result<Self, MeshHaloError> {
        match dim {
            0 => Ok(EntityKind::Vertex),
            1 => Ok(EntityKind::Edge),
            2 => Ok(EntityKind::Cell),
            d => Err(MeshHaloError::InvalidConfig(format!(
                "unsupported entity dimension {d}"
            ))),
        }
    }
}

/// Definition of one entity as delivered by a mesh source or a ghost message.
///
/// `cone` lists the global ids of the entities one dimension (or more) below
/// this one: edges list their vertices, cells list their edges (or vertices
/// for meshes without edges).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub gid: GlobalId,
    pub kind: EntityKind,
    #[serde(default)]
    pub coords: [f64; 3],
    #[serde(default)]
    pub cone: Vec<GlobalId>,
    /// Partitioner-supplied owning rank, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<usize>,
}

impl EntityDef {
    pub fn vertex(gid: u64, coords: [f64; 3]) -> Self {
        Self {
            gid: GlobalId(gid),
            kind: EntityKind::Vertex,
            coords,
            cone: Vec::new(),
            owner: None,
        }
    }

    pub fn with_cone(gid: u64, kind: EntityKind, cone: &[u64]) -> Self {
        Self {
            gid: GlobalId(gid),
            kind,
            coords: [0.0; 3],
            cone: cone.iter().copied().map(GlobalId).collect(),
            owner: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_dim(kind.dim()).unwrap(), kind);
        }
        assert!(EntityKind::from_dim(3).is_err());
    }

    #[test]
    fn kinds_order_by_dimension() {
        assert!(EntityKind::Vertex < EntityKind::Edge);
        assert!(EntityKind::Edge < EntityKind::Cell);
    }

    #[test]
    fn json_defaults() {
        let e: EntityDef = serde_json::from_str(r#"{"gid": 5, "kind": "edge", "cone": [1, 2]}"#).unwrap();
        assert_eq!(e.kind, EntityKind::Edge);
        assert_eq!(e.cone, vec![GlobalId(1), GlobalId(2)]);
        assert_eq!(e.owner, None);
        assert_eq!(e.coords, [0.0; 3]);
    }
}
