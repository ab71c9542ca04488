//! JSON mesh drivers and the per-rank debug dump.
//!
//! * `.json`: a [`GlobalMesh`]; every rank reads the file and keeps its
//!   block of cells.
//! * `.pjson`: the same document with a `parts` array (owner per cell in
//!   ascending gid order).

use crate::algs::distribute::{extract_piece_with_halo, trivial_partition};
use crate::data::field_store::FieldStore;
use crate::io::{Capabilities, FormatDriver, GlobalMesh, LoadOptions, MeshPiece};
use crate::mesh_error::MeshHaloError;
use crate::topology::entity::EntityKind;
use crate::topology::mesh::LocalMesh;
use crate::topology::ownership::PartitionRegistry;
use crate::topology::point::GlobalId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

fn io_err(path: &Path, e: impl std::fmt::Display) -> MeshHaloError {
    MeshHaloError::MeshIo(format!("{}: {e}", path.display()))
}

/// Parse a global mesh document.
pub fn read_global_mesh<R: Read>(reader: R) -> Result<GlobalMesh, MeshHaloError> {
    serde_json::from_reader(reader).map_err(|e| MeshHaloError::MeshIo(e.to_string()))
}

pub fn read_global_mesh_file(path: &Path) -> Result<GlobalMesh, MeshHaloError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    read_global_mesh(BufReader::new(file)).map_err(|e| io_err(path, e))
}

pub fn write_global_mesh<W: Write>(writer: W, mesh: &GlobalMesh) -> Result<(), MeshHaloError> {
    serde_json::to_writer(writer, mesh).map_err(|e| MeshHaloError::MeshIo(e.to_string()))
}

pub fn write_global_mesh_file(path: &Path, mesh: &GlobalMesh) -> Result<(), MeshHaloError> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut w = BufWriter::new(file);
    write_global_mesh(&mut w, mesh)?;
    w.flush().map_err(|e| io_err(path, e))
}

/// Global mesh, block-partitioned while reading.
#[derive(Copy, Clone, Debug, Default)]
pub struct JsonDriver;

impl FormatDriver for JsonDriver {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            parallel_partition_aware: false,
            online_partitioner: true,
        }
    }

    fn load(
        &self,
        path: &Path,
        options: &LoadOptions,
        rank: usize,
        size: usize,
    ) -> Result<MeshPiece, MeshHaloError> {
        let global = read_global_mesh_file(path)?;
        let parts = trivial_partition(global.num_cells(), size);
        extract_piece_with_halo(
            &global,
            &parts,
            rank,
            options.ghost_preload_depth,
            EntityKind::Edge,
        )
    }
}

/// Global mesh with a stored partition.
#[derive(Copy, Clone, Debug, Default)]
pub struct PartitionedJsonDriver;

impl FormatDriver for PartitionedJsonDriver {
    fn extension(&self) -> &'static str {
        "pjson"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            parallel_partition_aware: true,
            online_partitioner: false,
        }
    }

    fn load(
        &self,
        path: &Path,
        options: &LoadOptions,
        rank: usize,
        size: usize,
    ) -> Result<MeshPiece, MeshHaloError> {
        let global = read_global_mesh_file(path)?;
        let parts = global
            .parts
            .as_deref()
            .ok_or_else(|| io_err(path, "no `parts` array"))?;
        if let Some(&bad) = parts.iter().find(|&&r| r >= size) {
            return Err(io_err(
                path,
                format!("partition names rank {bad}, but only {size} ranks run"),
            ));
        }
        extract_piece_with_halo(
            &global,
            parts,
            rank,
            options.ghost_preload_depth,
            EntityKind::Edge,
        )
    }
}

#[derive(Serialize)]
struct DumpEntity<'a> {
    gid: GlobalId,
    kind: EntityKind,
    owner: Option<usize>,
    ghost_depth: Option<u32>,
    sharers: Vec<usize>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<&'a str, &'a [f64]>,
}

#[derive(Serialize)]
struct Dump<'a> {
    rank: usize,
    entities: Vec<DumpEntity<'a>>,
}

/// Write every local entity with its ownership and tag values as JSON.
pub fn write_debug_dump<W: Write>(
    writer: W,
    mesh: &LocalMesh,
    reg: &PartitionRegistry,
    store: &FieldStore,
    tag_names: &[&str],
) -> Result<(), MeshHaloError> {
    let tags = tag_names
        .iter()
        .map(|&n| store.tag_by_name(n).map(|t| (n, t)))
        .collect::<Result<Vec<_>, _>>()?;
    let mut entities = Vec::with_capacity(mesh.len());
    for p in mesh.entities() {
        let record = mesh.entity_or_err(p)?;
        entities.push(DumpEntity {
            gid: record.gid,
            kind: record.kind,
            owner: reg.owner(p),
            ghost_depth: reg.ghost_depth(p),
            sharers: reg.sharers(p).into_iter().collect(),
            tags: tags
                .iter()
                .filter_map(|&(n, t)| store.get(t, p).map(|v| (n, v)))
                .collect(),
        });
    }
    let dump = Dump {
        rank: mesh.rank(),
        entities,
    };
    serde_json::to_writer_pretty(writer, &dump).map_err(|e| MeshHaloError::MeshIo(e.to_string()))
}

/// [`write_debug_dump`] to a file.
pub fn write_debug_dump_file(
    path: &Path,
    mesh: &LocalMesh,
    reg: &PartitionRegistry,
    store: &FieldStore,
    tag_names: &[&str],
) -> Result<(), MeshHaloError> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut w = BufWriter::new(file);
    write_debug_dump(&mut w, mesh, reg, store, tag_names)?;
    w.flush().map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_generation::equatorial_band;

    #[test]
    fn global_mesh_survives_json() {
        let mesh = equatorial_band(3, false).unwrap();
        let mut buf = Vec::new();
        write_global_mesh(&mut buf, &mesh).unwrap();
        let back = read_global_mesh(buf.as_slice()).unwrap();
        assert_eq!(back.entities.len(), mesh.entities.len());
        for (a, b) in back.entities.iter().zip(&mesh.entities) {
            assert_eq!((a.gid, a.kind, &a.cone), (b.gid, b.kind, &b.cone));
            assert!(a.coords.iter().zip(&b.coords).all(|(x, y)| (x - y).abs() < 1e-12));
        }
        assert_eq!(back.parts, None);
    }

    #[test]
    fn malformed_document_is_mesh_io() {
        let err = read_global_mesh(&b"{\"entities\": 3}"[..]).unwrap_err();
        assert!(matches!(err, MeshHaloError::MeshIo(_)));
    }

    #[test]
    fn debug_dump_lists_tags() {
        let global = equatorial_band(3, false).unwrap();
        let mesh = LocalMesh::from_defs(0, global.entities).unwrap();
        let reg = PartitionRegistry::local_only(&mesh);
        let mut store = FieldStore::new();
        store
            .create_tag("s", 1, &[7.0], mesh.entities_of(EntityKind::Cell))
            .unwrap();
        let mut buf = Vec::new();
        write_debug_dump(&mut buf, &mesh, &reg, &store, &["s"]).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        let ents = v["entities"].as_array().unwrap();
        assert_eq!(ents.len(), mesh.len());
        let cell = ents.iter().find(|e| e["kind"] == "cell").unwrap();
        assert_eq!(cell["tags"]["s"][0], 7.0);
        assert!(write_debug_dump(&mut Vec::new(), &mesh, &reg, &store, &["nope"]).is_err());
    }
}
