//! Mesh sources and debug output.
//!
//! A [`FormatDriver`] turns a file into this rank's [`MeshPiece`]. Drivers
//! are looked up in a [`DriverRegistry`] by canonical (lower-case) file
//! extension and advertise what they can do through [`Capabilities`], which
//! [`load`] checks against the requested [`PartitionStrategy`].

pub mod json;

use crate::mesh_error::MeshHaloError;
use crate::topology::entity::EntityDef;
use crate::topology::mesh::LocalMesh;
use crate::topology::point::GlobalId;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Whole mesh as stored in a file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalMesh {
    pub entities: Vec<EntityDef>,
    /// Owning rank per cell, in ascending cell-gid order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<usize>>,
}

impl GlobalMesh {
    pub fn new(entities: Vec<EntityDef>) -> Self {
        Self {
            entities,
            parts: None,
        }
    }

    /// Cell gids, ascending.
    pub fn cell_gids(&self) -> Vec<GlobalId> {
        let mut cells: Vec<GlobalId> = self
            .entities
            .iter()
            .filter(|d| d.kind == crate::topology::entity::EntityKind::Cell)
            .map(|d| d.gid)
            .collect();
        cells.sort_unstable();
        cells
    }

    pub fn num_cells(&self) -> usize {
        self.cell_gids().len()
    }
}

/// This rank's part of a mesh, as delivered by a loader.
#[derive(Clone, Debug)]
pub struct MeshPiece {
    pub mesh: LocalMesh,
    /// Partitioner-supplied owners.
    pub owner_hints: BTreeMap<GlobalId, usize>,
}

impl MeshPiece {
    /// Build from definitions; `owner` fields become owner hints.
    pub fn from_defs(rank: usize, defs: Vec<EntityDef>) -> Result<Self, MeshHaloError> {
        let owner_hints = defs
            .iter()
            .filter_map(|d| d.owner.map(|o| (d.gid, o)))
            .collect();
        Ok(Self {
            mesh: LocalMesh::from_defs(rank, defs)?,
            owner_hints,
        })
    }
}

/// How the mesh is split across ranks while loading.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionStrategy {
    /// Partition while reading.
    #[default]
    OnlineGraphPartition,
    /// Use the partition stored in the file.
    PrePartitionedFile,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub strategy: PartitionStrategy,
    /// Ghost layers delivered by the loader itself.
    pub ghost_preload_depth: u32,
    /// Resolve ownership of entities present on several ranks.
    pub resolve_shared: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            strategy: PartitionStrategy::default(),
            ghost_preload_depth: 0,
            resolve_shared: true,
        }
    }
}

/// What a driver supports.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Reads a partition stored in the file.
    pub parallel_partition_aware: bool,
    /// Partitions while reading.
    pub online_partitioner: bool,
}

impl Capabilities {
    pub fn supports(&self, strategy: PartitionStrategy) -> bool {
        match strategy {
            PartitionStrategy::OnlineGraphPartition => self.online_partitioner,
            PartitionStrategy::PrePartitionedFile => self.parallel_partition_aware,
        }
    }
}

/// A mesh file format.
pub trait FormatDriver: Send + Sync {
    /// Canonical lower-case extension, without the dot.
    fn extension(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Load the piece of `path` that belongs to `rank` of `size`.
    fn load(
        &self,
        path: &Path,
        options: &LoadOptions,
        rank: usize,
        size: usize,
    ) -> Result<MeshPiece, MeshHaloError>;
}

/// Drivers keyed by canonical extension.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn FormatDriver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.drivers.keys()).finish()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in JSON drivers.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(json::JsonDriver));
        reg.register(Arc::new(json::PartitionedJsonDriver));
        reg
    }

    /// Add or replace the driver for its extension.
    pub fn register(&mut self, driver: Arc<dyn FormatDriver>) {
        self.drivers
            .insert(driver.extension().to_ascii_lowercase(), driver);
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Driver for the extension of `path`.
    pub fn for_path(&self, path: &Path) -> Result<Arc<dyn FormatDriver>, MeshHaloError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        self.drivers
            .get(&ext)
            .cloned()
            .ok_or(MeshHaloError::UnsupportedExtension(ext))
    }
}

static BUILTIN: Lazy<DriverRegistry> = Lazy::new(DriverRegistry::with_builtin);

/// The registry with the built-in drivers.
pub fn builtin_drivers() -> &'static DriverRegistry {
    &BUILTIN
}

/// Load this rank's piece of `path` through `registry`.
///
/// # Errors
/// `UnsupportedExtension` for an unknown extension, `InvalidConfig` when the
/// driver cannot honour `options.strategy`, plus whatever the driver reports.
pub fn load_with(
    registry: &DriverRegistry,
    path: &Path,
    options: &LoadOptions,
    rank: usize,
    size: usize,
) -> Result<MeshPiece, MeshHaloError> {
    let driver = registry.for_path(path)?;
    if !driver.capabilities().supports(options.strategy) {
        return Err(MeshHaloError::InvalidConfig(format!(
            "`.{}` files do not support the {:?} strategy",
            driver.extension(),
            options.strategy
        )));
    }
    log::debug!(
        "rank {rank}: loading {} with the `{}` driver",
        path.display(),
        driver.extension()
    );
    driver.load(path, options, rank, size)
}

/// [`load_with`] on the built-in registry.
pub fn load(
    path: &Path,
    options: &LoadOptions,
    rank: usize,
    size: usize,
) -> Result<MeshPiece, MeshHaloError> {
    load_with(builtin_drivers(), path, options, rank, size)
}
