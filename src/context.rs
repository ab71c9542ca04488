//! `HaloContext`: one rank's state for a complete halo-exchange run.
//!
//! The context owns the communicator, the local mesh, the partition
//! registry, the tag store and the phase timer; everything is released when
//! it is dropped (for `MpiComm`, that finalises MPI).

use crate::algs::communicator::Communicator;
use crate::algs::distribute::{extract_piece_with_halo, trivial_partition};
use crate::algs::ghost_layers::{GhostLayerBuilder, GrowthStats};
use crate::algs::reduction::allreduce_count;
use crate::algs::tag_exchange::TagExchangeEngine;
use crate::config::RuntimeConfig;
use crate::data::field_store::{FieldStore, TagId};
use crate::data::generators::{ScalarWave, VectorHarmonic};
use crate::io::json::write_debug_dump_file;
use crate::io::{MeshPiece, load};
use crate::mesh_error::MeshHaloError;
use crate::mesh_generation::latlon_sphere;
use crate::timing::{PhaseRecord, PhaseTimer};
use crate::topology::entity::EntityKind;
use crate::topology::mesh::LocalMesh;
use crate::topology::ownership::{PartitionRegistry, Status};
use crate::topology::point::PointId;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const PHASE_LOAD: &str = "Read input file";
pub const PHASE_SETUP: &str = "Setup ghost layers";
pub const PHASE_SCALAR: &str = "Exchange scalar tag data";
pub const PHASE_VECTOR: &str = "Exchange vector tag data";

/// Value every tag entry carries until computed or exchanged.
pub const TAG_DEFAULT: f64 = -1.0;

/// Timings and counts of one run, identical on every rank.
#[derive(Clone, Debug, Serialize)]
pub struct HaloReport {
    pub ntasks: usize,
    pub nghosts: u32,
    pub total_owned_cells: usize,
    pub load: PhaseRecord,
    pub setup: PhaseRecord,
    pub scalar: PhaseRecord,
    pub vector: PhaseRecord,
}

impl HaloReport {
    /// `[ntasks, nghosts, load, setup, scalar, vector]` with max times.
    pub fn consolidated(&self) -> String {
        format!(
            "[{}, {}, {:e}, {:e}, {:e}, {:e}]",
            self.ntasks,
            self.nghosts,
            self.load.max,
            self.setup.max,
            self.scalar.max,
            self.vector.max
        )
    }
}

pub struct HaloContext<C: Communicator> {
    comm: C,
    config: RuntimeConfig,
    mesh: LocalMesh,
    registry: PartitionRegistry,
    fields: FieldStore,
    timer: PhaseTimer,
    builder: GhostLayerBuilder,
    engine: TagExchangeEngine,
}

impl<C: Communicator> HaloContext<C> {
    /// Load the mesh and resolve ownership, timed as the load phase.
    /// Collective.
    pub fn load(comm: C, config: RuntimeConfig) -> Result<Self, MeshHaloError> {
        config.validate()?;
        let mut timer = PhaseTimer::new();
        timer.push(PHASE_LOAD);
        let piece = match &config.input {
            Some(path) => load(path, &config.load, comm.rank(), comm.size())?,
            None => {
                let global = latlon_sphere(config.sphere_nlon, config.sphere_nlat)?;
                let parts = trivial_partition(global.num_cells(), comm.size());
                extract_piece_with_halo(
                    &global,
                    &parts,
                    comm.rank(),
                    config.load.ghost_preload_depth,
                    config.bridge()?,
                )?
            }
        };
        let ctx = Self::from_piece(comm, config, piece, timer)?;
        Ok(ctx)
    }

    /// Context over an already loaded piece. Collective.
    pub fn from_piece(
        comm: C,
        config: RuntimeConfig,
        piece: MeshPiece,
        mut timer: PhaseTimer,
    ) -> Result<Self, MeshHaloError> {
        let MeshPiece { mesh, owner_hints } = piece;
        let registry = if config.load.resolve_shared {
            PartitionRegistry::build(&mesh, &owner_hints, &comm, config.wait)?
        } else {
            PartitionRegistry::local_only(&mesh)
        };
        if timer.depth() > 0 {
            timer.pop(&comm, 1)?;
        }
        log::debug!(
            "rank {}: loaded {} entities ({} owned)",
            comm.rank(),
            mesh.len(),
            registry.owned_count()
        );
        let builder = GhostLayerBuilder::new(config.ghost_opts()?);
        let engine = TagExchangeEngine::new(config.wait);
        Ok(Self {
            comm,
            config,
            mesh,
            registry,
            fields: FieldStore::new(),
            timer,
            builder,
            engine,
        })
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn mesh(&self) -> &LocalMesh {
        &self.mesh
    }

    pub fn registry(&self) -> &PartitionRegistry {
        &self.registry
    }

    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldStore {
        &mut self.fields
    }

    pub fn timer(&self) -> &PhaseTimer {
        &self.timer
    }

    /// Grow `config.nghosts` layers, timed as the setup phase. Collective.
    pub fn setup_ghosts(&mut self) -> Result<GrowthStats, MeshHaloError> {
        self.timer.push(PHASE_SETUP);
        let stats = self
            .builder
            .grow(&self.comm, &mut self.mesh, &mut self.registry)?;
        self.timer.pop(&self.comm, 1)?;
        Ok(stats)
    }

    /// All local cells, ascending.
    pub fn local_cells(&self) -> Vec<PointId> {
        self.mesh.entities_of(EntityKind::Cell)
    }

    pub fn owned_cells(&self) -> Vec<PointId> {
        self.registry.filter(self.local_cells(), Status::Owned)
    }

    /// Create the scalar and vector tags over all local cells and fill the
    /// owned ones from the analytic generators.
    pub fn create_sv_tags(&mut self) -> Result<(TagId, TagId), MeshHaloError> {
        let cells = self.local_cells();
        let owned = self.owned_cells();
        let width = self.config.vtaglength;
        let scalar = self
            .fields
            .create_tag(&self.config.scalar_tag, 1, &[TAG_DEFAULT], cells.iter().copied())?;
        let vector = self.fields.create_tag(
            &self.config.vector_tag,
            width,
            &vec![TAG_DEFAULT; width],
            cells.iter().copied(),
        )?;
        self.fields
            .set(scalar, &owned, &self.mesh, &self.registry, &ScalarWave)?;
        self.fields.set(
            vector,
            &owned,
            &self.mesh,
            &self.registry,
            &VectorHarmonic { width },
        )?;
        Ok((scalar, vector))
    }

    /// Exchange `tag` over all local cells once. Collective.
    pub fn exchange(&mut self, tag: TagId) -> Result<(), MeshHaloError> {
        let cells = self.local_cells();
        self.engine.exchange(
            &self.comm,
            &self.mesh,
            &self.registry,
            &mut self.fields,
            tag,
            &cells,
        )?;
        Ok(())
    }

    /// Run `n` exchanges of `tag` as one timed phase.
    pub fn timed_exchanges(&mut self, label: &str, tag: TagId, n: usize) -> Result<PhaseRecord, MeshHaloError> {
        self.timer.push(label);
        for _ in 0..n {
            self.exchange(tag)?;
        }
        Ok(self.timer.pop(&self.comm, n)?.clone())
    }

    fn dump(&self, path: &Path) -> Result<(), MeshHaloError> {
        let names = [self.config.scalar_tag.as_str(), self.config.vector_tag.as_str()];
        write_debug_dump_file(path, &self.mesh, &self.registry, &self.fields, &names)
    }

    /// Everything after loading: ghosts, tags, timed exchanges, debug output.
    pub fn run(&mut self) -> Result<HaloReport, MeshHaloError> {
        let load = self
            .timer
            .record(PHASE_LOAD)
            .cloned()
            .ok_or_else(|| MeshHaloError::Invariant("load phase was not timed".into()))?;

        self.setup_ghosts()?;
        let setup = self
            .timer
            .record(PHASE_SETUP)
            .cloned()
            .ok_or_else(|| MeshHaloError::Invariant("setup phase was not timed".into()))?;

        let total_owned_cells = allreduce_count(&self.comm, self.owned_cells().len())?;
        if self.comm.rank() == 0 {
            log::info!("total number of cells in the mesh = {total_owned_cells}");
        }

        let (scalar_tag, vector_tag) = self.create_sv_tags()?;
        if self.config.debug && self.comm.rank() == 0 {
            self.dump(&self.rank_file("rank0_pre"))?;
        }

        let n = self.config.nexchanges;
        let scalar = self.timed_exchanges(PHASE_SCALAR, scalar_tag, n)?;
        let vector = self.timed_exchanges(PHASE_VECTOR, vector_tag, n)?;

        if self.config.debug {
            if self.comm.rank() == 0 {
                self.dump(&self.rank_file("rank0_post"))?;
            }
            self.dump(&self.rank_file(&format!("rank{}", self.comm.rank())))?;
        }

        let report = HaloReport {
            ntasks: self.comm.size(),
            nghosts: self.config.nghosts,
            total_owned_cells,
            load,
            setup,
            scalar,
            vector,
        };
        if self.comm.rank() == 0 {
            log::info!("consolidated: {}", report.consolidated());
        }
        Ok(report)
    }

    /// `output` with `_<suffix>` inserted before the extension.
    fn rank_file(&self, suffix: &str) -> PathBuf {
        let out = &self.config.output;
        let stem = out
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("exchangeHalos_output");
        let ext = out.extension().and_then(|e| e.to_str()).unwrap_or("json");
        out.with_file_name(format!("{stem}_{suffix}.{ext}"))
    }
}
