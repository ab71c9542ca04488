//! Runtime configuration of a halo-exchange run.
//!
//! Values come from built-in defaults, optionally a JSON file, and finally
//! command-line flags (applied by the driver binary).

use crate::algs::completion::WaitPolicy;
use crate::algs::ghost_layers::GhostOpts;
use crate::io::LoadOptions;
use crate::mesh_error::MeshHaloError;
use crate::topology::entity::EntityKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT: &str = "exchangeHalos_output.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Mesh file; a lat/lon sphere is generated when absent.
    pub input: Option<PathBuf>,
    pub nghosts: u32,
    /// Width of the vector tag.
    pub vtaglength: usize,
    /// Exchanges per timed tag phase.
    pub nexchanges: usize,
    pub debug: bool,
    pub output: PathBuf,
    pub scalar_tag: String,
    pub vector_tag: String,
    /// Topological dimension of the cells.
    pub dimension: u8,
    /// Layers grown between thin-layer corrections.
    pub ghost_step: u32,
    pub wait: WaitPolicy,
    pub load: LoadOptions,
    /// Size of the generated sphere when no input is given.
    pub sphere_nlon: usize,
    pub sphere_nlat: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            input: None,
            nghosts: 3,
            vtaglength: 3,
            nexchanges: 10,
            debug: false,
            output: PathBuf::from(DEFAULT_OUTPUT),
            scalar_tag: "scalar_variable".to_string(),
            vector_tag: "vector_variable".to_string(),
            dimension: 2,
            ghost_step: 1,
            wait: WaitPolicy::WaitAll,
            load: LoadOptions::default(),
            sphere_nlon: 64,
            sphere_nlat: 32,
        }
    }
}

impl RuntimeConfig {
    /// Read a JSON configuration; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, MeshHaloError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MeshHaloError::InvalidConfig(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| MeshHaloError::InvalidConfig(format!("{}: {e}", path.display())))
    }

    /// Bridge kind for cells of `dimension`.
    pub fn bridge(&self) -> Result<EntityKind, MeshHaloError> {
        match self.dimension {
            2 => Ok(EntityKind::Edge),
            1 => Ok(EntityKind::Vertex),
            d => Err(MeshHaloError::InvalidConfig(format!(
                "cells of dimension {d} are not supported"
            ))),
        }
    }

    pub fn ghost_opts(&self) -> Result<GhostOpts, MeshHaloError> {
        let opts = GhostOpts {
            layers: self.nghosts,
            step: self.ghost_step,
            bridge: self.bridge()?,
            wait: self.wait,
            correct_thin_layers: true,
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<(), MeshHaloError> {
        if self.vtaglength == 0 {
            return Err(MeshHaloError::InvalidTagWidth {
                tag: self.vector_tag.clone(),
                width: 0,
            });
        }
        if self.nexchanges == 0 {
            return Err(MeshHaloError::InvalidConfig(
                "nexchanges must be at least 1".into(),
            ));
        }
        if self.scalar_tag.is_empty() || self.vector_tag.is_empty() {
            return Err(MeshHaloError::InvalidConfig("tag names must not be empty".into()));
        }
        if self.scalar_tag == self.vector_tag {
            return Err(MeshHaloError::DuplicateTag(self.scalar_tag.clone()));
        }
        if self.input.is_none() && (self.sphere_nlon < 3 || self.sphere_nlat == 0) {
            return Err(MeshHaloError::InvalidConfig(format!(
                "generated sphere needs nlon >= 3 and nlat >= 1, got {} x {}",
                self.sphere_nlon, self.sphere_nlat
            )));
        }
        self.ghost_opts().map(|_| ())
    }
}
