//! Synthetic quad meshes on the unit sphere.
//!
//! Global ids are numbered vertices first, then edges, then cells, each
//! group in row-major order (latitude row, then longitude column). Cells
//! list their edges counter-clockwise starting with the southern one.

use crate::io::GlobalMesh;
use crate::mesh_error::MeshHaloError;
use crate::topology::entity::{EntityDef, EntityKind};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Half-height of the equatorial band, in radians.
const BAND_HALF_WIDTH: f64 = 0.1;

fn on_sphere(lon: f64, lat: f64) -> [f64; 3] {
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

/// Structured grid of `ncols` x `lats.len()` vertices, periodic in
/// longitude when `periodic`.
fn quad_grid(lons: &[f64], lats: &[f64], periodic: bool) -> GlobalMesh {
    let ncol = lons.len();
    let nrow = lats.len();
    let ncell_cols = if periodic { ncol } else { ncol - 1 };
    let right = |i: usize| if periodic { (i + 1) % ncol } else { i + 1 };

    let mut next = 1u64;
    let mut take = || {
        let g = next;
        next += 1;
        g
    };

    let mut entities = Vec::new();
    let mut vert = vec![vec![0u64; ncol]; nrow];
    for (j, &lat) in lats.iter().enumerate() {
        for (i, &lon) in lons.iter().enumerate() {
            vert[j][i] = take();
            entities.push(EntityDef::vertex(vert[j][i], on_sphere(lon, lat)));
        }
    }
    // horizontal edges: row j, from column i eastwards
    let mut horiz = vec![vec![0u64; ncell_cols]; nrow];
    for j in 0..nrow {
        for i in 0..ncell_cols {
            horiz[j][i] = take();
            entities.push(EntityDef::with_cone(
                horiz[j][i],
                EntityKind::Edge,
                &[vert[j][i], vert[j][right(i)]],
            ));
        }
    }
    // vertical edges: column i, from row j northwards
    let mut vertical = vec![vec![0u64; ncol]; nrow - 1];
    for j in 0..nrow - 1 {
        for i in 0..ncol {
            vertical[j][i] = take();
            entities.push(EntityDef::with_cone(
                vertical[j][i],
                EntityKind::Edge,
                &[vert[j][i], vert[j + 1][i]],
            ));
        }
    }
    for j in 0..nrow - 1 {
        for i in 0..ncell_cols {
            let gid = take();
            entities.push(EntityDef::with_cone(
                gid,
                EntityKind::Cell,
                &[
                    horiz[j][i],
                    vertical[j][right(i)],
                    horiz[j + 1][i],
                    vertical[j][i],
                ],
            ));
        }
    }
    GlobalMesh::new(entities)
}

/// `n` quads along the equator: a chain, or a ring when `closed`.
///
/// # Errors
/// `InvalidConfig` for `n == 0`, or a ring of fewer than 3 cells.
pub fn equatorial_band(n: usize, closed: bool) -> Result<GlobalMesh, MeshHaloError> {
    if n == 0 || (closed && n < 3) {
        return Err(MeshHaloError::InvalidConfig(format!(
            "equatorial band needs at least {} cells, got {n}",
            if closed { 3 } else { 1 }
        )));
    }
    let ncol = if closed { n } else { n + 1 };
    let dlon = TAU / (n as f64 + if closed { 0.0 } else { 1.0 });
    let lons: Vec<f64> = (0..ncol).map(|i| i as f64 * dlon).collect();
    Ok(quad_grid(&lons, &[-BAND_HALF_WIDTH, BAND_HALF_WIDTH], closed))
}

/// `nlon` x `nlat` quads covering the sphere except polar caps.
///
/// # Errors
/// `InvalidConfig` for fewer than 3 longitudes or no latitude rows.
pub fn latlon_sphere(nlon: usize, nlat: usize) -> Result<GlobalMesh, MeshHaloError> {
    if nlon < 3 || nlat == 0 {
        return Err(MeshHaloError::InvalidConfig(format!(
            "lat/lon sphere needs nlon >= 3 and nlat >= 1, got {nlon} x {nlat}"
        )));
    }
    let lons: Vec<f64> = (0..nlon).map(|i| TAU * i as f64 / nlon as f64).collect();
    let lats: Vec<f64> = (0..=nlat)
        .map(|j| -FRAC_PI_2 + PI * (j + 1) as f64 / (nlat + 2) as f64)
        .collect();
    Ok(quad_grid(&lons, &lats, true))
}
