//! Named fixed-width `f64` attributes ("tags") over entity domains.
//!
//! Each tag is a [`Section`] over the entities of its domain. Values start
//! at the tag default; afterwards only the owner writes an entity's values
//! (through [`FieldStore::set`] or [`FieldStore::set_values`]), and ghost
//! copies change only through exchange.

use crate::data::atlas::Atlas;
use crate::data::generators::{FieldGenerator, SphericalPosition};
use crate::data::section::Section;
use crate::mesh_error::MeshHaloError;
use crate::topology::mesh::LocalMesh;
use crate::topology::ownership::PartitionRegistry;
use crate::topology::point::PointId;
use hashbrown::HashMap;

/// Handle of a tag inside one [`FieldStore`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(usize);

#[derive(Clone, Debug)]
struct TagData {
    name: String,
    width: usize,
    default: Vec<f64>,
    domain: Vec<PointId>,
    values: Section<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct FieldStore {
    tags: Vec<TagData>,
    by_name: HashMap<String, TagId>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag of `width` values per entity over `domain`.
    ///
    /// # Errors
    /// Configuration errors for a zero width, an existing name, or a
    /// default whose length is not `width`.
    pub fn create_tag<I>(
        &mut self,
        name: &str,
        width: usize,
        default: &[f64],
        domain: I,
    ) -> Result<TagId, MeshHaloError>
    where
        I: IntoIterator<Item = PointId>,
    {
        if width == 0 || default.len() != width {
            return Err(MeshHaloError::InvalidTagWidth {
                tag: name.to_string(),
                width: if width == 0 { 0 } else { default.len() },
            });
        }
        if self.by_name.contains_key(name) {
            return Err(MeshHaloError::DuplicateTag(name.to_string()));
        }
        let mut domain: Vec<PointId> = domain.into_iter().collect();
        domain.sort_unstable();
        domain.dedup();
        let mut atlas = Atlas::default();
        for &p in &domain {
            atlas.try_insert(p, width)?;
        }
        let id = TagId(self.tags.len());
        self.tags.push(TagData {
            name: name.to_string(),
            width,
            default: default.to_vec(),
            domain,
            values: Section::filled(atlas, default),
        });
        self.by_name.insert(name.to_string(), id);
        log::debug!("created tag `{name}` (width {width})");
        Ok(id)
    }

    pub fn tag_by_name(&self, name: &str) -> Result<TagId, MeshHaloError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| MeshHaloError::UnknownTag(name.to_string()))
    }

    fn data(&self, tag: TagId) -> Result<&TagData, MeshHaloError> {
        self.tags
            .get(tag.0)
            .ok_or_else(|| MeshHaloError::UnknownTag(format!("#{}", tag.0)))
    }

    fn data_mut(&mut self, tag: TagId) -> Result<&mut TagData, MeshHaloError> {
        self.tags
            .get_mut(tag.0)
            .ok_or_else(|| MeshHaloError::UnknownTag(format!("#{}", tag.0)))
    }

    pub fn name(&self, tag: TagId) -> Result<&str, MeshHaloError> {
        self.data(tag).map(|t| t.name.as_str())
    }

    pub fn width(&self, tag: TagId) -> Result<usize, MeshHaloError> {
        self.data(tag).map(|t| t.width)
    }

    pub fn default_value(&self, tag: TagId) -> Result<&[f64], MeshHaloError> {
        self.data(tag).map(|t| t.default.as_slice())
    }

    /// Domain of `tag`, ascending by handle.
    pub fn domain(&self, tag: TagId) -> Result<&[PointId], MeshHaloError> {
        self.data(tag).map(|t| t.domain.as_slice())
    }

    /// Values of `p`, or `None` outside the tag domain.
    pub fn get(&self, tag: TagId, p: PointId) -> Option<&[f64]> {
        self.tags.get(tag.0)?.values.try_restrict(p)
    }

    /// Values of `p`, with a diagnostic outside the domain.
    pub fn values(&self, mesh: &LocalMesh, tag: TagId, p: PointId) -> Result<&[f64], MeshHaloError> {
        let t = self.data(tag)?;
        match t.values.try_restrict(p) {
            Some(v) => Ok(v),
            None => Err(MeshHaloError::OutsideTagDomain {
                tag: t.name.clone(),
                gid: mesh.gid(p)?,
            }),
        }
    }

    /// `(entity, values)` over the whole domain, ascending by handle.
    pub fn iter(&self, tag: TagId) -> impl Iterator<Item = (PointId, &[f64])> + '_ {
        self.tags
            .get(tag.0)
            .into_iter()
            .flat_map(|t| t.values.iter())
    }

    /// Evaluate `generator` at every entity of `owned` and store the result.
    ///
    /// # Errors
    /// `GhostWrite` (fatal) if any entity is not owned by this rank,
    /// `OutsideTagDomain` if any entity is not in the tag's domain; nothing
    /// is written in either case.
    pub fn set<G: FieldGenerator + ?Sized>(
        &mut self,
        tag: TagId,
        owned: &[PointId],
        mesh: &LocalMesh,
        reg: &PartitionRegistry,
        generator: &G,
    ) -> Result<(), MeshHaloError> {
        let t = self.data(tag)?;
        if generator.width() != t.width {
            return Err(MeshHaloError::InvalidTagWidth {
                tag: t.name.clone(),
                width: generator.width(),
            });
        }
        let mut computed = Vec::with_capacity(owned.len() * t.width);
        for &p in owned {
            ensure_owned(mesh, reg, &t.name, p)?;
            if t.values.try_restrict(p).is_none() {
                return Err(MeshHaloError::OutsideTagDomain {
                    tag: t.name.clone(),
                    gid: mesh.gid(p)?,
                });
            }
            let pos = SphericalPosition::from_cartesian(mesh.centroid(p)?);
            let start = computed.len();
            computed.resize(start + t.width, 0.0);
            generator.evaluate(pos, &mut computed[start..]);
        }
        let width = t.width;
        for (&p, vals) in owned.iter().zip(computed.chunks_exact(width)) {
            self.write(mesh, tag, p, vals)?;
        }
        Ok(())
    }

    /// Overwrite the values of one owned entity.
    pub fn set_values(
        &mut self,
        tag: TagId,
        p: PointId,
        values: &[f64],
        mesh: &LocalMesh,
        reg: &PartitionRegistry,
    ) -> Result<(), MeshHaloError> {
        let t = self.data(tag)?;
        ensure_owned(mesh, reg, &t.name, p)?;
        if values.len() != t.width {
            return Err(MeshHaloError::InvalidTagWidth {
                tag: t.name.clone(),
                width: values.len(),
            });
        }
        self.write(mesh, tag, p, values)
    }

    fn write(
        &mut self,
        mesh: &LocalMesh,
        tag: TagId,
        p: PointId,
        values: &[f64],
    ) -> Result<(), MeshHaloError> {
        let t = self.data_mut(tag)?;
        if t.values.try_set(p, values) {
            Ok(())
        } else {
            Err(MeshHaloError::OutsideTagDomain {
                tag: t.name.clone(),
                gid: mesh.gid(p)?,
            })
        }
    }

    /// Store values received from `p`'s owner. Returns false outside the domain.
    pub(crate) fn write_received(&mut self, tag: TagId, p: PointId, values: &[f64]) -> bool {
        match self.tags.get_mut(tag.0) {
            Some(t) => t.values.try_set(p, values),
            None => false,
        }
    }
}

fn ensure_owned(
    mesh: &LocalMesh,
    reg: &PartitionRegistry,
    tag: &str,
    p: PointId,
) -> Result<(), MeshHaloError> {
    if reg.is_owned(p) {
        Ok(())
    } else {
        Err(MeshHaloError::GhostWrite {
            gid: mesh.gid(p)?,
            rank: reg.rank(),
            tag: tag.to_string(),
        })
    }
}
