//! Fixed, versioned, little-endian wire types for every protocol round.

use crate::topology::entity::{EntityDef, EntityKind};
use crate::topology::point::GlobalId;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Copy raw bytes into a properly aligned vector of records.
pub fn records_from_bytes<T: Pod>(raw: &[u8]) -> Result<Vec<T>, String> {
    if raw.len() % size_of::<T>() != 0 {
        return Err(format!(
            "{} bytes is not a multiple of the {}-byte record size",
            raw.len(),
            size_of::<T>()
        ));
    }
    let mut out = vec![T::zeroed(); raw.len() / size_of::<T>()];
    cast_slice_mut(&mut out).copy_from_slice(raw);
    Ok(out)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Sentinel for "no rank" in `u64` owner fields.
pub const NO_RANK: u64 = u64::MAX;

// ===== Common records ======================================================

/// Leads every payload message.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32,
}

impl WireHdr {
    pub const SIZE: usize = 8;

    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

// ===== Ownership resolution ===============================================

/// "I hold `gid` as local handle `handle`; the partitioner says `owner`."
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHolding {
    pub gid_le: u64,
    pub handle_le: u64,
    pub owner_hint_le: u64,
}

impl WireHolding {
    pub fn new(gid: GlobalId, handle: u64, owner_hint: Option<usize>) -> Self {
        Self {
            gid_le: gid.get().to_le(),
            handle_le: handle.to_le(),
            owner_hint_le: owner_hint.map_or(NO_RANK, |r| r as u64).to_le(),
        }
    }
    pub fn gid(&self) -> GlobalId {
        GlobalId(u64::from_le(self.gid_le))
    }
    pub fn handle(&self) -> u64 {
        u64::from_le(self.handle_le)
    }
    pub fn owner_hint(&self) -> Option<usize> {
        match u64::from_le(self.owner_hint_le) {
            NO_RANK => None,
            r => Some(r as usize),
        }
    }
}

/// "`rank` holds `gid` as `handle`; the resolved owner is `owner`."
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHolder {
    pub gid_le: u64,
    pub handle_le: u64,
    pub rank_le: u32,
    pub owner_le: u32,
}

impl WireHolder {
    pub fn new(gid: GlobalId, rank: usize, handle: u64, owner: usize) -> Self {
        Self {
            gid_le: gid.get().to_le(),
            handle_le: handle.to_le(),
            rank_le: (rank as u32).to_le(),
            owner_le: (owner as u32).to_le(),
        }
    }
    pub fn gid(&self) -> GlobalId {
        GlobalId(u64::from_le(self.gid_le))
    }
    pub fn handle(&self) -> u64 {
        u64::from_le(self.handle_le)
    }
    pub fn rank(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }
    pub fn owner(&self) -> usize {
        u32::from_le(self.owner_le) as usize
    }
}

// ===== Ghost growth =======================================================

/// A global id carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireGid {
    pub id_le: u64,
}

impl WireGid {
    pub fn of(id: GlobalId) -> Self {
        Self {
            id_le: id.get().to_le(),
        }
    }
    pub fn get(&self) -> GlobalId {
        GlobalId(u64::from_le(self.id_le))
    }
}

/// Bridge entity `bridge` is adjacent to `cell`, owned by `owner`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireAdjacency {
    pub bridge_le: u64,
    pub cell_le: u64,
    pub owner_le: u64,
}

impl WireAdjacency {
    pub fn new(bridge: GlobalId, cell: GlobalId, owner: usize) -> Self {
        Self {
            bridge_le: bridge.get().to_le(),
            cell_le: cell.get().to_le(),
            owner_le: (owner as u64).to_le(),
        }
    }
    pub fn bridge(&self) -> GlobalId {
        GlobalId(u64::from_le(self.bridge_le))
    }
    pub fn cell(&self) -> GlobalId {
        GlobalId(u64::from_le(self.cell_le))
    }
    pub fn owner(&self) -> usize {
        u64::from_le(self.owner_le) as usize
    }
}

/// Sharing advertisement: `rank` holds `gid` as `handle` (owner is the sender's view).
pub type WireShare = WireHolder;

// ===== Entity definitions (variable length, u64 words) ====================

/// Encode definitions as a `u64` word stream:
/// `dim, gid, owner, x, y, z, ncone, cone...` per entity.
pub fn encode_defs(defs: &[EntityDef]) -> Vec<u64> {
    let mut out = Vec::with_capacity(defs.len() * 10);
    for d in defs {
        out.push(u64::from(d.kind.dim()).to_le());
        out.push(d.gid.get().to_le());
        out.push(d.owner.map_or(NO_RANK, |r| r as u64).to_le());
        out.extend(d.coords.iter().map(|x| x.to_bits().to_le()));
        out.push((d.cone.len() as u64).to_le());
        out.extend(d.cone.iter().map(|g| g.get().to_le()));
    }
    out
}

/// Inverse of [`encode_defs`].
pub fn decode_defs(words: &[u64]) -> Result<Vec<EntityDef>, String> {
    let mut out = Vec::new();
    let mut it = words.iter().map(|w| u64::from_le(*w));
    let mut next = |what: &str| it.next().ok_or_else(|| format!("truncated definition: missing {what}"));
    loop {
        let dim = match next("dim") {
            Ok(d) => d,
            Err(_) => break,
        };
        let kind = u8::try_from(dim)
            .ok()
            .and_then(|d| EntityKind::from_dim(d).ok())
            .ok_or_else(|| format!("bad entity dimension {dim}"))?;
        let gid = GlobalId(next("gid")?);
        let owner = match next("owner")? {
            NO_RANK => None,
            r => Some(r as usize),
        };
        let coords = [
            f64::from_bits(next("x")?),
            f64::from_bits(next("y")?),
            f64::from_bits(next("z")?),
        ];
        let ncone = next("cone length")? as usize;
        let cone = (0..ncone)
            .map(|_| next("cone entry").map(GlobalId))
            .collect::<Result<Vec<_>, _>>()?;
        out.push(EntityDef {
            gid,
            kind,
            coords,
            cone,
            owner,
        });
    }
    Ok(out)
}

// ===== Compile-time sanity checks =========================================

static_assertions::const_assert_eq!(size_of::<WireHdr>(), WireHdr::SIZE);
static_assertions::assert_eq_size!(WireCount, u32);
static_assertions::assert_eq_size!(WireGid, u64);
static_assertions::assert_eq_size!(WireHolding, [u64; 3]);
static_assertions::assert_eq_size!(WireHolder, [u64; 3]);
static_assertions::assert_eq_align!(WireHolder, u64);
static_assertions::assert_eq_size!(WireAdjacency, [u64; 3]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holding_hint_sentinel() {
        let h = WireHolding::new(GlobalId(5), 3, None);
        assert_eq!(h.owner_hint(), None);
        let h = WireHolding::new(GlobalId(5), 3, Some(2));
        assert_eq!((h.gid(), h.handle(), h.owner_hint()), (GlobalId(5), 3, Some(2)));
    }

    #[test]
    fn records_from_unaligned_bytes() {
        let v = vec![WireAdjacency::new(GlobalId(1), GlobalId(2), 3)];
        let mut raw = vec![0u8];
        raw.extend_from_slice(cast_slice(&v));
        let back: Vec<WireAdjacency> = records_from_bytes(&raw[1..]).unwrap();
        assert_eq!(back[0].cell(), GlobalId(2));
        assert!(records_from_bytes::<WireAdjacency>(&raw[..5]).is_err());
    }

    #[test]
    fn definitions_survive_encoding() {
        let mut cell = EntityDef::with_cone(30, EntityKind::Cell, &[10, 11, 12]);
        cell.owner = Some(1);
        cell.coords = [0.5, -0.25, 1.0];
        let defs = vec![EntityDef::vertex(1, [1.0, 2.0, 3.0]), cell];
        let back = decode_defs(&encode_defs(&defs)).unwrap();
        assert_eq!(back, defs);
    }

    #[test]
    fn truncated_definitions_error() {
        let words = encode_defs(&[EntityDef::with_cone(30, EntityKind::Cell, &[10, 11])]);
        assert!(decode_defs(&words[..words.len() - 1]).is_err());
        assert!(decode_defs(&[7]).is_err());
    }

    #[test]
    fn version_guard() {
        let hdr = WireHdr::new(4);
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert_eq!(hdr.kind(), 4);
    }
}
