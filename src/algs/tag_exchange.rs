//! Owner → ghost synchronisation of tag values.
//!
//! An [`ExchangePlan`] fixes, for one domain and one registry state, which
//! owned entities go to which sharer and how many records each source will
//! deliver. Plans are cached and rebuilt only when the registry epoch or the
//! domain changes, so benchmark loops pay for one count handshake.
//!
//! Receive counts pair with the send lists peers had at handshake time, so a
//! cached plan is only reused when every rank holds a current plan from the
//! same handshake. Ranks agree on that with one small reduction per call and
//! otherwise rebuild together.

use crate::algs::communicator::{Communicator, ExchangeTags, tags};
use crate::algs::completion::WaitPolicy;
use crate::algs::completion::data_exchange::exchange_data;
use crate::algs::completion::size_exchange::exchange_sizes_symmetric;
use crate::algs::reduction::{ReduceOp, allreduce};
use crate::data::field_store::{FieldStore, TagId};
use crate::mesh_error::MeshHaloError;
use crate::topology::mesh::LocalMesh;
use crate::topology::ownership::PartitionRegistry;
use crate::topology::point::{GlobalId, PointId};
use hashbrown::{HashMap, HashSet};
use std::collections::{BTreeMap, BTreeSet};

const KIND_VALUES: u16 = 0x40;

/// Outgoing message for one destination: `(gid, values…)` records as
/// little-endian `u64` words, ascending by gid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeBuffer {
    width: usize,
    words: Vec<u64>,
}

impl ExchangeBuffer {
    pub fn with_capacity(width: usize, records: usize) -> Self {
        Self {
            width,
            words: Vec::with_capacity(records * (1 + width)),
        }
    }

    /// Append one record. Callers push in ascending gid order.
    pub fn push(&mut self, gid: GlobalId, values: &[f64]) {
        debug_assert_eq!(values.len(), self.width);
        self.words.push(gid.get().to_le());
        self.words.extend(values.iter().map(|v| v.to_bits().to_le()));
    }

    pub fn len(&self) -> usize {
        self.words.len() / (1 + self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Size on the wire, without the message header.
    pub fn byte_len(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    pub fn into_words(self) -> Vec<u64> {
        self.words
    }

    /// Decode `(gid, values)` records from received words.
    pub fn records(words: &[u64], width: usize) -> impl Iterator<Item = (GlobalId, Vec<f64>)> + '_ {
        words.chunks_exact(1 + width).map(|rec| {
            (
                GlobalId(u64::from_le(rec[0])),
                rec[1..]
                    .iter()
                    .map(|w| f64::from_bits(u64::from_le(*w)))
                    .collect(),
            )
        })
    }
}

/// Send lists and expected receive counts for one domain.
#[derive(Clone, Debug)]
pub struct ExchangePlan {
    epoch: u64,
    /// Handshake this plan took part in.
    generation: u64,
    domain: Vec<PointId>,
    sends: BTreeMap<usize, Vec<(GlobalId, PointId)>>,
    recv_counts: BTreeMap<usize, usize>,
}

impl ExchangePlan {
    /// Build a plan for `domain` (sorted, deduplicated). Collective.
    pub fn build<C: Communicator>(
        comm: &C,
        mesh: &LocalMesh,
        reg: &PartitionRegistry,
        domain: Vec<PointId>,
        generation: u64,
    ) -> Result<Self, MeshHaloError> {
        let me = comm.rank();
        let mut sends: BTreeMap<usize, Vec<(GlobalId, PointId)>> = BTreeMap::new();
        for &p in &domain {
            if !reg.is_owned(p) {
                continue;
            }
            let gid = mesh.gid(p)?;
            for r in reg.sharers(p) {
                sends.entry(r).or_default().push((gid, p));
            }
        }
        for list in sends.values_mut() {
            list.sort_unstable();
        }
        let counts: BTreeMap<usize, usize> = sends.iter().map(|(&r, l)| (r, l.len())).collect();
        let others: BTreeSet<usize> = (0..comm.size()).filter(|&r| r != me).collect();
        let recv_counts = exchange_sizes_symmetric(&counts, comm, tags::TAG_PLAN, &others)?
            .into_iter()
            .filter(|&(_, n)| n > 0)
            .collect();
        Ok(Self {
            epoch: reg.epoch(),
            generation,
            domain,
            sends,
            recv_counts,
        })
    }

    fn is_current(&self, reg: &PartitionRegistry) -> bool {
        self.epoch == reg.epoch()
    }

    /// Destination ranks and their record counts.
    pub fn send_counts(&self) -> BTreeMap<usize, usize> {
        self.sends.iter().map(|(&r, l)| (r, l.len())).collect()
    }

    /// Source ranks and the record counts they will deliver.
    pub fn recv_counts(&self) -> &BTreeMap<usize, usize> {
        &self.recv_counts
    }

    pub fn domain(&self) -> &[PointId] {
        &self.domain
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of one exchange on this rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    pub sent_records: usize,
    pub received_records: usize,
    pub bytes_sent: usize,
}

#[derive(Clone, Debug, Default)]
pub struct TagExchangeEngine {
    wait: WaitPolicy,
    plans: HashMap<Vec<PointId>, ExchangePlan>,
    plan_builds: usize,
}

impl TagExchangeEngine {
    pub fn new(wait: WaitPolicy) -> Self {
        Self {
            wait,
            ..Self::default()
        }
    }

    /// How many plans were built so far (cache misses).
    pub fn plan_builds(&self) -> usize {
        self.plan_builds
    }

    /// Overwrite every ghost of `domain` with its owner's current values of
    /// `tag`, and push every shared owned entity of `domain` to its sharers.
    /// Collective.
    ///
    /// # Errors
    /// `MissingOwner` if a ghost in `domain` has no owner entry or its
    /// owner did not send it; communication errors on lost messages.
    pub fn exchange<C: Communicator>(
        &mut self,
        comm: &C,
        mesh: &LocalMesh,
        reg: &PartitionRegistry,
        store: &mut FieldStore,
        tag: TagId,
        domain: &[PointId],
    ) -> Result<ExchangeStats, MeshHaloError> {
        let me = comm.rank();
        let width = store.width(tag)?;
        let tag_name = store.name(tag)?.to_string();
        let mut key = domain.to_vec();
        key.sort_unstable();
        key.dedup();

        let cached = self
            .plans
            .get(&key)
            .filter(|plan| plan.is_current(reg))
            .map(ExchangePlan::generation);
        if needs_rebuild(comm, cached)? {
            self.plan_builds += 1;
            let plan = ExchangePlan::build(comm, mesh, reg, key.clone(), self.plan_builds as u64)?;
            self.plans.insert(key.clone(), plan);
        }
        let plan = self
            .plans
            .get(&key)
            .ok_or_else(|| MeshHaloError::Invariant("exchange plan vanished".into()))?;

        // errors found once the round started are held until every rank is through
        let mut deferred: Option<MeshHaloError> = None;

        // pack
        let mut stats = ExchangeStats::default();
        let mut outgoing: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
        let default = store.default_value(tag)?.to_vec();
        for (&dst, list) in &plan.sends {
            let mut buf = ExchangeBuffer::with_capacity(width, list.len());
            for &(gid, p) in list {
                match store.get(tag, p) {
                    Some(values) => buf.push(gid, values),
                    None => {
                        // keep the record count the peer expects
                        deferred.get_or_insert(MeshHaloError::OutsideTagDomain {
                            tag: tag_name.clone(),
                            gid,
                        });
                        buf.push(gid, &default);
                    }
                }
            }
            stats.sent_records += buf.len();
            stats.bytes_sent += buf.byte_len();
            outgoing.insert(dst, buf.into_words());
        }
        let expect: BTreeMap<usize, usize> = plan
            .recv_counts
            .iter()
            .map(|(&r, &n)| (r, n * (1 + width)))
            .collect();

        let received = exchange_data(
            &outgoing,
            &expect,
            comm,
            ExchangeTags::from_base(tags::TAG_VALUES).data,
            KIND_VALUES,
        )?;

        // unpack
        let mut written: HashSet<PointId> = HashSet::new();
        for (src, words) in received {
            for (gid, values) in ExchangeBuffer::records(&words, width) {
                stats.received_records += 1;
                let p = match mesh.handle_or_err(gid) {
                    Ok(p) => p,
                    Err(e) => {
                        deferred.get_or_insert(e);
                        continue;
                    }
                };
                if reg.owner(p) != Some(src) {
                    log::warn!("rank {me}: rank {src} sent {gid} of `{tag_name}` without owning it");
                    continue;
                }
                if key.binary_search(&p).is_err() {
                    continue;
                }
                if store.write_received(tag, p, &values) {
                    written.insert(p);
                } else {
                    deferred.get_or_insert(MeshHaloError::OutsideTagDomain {
                        tag: tag_name.clone(),
                        gid,
                    });
                }
            }
        }
        if self.wait == WaitPolicy::WaitAll {
            comm.barrier()?;
        }
        if let Some(e) = deferred {
            return Err(e);
        }

        // ghosts without an owner entry end up here too
        for &p in &key {
            if !reg.is_owned(p) && !written.contains(&p) {
                return Err(MeshHaloError::MissingOwner {
                    gid: mesh.gid(p)?,
                    rank: me,
                    tag: tag_name,
                });
            }
        }
        log::debug!(
            "rank {me}: exchanged `{tag_name}`: sent {}, received {}",
            stats.sent_records,
            stats.received_records
        );
        Ok(stats)
    }
}

/// Collective: true unless every rank holds a current plan from the same
/// handshake.
fn needs_rebuild<C: Communicator>(comm: &C, cached: Option<u64>) -> Result<bool, MeshHaloError> {
    if comm.size() == 1 {
        return Ok(cached.is_none());
    }
    let g = cached.map_or(-1.0, |g| g as f64);
    match allreduce(comm, &[g, -g], ReduceOp::Max)?.as_slice() {
        &[newest, neg_oldest] => Ok(newest < 0.0 || newest != -neg_oldest),
        other => Err(MeshHaloError::Invariant(format!(
            "plan agreement reduced to {} values",
            other.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::entity::EntityDef;

    #[test]
    fn buffer_layout() {
        let mut buf = ExchangeBuffer::with_capacity(2, 2);
        buf.push(GlobalId(3), &[1.0, 2.0]);
        buf.push(GlobalId(9), &[-1.0, 0.5]);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.byte_len(), 2 * 3 * 8);
        let words = buf.into_words();
        let recs: Vec<_> = ExchangeBuffer::records(&words, 2).collect();
        assert_eq!(recs[1], (GlobalId(9), vec![-1.0, 0.5]));
    }

    #[test]
    fn serial_exchange_is_a_no_op_and_plan_is_cached() {
        let mesh = LocalMesh::from_defs(0, vec![EntityDef::vertex(1, [1.0, 0.0, 0.0])]).unwrap();
        let reg = PartitionRegistry::local_only(&mesh);
        let mut store = FieldStore::new();
        let all: Vec<_> = mesh.entities().collect();
        let tag = store.create_tag("s", 1, &[4.0], all.clone()).unwrap();
        let mut engine = TagExchangeEngine::default();
        for _ in 0..3 {
            let stats = engine
                .exchange(&NoComm, &mesh, &reg, &mut store, tag, &all)
                .unwrap();
            assert_eq!(stats, ExchangeStats::default());
        }
        assert_eq!(engine.plan_builds(), 1);
        assert_eq!(store.get(tag, all[0]), Some(&[4.0][..]));
    }

    #[test]
    fn ghost_without_owner_entry_is_missing_owner() {
        let mesh = LocalMesh::from_defs(0, vec![EntityDef::vertex(1, [1.0, 0.0, 0.0])]).unwrap();
        let reg = PartitionRegistry::new(0);
        let mut store = FieldStore::new();
        let all: Vec<_> = mesh.entities().collect();
        let tag = store.create_tag("s", 1, &[0.0], all.clone()).unwrap();
        let err = TagExchangeEngine::default()
            .exchange(&NoComm, &mesh, &reg, &mut store, tag, &all)
            .unwrap_err();
        assert_eq!(
            err,
            MeshHaloError::MissingOwner {
                gid: GlobalId(1),
                rank: 0,
                tag: "s".into()
            }
        );
    }
}
