//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable**; callers `.wait()` before trusting a buffer.
//! Delivery between a pair of ranks is FIFO per tag.
//!
//! Every collective round in this crate posts its sends before its receives,
//! so a backend may complete a receive eagerly inside `irecv`.

use crate::mesh_error::MeshHaloError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Non-blocking point-to-point communication plus the few collectives we need.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer` under `tag`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive from `peer` under `tag`; `buf.len()` is the expected size.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Block until every rank reached the barrier.
    ///
    /// # Errors
    /// `BarrierTimeout` if the other ranks did not arrive in time; this
    /// rank's arrival is withdrawn so later barriers stay aligned.
    fn barrier(&self) -> Result<(), MeshHaloError>;

    /// True for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    ///
    /// `None` from a receive handle means the message was lost or timed out.
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(v: u16) -> Self {
        CommTag(v)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Tag pair for a two-stage (counts, then payload) exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Tag bases reserved for each protocol round. Each base owns `base..base+0x10`.
pub mod tags {
    use super::CommTag;

    pub const OWNERSHIP_QUERY: CommTag = CommTag(0x1000);
    pub const OWNERSHIP_REPLY: CommTag = CommTag(0x1010);
    pub const ADJACENCY_PUBLISH: CommTag = CommTag(0x2000);
    pub const ADJACENCY_QUERY: CommTag = CommTag(0x2010);
    pub const ADJACENCY_REPLY: CommTag = CommTag(0x2020);
    pub const GHOST_REQUEST: CommTag = CommTag(0x2030);
    pub const GHOST_DEFINITIONS: CommTag = CommTag(0x2040);
    pub const GHOST_NOTIFY: CommTag = CommTag(0x2050);
    pub const THIN_LAYER: CommTag = CommTag(0x3000);
    pub const TAG_PLAN: CommTag = CommTag(0x4000);
    pub const TAG_VALUES: CommTag = CommTag(0x4010);
    pub const REDUCTION: CommTag = CommTag(0x5000);
}

/// Compile-time no-op comm for pure serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) -> Result<(), MeshHaloError> {
        Ok(())
    }
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: one thread per rank inside one process ---

type Key = (usize, usize, u16); // (src, dst, tag)

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

struct Shared {
    size: usize,
    mailbox: DashMap<Key, VecDeque<Bytes>>,
    signal: Mutex<u64>,
    delivered: Condvar,
    barrier: Mutex<BarrierState>,
    released: Condvar,
}

impl Shared {
    fn pop(&self, key: &Key) -> Option<Bytes> {
        self.mailbox.get_mut(key).and_then(|mut q| q.pop_front())
    }
}

/// Handle for a pending in-process receive.
pub struct LocalHandle {
    shared: Arc<Shared>,
    key: Key,
    timeout: Duration,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut guard = self.shared.signal.lock();
        loop {
            if let Some(bytes) = self.shared.pop(&self.key) {
                return Some(bytes.to_vec());
            }
            if self
                .shared
                .delivered
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.shared.pop(&self.key).map(|b| b.to_vec());
            }
        }
    }
}

/// In-process communicator: every rank is a thread sharing one mailbox.
#[derive(Clone)]
pub struct RayonComm {
    rank: usize,
    shared: Arc<Shared>,
    timeout: Duration,
}

impl std::fmt::Debug for RayonComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonComm")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

impl RayonComm {
    /// Create `size` connected communicators, one per rank.
    pub fn world(size: usize) -> Vec<RayonComm> {
        let shared = Arc::new(Shared {
            size,
            mailbox: DashMap::new(),
            signal: Mutex::new(0),
            delivered: Condvar::new(),
            barrier: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        });
        (0..size)
            .map(|rank| RayonComm {
                rank,
                shared: shared.clone(),
                timeout: DEFAULT_TIMEOUT,
            })
            .collect()
    }

    /// Override how long receives and barriers wait before giving up.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.shared
            .mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        let mut n = self.shared.signal.lock();
        *n = n.wrapping_add(1);
        self.shared.delivered.notify_all();
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> LocalHandle {
        LocalHandle {
            shared: self.shared.clone(),
            key: (peer, self.rank, tag),
            timeout: self.timeout,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<(), MeshHaloError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.shared.barrier.lock();
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.shared.size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.shared.released.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            if self
                .shared
                .released
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.generation == generation
            {
                state.arrived -= 1;
                return Err(MeshHaloError::BarrierTimeout {
                    rank: self.rank,
                    arrived: state.arrived,
                    size: self.shared.size,
                });
            }
        }
        Ok(())
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::mesh_error::MeshHaloError;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI communicator. Owns the MPI universe: dropping it finalises MPI.
    pub struct MpiComm {
        // field order matters: the communicator must drop before the universe
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, MeshHaloError> {
            let universe = mpi::initialize().ok_or_else(|| {
                MeshHaloError::comm(0, "MPI is already initialised or unavailable")
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// Pending MPI send. The payload is owned by the handle until completion.
    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        data: *mut [u8],
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `data` came from `Box::into_raw` in `isend` and the request
            // referencing it has completed above.
            unsafe { drop(Box::from_raw(self.data)) };
        }
    }

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            drop(self);
            None
        }
    }

    /// Completed MPI receive.
    pub struct MpiRecvHandle(Option<Vec<u8>>);

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let ptr: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: freed only in `Drop`, after the request completed.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, i32::from(tag));
            MpiSendHandle {
                req: Some(req),
                data: ptr,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecvHandle {
            let (msg, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag));
            MpiRecvHandle(Some(msg))
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) -> Result<(), MeshHaloError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
