//! Collective wall-time measurement of named phases.
//!
//! `push` starts a phase, `pop` stops the innermost one, reduces the elapsed
//! time across ranks (max and average), normalises it by the iteration
//! count, and broadcasts the result so every rank records the same
//! [`PhaseRecord`]. Only rank 0 logs.

use crate::algs::communicator::Communicator;
use crate::algs::reduction::{ReduceOp, broadcast, reduce_to_root};
use crate::mesh_error::MeshHaloError;
use serde::Serialize;
use std::time::Instant;

/// Reduced timing of one phase, in seconds per iteration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseRecord {
    pub label: String,
    pub max: f64,
    pub avg: f64,
    pub iterations: usize,
}

#[derive(Debug, Default)]
pub struct PhaseTimer {
    stack: Vec<(String, Instant)>,
    records: Vec<PhaseRecord>,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a phase. Phases nest.
    pub fn push(&mut self, label: &str) {
        self.stack.push((label.to_string(), Instant::now()));
    }

    /// Stop the innermost phase and reduce it across ranks. Collective.
    ///
    /// # Errors
    /// `TimerUnderflow` (fatal) if no phase is active.
    pub fn pop<C: Communicator>(
        &mut self,
        comm: &C,
        n_iterations: usize,
    ) -> Result<&PhaseRecord, MeshHaloError> {
        let (label, start) = self.stack.pop().ok_or(MeshHaloError::TimerUnderflow)?;
        let local = start.elapsed().as_secs_f64();
        self.finish(comm, label, local, n_iterations)
    }

    pub(crate) fn finish<C: Communicator>(
        &mut self,
        comm: &C,
        label: String,
        local_elapsed: f64,
        n_iterations: usize,
    ) -> Result<&PhaseRecord, MeshHaloError> {
        let iterations = n_iterations.max(1);
        let size = comm.size().max(1);
        let (max, sum) = if size == 1 {
            (local_elapsed, local_elapsed)
        } else {
            let maxes = reduce_to_root(comm, 0, &[local_elapsed], ReduceOp::Max)?;
            let sums = reduce_to_root(comm, 0, &[local_elapsed], ReduceOp::Sum)?;
            let root = match (maxes, sums) {
                (Some(m), Some(s)) => Some([m[0], s[0]]),
                _ => None,
            };
            let both = broadcast(comm, 0, root.as_ref().map(|r| &r[..]))?;
            match both.as_slice() {
                [m, s] => (*m, *s),
                _ => {
                    return Err(MeshHaloError::comm(0, "phase timer broadcast was truncated"));
                }
            }
        };
        let record = PhaseRecord {
            label,
            max: max / iterations as f64,
            avg: sum / size as f64 / iterations as f64,
            iterations,
        };
        if comm.rank() == 0 {
            log::info!(
                "[{}] max {:.6e} s, avg {:.6e} s ({} iterations)",
                record.label,
                record.max,
                record.avg,
                record.iterations
            );
        }
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    /// Max time of the most recent phase, if any.
    pub fn last_elapsed(&self) -> Option<f64> {
        self.records.last().map(|r| r.max)
    }

    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    /// Most recent record with this label.
    pub fn record(&self, label: &str) -> Option<&PhaseRecord> {
        self.records.iter().rev().find(|r| r.label == label)
    }

    /// Number of phases still running.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}
