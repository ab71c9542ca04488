//! MeshHaloError: unified error type for mesh-halo public APIs.
//!
//! Every variant belongs to one [`ErrorCategory`]. The category decides how a
//! failure is reported and which exit status the driver returns; none of them
//! is retried inside the library.

use crate::topology::point::{GlobalId, PointId};
use thiserror::Error;

/// Coarse failure classes used for reporting and process exit codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// Ownership or identifier inconsistency.
    DataIntegrity,
    /// Message loss, timeout or an unreadable wire format.
    Communication,
    /// A ghost entity whose owner cannot be resolved.
    MissingOwner,
    /// Invalid tag layout, unsupported mesh extension, bad option.
    Configuration,
    /// Internal invariant violation.
    Fatal,
}

impl ErrorCategory {
    /// Non-zero process exit status for this category.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCategory::DataIntegrity => 2,
            ErrorCategory::Communication => 3,
            ErrorCategory::MissingOwner => 4,
            ErrorCategory::Configuration => 5,
            ErrorCategory::Fatal => 6,
        }
    }

    /// Whether the whole distributed run must stop immediately.
    pub fn aborts_run(self) -> bool {
        matches!(self, ErrorCategory::Communication | ErrorCategory::Fatal)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::DataIntegrity => "data integrity",
            ErrorCategory::Communication => "communication",
            ErrorCategory::MissingOwner => "missing owner",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Unified error type for mesh-halo operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshHaloError {
    /// Attempted to construct a PointId with a zero value.
    #[error("PointId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidPointId,
    /// The same global id was inserted twice on one rank.
    #[error("rank {rank}: duplicate global id {gid}")]
    DuplicateGlobalId { gid: GlobalId, rank: usize },
    /// Ranks disagree on the partitioner-supplied owner of an entity.
    #[error("global id {gid}: conflicting owners {first} and {second}")]
    OwnerConflict {
        gid: GlobalId,
        first: usize,
        second: usize,
    },
    /// A cone or message referenced a global id unknown to this rank.
    #[error("rank {rank}: unknown global id {gid}")]
    UnknownGlobalId { gid: GlobalId, rank: usize },
    /// A local handle is not present in the mesh.
    #[error("rank {rank}: unknown entity handle {point}")]
    UnknownEntity { point: PointId, rank: usize },
    /// A local entity has no ownership entry.
    #[error("rank {rank}: entity {gid} has no ownership entry")]
    MissingOwnership { gid: GlobalId, rank: usize },
    /// Mesh input could not be parsed or is structurally invalid.
    #[error("mesh input: {0}")]
    MeshIo(String),

    /// Send/receive failure with a neighbour.
    #[error("communication with rank {neighbor} failed: {message}")]
    CommError { neighbor: usize, message: String },
    /// A receive did not complete in time.
    #[error("timed out waiting for rank {neighbor} (tag {tag:#06x})")]
    CommTimeout { neighbor: usize, tag: u16 },
    /// Not every rank reached a barrier in time.
    #[error("rank {rank}: barrier timed out with {arrived} of {size} ranks arrived")]
    BarrierTimeout {
        rank: usize,
        arrived: usize,
        size: usize,
    },
    /// A peer sent a message in an incompatible wire format.
    #[error("unsupported wire format from rank {neighbor}: {message}")]
    WireFormat { neighbor: usize, message: String },

    /// A ghost entity has no owner that delivered its value.
    #[error("rank {rank}: ghost {gid} of tag `{tag}` has no resolvable owner")]
    MissingOwner {
        gid: GlobalId,
        rank: usize,
        tag: String,
    },

    /// Tag width must be at least one value.
    #[error("tag `{tag}`: invalid width {width}")]
    InvalidTagWidth { tag: String, width: usize },
    /// A tag with this name already exists.
    #[error("tag `{0}` already exists")]
    DuplicateTag(String),
    /// No tag with this name/handle.
    #[error("unknown tag `{0}`")]
    UnknownTag(String),
    /// Entity is outside the tag's domain.
    #[error("tag `{tag}`: entity {gid} is outside the tag domain")]
    OutsideTagDomain { tag: String, gid: GlobalId },
    /// No format driver for this file extension.
    #[error("unsupported mesh extension `{0}`")]
    UnsupportedExtension(String),
    /// Any other invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `pop` without a matching `push`.
    #[error("phase timer popped without an active phase")]
    TimerUnderflow,
    /// Owner computation attempted on a non-owned entity.
    #[error("rank {rank}: tag `{tag}` computed on non-owned entity {gid}")]
    GhostWrite {
        gid: GlobalId,
        rank: usize,
        tag: String,
    },
    /// Any other invariant violation.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl MeshHaloError {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        use MeshHaloError::*;
        match self {
            InvalidPointId
            | DuplicateGlobalId { .. }
            | OwnerConflict { .. }
            | UnknownGlobalId { .. }
            | UnknownEntity { .. }
            | MissingOwnership { .. }
            | MeshIo(_) => ErrorCategory::DataIntegrity,
            CommError { .. } | CommTimeout { .. } | BarrierTimeout { .. } | WireFormat { .. } => {
                ErrorCategory::Communication
            }
            MissingOwner { .. } => ErrorCategory::MissingOwner,
            InvalidTagWidth { .. }
            | DuplicateTag(_)
            | UnknownTag(_)
            | OutsideTagDomain { .. }
            | UnsupportedExtension(_)
            | InvalidConfig(_) => ErrorCategory::Configuration,
            TimerUnderflow | GhostWrite { .. } | Invariant(_) => ErrorCategory::Fatal,
        }
    }

    pub(crate) fn comm(neighbor: usize, message: impl Into<String>) -> Self {
        MeshHaloError::CommError {
            neighbor,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_and_exit_codes() {
        let e = MeshHaloError::CommTimeout {
            neighbor: 1,
            tag: 0x2000,
        };
        assert_eq!(e.category(), ErrorCategory::Communication);
        assert!(e.category().aborts_run());

        let e = MeshHaloError::MissingOwner {
            gid: GlobalId(7),
            rank: 0,
            tag: "scalar_variable".into(),
        };
        assert_eq!(e.category(), ErrorCategory::MissingOwner);
        assert!(!e.category().aborts_run());
        assert!(e.to_string().contains("scalar_variable"));

        let codes: std::collections::HashSet<u8> = [
            ErrorCategory::DataIntegrity,
            ErrorCategory::Communication,
            ErrorCategory::MissingOwner,
            ErrorCategory::Configuration,
            ErrorCategory::Fatal,
        ]
        .iter()
        .map(|c| c.exit_code())
        .collect();
        assert_eq!(codes.len(), 5);
        assert!(!codes.contains(&0));
    }
}
