//! Distributed algorithms: message passing, ghost growth, exchange.

pub mod communicator;
pub mod completion;
pub mod distribute;
pub mod ghost_layers;
pub mod reduction;
pub mod tag_exchange;
pub mod thin_layer;
pub mod wire;

pub use completion::{WaitPolicy, all_to_all, sparse_exchange};
pub use ghost_layers::{GhostLayerBuilder, GhostOpts, GrowthStats};
pub use tag_exchange::{ExchangePlan, TagExchangeEngine};
pub use thin_layer::ThinLayerCorrector;
