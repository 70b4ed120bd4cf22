pub mod accumulator;
pub mod flush;
pub mod reconcile;
pub mod service;
pub mod tiers;

pub use accumulator::*;
pub use flush::*;
pub use reconcile::*;
pub use service::*;
pub use tiers::*;
