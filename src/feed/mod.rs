//! Exchange feeders and the registry that groups them.

pub mod backoff;
pub mod feeder;
pub mod registry;
pub mod state;

pub use feeder::Feeder;
pub use registry::FeedRegistry;
pub use state::FeedStats;
